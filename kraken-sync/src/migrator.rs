//! Legacy schema detection and migration.
//!
//! Each [`SchemaRule`] recognises one legacy shape. Detection is a pure
//! predicate over the model's attributes and the metadata of the document it
//! was read from. Migration runs at most once per synchronization, after the
//! host (or a pre-supplied option) approves it, and persists every migrated
//! target through the remote store's [`SchemaCapability`].

use kraken_core::{
    CollectionLayout, DocumentMetadata, MigrationError, Model, RunOptions, SchemaCapability,
};
use serde_json::Value;

use crate::progress::{ProgressChannel, ProgressEvent};

/// Question put to the host when legacy targets are found.
pub const MIGRATION_QUESTION: &str =
    "Some of your documents use an outdated format. Do you want to update them?";

/// Shape of a target as seen by the migrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaState {
    Current,
    Legacy,
}

/// One legacy shape and how to upgrade it.
pub trait SchemaRule: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this rule inspects models like `model` at all.
    fn applies_to(&self, model: &Model) -> bool;

    /// Pure legacy check. Must return `false` for anything `migrate` produced.
    fn is_legacy(&self, model: &Model, metadata: Option<&DocumentMetadata>) -> bool;

    /// Rewrite `model` into the current shape.
    fn migrate(
        &self,
        model: &mut Model,
        metadata: Option<&DocumentMetadata>,
    ) -> Result<(), MigrationError>;
}

/// Containers written before they carried a name and a description link.
#[derive(Debug, Clone)]
pub struct ContainerSchemaRule {
    container_type: String,
    collection_name: String,
}

impl ContainerSchemaRule {
    pub fn new(layout: &CollectionLayout) -> Self {
        Self {
            container_type: layout.container_type.clone(),
            collection_name: layout.name.clone(),
        }
    }
}

impl SchemaRule for ContainerSchemaRule {
    fn name(&self) -> &'static str {
        "container"
    }

    fn applies_to(&self, model: &Model) -> bool {
        model.type_name() == self.container_type
    }

    fn is_legacy(&self, model: &Model, metadata: Option<&DocumentMetadata>) -> bool {
        let described = metadata.and_then(|m| m.described_by.as_ref()).is_some();
        model.attribute("name").is_none() || (described && model.attribute("describedBy").is_none())
    }

    fn migrate(
        &self,
        model: &mut Model,
        metadata: Option<&DocumentMetadata>,
    ) -> Result<(), MigrationError> {
        if model.attribute("name").is_none() {
            model.set_attribute("name", Value::from(self.collection_name.as_str()));
        }
        if let Some(described_by) = metadata.and_then(|m| m.described_by.as_deref()) {
            model.set_attribute("describedBy", Value::from(described_by));
        }
        Ok(())
    }
}

/// Movies that stored their watch date as a flat `watchedAt` attribute.
#[derive(Debug, Clone)]
pub struct WatchActionRule {
    member_type: String,
    sub_relation: String,
}

impl WatchActionRule {
    pub const LEGACY_ATTRIBUTE: &'static str = "watchedAt";

    pub fn new(layout: &CollectionLayout) -> Self {
        Self {
            member_type: layout.member_type.clone(),
            sub_relation: layout.member_sub_relation.clone(),
        }
    }
}

impl SchemaRule for WatchActionRule {
    fn name(&self) -> &'static str {
        "watch-action"
    }

    fn applies_to(&self, model: &Model) -> bool {
        model.type_name() == self.member_type
    }

    fn is_legacy(&self, model: &Model, _metadata: Option<&DocumentMetadata>) -> bool {
        model.attribute(Self::LEGACY_ATTRIBUTE).is_some()
    }

    fn migrate(
        &self,
        model: &mut Model,
        _metadata: Option<&DocumentMetadata>,
    ) -> Result<(), MigrationError> {
        let (Some(url), Some(document_url)) = (model.url(), model.document_url()) else {
            return Err(MigrationError::Rejected {
                target: model.type_name().to_string(),
                reason: "model has no url".to_string(),
            });
        };
        let (url, document_url) = (url.to_string(), document_url.to_string());

        let mut action = Model::new("WatchAction", Default::default());
        action
            .mint_url(&document_url)
            .map_err(|e| MigrationError::Rejected {
                target: url.clone(),
                reason: e.to_string(),
            })?;

        let Some(watched_at) = model.remove_attribute(Self::LEGACY_ATTRIBUTE) else {
            return Ok(());
        };
        action.set_attribute("object", Value::from(url));
        action.set_attribute("startTime", watched_at.clone());
        action.set_attribute("endTime", watched_at);

        match model.relation_mut(&self.sub_relation) {
            Some(actions) => actions.push(action),
            None => model.set_relation(self.sub_relation.clone(), vec![action]),
        }
        Ok(())
    }
}

/// Outcome of one migration pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Legacy targets found.
    pub legacy: usize,
    /// Whether the host (or options) declined migration.
    pub declined: bool,
    /// Urls of targets migrated and persisted.
    pub migrated: Vec<String>,
    /// Targets that failed and stay legacy.
    pub failed: Vec<MigrationError>,
}

struct LegacyTarget {
    index: usize,
    rule: usize,
    metadata: Option<DocumentMetadata>,
}

/// Detects legacy targets and, once approved, migrates them.
pub struct SchemaMigrator {
    rules: Vec<Box<dyn SchemaRule>>,
}

impl SchemaMigrator {
    pub fn new(rules: Vec<Box<dyn SchemaRule>>) -> Self {
        Self { rules }
    }

    /// Rules for the container and members of `layout`.
    pub fn for_layout(layout: &CollectionLayout) -> Self {
        Self::new(vec![
            Box::new(ContainerSchemaRule::new(layout)),
            Box::new(WatchActionRule::new(layout)),
        ])
    }

    /// Classify `model` given its document metadata.
    pub fn state(&self, model: &Model, metadata: Option<&DocumentMetadata>) -> SchemaState {
        match self.legacy_rule(model, metadata) {
            Some(_) => SchemaState::Legacy,
            None => SchemaState::Current,
        }
    }

    fn legacy_rule(&self, model: &Model, metadata: Option<&DocumentMetadata>) -> Option<usize> {
        self.rules
            .iter()
            .position(|rule| rule.applies_to(model) && rule.is_legacy(model, metadata))
    }

    async fn detect(
        &self,
        targets: &[&mut Model],
        capability: &dyn SchemaCapability,
    ) -> Vec<LegacyTarget> {
        let mut legacy = Vec::new();
        for (index, target) in targets.iter().enumerate() {
            let metadata = match target.document_url() {
                Some(document_url) => capability.document_metadata(document_url).await,
                None => None,
            };
            if let Some(rule) = self.legacy_rule(target, metadata.as_ref()) {
                legacy.push(LegacyTarget {
                    index,
                    rule,
                    metadata,
                });
            }
        }
        legacy
    }

    /// Detect legacy targets and migrate them if allowed.
    ///
    /// Asks the host at most once, and only when something is legacy.
    /// `options.migrate_schema` answers in advance. A target whose migration
    /// or save fails is left untouched.
    pub async fn run(
        &self,
        targets: &mut [&mut Model],
        capability: &dyn SchemaCapability,
        options: &RunOptions,
        progress: &ProgressChannel,
    ) -> MigrationReport {
        let legacy = self.detect(targets, capability).await;
        let mut report = MigrationReport {
            legacy: legacy.len(),
            ..Default::default()
        };
        if legacy.is_empty() {
            return report;
        }

        let approved = match options.migrate_schema {
            Some(approved) => approved,
            None => progress.confirm(MIGRATION_QUESTION).await,
        };
        if !approved {
            tracing::info!(legacy = report.legacy, "Schema migration declined");
            report.declined = true;
            return report;
        }

        for target in legacy {
            let rule = &self.rules[target.rule];
            let model = &mut targets[target.index];
            let url = model.url().unwrap_or_default().to_string();

            match Self::migrate_one(rule.as_ref(), model, target.metadata.as_ref(), capability)
                .await
            {
                Ok(migrated) => {
                    tracing::debug!(target = %url, rule = rule.name(), "Migrated legacy target");
                    **model = migrated;
                    report.migrated.push(url);
                }
                Err(e) => {
                    tracing::warn!(target = %url, rule = rule.name(), error = %e, "Migration failed");
                    progress.emit(ProgressEvent::MigrationFailed {
                        target: url,
                        reason: e.to_string(),
                    });
                    report.failed.push(e);
                }
            }
        }

        tracing::info!(
            migrated = report.migrated.len(),
            failed = report.failed.len(),
            "Schema migration finished"
        );
        report
    }

    async fn migrate_one(
        rule: &dyn SchemaRule,
        model: &Model,
        metadata: Option<&DocumentMetadata>,
        capability: &dyn SchemaCapability,
    ) -> Result<Model, MigrationError> {
        let mut migrated = model.clone();
        rule.migrate(&mut migrated, metadata)?;
        capability.save_model(&migrated).await?;

        for related in migrated.relations_mut().values_mut().flatten() {
            related.mark_persisted();
        }
        Ok(migrated)
    }
}
