//! Resolve a whole collection, reading as little as possible from the remote
//! store.

use std::sync::Arc;

use chrono::Utc;
use futures_util::future::join_all;
use kraken_cache::{CacheStore, DocumentCache, Freshness};
use kraken_core::{
    CollectionLayout, Document, EngineConfig, IdentityDescriptor, KrakenResult, Model,
    PreconditionError, RemoteConnector, RemoteStore, RunOptions, SerializedContainer,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{InPhase, SyncError, SyncPhase};
use crate::fetcher::ChunkedFetcher;
use crate::migrator::{MigrationReport, SchemaMigrator};
use crate::progress::{ProgressChannel, WorkerMessage};

/// Combines the document cache, the chunked fetcher and the schema migrator
/// into one "resolve the full collection" operation.
pub struct SyncOrchestrator<S: CacheStore> {
    connector: Arc<dyn RemoteConnector>,
    cache: Arc<DocumentCache<S>>,
    config: EngineConfig,
    layout: CollectionLayout,
    migrator: SchemaMigrator,
}

impl<S: CacheStore> SyncOrchestrator<S> {
    /// Orchestrator for the movies collection.
    pub fn new(
        connector: Arc<dyn RemoteConnector>,
        cache: Arc<DocumentCache<S>>,
        config: EngineConfig,
    ) -> Self {
        let layout = CollectionLayout::movies();
        Self {
            connector,
            cache,
            config,
            migrator: SchemaMigrator::for_layout(&layout),
            layout,
        }
    }

    /// Synchronize another collection, with the default rules for it.
    pub fn with_layout(mut self, layout: CollectionLayout) -> Self {
        self.migrator = SchemaMigrator::for_layout(&layout);
        self.layout = layout;
        self
    }

    pub fn with_migrator(mut self, migrator: SchemaMigrator) -> Self {
        self.migrator = migrator;
        self
    }

    pub fn cache(&self) -> &Arc<DocumentCache<S>> {
        &self.cache
    }

    pub fn layout(&self) -> &CollectionLayout {
        &self.layout
    }

    /// Resolve the collection for `identity` and serialize it.
    ///
    /// The remote session is closed before returning, whether the run
    /// succeeded or not.
    pub async fn run(
        &self,
        identity: &IdentityDescriptor,
        options: &RunOptions,
        progress: &ProgressChannel,
    ) -> Result<SerializedContainer, SyncError> {
        progress.message("Loading user data...");
        let remote = self
            .connector
            .connect(identity)
            .await
            .in_phase(SyncPhase::Connect)?;

        let result = self.synchronize(remote.as_ref(), options, progress).await;
        remote.close().await;

        match &result {
            Ok(container) => tracing::info!(
                identity = %identity.id,
                members = container.len(),
                "Synchronization complete"
            ),
            Err(e) => tracing::warn!(identity = %identity.id, error = %e, "Synchronization failed"),
        }
        result
    }

    async fn synchronize(
        &self,
        remote: &dyn RemoteStore,
        options: &RunOptions,
        progress: &ProgressChannel,
    ) -> Result<SerializedContainer, SyncError> {
        progress.message("Loading collection metadata...");
        let mut container = self
            .resolve_container(remote)
            .await
            .in_phase(SyncPhase::ResolveContainer)?;
        let container_url = container
            .url()
            .map(str::to_string)
            .ok_or_else(|| self.container_without_url())
            .in_phase(SyncPhase::ResolveContainer)?;

        let documents: Vec<Document> = container
            .relation(&self.layout.documents_relation)
            .unwrap_or_default()
            .iter()
            .filter_map(Document::from_model)
            .filter(|document| !options.is_ignored(&document.url))
            .collect();

        let (mut members, needs_fetch) = self.partition(&documents).await;
        tracing::info!(
            documents = documents.len(),
            cached = documents.len() - needs_fetch.len(),
            to_fetch = needs_fetch.len(),
            "Collection documents partitioned"
        );

        let fetched = ChunkedFetcher::new(remote, &self.cache, &self.layout, self.config.chunk_size)
            .fetch(&container_url, &needs_fetch, progress)
            .await
            .in_phase(SyncPhase::FetchMembers)?;
        members.extend(fetched);

        if let Some(capability) = remote.schema_capability() {
            let report = {
                let mut targets: Vec<&mut Model> = std::iter::once(&mut container)
                    .chain(members.iter_mut())
                    .collect();
                self.migrator
                    .run(&mut targets, capability, options, progress)
                    .await
            };
            self.remember_migrated(&container, &members, &documents, &report)
                .await;
        }

        progress.message("Almost done...");
        container.set_relation(self.layout.member_relation.clone(), members);
        Ok(SerializedContainer::from_container(&container, &self.layout))
    }

    fn container_without_url(&self) -> kraken_core::KrakenError {
        PreconditionError::ModelWithoutDocument {
            type_name: self.layout.container_type.clone(),
        }
        .into()
    }

    /// Use the cached container when its document is fresh enough, otherwise
    /// read it and cache it under the local read time.
    async fn resolve_container(&self, remote: &dyn RemoteStore) -> KrakenResult<Model> {
        if let Some(document) = remote.container_document(&self.layout).await? {
            let freshness = Freshness::within(self.config.container_tolerance());
            if let Some(read) = self.cache.get_from_document(&document, freshness).await {
                let cached = read.into_value().into_iter().find(|model| {
                    model.type_name() == self.layout.container_type
                        && model.is_relation_loaded(&self.layout.documents_relation)
                });
                if let Some(container) = cached {
                    tracing::debug!(container = %document.url, "Using cached container");
                    return Ok(container);
                }
            }
        }

        let read_at = Utc::now();
        let container = remote.load_container(&self.layout).await?;
        let document_url = container
            .document_url()
            .ok_or_else(|| self.container_without_url())?;

        self.cache.remember_document(document_url, read_at).await;
        self.remember_container(&container).await?;
        Ok(container)
    }

    async fn remember_container(&self, container: &Model) -> KrakenResult<()> {
        let relation = self.layout.documents_relation.as_str();
        let documents = container.relation(relation).unwrap_or_default();
        self.cache.remember(container, &[(relation, documents)]).await
    }

    /// Split `documents` into cached members and documents to fetch.
    async fn partition(&self, documents: &[Document]) -> (Vec<Model>, Vec<Document>) {
        let freshness = Freshness::within(self.config.member_tolerance());
        let reads = join_all(
            documents
                .iter()
                .map(|document| self.cache.get_from_document(document, freshness)),
        )
        .await;

        let mut members = Vec::new();
        let mut needs_fetch = Vec::new();
        for (document, read) in documents.iter().zip(reads) {
            match read {
                Some(read) => members.extend(
                    read.into_value()
                        .into_iter()
                        .filter(|model| model.type_name() == self.layout.member_type),
                ),
                None => needs_fetch.push(document.clone()),
            }
        }
        (members, needs_fetch)
    }

    /// Re-cache migrated targets. The targets are already saved remotely, so
    /// a cache write failing here is logged and the run goes on.
    async fn remember_migrated(
        &self,
        container: &Model,
        members: &[Model],
        documents: &[Document],
        report: &MigrationReport,
    ) {
        let relation = self.layout.member_sub_relation.as_str();
        for url in &report.migrated {
            let result = if container.url() == Some(url.as_str()) {
                self.remember_container(container).await
            } else {
                let Some(member) = members.iter().find(|m| m.url() == Some(url.as_str())) else {
                    continue;
                };
                let backed = member
                    .document_url()
                    .is_some_and(|document_url| documents.iter().any(|d| d.url == document_url));
                if !backed {
                    tracing::debug!(target = %url, "Migrated member outside backing documents, not cached");
                    continue;
                }
                let items = member.relation(relation).unwrap_or_default();
                self.cache.remember(member, &[(relation, items)]).await
            };

            if let Err(e) = result {
                tracing::warn!(target = %url, error = %e, "Failed to cache migrated target");
            }
        }
    }
}

impl<S: CacheStore> SyncOrchestrator<S> {
    /// Run a synchronization on the tokio runtime.
    ///
    /// The host reads progress and answers the confirmation request through
    /// the returned handle. Dropping the handle's receiver declines any
    /// pending confirmation; the run itself continues.
    pub fn spawn(
        self: &Arc<Self>,
        identity: IdentityDescriptor,
        options: RunOptions,
    ) -> SyncHandle {
        let (progress, messages) = ProgressChannel::channel();
        let orchestrator = Arc::clone(self);
        let task = tokio::spawn(async move {
            orchestrator.run(&identity, &options, &progress).await
        });
        SyncHandle { messages, task }
    }
}

/// Host side of a spawned synchronization.
pub struct SyncHandle {
    messages: mpsc::UnboundedReceiver<WorkerMessage>,
    task: JoinHandle<Result<SerializedContainer, SyncError>>,
}

impl SyncHandle {
    /// Next message from the run. `None` once the run has finished.
    pub async fn next_message(&mut self) -> Option<WorkerMessage> {
        self.messages.recv().await
    }

    /// Wait for the result, dropping any messages not yet read.
    pub async fn join(self) -> Result<SerializedContainer, SyncError> {
        let Self { messages, task } = self;
        drop(messages);
        task.await.map_err(|e| SyncError::Aborted {
            reason: e.to_string(),
        })?
    }
}
