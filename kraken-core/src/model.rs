//! Dynamic domain models and the registry that knows their shapes.
//!
//! Models mirror resources stored in the remote document store: a type name,
//! a flat attribute map and zero or more named relations holding related
//! models. The [`ModelRegistry`] maps type names to [`ModelClass`]
//! descriptions so that a model can be rebuilt from nothing but stored names
//! and attributes.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::document::DOCUMENT_TYPE;
use crate::error::PreconditionError;

/// Attribute map of a model. Ordered so that equal models serialize equally.
pub type Attributes = BTreeMap<String, Value>;

/// A domain object read from (or destined for) the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    type_name: String,
    attributes: Attributes,
    #[serde(default)]
    relations: BTreeMap<String, Vec<Model>>,
    #[serde(skip)]
    persisted: bool,
}

impl Model {
    /// Create a new, not yet persisted model.
    pub fn new(type_name: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            type_name: type_name.into(),
            attributes,
            relations: BTreeMap::new(),
            persisted: false,
        }
    }

    /// Instantiate a model that already exists in the remote store.
    ///
    /// Trusted mode: no identity rules are checked and the url is taken as is.
    pub fn from_persisted(type_name: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            persisted: true,
            ..Self::new(type_name, attributes)
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn attribute(&self, field: &str) -> Option<&Value> {
        self.attributes.get(field)
    }

    pub fn set_attribute(&mut self, field: impl Into<String>, value: Value) {
        self.attributes.insert(field.into(), value);
    }

    pub fn remove_attribute(&mut self, field: &str) -> Option<Value> {
        self.attributes.remove(field)
    }

    /// The model's resource url, if it has one.
    pub fn url(&self) -> Option<&str> {
        self.attributes.get("url").and_then(Value::as_str)
    }

    /// Url of the document that stores this model (the url without fragment).
    pub fn document_url(&self) -> Option<&str> {
        self.url()
            .map(|url| url.split_once('#').map_or(url, |(document, _)| document))
    }

    /// Mint a url for a new model stored in `document_url`.
    ///
    /// Minted urls take the form `<document>#<uuid>`. Persisted models keep
    /// their identity.
    pub fn mint_url(&mut self, document_url: &str) -> Result<&str, PreconditionError> {
        if self.persisted {
            return Err(PreconditionError::AlreadyPersisted {
                url: self.url().unwrap_or_default().to_string(),
            });
        }

        if self.url().is_none() {
            let url = format!("{}#{}", document_url, Uuid::now_v7());
            self.attributes.insert("url".to_string(), Value::String(url));
        }

        Ok(self.url().unwrap_or_default())
    }

    pub fn relations(&self) -> &BTreeMap<String, Vec<Model>> {
        &self.relations
    }

    pub fn relations_mut(&mut self) -> &mut BTreeMap<String, Vec<Model>> {
        &mut self.relations
    }

    pub fn is_relation_loaded(&self, relation: &str) -> bool {
        self.relations.contains_key(relation)
    }

    pub fn relation(&self, relation: &str) -> Option<&[Model]> {
        self.relations.get(relation).map(Vec::as_slice)
    }

    pub fn relation_mut(&mut self, relation: &str) -> Option<&mut Vec<Model>> {
        self.relations.get_mut(relation)
    }

    pub fn set_relation(&mut self, relation: impl Into<String>, models: Vec<Model>) {
        self.relations.insert(relation.into(), models);
    }

    /// Mark the model as stored remotely (after a successful save).
    pub fn mark_persisted(&mut self) {
        self.persisted = true;
    }
}

/// Shape description of one model type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelClass {
    pub name: String,
    /// Relation name -> related model type name.
    pub relations: BTreeMap<String, String>,
}

impl ModelClass {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            relations: BTreeMap::new(),
        }
    }

    pub fn with_relation(mut self, relation: impl Into<String>, related: impl Into<String>) -> Self {
        self.relations.insert(relation.into(), related.into());
        self
    }
}

/// Registry of known model classes, keyed by type name.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    classes: HashMap<String, ModelClass>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry for the media collection: containers, movies and watch actions.
    pub fn media() -> Self {
        let mut registry = Self::new();
        registry.register(ModelClass::new(DOCUMENT_TYPE));
        registry.register(
            ModelClass::new("MediaContainer")
                .with_relation("documents", DOCUMENT_TYPE)
                .with_relation("movies", "Movie"),
        );
        registry.register(ModelClass::new("Movie").with_relation("actions", "WatchAction"));
        registry.register(ModelClass::new("WatchAction"));
        registry
    }

    pub fn register(&mut self, class: ModelClass) {
        self.classes.insert(class.name.clone(), class);
    }

    pub fn class(&self, type_name: &str) -> Option<&ModelClass> {
        self.classes.get(type_name)
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.classes.contains_key(type_name)
    }

    /// Type name of the models held by `relation` on `type_name`.
    pub fn related_type(&self, type_name: &str, relation: &str) -> Result<&str, PreconditionError> {
        let class = self
            .class(type_name)
            .ok_or_else(|| PreconditionError::UnknownModelType {
                type_name: type_name.to_string(),
            })?;

        class
            .relations
            .get(relation)
            .map(String::as_str)
            .ok_or_else(|| PreconditionError::UnknownRelation {
                type_name: type_name.to_string(),
                relation: relation.to_string(),
            })
    }

    /// Rebuild a persisted model of a registered type.
    pub fn instantiate(
        &self,
        type_name: &str,
        attributes: Attributes,
    ) -> Result<Model, PreconditionError> {
        if !self.contains(type_name) {
            return Err(PreconditionError::UnknownModelType {
                type_name: type_name.to_string(),
            });
        }
        Ok(Model::from_persisted(type_name, attributes))
    }
}
