//! Kraken Test Utilities
//!
//! Centralized test infrastructure for the Kraken workspace:
//! - A mock remote store with failure injection and call recording
//! - Test fixtures for the movies collection
//! - Proptest generators for attributes, timestamps and models
//! - Custom assertions for Kraken-specific errors

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

pub use kraken_core::{
    Attributes, CollectionLayout, Document, DocumentMetadata, FetchError, IdentityDescriptor,
    KrakenError, KrakenResult, MigrationError, Model, ModelRegistry, PreconditionError,
    RemoteConnector, RemoteStore, SchemaCapability, Timestamp,
};

// ============================================================================
// MOCK REMOTE STORE
// ============================================================================

#[derive(Debug, Default)]
struct MockState {
    container: Option<Model>,
    container_updated_at: Option<Timestamp>,
    documents: Vec<Document>,
    /// Document url -> members stored in it (sub-items stripped).
    members: BTreeMap<String, Vec<Model>>,
    /// Member url -> sub-items.
    actions: HashMap<String, Vec<Model>>,
    failing_documents: HashSet<String>,
    failing_saves: HashSet<String>,
    fail_container: bool,
    schema_capable: bool,
    metadata: HashMap<String, DocumentMetadata>,
    fetch_calls: Vec<Vec<String>>,
    relation_calls: Vec<(String, String)>,
    container_loads: usize,
    closes: usize,
    saved: Vec<Model>,
}

/// In-memory stand-in for a remote document store.
///
/// Members fetched through [`RemoteStore::fetch_members`] come back without
/// their `actions` relation, which has to be loaded separately, the way a
/// real store returns them.
#[derive(Debug, Default)]
pub struct MockRemoteStore {
    state: Mutex<MockState>,
}

impl MockRemoteStore {
    /// A store holding an empty movies container at `container_url`.
    pub fn new(container_url: &str) -> Self {
        let store = Self::default();
        store.state().container = Some(fixtures::container(container_url));
        store
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the container model (attributes only; documents are kept).
    pub fn with_container(self, container: Model) -> Self {
        self.state().container = Some(container);
        self
    }

    /// Report the container's own document with this timestamp.
    pub fn with_container_updated_at(self, updated_at: Timestamp) -> Self {
        self.state().container_updated_at = Some(updated_at);
        self
    }

    /// Add a backing document holding `members`.
    pub fn with_document(self, url: &str, updated_at: Timestamp, members: Vec<Model>) -> Self {
        {
            let mut state = self.state();
            state.documents.push(Document::new(url, updated_at));
            let mut stripped = Vec::with_capacity(members.len());
            for member in members {
                let actions = member.relation("actions").map(<[Model]>::to_vec);
                if let (Some(actions), Some(member_url)) = (actions, member.url()) {
                    state.actions.insert(member_url.to_string(), actions);
                }
                stripped.push(strip_relations(&member));
            }
            state.members.insert(url.to_string(), stripped);
        }
        self
    }

    /// Enable the schema capability.
    pub fn with_schema_capability(self) -> Self {
        self.state().schema_capable = true;
        self
    }

    pub fn with_metadata(self, document_url: &str, metadata: DocumentMetadata) -> Self {
        self.state()
            .metadata
            .insert(document_url.to_string(), metadata);
        self
    }

    /// Fail any batched fetch that includes `document_url`.
    pub fn fail_document(&self, document_url: &str) {
        self.state()
            .failing_documents
            .insert(document_url.to_string());
    }

    /// Fail every container read.
    pub fn fail_container(&self) {
        self.state().fail_container = true;
    }

    /// Fail saving the model at `url`.
    pub fn fail_save(&self, url: &str) {
        self.state().failing_saves.insert(url.to_string());
    }

    /// Document url lists of every `fetch_members` call, in order.
    pub fn fetch_calls(&self) -> Vec<Vec<String>> {
        self.state().fetch_calls.clone()
    }

    /// `(model url, relation)` of every `load_relation` call.
    pub fn relation_calls(&self) -> Vec<(String, String)> {
        self.state().relation_calls.clone()
    }

    pub fn container_loads(&self) -> usize {
        self.state().container_loads
    }

    pub fn close_count(&self) -> usize {
        self.state().closes
    }

    /// Models persisted through the schema capability.
    pub fn saved_models(&self) -> Vec<Model> {
        self.state().saved.clone()
    }

    fn container_document_url(state: &MockState) -> Option<String> {
        state
            .container
            .as_ref()
            .and_then(Model::document_url)
            .map(str::to_string)
    }
}

fn strip_relations(member: &Model) -> Model {
    Model::from_persisted(member.type_name(), member.attributes().clone())
}

#[async_trait]
impl RemoteStore for MockRemoteStore {
    async fn container_document(&self, _layout: &CollectionLayout) -> KrakenResult<Option<Document>> {
        let state = self.state();
        if state.fail_container {
            return Err(FetchError::Request {
                url: Self::container_document_url(&state).unwrap_or_default(),
                reason: "injected container failure".to_string(),
            }
            .into());
        }
        Ok(Self::container_document_url(&state)
            .zip(state.container_updated_at)
            .map(|(url, updated_at)| Document::new(url, updated_at)))
    }

    async fn load_container(&self, layout: &CollectionLayout) -> KrakenResult<Model> {
        let mut state = self.state();
        state.container_loads += 1;
        if state.fail_container {
            return Err(FetchError::Request {
                url: Self::container_document_url(&state).unwrap_or_default(),
                reason: "injected container failure".to_string(),
            }
            .into());
        }

        let mut container = state
            .container
            .clone()
            .ok_or_else(|| FetchError::ContainerNotFound {
                identity: layout.name.clone(),
            })?;
        let documents = state.documents.iter().map(Document::to_model).collect();
        container.set_relation(layout.documents_relation.clone(), documents);
        Ok(container)
    }

    async fn fetch_members(
        &self,
        container_url: &str,
        member_type: &str,
        document_urls: &[String],
    ) -> KrakenResult<Vec<Model>> {
        let mut state = self.state();
        state.fetch_calls.push(document_urls.to_vec());

        if let Some(failing) = document_urls
            .iter()
            .find(|url| state.failing_documents.contains(*url))
        {
            return Err(FetchError::Request {
                url: failing.clone(),
                reason: format!("injected failure while querying {}", container_url),
            }
            .into());
        }

        Ok(document_urls
            .iter()
            .filter_map(|url| state.members.get(url))
            .flatten()
            .filter(|member| member.type_name() == member_type)
            .cloned()
            .collect())
    }

    async fn load_relation(&self, model: &Model, relation: &str) -> KrakenResult<Vec<Model>> {
        let mut state = self.state();
        let url = model.url().unwrap_or_default().to_string();
        state.relation_calls.push((url.clone(), relation.to_string()));

        if let Some(document_url) = model.document_url() {
            if state.failing_documents.contains(document_url) {
                return Err(FetchError::Request {
                    url,
                    reason: format!("injected failure while loading {}", relation),
                }
                .into());
            }
        }

        match relation {
            "actions" => Ok(state.actions.get(&url).cloned().unwrap_or_default()),
            "documents" => Ok(state.documents.iter().map(Document::to_model).collect()),
            other => Err(FetchError::MalformedResponse {
                url,
                reason: format!("unsupported relation {}", other),
            }
            .into()),
        }
    }

    fn schema_capability(&self) -> Option<&dyn SchemaCapability> {
        if self.state().schema_capable {
            Some(self)
        } else {
            None
        }
    }

    async fn close(&self) {
        self.state().closes += 1;
    }
}

#[async_trait]
impl SchemaCapability for MockRemoteStore {
    async fn document_metadata(&self, document_url: &str) -> Option<DocumentMetadata> {
        self.state().metadata.get(document_url).cloned()
    }

    async fn save_model(&self, model: &Model) -> Result<(), MigrationError> {
        let mut state = self.state();
        let url = model.url().unwrap_or_default().to_string();
        if state.failing_saves.contains(&url) {
            return Err(MigrationError::PersistFailed {
                target: url,
                reason: "injected save failure".to_string(),
            });
        }
        state.saved.push(model.clone());
        Ok(())
    }
}

/// Connector handing out a shared [`MockRemoteStore`].
#[derive(Debug, Clone)]
pub struct MockConnector {
    store: Arc<MockRemoteStore>,
    fail: bool,
}

impl MockConnector {
    pub fn new(store: Arc<MockRemoteStore>) -> Self {
        Self { store, fail: false }
    }

    /// A connector whose every `connect` fails as unauthorized.
    pub fn unauthorized(store: Arc<MockRemoteStore>) -> Self {
        Self { store, fail: true }
    }
}

#[async_trait]
impl RemoteConnector for MockConnector {
    async fn connect(&self, identity: &IdentityDescriptor) -> KrakenResult<Arc<dyn RemoteStore>> {
        if self.fail {
            return Err(FetchError::Unauthorized {
                url: identity.id.clone(),
            }
            .into());
        }
        Ok(Arc::clone(&self.store) as Arc<dyn RemoteStore>)
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use chrono::DateTime;
    use proptest::prelude::*;
    use serde_json::Value;

    /// Generate a JSON scalar attribute value.
    pub fn arb_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            "[a-zA-Z0-9 ]{0,24}".prop_map(Value::from),
            Just(Value::Null),
        ]
    }

    /// Generate an attribute map.
    pub fn arb_attributes() -> impl Strategy<Value = Attributes> {
        prop::collection::btree_map("[a-z][a-zA-Z]{0,11}", arb_value(), 0..6)
    }

    /// Generate a millisecond-precision timestamp.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (0i64..4_000_000_000_000).prop_map(|millis| {
            DateTime::from_timestamp_millis(millis).unwrap_or_default()
        })
    }

    /// Generate a persisted movie stored in its own document.
    pub fn arb_movie() -> impl Strategy<Value = Model> {
        ("[a-z]{1,12}", arb_attributes()).prop_map(|(slug, mut attributes)| {
            attributes.insert(
                "url".to_string(),
                Value::from(format!("https://pod.example/movies/{}#it", slug)),
            );
            Model::from_persisted("Movie", attributes)
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    use super::*;
    use chrono::DateTime;
    use serde_json::Value;

    /// Timestamp from epoch milliseconds.
    pub fn at_millis(millis: i64) -> Timestamp {
        DateTime::from_timestamp_millis(millis).unwrap_or_default()
    }

    /// Identity owning the pod at `https://pod.example/`.
    pub fn identity() -> IdentityDescriptor {
        IdentityDescriptor::new("https://pod.example/profile/card#me", "Alice")
            .with_storage("https://pod.example/")
    }

    /// Current-shape movies container.
    pub fn container(url: &str) -> Model {
        let mut attributes = Attributes::new();
        attributes.insert("url".to_string(), Value::from(url));
        attributes.insert("name".to_string(), Value::from("Movies"));
        Model::from_persisted("MediaContainer", attributes)
    }

    /// Container written before containers carried a name.
    pub fn legacy_container(url: &str) -> Model {
        let mut attributes = Attributes::new();
        attributes.insert("url".to_string(), Value::from(url));
        Model::from_persisted("MediaContainer", attributes)
    }

    pub fn movie(url: &str, name: &str) -> Model {
        let mut attributes = Attributes::new();
        attributes.insert("url".to_string(), Value::from(url));
        attributes.insert("name".to_string(), Value::from(name));
        Model::from_persisted("Movie", attributes)
    }

    /// A watch action recorded on `movie`.
    pub fn watch_action(movie: &Model) -> Model {
        let document = movie.document_url().unwrap_or_default();
        let mut attributes = Attributes::new();
        attributes.insert("url".to_string(), Value::from(format!("{}#watched", document)));
        attributes.insert(
            "object".to_string(),
            Value::from(movie.url().unwrap_or_default()),
        );
        attributes.insert("startTime".to_string(), Value::from("2020-11-21T20:30:00Z"));
        Model::from_persisted("WatchAction", attributes)
    }

    /// A movie with one watch action loaded.
    pub fn watched_movie(url: &str, name: &str) -> Model {
        let mut movie = movie(url, name);
        let action = watch_action(&movie);
        movie.set_relation("actions", vec![action]);
        movie
    }

    /// A movie in the flat legacy shape with a `watchedAt` attribute.
    pub fn legacy_movie(url: &str, name: &str, watched_at: &str) -> Model {
        let mut movie = movie(url, name);
        movie.set_attribute("watchedAt", Value::from(watched_at));
        movie
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    use super::*;

    /// Assert that a result is a precondition failure.
    pub fn assert_precondition_error<T: std::fmt::Debug>(result: &KrakenResult<T>) {
        assert!(
            matches!(result, Err(KrakenError::Precondition(_))),
            "Expected precondition error, got {:?}",
            result
        );
    }

    /// Assert that a result is a fetch failure.
    pub fn assert_fetch_error<T: std::fmt::Debug>(result: &KrakenResult<T>) {
        assert!(
            matches!(result, Err(KrakenError::Fetch(_))),
            "Expected fetch error, got {:?}",
            result
        );
    }
}
