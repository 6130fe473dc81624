//! Contracts for the remote document store collaborators.
//!
//! The engine never speaks the store's protocol. It consumes three seams:
//!
//! - [`RemoteConnector`]: turns a host identity into an authenticated store
//! - [`RemoteStore`]: container resolution, batched member queries and
//!   relation loading
//! - [`SchemaCapability`]: optional per-document description metadata and
//!   persistence of migrated models, for stores that support it

use std::sync::Arc;

use async_trait::async_trait;

use crate::collection::CollectionLayout;
use crate::document::{Document, DocumentMetadata};
use crate::error::{KrakenResult, MigrationError};
use crate::identity::IdentityDescriptor;
use crate::model::Model;

/// Resolves an identity into a remote store session.
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    async fn connect(&self, identity: &IdentityDescriptor) -> KrakenResult<Arc<dyn RemoteStore>>;
}

/// Read access to the remote document store.
///
/// Every method reports remote failures as [`FetchError`](crate::FetchError)
/// wrapped in [`KrakenError`](crate::KrakenError). Timeouts are the
/// implementation's responsibility.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Cheap probe for the container's own document and its last-modified
    /// timestamp. `None` when the store cannot tell (or no container exists).
    async fn container_document(&self, layout: &CollectionLayout) -> KrakenResult<Option<Document>>;

    /// Read the container model with its documents relation loaded.
    async fn load_container(&self, layout: &CollectionLayout) -> KrakenResult<Model>;

    /// Query every member of type `member_type` stored in `document_urls`,
    /// as one batched request scoped to `container_url`.
    async fn fetch_members(
        &self,
        container_url: &str,
        member_type: &str,
        document_urls: &[String],
    ) -> KrakenResult<Vec<Model>>;

    /// Load the models of one relation of `model`.
    async fn load_relation(&self, model: &Model, relation: &str) -> KrakenResult<Vec<Model>>;

    /// Schema capability of this store, if it has one.
    fn schema_capability(&self) -> Option<&dyn SchemaCapability> {
        None
    }

    /// Release connections held by this session.
    async fn close(&self) {}
}

/// Optional capability: description metadata and migration persistence.
#[async_trait]
pub trait SchemaCapability: Send + Sync {
    /// Metadata recorded when `document_url` was read, if any.
    async fn document_metadata(&self, document_url: &str) -> Option<DocumentMetadata>;

    /// Persist a migrated model (and its relations) back to the store.
    async fn save_model(&self, model: &Model) -> Result<(), MigrationError>;
}
