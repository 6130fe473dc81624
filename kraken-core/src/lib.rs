//! Kraken Core - Entity Types and Collaborator Contracts
//!
//! Pure data structures shared by every other crate: documents, dynamic
//! models, collection layout, configuration, the error taxonomy and the
//! traits that the remote store collaborators implement.
//! This crate contains no cache or synchronization logic.

use chrono::{DateTime, Utc};

pub mod collection;
pub mod config;
pub mod document;
pub mod error;
pub mod identity;
pub mod model;
pub mod remote;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

pub use collection::{CollectionLayout, SerializedContainer, SerializedMember};
pub use config::{EngineConfig, RunOptions, DEFAULT_CHUNK_SIZE, DEFAULT_CONTAINER_TOLERANCE_MS};
pub use document::{Document, DocumentMetadata, DOCUMENT_TYPE};
pub use error::{
    ConfigError, FetchError, KrakenError, KrakenResult, MigrationError, PreconditionError,
    StorageError,
};
pub use identity::IdentityDescriptor;
pub use model::{Attributes, Model, ModelClass, ModelRegistry};
pub use remote::{RemoteConnector, RemoteStore, SchemaCapability};
