//! Error types for Kraken operations

use thiserror::Error;

/// Local cache store faults.
///
/// These never escape a cache read: the document cache downgrades them to a
/// miss. They are only visible to callers that talk to a store directly.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Failed to open cache store: {reason}")]
    OpenFailed { reason: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Failed to encode cache entry for {key}: {reason}")]
    EncodeFailed { key: String, reason: String },

    #[error("Corrupt cache entry for {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("I/O error: {reason}")]
    Io { reason: String },

    #[error("Cache store lock poisoned")]
    LockPoisoned,
}

/// Ordering and identity bugs in the caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PreconditionError {
    #[error("Cannot remember a {type_name} model without a url")]
    ModelWithoutDocument { type_name: String },

    #[error("Model document not initialized: {document_url}")]
    DocumentNotInitialized { document_url: String },

    #[error("Model type {type_name} has no relation named {relation}")]
    UnknownRelation { type_name: String, relation: String },

    #[error("Unknown model type: {type_name}")]
    UnknownModelType { type_name: String },

    #[error("Cannot mint a url for a model that is already persisted: {url}")]
    AlreadyPersisted { url: String },
}

/// Remote store read failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    #[error("Unauthorized access to {url}")]
    Unauthorized { url: String },

    #[error("Malformed response from {url}: {reason}")]
    MalformedResponse { url: String, reason: String },

    #[error("Collection container not found for {identity}")]
    ContainerNotFound { identity: String },
}

/// Per-target schema migration failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MigrationError {
    #[error("Migration of {target} rejected: {reason}")]
    Rejected { target: String, reason: String },

    #[error("Failed to persist migrated {target}: {reason}")]
    PersistFailed { target: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to read config file {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to parse config TOML: {reason}")]
    Parse { reason: String },
}

/// Master error type for all Kraken errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KrakenError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Precondition failed: {0}")]
    Precondition(#[from] PreconditionError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for Kraken operations.
pub type KrakenResult<T> = Result<T, KrakenError>;

// =============================================================================
// TESTS
// =============================================================================
