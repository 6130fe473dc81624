//! Kraken Sync - Incremental Collection Synchronization
//!
//! Resolves a media collection stored in a remote document store into one
//! merged, serialized container while reading as little as possible:
//!
//! 1. Resolve the container (from cache when its document is fresh)
//! 2. Split its backing documents into cache hits and documents to fetch
//! 3. Fetch the gap in fixed-size chunks, committing each chunk to the cache
//! 4. Offer a one-time migration of legacy-shaped documents
//! 5. Serialize the merged container for the host
//!
//! Runs report progress and ask for confirmation through a
//! [`ProgressChannel`]. [`SyncOrchestrator::spawn`] runs a synchronization in
//! the background and hands the host a [`SyncHandle`].

pub mod error;
pub mod fetcher;
pub mod migrator;
pub mod orchestrator;
pub mod progress;
pub mod telemetry;

pub use error::{SyncError, SyncPhase, TelemetryError};
pub use fetcher::ChunkedFetcher;
pub use migrator::{
    ContainerSchemaRule, MigrationReport, SchemaMigrator, SchemaRule, SchemaState,
    WatchActionRule, MIGRATION_QUESTION,
};
pub use orchestrator::{SyncHandle, SyncOrchestrator};
pub use progress::{ConfirmationRequest, ProgressChannel, ProgressEvent, WorkerMessage};
pub use telemetry::{init_tracing, LogFormat};
