//! Kraken Cache - Document-Scoped Model Cache
//!
//! Persistent local cache of model graphs, keyed by the remote document each
//! graph was read from and validated against that document's last-modified
//! timestamp.
//!
//! # Architecture
//!
//! ```text
//! DocumentCache            freshness, (de)serialization, stats
//!   └─ CacheConnection     lazy single-open handle, teardown on clear
//!        └─ CacheStore     LMDB (heed) or in-memory key/value storage
//! ```
//!
//! Storage faults never escape a read. A corrupt or unreachable store looks
//! like an empty cache.

pub mod connection;
pub mod document_cache;
pub mod entry;
pub mod freshness;
pub mod global;
pub mod key;
pub mod lmdb_backend;
pub mod memory;
pub mod traits;

pub use connection::CacheConnection;
pub use document_cache::{DocumentCache, RelatedModels};
pub use entry::{CacheEntry, SerializedModel, SerializedRelation};
pub use freshness::{CacheRead, Freshness};
pub use global::global_cache;
pub use key::{DocumentKey, MAX_KEY_LEN};
pub use lmdb_backend::{LmdbCacheStore, LmdbStoreConfig};
pub use memory::{InMemoryCacheStore, MemoryBackend};
pub use traits::{CacheStats, CacheStore};
