//! Cache store trait and cache statistics.
//!
//! A [`CacheStore`] is pure key/value storage keyed by document url. It knows
//! nothing about models or freshness; the
//! [`DocumentCache`](crate::DocumentCache) layers those on top.

use async_trait::async_trait;
use kraken_core::StorageError;

/// Persistent key/value store behind the document cache.
///
/// # Lifecycle
///
/// Stores are opened lazily by the cache connection, at most once at a time,
/// and closed explicitly before [`CacheStore::destroy`] wipes the backing
/// storage. Implementations should be safe for concurrent `get`/`put`/`delete`
/// calls through a shared reference.
#[async_trait]
pub trait CacheStore: Send + Sync + Sized + 'static {
    /// Whatever is needed to open (or destroy) the store.
    type Config: Clone + Send + Sync + 'static;

    /// Open the store, creating it if needed.
    async fn open(config: &Self::Config) -> Result<Self, StorageError>;

    /// Read the raw entry stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Create or overwrite the entry stored under `key`.
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Delete the entry stored under `key`. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// Release the connection handle.
    async fn close(self) -> Result<(), StorageError>;

    /// Delete the whole store. Only called while no handle is open.
    async fn destroy(config: &Self::Config) -> Result<(), StorageError>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Valid entries served.
    pub hits: u64,
    /// Lookups that found no entry or a stale one.
    pub misses: u64,
    /// Storage faults absorbed by the cache.
    pub faults: u64,
    /// Entries written (document and model remembers).
    pub writes: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
