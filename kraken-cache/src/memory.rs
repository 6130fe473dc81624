//! In-memory cache store.
//!
//! Entries live in a shared [`MemoryBackend`] that outlives individual store
//! handles, so closing and reopening keeps the data the way a file-backed
//! store would. The backend can be told to fail every operation, which is how
//! tests exercise fault absorption.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use kraken_core::StorageError;

use crate::traits::CacheStore;

/// Shared storage behind every [`InMemoryCacheStore`] handle.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, Vec<u8>>>,
    failing: AtomicBool,
    opens: AtomicU64,
}

impl MemoryBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every subsequent operation (including `open`) fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// How many times a store handle was opened.
    pub fn open_count(&self) -> u64 {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .read()
            .map(|e| e.contains_key(key))
            .unwrap_or(false)
    }

    /// Overwrite an entry with arbitrary bytes.
    pub fn insert_raw(&self, key: impl Into<String>, value: Vec<u8>) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(key.into(), value);
        }
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StorageError::Io {
                reason: "injected storage fault".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

/// [`CacheStore`] over a shared [`MemoryBackend`].
#[derive(Debug, Clone)]
pub struct InMemoryCacheStore {
    backend: Arc<MemoryBackend>,
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    type Config = Arc<MemoryBackend>;

    async fn open(config: &Arc<MemoryBackend>) -> Result<Self, StorageError> {
        config.check()?;
        config.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Self {
            backend: Arc::clone(config),
        })
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.backend.check()?;
        let entries = self
            .backend
            .entries
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(entries.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.backend.check()?;
        let mut entries = self
            .backend
            .entries
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        self.backend.check()?;
        let mut entries = self
            .backend
            .entries
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(entries.remove(key).is_some())
    }

    async fn close(self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn destroy(config: &Arc<MemoryBackend>) -> Result<(), StorageError> {
        config.check()?;
        let mut entries = config
            .entries
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        entries.clear();
        Ok(())
    }
}
