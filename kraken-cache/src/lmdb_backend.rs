//! LMDB-backed cache store.
//!
//! Uses the heed crate (Rust bindings for LMDB) for a memory-mapped key/value
//! store. One unnamed database holds every document entry, keyed by
//! [`DocumentKey`].
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The store uses:
//! - Read transactions for `get`
//! - Write transactions for `put` and `delete`

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use kraken_core::{EngineConfig, StorageError};

use crate::key::DocumentKey;
use crate::traits::CacheStore;

/// Where and how big the LMDB environment is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LmdbStoreConfig {
    /// Directory holding the LMDB files.
    pub path: PathBuf,
    /// Maximum size of the memory map in megabytes.
    pub max_size_mb: usize,
}

impl LmdbStoreConfig {
    pub fn new(path: impl Into<PathBuf>, max_size_mb: usize) -> Self {
        Self {
            path: path.into(),
            max_size_mb,
        }
    }
}

impl From<&EngineConfig> for LmdbStoreConfig {
    fn from(config: &EngineConfig) -> Self {
        Self::new(config.cache_path.clone(), config.cache_max_size_mb)
    }
}

fn transaction_failed(e: heed::Error) -> StorageError {
    StorageError::TransactionFailed {
        reason: e.to_string(),
    }
}

/// LMDB-backed [`CacheStore`].
pub struct LmdbCacheStore {
    env: Env,
    db: Database<Bytes, Bytes>,
}

impl LmdbCacheStore {
    /// Open (creating if needed) the environment at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&path).map_err(|e| StorageError::Io {
            reason: e.to_string(),
        })?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| StorageError::OpenFailed {
            reason: e.to_string(),
        })?;

        let mut wtxn = env.write_txn().map_err(transaction_failed)?;
        let db: Database<Bytes, Bytes> =
            env.create_database(&mut wtxn, None)
                .map_err(|e| StorageError::OpenFailed {
                    reason: e.to_string(),
                })?;
        wtxn.commit().map_err(transaction_failed)?;

        Ok(Self { env, db })
    }

    /// Number of stored entries.
    pub fn len(&self) -> Result<u64, StorageError> {
        let rtxn = self.env.read_txn().map_err(transaction_failed)?;
        self.db.len(&rtxn).map_err(transaction_failed)
    }

    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }
}

#[async_trait]
impl CacheStore for LmdbCacheStore {
    type Config = LmdbStoreConfig;

    async fn open(config: &LmdbStoreConfig) -> Result<Self, StorageError> {
        tracing::debug!(path = %config.path.display(), "Opening LMDB cache store");
        Self::new(&config.path, config.max_size_mb)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let encoded_key = DocumentKey::new(key).encode();
        let rtxn = self.env.read_txn().map_err(transaction_failed)?;

        let value = self
            .db
            .get(&rtxn, &encoded_key)
            .map_err(transaction_failed)?;
        Ok(value.map(<[u8]>::to_vec))
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let encoded_key = DocumentKey::new(key).encode();

        let mut wtxn = self.env.write_txn().map_err(transaction_failed)?;
        self.db
            .put(&mut wtxn, &encoded_key, value)
            .map_err(transaction_failed)?;
        wtxn.commit().map_err(transaction_failed)
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let encoded_key = DocumentKey::new(key).encode();

        let mut wtxn = self.env.write_txn().map_err(transaction_failed)?;
        let deleted = self
            .db
            .delete(&mut wtxn, &encoded_key)
            .map_err(transaction_failed)?;
        wtxn.commit().map_err(transaction_failed)?;

        Ok(deleted)
    }

    async fn close(self) -> Result<(), StorageError> {
        let Self { env, db } = self;
        drop(db);
        // Waits until every other clone of the environment is gone.
        let closing = env.prepare_for_closing();
        tokio::task::spawn_blocking(move || closing.wait())
            .await
            .map_err(|e| StorageError::Io {
                reason: e.to_string(),
            })
    }

    async fn destroy(config: &LmdbStoreConfig) -> Result<(), StorageError> {
        tracing::debug!(path = %config.path.display(), "Destroying LMDB cache store");
        match std::fs::remove_dir_all(&config.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io {
                reason: e.to_string(),
            }),
        }
    }
}
