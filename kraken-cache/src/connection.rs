//! Lazily opened, shared store connection.

use tokio::sync::{RwLock, RwLockReadGuard};

use kraken_core::StorageError;

use crate::traits::CacheStore;

/// Holds at most one open [`CacheStore`] handle.
///
/// The store is opened on first use. Concurrent first uses wait on the slot's
/// write lock, so only one open is ever in flight. Callers hold a read guard
/// for the duration of an operation; `close` and `destroy` take the write
/// lock and therefore wait for in-flight operations to finish.
pub struct CacheConnection<S: CacheStore> {
    config: S::Config,
    slot: RwLock<Option<S>>,
}

impl<S: CacheStore> CacheConnection<S> {
    pub fn new(config: S::Config) -> Self {
        Self {
            config,
            slot: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &S::Config {
        &self.config
    }

    /// Borrow the open store, opening it if needed.
    pub async fn acquire(&self) -> Result<RwLockReadGuard<'_, S>, StorageError> {
        loop {
            let guard = self.slot.read().await;
            if let Ok(store) = RwLockReadGuard::try_map(guard, Option::as_ref) {
                return Ok(store);
            }

            let mut slot = self.slot.write().await;
            if slot.is_none() {
                tracing::debug!("Opening cache store");
                *slot = Some(S::open(&self.config).await?);
            }
        }
    }

    pub async fn is_open(&self) -> bool {
        self.slot.read().await.is_some()
    }

    /// Close the open handle, if any.
    pub async fn close(&self) -> Result<(), StorageError> {
        let store = self.slot.write().await.take();
        match store {
            Some(store) => store.close().await,
            None => Ok(()),
        }
    }

    /// Close the handle and delete the whole store.
    ///
    /// The next [`acquire`](Self::acquire) opens a fresh, empty store.
    pub async fn destroy(&self) -> Result<(), StorageError> {
        let mut slot = self.slot.write().await;
        if let Some(store) = slot.take() {
            store.close().await?;
        }
        S::destroy(&self.config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryCacheStore, MemoryBackend};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_acquire_opens_once() {
        let backend = MemoryBackend::new();
        let connection = CacheConnection::<InMemoryCacheStore>::new(Arc::clone(&backend));

        assert!(!connection.is_open().await);
        {
            let store = connection.acquire().await.expect("acquire");
            store.put("doc", b"entry").await.expect("put");
        }
        {
            let store = connection.acquire().await.expect("acquire");
            assert!(store.get("doc").await.expect("get").is_some());
        }

        assert!(connection.is_open().await);
        assert_eq!(backend.open_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_use_opens_once() {
        let backend = MemoryBackend::new();
        let connection = Arc::new(CacheConnection::<InMemoryCacheStore>::new(Arc::clone(
            &backend,
        )));

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let connection = Arc::clone(&connection);
                tokio::spawn(async move {
                    let store = connection.acquire().await.expect("acquire");
                    store
                        .put(&format!("doc-{}", i), b"entry")
                        .await
                        .expect("put");
                })
            })
            .collect();
        for task in tasks {
            task.await.expect("task");
        }

        assert_eq!(backend.open_count(), 1);
        assert_eq!(backend.len(), 16);
    }

    #[tokio::test]
    async fn test_open_failure_leaves_slot_empty() {
        let backend = MemoryBackend::new();
        let connection = CacheConnection::<InMemoryCacheStore>::new(Arc::clone(&backend));

        backend.set_failing(true);
        assert!(connection.acquire().await.is_err());
        assert!(!connection.is_open().await);

        backend.set_failing(false);
        assert!(connection.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_destroy_then_reopen() {
        let backend = MemoryBackend::new();
        let connection = CacheConnection::<InMemoryCacheStore>::new(Arc::clone(&backend));

        connection
            .acquire()
            .await
            .expect("acquire")
            .put("doc", b"entry")
            .await
            .expect("put");

        connection.destroy().await.expect("destroy");
        assert!(!connection.is_open().await);

        let store = connection.acquire().await.expect("acquire");
        assert!(store.get("doc").await.expect("get").is_none());
        assert_eq!(backend.open_count(), 2);
    }
}
