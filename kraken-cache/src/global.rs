//! Process-wide document cache.
//!
//! Hosts that run several synchronizations share one LMDB environment. The
//! first call decides the configuration; later calls return the same cache.

use std::sync::Arc;

use kraken_core::{EngineConfig, ModelRegistry};
use once_cell::sync::OnceCell;

use crate::document_cache::DocumentCache;
use crate::lmdb_backend::{LmdbCacheStore, LmdbStoreConfig};

static GLOBAL_CACHE: OnceCell<Arc<DocumentCache<LmdbCacheStore>>> = OnceCell::new();

/// The shared LMDB-backed cache, created on first use.
///
/// Creating the cache does not open the store; that happens lazily on the
/// first read or write.
pub fn global_cache(config: &EngineConfig) -> Arc<DocumentCache<LmdbCacheStore>> {
    shared_cache(&GLOBAL_CACHE, config)
}

fn shared_cache(
    cell: &OnceCell<Arc<DocumentCache<LmdbCacheStore>>>,
    config: &EngineConfig,
) -> Arc<DocumentCache<LmdbCacheStore>> {
    let cache = cell.get_or_init(|| {
        tracing::debug!(path = %config.cache_path.display(), "Creating global document cache");
        Arc::new(DocumentCache::new(
            LmdbStoreConfig::from(config),
            ModelRegistry::media(),
        ))
    });

    let existing = &cache.store_config().path;
    if *existing != config.cache_path {
        tracing::warn!(
            path = %existing.display(),
            requested = %config.cache_path.display(),
            "Global document cache already created, ignoring requested path"
        );
    }
    Arc::clone(cache)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use kraken_core::Document;
    use crate::freshness::Freshness;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_global_cache_is_shared() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let config = EngineConfig::default().with_cache_path(temp_dir.path().join("global"));

        let first = global_cache(&config);
        let second = global_cache(&config);
        assert!(Arc::ptr_eq(&first, &second));

        let now = Utc::now();
        first.remember_document("https://pod.example/movies/", now).await;
        let read = second
            .get_from_document(
                &Document::new("https://pod.example/movies/", now),
                Freshness::Exact,
            )
            .await;
        assert!(read.is_some());

        first.clear().await;
    }

    #[test]
    fn test_later_config_does_not_replace_cache() {
        let cell = OnceCell::new();
        let first_dir = TempDir::new().expect("TempDir creation should succeed");
        let second_dir = TempDir::new().expect("TempDir creation should succeed");
        let first_config = EngineConfig::default().with_cache_path(first_dir.path().join("cache"));
        let second_config = EngineConfig::default().with_cache_path(second_dir.path().join("cache"));

        let first = shared_cache(&cell, &first_config);
        let second = shared_cache(&cell, &second_config);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.store_config().path, first_config.cache_path);
    }
}
