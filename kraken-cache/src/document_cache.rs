//! Document-scoped model cache.
//!
//! [`DocumentCache`] layers freshness validation and model graph
//! (de)serialization over a [`CacheStore`]. The cache is advisory: storage
//! faults are logged, counted and downgraded to misses (or skipped writes),
//! never returned to the caller. Only ordering bugs in the caller surface as
//! [`PreconditionError`]s.

use std::sync::atomic::{AtomicU64, Ordering};

use kraken_core::{
    Document, KrakenResult, Model, ModelRegistry, PreconditionError, StorageError, Timestamp,
};
use tokio::sync::Mutex;

use crate::connection::CacheConnection;
use crate::entry::{CacheEntry, SerializedModel};
use crate::freshness::{CacheRead, Freshness};
use crate::traits::{CacheStats, CacheStore};

/// Related model sets to persist alongside a model, keyed by relation name.
pub type RelatedModels<'a> = [(&'a str, &'a [Model])];

#[derive(Debug, Default)]
struct StatsCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    faults: AtomicU64,
    writes: AtomicU64,
}

impl StatsCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
        }
    }
}

/// Cache of model graphs keyed by the remote document they were read from.
pub struct DocumentCache<S: CacheStore> {
    connection: CacheConnection<S>,
    registry: ModelRegistry,
    /// Serializes read-modify-write cycles on entries.
    write_lock: Mutex<()>,
    stats: StatsCounters,
}

impl<S: CacheStore> DocumentCache<S> {
    pub fn new(config: S::Config, registry: ModelRegistry) -> Self {
        Self {
            connection: CacheConnection::new(config),
            registry,
            write_lock: Mutex::new(()),
            stats: StatsCounters::default(),
        }
    }

    /// Configuration the backing store opens with.
    pub fn store_config(&self) -> &S::Config {
        self.connection.config()
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    fn absorb(&self, operation: &'static str, key: &str, error: &StorageError) {
        StatsCounters::bump(&self.stats.faults);
        tracing::warn!(operation, key, error = %error, "Cache storage fault absorbed");
    }

    async fn read_entry(&self, key: &str) -> Result<Option<CacheEntry>, StorageError> {
        let store = self.connection.acquire().await?;
        match store.get(key).await? {
            Some(bytes) => CacheEntry::decode(key, &bytes).map(Some),
            None => Ok(None),
        }
    }

    async fn write_entry(&self, key: &str, entry: &CacheEntry) -> Result<(), StorageError> {
        let bytes = entry.encode(key)?;
        let store = self.connection.acquire().await?;
        store.put(key, &bytes).await?;
        StatsCounters::bump(&self.stats.writes);
        Ok(())
    }

    /// Cached models for `document`, if a valid entry exists.
    ///
    /// An entry is valid when its timestamp is admitted by `freshness`
    /// against `document.updated_at`. A missing or stale entry and any
    /// storage fault all read as `None`.
    pub async fn get_from_document(
        &self,
        document: &Document,
        freshness: Freshness,
    ) -> Option<CacheRead<Vec<Model>>> {
        let entry = match self.read_entry(&document.url).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                StatsCounters::bump(&self.stats.misses);
                tracing::debug!(document = %document.url, "Cache miss");
                return None;
            }
            Err(e) => {
                self.absorb("get", &document.url, &e);
                StatsCounters::bump(&self.stats.misses);
                return None;
            }
        };

        if !freshness.admits(entry.updated_at, document.updated_at) {
            StatsCounters::bump(&self.stats.misses);
            tracing::debug!(
                document = %document.url,
                cached_at = %entry.updated_at,
                remote_at = %document.updated_at,
                "Cache entry stale"
            );
            return None;
        }

        match entry.restore_models(&self.registry) {
            Ok(models) => {
                StatsCounters::bump(&self.stats.hits);
                tracing::debug!(document = %document.url, models = models.len(), "Cache hit");
                Some(CacheRead::new(models, entry.updated_at))
            }
            Err(e) => {
                // An entry naming types this registry does not know is as
                // unusable as a corrupt one.
                let fault = StorageError::Corrupt {
                    key: document.url.clone(),
                    reason: e.to_string(),
                };
                self.absorb("restore", &document.url, &fault);
                StatsCounters::bump(&self.stats.misses);
                None
            }
        }
    }

    /// Create or overwrite the entry for `url` with no models.
    pub async fn remember_document(&self, url: &str, updated_at: Timestamp) {
        let _guard = self.write_lock.lock().await;
        if let Err(e) = self.write_entry(url, &CacheEntry::empty(updated_at)).await {
            self.absorb("remember_document", url, &e);
        }
    }

    /// Attach a snapshot of `model` and `related` to its document's entry.
    ///
    /// # Errors
    ///
    /// - [`PreconditionError::ModelWithoutDocument`] if the model has no url
    /// - [`PreconditionError::DocumentNotInitialized`] if no entry exists for
    ///   the model's document (call [`remember_document`](Self::remember_document)
    ///   first)
    /// - [`PreconditionError::UnknownRelation`] if a related set names a
    ///   relation the model's class does not declare
    pub async fn remember(&self, model: &Model, related: &RelatedModels<'_>) -> KrakenResult<()> {
        let (url, document_url) = match (model.url(), model.document_url()) {
            (Some(url), Some(document_url)) => (url.to_string(), document_url.to_string()),
            _ => {
                return Err(PreconditionError::ModelWithoutDocument {
                    type_name: model.type_name().to_string(),
                }
                .into())
            }
        };
        let serialized = SerializedModel::capture(model, related, &self.registry)?;

        let _guard = self.write_lock.lock().await;
        let mut entry = match self.read_entry(&document_url).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                return Err(PreconditionError::DocumentNotInitialized { document_url }.into())
            }
            Err(e) => {
                self.absorb("remember", &document_url, &e);
                return Ok(());
            }
        };

        entry.models.insert(url, serialized);
        if let Err(e) = self.write_entry(&document_url, &entry).await {
            self.absorb("remember", &document_url, &e);
        }
        Ok(())
    }

    /// Delete the entry for `url`. Absent entries are fine.
    pub async fn forget_document(&self, url: &str) {
        let _guard = self.write_lock.lock().await;
        let result = match self.connection.acquire().await {
            Ok(store) => store.delete(url).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(existed) => tracing::debug!(document = url, existed, "Forgot cached document"),
            Err(e) => self.absorb("forget_document", url, &e),
        }
    }

    /// Delete the whole cache, releasing the open connection first.
    pub async fn clear(&self) {
        let _guard = self.write_lock.lock().await;
        match self.connection.destroy().await {
            Ok(()) => tracing::info!("Document cache cleared"),
            Err(e) => self.absorb("clear", "*", &e),
        }
    }

    /// Release the store handle. The next operation reopens it.
    pub async fn close(&self) {
        if let Err(e) = self.connection.close().await {
            self.absorb("close", "*", &e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryCacheStore, MemoryBackend};
    use chrono::{DateTime, Utc};
    use kraken_core::KrakenError;
    use kraken_test_utils::{assertions, fixtures};
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::time::Duration;

    const SPIRIT_DOC: &str = "https://pod.example/movies/spirit";
    const SPIRIT_URL: &str = "https://pod.example/movies/spirit#it";

    fn at_millis(millis: i64) -> Timestamp {
        DateTime::<Utc>::from_timestamp_millis(millis).expect("valid millis")
    }

    fn memory_cache() -> (DocumentCache<InMemoryCacheStore>, Arc<MemoryBackend>) {
        let backend = MemoryBackend::new();
        let cache = DocumentCache::new(Arc::clone(&backend), ModelRegistry::media());
        (cache, backend)
    }

    async fn remember_spirit(cache: &DocumentCache<InMemoryCacheStore>, updated_at: Timestamp) {
        let movie = fixtures::movie(SPIRIT_URL, "Spirit");
        let actions = vec![fixtures::watch_action(&movie)];
        cache.remember_document(SPIRIT_DOC, updated_at).await;
        cache
            .remember(&movie, &[("actions", actions.as_slice())])
            .await
            .expect("remember");
    }

    #[tokio::test]
    async fn test_hit_restores_graph() {
        let (cache, _backend) = memory_cache();
        let t = at_millis(1_600_000_000_000);
        remember_spirit(&cache, t).await;

        let read = cache
            .get_from_document(&Document::new(SPIRIT_DOC, t), Freshness::Exact)
            .await
            .expect("hit");

        assert_eq!(read.cached_at(), t);
        let models = read.into_value();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].type_name(), "Movie");
        assert!(models[0].is_persisted());
        assert_eq!(models[0].url(), Some(SPIRIT_URL));
        let actions = models[0].relation("actions").expect("actions loaded");
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].type_name(), "WatchAction");
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_tolerance_window() {
        let (cache, _backend) = memory_cache();
        let t = at_millis(1_600_000_000_000);
        remember_spirit(&cache, t).await;
        let remote = Document::new(SPIRIT_DOC, at_millis(1_600_000_009_000));

        let within = Freshness::within(Duration::from_millis(10_000));
        assert!(cache.get_from_document(&remote, within).await.is_some());

        let narrow = Freshness::within(Duration::from_millis(5_000));
        assert!(cache.get_from_document(&remote, narrow).await.is_none());
        assert!(cache.get_from_document(&remote, Freshness::Exact).await.is_none());
    }

    #[tokio::test]
    async fn test_missing_entry_is_a_miss() {
        let (cache, _backend) = memory_cache();
        let document = Document::new(SPIRIT_DOC, Utc::now());

        assert!(cache
            .get_from_document(&document, Freshness::Exact)
            .await
            .is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_remember_document_without_models() {
        let (cache, _backend) = memory_cache();
        let t = at_millis(1_600_000_000_000);
        cache.remember_document(SPIRIT_DOC, t).await;

        let read = cache
            .get_from_document(&Document::new(SPIRIT_DOC, t), Freshness::Exact)
            .await
            .expect("hit");
        assert!(read.value().is_empty());
    }

    #[tokio::test]
    async fn test_remember_document_overwrites_models() {
        let (cache, _backend) = memory_cache();
        let t = at_millis(1_600_000_000_000);
        remember_spirit(&cache, t).await;

        let later = at_millis(1_600_000_100_000);
        cache.remember_document(SPIRIT_DOC, later).await;

        let read = cache
            .get_from_document(&Document::new(SPIRIT_DOC, later), Freshness::Exact)
            .await
            .expect("hit");
        assert!(read.value().is_empty());
    }

    #[tokio::test]
    async fn test_remember_without_document_entry() {
        let (cache, _backend) = memory_cache();
        let movie = fixtures::movie(SPIRIT_URL, "Spirit");

        let result = cache.remember(&movie, &[]).await;
        assertions::assert_precondition_error(&result);
        assert_eq!(
            result,
            Err(PreconditionError::DocumentNotInitialized {
                document_url: SPIRIT_DOC.to_string(),
            }
            .into())
        );
    }

    #[tokio::test]
    async fn test_remember_model_without_url() {
        let (cache, _backend) = memory_cache();
        let movie = Model::new("Movie", Default::default());

        let result = cache.remember(&movie, &[]).await;
        assertions::assert_precondition_error(&result);
        assert!(matches!(
            result,
            Err(KrakenError::Precondition(
                PreconditionError::ModelWithoutDocument { .. }
            ))
        ));
    }

    #[tokio::test]
    async fn test_remember_is_idempotent() {
        let (cache, backend) = memory_cache();
        let t = at_millis(1_600_000_000_000);
        remember_spirit(&cache, t).await;
        let once = {
            let store = InMemoryCacheStore::open(&backend).await.expect("open");
            store.get(SPIRIT_DOC).await.expect("get")
        };

        let movie = fixtures::movie(SPIRIT_URL, "Spirit");
        let actions = vec![fixtures::watch_action(&movie)];
        cache
            .remember(&movie, &[("actions", actions.as_slice())])
            .await
            .expect("remember");
        let twice = {
            let store = InMemoryCacheStore::open(&backend).await.expect("open");
            store.get(SPIRIT_DOC).await.expect("get")
        };

        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn test_storage_faults_are_absorbed() {
        let (cache, backend) = memory_cache();
        let t = at_millis(1_600_000_000_000);
        remember_spirit(&cache, t).await;

        backend.set_failing(true);
        let document = Document::new(SPIRIT_DOC, t);
        assert!(cache
            .get_from_document(&document, Freshness::Exact)
            .await
            .is_none());
        cache.remember_document(SPIRIT_DOC, t).await;
        let movie = fixtures::movie(SPIRIT_URL, "Spirit");
        assert!(cache.remember(&movie, &[]).await.is_ok());
        cache.forget_document(SPIRIT_DOC).await;

        assert!(cache.stats().faults >= 4);

        backend.set_failing(false);
        assert!(cache
            .get_from_document(&document, Freshness::Exact)
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_a_miss() {
        let (cache, backend) = memory_cache();
        backend.insert_raw(SPIRIT_DOC, b"garbage".to_vec());

        let document = Document::new(SPIRIT_DOC, Utc::now());
        assert!(cache
            .get_from_document(&document, Freshness::Exact)
            .await
            .is_none());
        assert_eq!(cache.stats().faults, 1);
    }

    #[tokio::test]
    async fn test_forget_document() {
        let (cache, _backend) = memory_cache();
        let t = at_millis(1_600_000_000_000);
        remember_spirit(&cache, t).await;

        cache.forget_document(SPIRIT_DOC).await;
        cache.forget_document(SPIRIT_DOC).await;

        let document = Document::new(SPIRIT_DOC, t);
        assert!(cache
            .get_from_document(&document, Freshness::Exact)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_clear_wipes_every_entry() {
        let (cache, backend) = memory_cache();
        let t = at_millis(1_600_000_000_000);
        let urls: Vec<String> = (0..5)
            .map(|i| format!("https://pod.example/movies/{}", i))
            .collect();
        for url in &urls {
            cache.remember_document(url, t).await;
        }

        cache.clear().await;

        for url in &urls {
            let document = Document::new(url.clone(), t);
            assert!(cache
                .get_from_document(&document, Freshness::Exact)
                .await
                .is_none());
        }
        assert_eq!(backend.open_count(), 2);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn prop_freshness_invariant(
            cached in 0i64..4_000_000_000_000,
            drift in -60_000i64..60_000,
            window in 0u64..60_000,
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .build()
                .expect("runtime");
            runtime.block_on(async {
                let (cache, _backend) = memory_cache();
                cache.remember_document(SPIRIT_DOC, at_millis(cached)).await;

                let document = Document::new(SPIRIT_DOC, at_millis(cached + drift));
                let read = cache
                    .get_from_document(&document, Freshness::within(Duration::from_millis(window)))
                    .await;

                prop_assert_eq!(read.is_some(), drift.unsigned_abs() <= window);
                Ok(())
            })?;
        }
    }
}
