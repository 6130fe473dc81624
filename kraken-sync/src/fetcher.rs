//! Chunked member fetching with per-chunk cache commits.

use futures_util::future::try_join_all;
use kraken_cache::{CacheStore, DocumentCache};
use kraken_core::{CollectionLayout, Document, KrakenResult, Model, RemoteStore};

use crate::progress::ProgressChannel;

/// Fetches the members of uncached documents in fixed-size chunks.
///
/// Each chunk is one batched remote query. Sub-items of the chunk's members
/// load concurrently, then the chunk is committed to the cache before the
/// next chunk starts. A failure aborts the fetch with nothing of the failing
/// chunk committed.
pub struct ChunkedFetcher<'a, S: CacheStore> {
    remote: &'a dyn RemoteStore,
    cache: &'a DocumentCache<S>,
    layout: &'a CollectionLayout,
    chunk_size: usize,
}

impl<'a, S: CacheStore> ChunkedFetcher<'a, S> {
    pub fn new(
        remote: &'a dyn RemoteStore,
        cache: &'a DocumentCache<S>,
        layout: &'a CollectionLayout,
        chunk_size: usize,
    ) -> Self {
        Self {
            remote,
            cache,
            layout,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Fetch every member stored in `documents`.
    pub async fn fetch(
        &self,
        container_url: &str,
        documents: &[Document],
        progress: &ProgressChannel,
    ) -> KrakenResult<Vec<Model>> {
        let total = documents.len();
        let mut members = Vec::new();
        let mut processed = 0;

        for (index, chunk) in documents.chunks(self.chunk_size).enumerate() {
            progress.message(format!("Loading collection data ({}/{})...", processed, total));
            progress.counter(processed, total);
            tracing::debug!(chunk = index, documents = chunk.len(), "Fetching chunk");

            let fetched = self.fetch_chunk(container_url, chunk).await?;
            self.commit(chunk, &fetched).await?;

            processed += chunk.len();
            members.extend(fetched);
        }

        if total > 0 {
            progress.counter(total, total);
        }
        Ok(members)
    }

    async fn fetch_chunk(&self, container_url: &str, chunk: &[Document]) -> KrakenResult<Vec<Model>> {
        let urls: Vec<String> = chunk.iter().map(|document| document.url.clone()).collect();
        let members = self
            .remote
            .fetch_members(container_url, &self.layout.member_type, &urls)
            .await?;

        try_join_all(members.into_iter().map(|member| self.load_sub_items(member))).await
    }

    async fn load_sub_items(&self, mut member: Model) -> KrakenResult<Model> {
        let relation = &self.layout.member_sub_relation;
        if !member.is_relation_loaded(relation) {
            let items = self.remote.load_relation(&member, relation).await?;
            member.set_relation(relation.clone(), items);
        }
        Ok(member)
    }

    /// Remember every document of the chunk, then every member with its
    /// sub-items.
    async fn commit(&self, chunk: &[Document], members: &[Model]) -> KrakenResult<()> {
        for document in chunk {
            self.cache
                .remember_document(&document.url, document.updated_at)
                .await;
        }

        let relation = self.layout.member_sub_relation.as_str();
        for member in members {
            let in_chunk = member
                .document_url()
                .is_some_and(|url| chunk.iter().any(|document| document.url == url));
            if !in_chunk {
                tracing::debug!(member = ?member.url(), "Member outside fetched documents, not cached");
                continue;
            }

            let items = member.relation(relation).unwrap_or_default();
            self.cache.remember(member, &[(relation, items)]).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{ProgressEvent, WorkerMessage};
    use kraken_cache::{Freshness, InMemoryCacheStore, MemoryBackend};
    use kraken_core::ModelRegistry;
    use kraken_test_utils::{assertions, fixtures, MockRemoteStore};

    const CONTAINER: &str = "https://pod.example/movies/";

    fn document(slug: &str, millis: i64) -> Document {
        Document::new(format!("{}{}", CONTAINER, slug), fixtures::at_millis(millis))
    }

    fn store_with(documents: &[Document]) -> MockRemoteStore {
        documents.iter().fold(MockRemoteStore::new(CONTAINER), |store, document| {
            let url = format!("{}#it", document.url);
            store.with_document(
                &document.url,
                document.updated_at,
                vec![fixtures::watched_movie(&url, &document.url)],
            )
        })
    }

    fn memory_cache() -> DocumentCache<InMemoryCacheStore> {
        DocumentCache::new(MemoryBackend::new(), ModelRegistry::media())
    }

    #[tokio::test]
    async fn test_chunks_and_sub_items() {
        let documents: Vec<Document> = (0..5).map(|i| document(&format!("m{}", i), 1_000)).collect();
        let remote = store_with(&documents);
        let cache = memory_cache();
        let layout = CollectionLayout::movies();

        let fetcher = ChunkedFetcher::new(&remote, &cache, &layout, 2);
        let members = fetcher
            .fetch(CONTAINER, &documents, &ProgressChannel::detached())
            .await
            .expect("fetch");

        assert_eq!(members.len(), 5);
        assert_eq!(
            remote
                .fetch_calls()
                .iter()
                .map(Vec::len)
                .collect::<Vec<_>>(),
            vec![2, 2, 1]
        );
        assert!(members
            .iter()
            .all(|member| member.relation("actions").map(<[Model]>::len) == Some(1)));

        let mut relation_calls = remote.relation_calls();
        relation_calls.sort();
        let expected: Vec<(String, String)> = documents
            .iter()
            .map(|document| (format!("{}#it", document.url), "actions".to_string()))
            .collect();
        assert_eq!(relation_calls, expected);

        for document in &documents {
            let read = cache
                .get_from_document(document, Freshness::Exact)
                .await
                .expect("committed");
            let cached = read.into_value();
            assert_eq!(cached.len(), 1);
            assert!(cached[0].is_relation_loaded("actions"));
        }
    }

    #[tokio::test]
    async fn test_failed_chunk_commits_nothing_from_it() {
        let documents: Vec<Document> = (0..6).map(|i| document(&format!("m{}", i), 1_000)).collect();
        let remote = store_with(&documents);
        remote.fail_document(&documents[3].url);
        let cache = memory_cache();
        let layout = CollectionLayout::movies();

        let fetcher = ChunkedFetcher::new(&remote, &cache, &layout, 2);
        let result = fetcher
            .fetch(CONTAINER, &documents, &ProgressChannel::detached())
            .await;
        assertions::assert_fetch_error(&result);

        for (i, document) in documents.iter().enumerate() {
            let cached = cache.get_from_document(document, Freshness::Exact).await;
            assert_eq!(cached.is_some(), i < 2, "document {}", i);
        }
        assert_eq!(remote.fetch_calls().len(), 2);
    }

    #[tokio::test]
    async fn test_progress_per_chunk() {
        let documents: Vec<Document> = (0..3).map(|i| document(&format!("m{}", i), 1_000)).collect();
        let remote = store_with(&documents);
        let cache = memory_cache();
        let layout = CollectionLayout::movies();
        let (progress, mut receiver) = ProgressChannel::channel();

        ChunkedFetcher::new(&remote, &cache, &layout, 2)
            .fetch(CONTAINER, &documents, &progress)
            .await
            .expect("fetch");
        drop(progress);

        let mut messages = Vec::new();
        let mut counters = Vec::new();
        while let Some(message) = receiver.recv().await {
            if let WorkerMessage::Progress(event) = message {
                match event {
                    ProgressEvent::Message(text) => messages.push(text),
                    ProgressEvent::Counter { current, total } => {
                        counters.push((current, total))
                    }
                    _ => {}
                }
            }
        }

        assert_eq!(
            messages,
            vec![
                "Loading collection data (0/3)...".to_string(),
                "Loading collection data (2/3)...".to_string(),
            ]
        );
        assert_eq!(counters, vec![(0, 3), (2, 3), (3, 3)]);
    }

    #[tokio::test]
    async fn test_no_documents_no_queries() {
        let remote = MockRemoteStore::new(CONTAINER);
        let cache = memory_cache();
        let layout = CollectionLayout::movies();

        let members = ChunkedFetcher::new(&remote, &cache, &layout, 10)
            .fetch(CONTAINER, &[], &ProgressChannel::detached())
            .await
            .expect("fetch");

        assert!(members.is_empty());
        assert!(remote.fetch_calls().is_empty());
    }
}
