//! Vector index over the manual chunks.
//!
//! The persisted store is authoritative: when it already holds chunks it
//! is loaded as-is and nothing is re-embedded. A fresh store is built from
//! the ingested chunks exactly once and persisted. Neither chunks nor a
//! persisted store means the manual side of the app cannot serve, which is
//! a fatal startup condition handled by the caller.

pub mod sqlite;
pub mod store;

use std::sync::Arc;

use uuid::Uuid;

use crate::core::errors::ApiError;
use crate::ingest::DocumentChunk;
use crate::llm::LlmService;

pub use sqlite::SqliteVectorStore;
pub use store::{ChunkSearchResult, StoredChunk, VectorStore};

const EMBED_BATCH_SIZE: usize = 64;

#[derive(Clone)]
pub struct VectorIndex {
    store: Arc<dyn VectorStore>,
    llm: LlmService,
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex").finish_non_exhaustive()
    }
}

impl VectorIndex {
    /// Loads the persisted index, or builds and persists it from `chunks`.
    pub async fn open(
        store: Arc<dyn VectorStore>,
        llm: LlmService,
        chunks: Vec<DocumentChunk>,
    ) -> Result<Self, ApiError> {
        let existing = store.count().await?;
        if existing > 0 {
            tracing::info!("loaded persisted manual index ({} chunks)", existing);
            return Ok(Self { store, llm });
        }

        if chunks.is_empty() {
            return Err(ApiError::Internal(
                "読み込むマニュアルドキュメントが見つからず、ベクトルデータベースを作成できませんでした。"
                    .to_string(),
            ));
        }

        tracing::info!("building manual index from {} chunks", chunks.len());
        for batch in chunks.chunks(EMBED_BATCH_SIZE) {
            let inputs: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embeddings = llm.embed(&inputs).await?;

            let items = batch
                .iter()
                .zip(embeddings)
                .map(|(chunk, embedding)| {
                    (
                        StoredChunk {
                            chunk_id: Uuid::new_v4().to_string(),
                            content: chunk.text.clone(),
                            source: chunk.source.clone(),
                            page: chunk.page,
                        },
                        embedding,
                    )
                })
                .collect();
            store.insert_batch(items).await?;
        }

        Ok(Self { store, llm })
    }

    /// Embeds the query and returns the nearest chunks.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<ChunkSearchResult>, ApiError> {
        let embeddings = self.llm.embed(&[query.to_string()]).await?;
        let query_embedding = embeddings
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::Upstream("query embedding missing".to_string()))?;

        self.store.search(&query_embedding, k).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::core::config::service::LlmConfig;
    use crate::llm::provider::LlmProvider;
    use crate::llm::types::ChatRequest;

    struct CountingEmbedder {
        embed_calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmProvider for CountingEmbedder {
        fn name(&self) -> &str {
            "counting"
        }

        async fn chat(&self, _request: ChatRequest, _model_id: &str) -> Result<String, ApiError> {
            Ok("unused".to_string())
        }

        async fn embed(
            &self,
            inputs: &[String],
            _model_id: &str,
        ) -> Result<Vec<Vec<f32>>, ApiError> {
            self.embed_calls.fetch_add(1, Ordering::SeqCst);
            Ok(inputs
                .iter()
                .map(|text| vec![text.chars().count() as f32, 1.0])
                .collect())
        }
    }

    fn test_llm(provider: Arc<CountingEmbedder>) -> LlmService {
        LlmService::new(provider, &LlmConfig::default())
    }

    fn make_chunks(n: usize) -> Vec<DocumentChunk> {
        (0..n)
            .map(|i| DocumentChunk {
                text: format!("chunk number {}", i),
                source: "manual.docx".to_string(),
                page: 1,
            })
            .collect()
    }

    async fn empty_store() -> Arc<dyn VectorStore> {
        let tmp =
            std::env::temp_dir().join(format!("misechat-open-test-{}.db", Uuid::new_v4()));
        Arc::new(SqliteVectorStore::open(tmp).await.unwrap())
    }

    #[tokio::test]
    async fn builds_and_persists_once_when_store_is_empty() {
        let store = empty_store().await;
        let provider = Arc::new(CountingEmbedder {
            embed_calls: AtomicUsize::new(0),
        });

        let index = VectorIndex::open(store.clone(), test_llm(provider.clone()), make_chunks(3))
            .await
            .unwrap();

        assert_eq!(store.count().await.unwrap(), 3);
        assert_eq!(provider.embed_calls.load(Ordering::SeqCst), 1);

        let results = index.search("chunk number 0", 2).await.unwrap();
        assert_eq!(results.len(), 2);
        // One extra embed call for the query itself.
        assert_eq!(provider.embed_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn persisted_store_is_never_re_embedded() {
        let store = empty_store().await;
        let builder = Arc::new(CountingEmbedder {
            embed_calls: AtomicUsize::new(0),
        });
        VectorIndex::open(store.clone(), test_llm(builder), make_chunks(2))
            .await
            .unwrap();

        let reloader = Arc::new(CountingEmbedder {
            embed_calls: AtomicUsize::new(0),
        });
        VectorIndex::open(store.clone(), test_llm(reloader.clone()), make_chunks(5))
            .await
            .unwrap();

        // Loaded as-is: no embedding work, no reconciliation with new chunks.
        assert_eq!(reloader.embed_calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn no_chunks_and_no_store_is_fatal() {
        let store = empty_store().await;
        let provider = Arc::new(CountingEmbedder {
            embed_calls: AtomicUsize::new(0),
        });

        let err = VectorIndex::open(store, test_llm(provider), Vec::new())
            .await
            .expect_err("must fail");
        assert!(matches!(err, ApiError::Internal(_)));
    }
}
