use crate::config::RetrievalConfig;
use crate::embeddings::{EmbeddingClient, EmbeddingProvider};
use crate::error::RetrievalError;
use crate::models::{RequestContext, ScoredChunk};
use crate::query::QueryPreprocessor;
use crate::traits::DocumentStore;
use std::sync::Arc;
use tracing::{info, info_span, Instrument};

/// Cutoff relative to the best candidate, never below `threshold_base`.
pub fn adaptive_threshold(top_similarity: f32, config: &RetrievalConfig) -> f32 {
    (top_similarity - config.threshold_margin).max(config.threshold_base)
}

/// Applies the adaptive threshold to a pool sorted best first.
pub fn select_results(pool: Vec<ScoredChunk>, config: &RetrievalConfig) -> Vec<ScoredChunk> {
    let top = pool.first().map_or(0.0, |candidate| candidate.similarity);
    let threshold = adaptive_threshold(top, config);
    pool.into_iter()
        .filter(|candidate| candidate.similarity >= threshold)
        .take(config.max_results)
        .collect()
}

/// Ranks stored chunks against a natural-language query.
///
/// Stateless apart from its shared handles; concurrent calls need no coordination.
pub struct Retriever<P, S> {
    embeddings: Arc<EmbeddingClient<P>>,
    store: Arc<S>,
    preprocessor: QueryPreprocessor,
    config: RetrievalConfig,
}

impl<P, S> Retriever<P, S>
where
    P: EmbeddingProvider,
    S: DocumentStore,
{
    pub fn new(
        embeddings: Arc<EmbeddingClient<P>>,
        store: Arc<S>,
        preprocessor: QueryPreprocessor,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            embeddings,
            store,
            preprocessor,
            config,
        }
    }

    /// Best matching chunks, best first. An empty result means nothing relevant
    /// was found; provider or store failures are errors.
    pub async fn retrieve(
        &self,
        ctx: &RequestContext,
        query: &str,
    ) -> Result<Vec<ScoredChunk>, RetrievalError> {
        let span = info_span!("retrieve", request_id = %ctx.request_id);
        self.rank(query).instrument(span).await
    }

    async fn rank(&self, query: &str) -> Result<Vec<ScoredChunk>, RetrievalError> {
        if query.trim().is_empty() {
            return Err(RetrievalError::InvalidQuery("query is empty".to_string()));
        }

        let processed = self.preprocessor.expand(query);
        let vector = self.embeddings.embed_one(&processed).await?;
        let pool = self
            .store
            .cosine_similarity(&vector, self.config.similarity_floor, self.config.candidate_pool)
            .await?;

        let top_similarity = pool.first().map_or(0.0, |candidate| candidate.similarity);
        let pool_size = pool.len();
        let results = select_results(pool, &self.config);

        info!(
            processed_query = %processed,
            pool_size,
            top_similarity,
            threshold = adaptive_threshold(top_similarity, &self.config),
            returned = results.len(),
            "ranked query"
        );
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EmbeddingError;
    use crate::models::{Chunk, ChunkMetadata, DocumentType, NewDocument};
    use crate::stores::MemoryStore;
    use async_trait::async_trait;
    use std::time::Duration;

    fn candidate(id: &str, similarity: f32) -> ScoredChunk {
        ScoredChunk {
            chunk_id: id.to_string(),
            document_id: "doc".to_string(),
            content: id.to_string(),
            similarity,
            document_title: "Rules of Business".to_string(),
            document_type: DocumentType::Policies,
            page_number: 1,
            section: None,
        }
    }

    struct FixedProvider {
        vector: Option<Vec<f32>>,
    }

    #[async_trait]
    impl EmbeddingProvider for FixedProvider {
        fn model_name(&self) -> &str {
            "fixed"
        }

        fn dimensions(&self) -> usize {
            2
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            self.vector
                .clone()
                .ok_or_else(|| EmbeddingError::Transient("provider offline".to_string()))
        }
    }

    fn retriever(provider: FixedProvider, store: Arc<MemoryStore>) -> Retriever<FixedProvider, MemoryStore> {
        Retriever::new(
            Arc::new(EmbeddingClient::with_pacing(provider, 3, Duration::ZERO)),
            store,
            QueryPreprocessor::new().unwrap(),
            RetrievalConfig::default(),
        )
    }

    #[test]
    fn strong_top_match_tightens_threshold() {
        let config = RetrievalConfig::default();
        let selected = select_results(vec![candidate("a", 0.92), candidate("b", 0.55)], &config);

        assert!((adaptive_threshold(0.92, &config) - 0.82).abs() < 1e-6);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].chunk_id, "a");
    }

    #[test]
    fn threshold_never_drops_below_base() {
        let config = RetrievalConfig::default();
        let mut previous = f32::MAX;
        for step in (0..=100).rev() {
            let top = step as f32 / 100.0;
            let threshold = adaptive_threshold(top, &config);
            assert!(threshold >= 0.5);
            assert!(threshold <= (top - 0.1).max(0.5) + f32::EPSILON);
            assert!(threshold <= previous);
            previous = threshold;
        }
        assert_eq!(adaptive_threshold(0.0, &config), 0.5);
    }

    #[test]
    fn weak_pool_returns_nothing() {
        let config = RetrievalConfig::default();
        let selected = select_results(vec![candidate("a", 0.45), candidate("b", 0.31)], &config);
        assert!(selected.is_empty());
        assert!(select_results(Vec::new(), &config).is_empty());
    }

    #[test]
    fn at_most_max_results_in_order() {
        let config = RetrievalConfig::default();
        let pool = (0..10)
            .map(|index| candidate(&format!("c{index}"), 0.95 - index as f32 * 0.01))
            .collect();
        let selected = select_results(pool, &config);

        assert_eq!(selected.len(), 4);
        assert_eq!(selected[0].chunk_id, "c0");
        assert_eq!(selected[3].chunk_id, "c3");
    }

    #[tokio::test]
    async fn retrieve_joins_document_context() {
        let store = Arc::new(MemoryStore::new());
        let document = store
            .insert_document(NewDocument {
                title: "Estacode".to_string(),
                doc_type: DocumentType::Legacy("estacode".to_string()),
                raw_content: String::new(),
                original_file_name: "estacode.pdf".to_string(),
            })
            .await
            .unwrap();
        store
            .insert_chunks(vec![
                Chunk {
                    id: "near".to_string(),
                    document_id: document.id.clone(),
                    content: "leave rules".to_string(),
                    vector: vec![1.0, 0.05],
                    metadata: ChunkMetadata {
                        page_number: 7,
                        section: Some("Leave".to_string()),
                        timestamp: None,
                    },
                },
                Chunk {
                    id: "far".to_string(),
                    document_id: document.id.clone(),
                    content: "pension".to_string(),
                    vector: vec![0.0, 1.0],
                    metadata: ChunkMetadata::default(),
                },
            ])
            .await
            .unwrap();

        let retriever = retriever(
            FixedProvider {
                vector: Some(vec![1.0, 0.0]),
            },
            store,
        );
        let results = retriever
            .retrieve(&RequestContext::new(), "leave rules")
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk_id, "near");
        assert_eq!(results[0].document_title, "Estacode");
        assert_eq!(results[0].page_number, 7);
        assert_eq!(results[0].section.as_deref(), Some("Leave"));
    }

    #[tokio::test]
    async fn provider_outage_is_an_error_not_an_empty_result() {
        let store = Arc::new(MemoryStore::new());
        let offline = retriever(FixedProvider { vector: None }, store.clone());
        let result = offline.retrieve(&RequestContext::new(), "leave rules").await;
        assert!(matches!(result, Err(RetrievalError::Unavailable(_))));

        let online = retriever(
            FixedProvider {
                vector: Some(vec![1.0, 0.0]),
            },
            store,
        );
        let empty = online
            .retrieve(&RequestContext::new(), "leave rules")
            .await
            .unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn blank_query_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let retriever = retriever(
            FixedProvider {
                vector: Some(vec![1.0, 0.0]),
            },
            store,
        );
        let result = retriever.retrieve(&RequestContext::new(), "   ").await;
        assert!(matches!(result, Err(RetrievalError::InvalidQuery(_))));
    }
}
