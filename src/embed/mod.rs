//! Embedding pipeline: persistent cache in front of a batched remote call.

pub mod batch;
pub mod cache;
pub mod client;

pub use batch::{BatchStats, EmbeddingBatcher};
pub use cache::{CacheKey, EmbeddingCache, QueryCache, QueryCacheStats};
pub use client::{EmbeddingKind, EmbeddingProvider, HttpEmbeddingProvider};

use std::sync::Arc;
use tracing::{debug, warn};

use crate::chunker::Chunk;
use crate::config::{EngineConfig, Precision};
use crate::error::EngineError;
use crate::tracker::hash::hash_text;

/// Outcome of embedding one chunk set. `blobs` is index-aligned with the
/// input; `None` marks a chunk whose batch was dropped.
#[derive(Debug, Default)]
pub struct EmbedOutcome {
    pub blobs: Vec<Option<Vec<u8>>>,
    pub cache_hits: usize,
    pub computed: usize,
    pub dropped: usize,
    pub batches_sent: usize,
}

/// High-level embedding service: persistent cache consultation, dynamic
/// batching for misses, query-side caching.
pub struct EmbeddingService {
    provider: Arc<dyn EmbeddingProvider>,
    batcher: EmbeddingBatcher,
    cache: Arc<EmbeddingCache>,
    query_cache: QueryCache,
}

impl EmbeddingService {
    pub fn new(config: &EngineConfig, cache: Arc<EmbeddingCache>) -> Result<Self, EngineError> {
        let provider: Arc<dyn EmbeddingProvider> = Arc::new(HttpEmbeddingProvider::new(config)?);
        Ok(Self::with_provider(config, cache, provider))
    }

    /// Construct over any provider. Tests use deterministic in-process
    /// providers through this seam.
    pub fn with_provider(
        config: &EngineConfig,
        cache: Arc<EmbeddingCache>,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        let batcher = EmbeddingBatcher::new(
            provider.clone(),
            config.batch_size,
            config.max_retries,
            config.retry_delay_ms,
        );
        Self {
            provider,
            batcher,
            cache,
            query_cache: QueryCache::new(),
        }
    }

    /// Embed chunk texts for one project, consulting the persistent cache
    /// first and batching only the misses.
    pub fn embed_chunks(&self, project: &str, chunks: &[Chunk]) -> EmbedOutcome {
        if chunks.is_empty() {
            return EmbedOutcome::default();
        }

        let model = self.provider.model().to_string();
        let keys: Vec<CacheKey> = chunks
            .iter()
            .map(|c| CacheKey::document(hash_text(&c.text), model.clone(), project))
            .collect();

        let mut blobs: Vec<Option<Vec<u8>>> = vec![None; chunks.len()];
        let mut miss_indices: Vec<usize> = Vec::new();

        for (i, key) in keys.iter().enumerate() {
            match self.cache.get(key) {
                Ok(Some(blob)) => blobs[i] = Some(blob),
                Ok(None) => miss_indices.push(i),
                Err(e) => {
                    warn!("Embedding cache lookup failed ({}), treating as miss", e);
                    miss_indices.push(i);
                }
            }
        }

        let cache_hits = chunks.len() - miss_indices.len();
        let mut outcome = EmbedOutcome {
            blobs: Vec::new(),
            cache_hits,
            computed: 0,
            dropped: 0,
            batches_sent: 0,
        };

        if !miss_indices.is_empty() {
            let miss_texts: Vec<String> = miss_indices
                .iter()
                .map(|&i| chunks[i].text.clone())
                .collect();
            let (computed, stats) = self.batcher.embed_documents(&miss_texts);
            outcome.batches_sent = stats.batches_sent;
            outcome.computed = stats.items_embedded;
            outcome.dropped = stats.items_dropped;

            let mut writeback: Vec<(CacheKey, Vec<u8>)> = Vec::new();
            for (&idx, blob) in miss_indices.iter().zip(computed.into_iter()) {
                if let Some(blob) = blob {
                    writeback.push((keys[idx].clone(), blob.clone()));
                    blobs[idx] = Some(blob);
                }
            }
            if !writeback.is_empty() {
                if let Err(e) = self.cache.put_many(&writeback) {
                    warn!("Embedding cache write-back failed: {}", e);
                }
            }
        }

        if cache_hits > 0 {
            debug!(
                "Embedded {} chunks ({} cache hits, {} computed, {} dropped)",
                chunks.len(),
                cache_hits,
                outcome.computed,
                outcome.dropped
            );
        }

        outcome.blobs = blobs;
        outcome
    }

    /// Embed a query, consulting the in-memory cache, then the persistent
    /// cache, then the endpoint.
    pub fn embed_query(&self, query: &str) -> Result<Vec<u8>, EngineError> {
        if let Some(blob) = self.query_cache.get(query) {
            return Ok(blob);
        }

        let key = CacheKey::query(hash_text(query), self.provider.model());
        if let Ok(Some(blob)) = self.cache.get(&key) {
            self.query_cache.put(query, blob.clone());
            return Ok(blob);
        }

        let blob = self.batcher.embed_query(query)?;
        if let Err(e) = self.cache.put(&key, &blob) {
            warn!("Query embedding cache write failed: {}", e);
        }
        self.query_cache.put(query, blob.clone());
        Ok(blob)
    }

    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    pub fn precision(&self) -> Precision {
        self.provider.precision()
    }

    pub fn model(&self) -> &str {
        self.provider.model()
    }

    pub fn query_cache_stats(&self) -> QueryCacheStats {
        self.query_cache.stats()
    }

    pub fn cache(&self) -> Arc<EmbeddingCache> {
        self.cache.clone()
    }
}
