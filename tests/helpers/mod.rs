//! Test helpers for sharpsearch integration tests.
//!
//! Provides a deterministic in-process embedding provider (token-frequency
//! vectors, L2-normalized) so end-to-end scenarios run without a network
//! endpoint, plus constructors for a registry rooted in a temp directory.

#![allow(dead_code)] // Each integration test crate uses a subset of these.

use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

use sharpsearch::config::{EngineConfig, Precision};
use sharpsearch::embed::{EmbeddingCache, EmbeddingKind, EmbeddingProvider, EmbeddingService};
use sharpsearch::error::EngineError;
use sharpsearch::vector::simd;
use sharpsearch::EngineRegistry;

/// Embedding dimension used by all integration scenarios.
pub const TEST_DIM: usize = 64;

fn token_hash(token: &str) -> u64 {
    let mut h: u64 = 5381;
    for b in token.bytes() {
        h = h.wrapping_mul(33).wrapping_add(b as u64);
    }
    h
}

/// Token-frequency embedding: deterministic, and texts sharing tokens get
/// high cosine similarity, which is all the retrieval scenarios need.
pub fn embed_text(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; TEST_DIM];
    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let idx = (token_hash(&token.to_lowercase()) as usize) % TEST_DIM;
        vector[idx] += 1.0;
    }

    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

/// Deterministic local embedding provider.
pub struct TokenHashProvider;

impl EmbeddingProvider for TokenHashProvider {
    fn embed(&self, texts: &[String], _kind: EmbeddingKind) -> Result<Vec<Vec<u8>>, EngineError> {
        Ok(texts
            .iter()
            .map(|t| simd::f32_to_blob(&embed_text(t)))
            .collect())
    }

    fn model(&self) -> &str {
        "token-hash-test"
    }

    fn dimension(&self) -> usize {
        TEST_DIM
    }

    fn precision(&self) -> Precision {
        Precision::Single
    }
}

/// Engine configuration tuned for tests: small batches, no retries delay.
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.dimension = TEST_DIM;
    config.precision = Precision::Single;
    config.retry_delay_ms = 0;
    config
}

/// Build a registry whose data directory lives under `data_dir` and whose
/// embeddings come from the token-hash provider.
pub fn test_registry(data_dir: &Path) -> EngineRegistry {
    let config = test_config();
    let cache = Arc::new(
        EmbeddingCache::open(&data_dir.join("embedding_cache.db")).expect("open cache"),
    );
    let embedder = Arc::new(EmbeddingService::with_provider(
        &config,
        cache,
        Arc::new(TokenHashProvider),
    ));
    EngineRegistry::with_parts(config, data_dir.to_path_buf(), embedder).expect("registry")
}

/// A temp project root plus a registry rooted in its own temp data dir.
pub struct TestEnv {
    pub root: TempDir,
    pub data: TempDir,
    pub registry: EngineRegistry,
}

impl TestEnv {
    pub fn new() -> Self {
        let root = tempfile::tempdir().expect("project tempdir");
        let data = tempfile::tempdir().expect("data tempdir");
        let registry = test_registry(data.path());
        Self {
            root,
            data,
            registry,
        }
    }

    pub fn write(&self, name: &str, content: &str) {
        let path = self.root.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent");
        }
        std::fs::write(path, content).expect("write test file");
    }

    pub fn remove(&self, name: &str) {
        std::fs::remove_file(self.root.path().join(name)).expect("remove test file");
    }
}
