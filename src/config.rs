//! Engine configuration with environment overrides.
//!
//! Configuration *files* are handled by the host; the engine only knows its
//! compiled defaults and `SHARPSEARCH_*` environment overrides, mirroring how
//! the rest of the tool chain passes settings down.

use serde::{Deserialize, Serialize};
use std::env;

use crate::constants;

/// Storage precision of embedding vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Precision {
    /// 32-bit floats, 4 bytes per element.
    Single,
    /// 16-bit floats, 2 bytes per element.
    Half,
}

impl Precision {
    /// Bytes per vector element at this precision.
    pub fn element_size(self) -> usize {
        match self {
            Precision::Single => 4,
            Precision::Half => 2,
        }
    }

    /// Stable string form stored in the metadata table.
    pub fn as_str(self) -> &'static str {
        match self {
            Precision::Single => "single",
            Precision::Half => "half",
        }
    }

    /// Integer code stored in the `precision` column of chunk records.
    pub fn as_code(self) -> i64 {
        match self {
            Precision::Single => 32,
            Precision::Half => 16,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            32 => Some(Precision::Single),
            16 => Some(Precision::Half),
            _ => None,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "single" | "f32" | "float32" => Some(Precision::Single),
            "half" | "f16" | "float16" => Some(Precision::Half),
            _ => None,
        }
    }
}

/// Engine configuration: defaults plus `SHARPSEARCH_*` environment overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Embedding endpoint URL.
    pub endpoint: String,
    /// Bearer token for the endpoint, if required.
    pub api_key: Option<String>,
    /// Embedding model identifier (also part of the cache key).
    pub model: String,
    /// Vector dimensionality the endpoint produces.
    pub dimension: usize,
    /// Storage precision of the vectors the endpoint returns.
    pub precision: Precision,
    /// Instruction prepended to query embeddings for asymmetric retrieval.
    pub query_instruction: Option<String>,
    /// Worker-pool width for hashing, chunking, and cosine scoring.
    pub max_parallelism: usize,
    /// Maximum items per embedding batch.
    pub batch_size: usize,
    /// Transient-failure retries per embedding batch.
    pub max_retries: u32,
    /// Delay between embedding retries, in milliseconds.
    pub retry_delay_ms: u64,
    /// Quiescence window before a pending reindex fires, in seconds.
    pub debounce_secs: u64,
    /// Optional periodic full-rescan cadence, in minutes.
    pub rescan_minutes: Option<u64>,
    /// Source extensions considered eligible (lowercase, no dot).
    pub extensions: Vec<String>,
    /// Prefix every chunk with a `// File: <relative-path>` comment.
    pub file_path_context: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080/embed".to_string(),
            api_key: None,
            model: "code-embed-v1".to_string(),
            dimension: 1024,
            precision: Precision::Single,
            query_instruction: None,
            max_parallelism: constants::DEFAULT_MAX_PARALLELISM,
            batch_size: constants::DEFAULT_BATCH_SIZE,
            max_retries: constants::DEFAULT_MAX_RETRIES,
            retry_delay_ms: constants::DEFAULT_RETRY_DELAY_MS,
            debounce_secs: constants::DEFAULT_DEBOUNCE_SECS,
            rescan_minutes: None,
            extensions: constants::DEFAULT_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            file_path_context: true,
        }
    }
}

impl EngineConfig {
    /// Build a config from defaults plus environment overrides.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = env::var("SHARPSEARCH_ENDPOINT") {
            cfg.endpoint = v;
        }
        if let Ok(v) = env::var("SHARPSEARCH_API_KEY") {
            if !v.is_empty() {
                cfg.api_key = Some(v);
            }
        }
        if let Ok(v) = env::var("SHARPSEARCH_MODEL") {
            cfg.model = v;
        }
        if let Some(v) = env_parse::<usize>("SHARPSEARCH_DIMENSION") {
            cfg.dimension = v;
        }
        if let Ok(v) = env::var("SHARPSEARCH_PRECISION") {
            if let Some(p) = Precision::parse(&v) {
                cfg.precision = p;
            } else {
                tracing::warn!("Unknown SHARPSEARCH_PRECISION value: {}", v);
            }
        }
        if let Ok(v) = env::var("SHARPSEARCH_QUERY_INSTRUCTION") {
            if !v.is_empty() {
                cfg.query_instruction = Some(v);
            }
        }
        if let Some(v) = env_parse::<usize>("SHARPSEARCH_MAX_PARALLELISM") {
            cfg.max_parallelism = v.max(1);
        }
        if let Some(v) = env_parse::<usize>("SHARPSEARCH_BATCH_SIZE") {
            cfg.batch_size = v.max(1);
        }
        if let Some(v) = env_parse::<u32>("SHARPSEARCH_MAX_RETRIES") {
            cfg.max_retries = v;
        }
        if let Some(v) = env_parse::<u64>("SHARPSEARCH_RETRY_DELAY_MS") {
            cfg.retry_delay_ms = v;
        }
        if let Some(v) = env_parse::<u64>("SHARPSEARCH_DEBOUNCE_SECS") {
            cfg.debounce_secs = v;
        }
        if let Some(v) = env_parse::<u64>("SHARPSEARCH_RESCAN_MINUTES") {
            cfg.rescan_minutes = if v == 0 { None } else { Some(v) };
        }
        if let Ok(v) = env::var("SHARPSEARCH_EXTENSIONS") {
            let exts: Vec<String> = v
                .split(',')
                .map(|s| s.trim().trim_start_matches('.').to_lowercase())
                .filter(|s| !s.is_empty())
                .collect();
            if !exts.is_empty() {
                cfg.extensions = exts;
            }
        }

        cfg
    }

    /// Effective worker-pool width, never exceeding the machine.
    pub fn effective_parallelism(&self) -> usize {
        self.max_parallelism.min(num_cpus::get().max(1)).max(1)
    }

    /// Whether a path's extension is in the eligible set.
    pub fn is_eligible_extension(&self, path: &std::path::Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| {
                let lower = e.to_lowercase();
                self.extensions.iter().any(|x| x == &lower)
            })
            .unwrap_or(false)
    }

    /// Expected embedding blob length in bytes.
    pub fn blob_len(&self) -> usize {
        self.dimension * self.precision.element_size()
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.parse().ok())
}
