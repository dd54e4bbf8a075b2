//! Dynamic batching against the embedding capability.
//!
//! Batches grow while both the item count and the cumulative character
//! budget allow; an item that alone exceeds the budget travels as its own
//! batch. Transient failures are retried per batch; an exhausted or
//! permanently failing batch is dropped with its items unresolved so the
//! reindex cycle can carry on with the rest.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use super::client::{EmbeddingKind, EmbeddingProvider};
use crate::constants::{batch_char_budget, is_shutdown_requested};
use crate::error::EngineError;

/// One planned request: indexes into the caller's text slice.
#[derive(Debug, PartialEq, Eq)]
struct BatchPlan {
    indices: Vec<usize>,
}

/// Groups texts into budgeted batches and drives the provider.
pub struct EmbeddingBatcher {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    max_chars: usize,
    max_retries: u32,
    retry_delay: Duration,
}

/// Counters for one batched run.
#[derive(Debug, Default, Clone, Copy)]
pub struct BatchStats {
    pub batches_sent: usize,
    pub items_embedded: usize,
    pub items_dropped: usize,
}

impl EmbeddingBatcher {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        batch_size: usize,
        max_retries: u32,
        retry_delay_ms: u64,
    ) -> Self {
        Self {
            provider,
            batch_size: batch_size.max(1),
            max_chars: batch_char_budget(),
            max_retries,
            retry_delay: Duration::from_millis(retry_delay_ms),
        }
    }

    /// Embed document texts. The result is index-aligned with the input:
    /// `None` marks an item whose batch was dropped.
    pub fn embed_documents(&self, texts: &[String]) -> (Vec<Option<Vec<u8>>>, BatchStats) {
        let mut results: Vec<Option<Vec<u8>>> = vec![None; texts.len()];
        let mut stats = BatchStats::default();

        for plan in self.plan_batches(texts) {
            if is_shutdown_requested() {
                debug!("Shutdown requested, abandoning remaining embedding batches");
                stats.items_dropped += plan.indices.len();
                continue;
            }

            let batch_texts: Vec<String> =
                plan.indices.iter().map(|&i| texts[i].clone()).collect();

            match self.call_with_retry(&batch_texts, EmbeddingKind::Document) {
                Ok(blobs) => {
                    stats.batches_sent += 1;
                    stats.items_embedded += blobs.len();
                    for (&idx, blob) in plan.indices.iter().zip(blobs.into_iter()) {
                        results[idx] = Some(blob);
                    }
                }
                Err(e) => {
                    stats.items_dropped += plan.indices.len();
                    match e {
                        EngineError::EmbeddingTransient(msg) => warn!(
                            "Dropping batch of {} after {} retries: {}",
                            plan.indices.len(),
                            self.max_retries,
                            msg
                        ),
                        other => error!(
                            "Dropping batch of {}: {}",
                            plan.indices.len(),
                            other
                        ),
                    }
                }
            }
        }

        (results, stats)
    }

    /// Embed one query text. The provider prepends the configured query
    /// instruction on its side of the seam.
    pub fn embed_query(&self, text: &str) -> Result<Vec<u8>, EngineError> {
        let texts = vec![text.to_string()];
        let mut blobs = self.call_with_retry(&texts, EmbeddingKind::Query)?;
        blobs
            .pop()
            .ok_or_else(|| EngineError::EmbeddingPermanent("empty query response".to_string()))
    }

    fn call_with_retry(
        &self,
        texts: &[String],
        kind: EmbeddingKind,
    ) -> Result<Vec<Vec<u8>>, EngineError> {
        let mut attempt = 0u32;
        loop {
            match self.provider.embed(texts, kind) {
                Ok(blobs) => return Ok(blobs),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    debug!(
                        "Transient embedding failure (attempt {}/{}): {}",
                        attempt, self.max_retries, e
                    );
                    std::thread::sleep(self.retry_delay);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Greedy batch planning under the item-count and character budgets.
    fn plan_batches(&self, texts: &[String]) -> Vec<BatchPlan> {
        let mut plans = Vec::new();
        let mut indices = Vec::new();
        let mut chars = 0usize;

        for (i, text) in texts.iter().enumerate() {
            let len = text.chars().count();

            if len > self.max_chars {
                // An item that alone exceeds the budget still has to travel;
                // give it a dedicated batch rather than silently dropping it.
                warn!(
                    "Text of {} chars exceeds the {}-char batch budget; sending as its own batch",
                    len, self.max_chars
                );
                if !indices.is_empty() {
                    plans.push(BatchPlan {
                        indices: std::mem::take(&mut indices),
                    });
                    chars = 0;
                }
                plans.push(BatchPlan { indices: vec![i] });
                continue;
            }

            if !indices.is_empty()
                && (indices.len() >= self.batch_size || chars + len > self.max_chars)
            {
                plans.push(BatchPlan {
                    indices: std::mem::take(&mut indices),
                });
                chars = 0;
            }

            indices.push(i);
            chars += len;
        }

        if !indices.is_empty() {
            plans.push(BatchPlan { indices });
        }

        plans
    }
}
