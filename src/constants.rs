//! Central constants for sharpsearch configuration
//!
//! All string literals for paths, filenames, and tuning defaults should be
//! defined here to avoid duplication and ensure consistency across the
//! codebase.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

/// Global shutdown flag, set by the CTRL-C handler.
///
/// This uses a raw `AtomicBool` instead of relying solely on
/// `CancellationToken` because the indexing pipeline is largely synchronous
/// (file I/O, hashing, blocking HTTP) and the flag must be visible from any
/// thread without async polling.
///
/// Checked between files and between embedding batches so that CTRL-C is
/// honoured within a few seconds even during heavy work.
pub static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Check whether a graceful shutdown has been requested (CTRL-C).
#[inline]
pub fn is_shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

/// Check whether a graceful shutdown has been requested via either
/// the global AtomicBool (OS signal) or a CancellationToken.
#[inline]
pub fn check_shutdown(cancel_token: &tokio_util::sync::CancellationToken) -> bool {
    is_shutdown_requested() || cancel_token.is_cancelled()
}

/// Name of the application data directory under the platform local-data dir.
///
/// Shared with the MCP host so both find the same databases in place.
pub const APP_DIR_NAME: &str = "csharp-mcp-server";

/// Subdirectory holding the per-project file-hash snapshots.
pub const STATE_DIR_NAME: &str = "state";

/// Filename of the cross-project embedding cache database.
pub const EMBEDDING_CACHE_DB_NAME: &str = "embedding_cache.db";

/// Log directory name within the application data directory.
pub const LOG_DIR_NAME: &str = "logs";

/// Default log file name.
pub const LOG_FILE_NAME: &str = "sharpsearch.log";

/// Files larger than this are never indexed.
pub const MAX_INDEXED_FILE_BYTES: u64 = 1024 * 1024;

/// Hard upper bound on chunk text length, in characters.
/// Texts beyond this are smart-truncated at a line boundary.
pub const MAX_CHUNK_CHARS: usize = 100_000;

/// Target size for sliding-window splitting, in characters.
///
/// A method whose full text exceeds this still produces one primary chunk,
/// plus overlapping body sub-chunks so retrieval granularity stays bounded.
/// Independent of MAX_CHUNK_CHARS, which only governs truncation.
pub const SLIDING_WINDOW_TARGET_CHARS: usize = 2_000;

/// Fraction of window lines repeated between consecutive body sub-chunks.
pub const WINDOW_OVERLAP_FRACTION: f64 = 0.15;

/// Hard cap on overlap lines regardless of window height.
pub const WINDOW_OVERLAP_MAX_LINES: usize = 10;

/// Member-list length in signature-only type reconstructions.
/// Fields, properties, and methods are each truncated to this many entries.
pub const SIGNATURE_MEMBER_LIMIT: usize = 10;

/// Token budget the embedding endpoint accepts per request.
pub const TOKENS_PER_REQUEST: usize = 120_000;

/// Average characters per token used to convert the token budget into a
/// character budget. A tuning constant; may need to become model-dependent.
pub const CHARS_PER_TOKEN: usize = 3;

/// Effective per-batch character budget: token budget × chars/token with a
/// 0.8 safety margin so a mis-estimate does not overrun the endpoint's real
/// token limit. Const fp math is unstable, so the margin is expressed as a
/// ratio of integers.
pub const fn batch_char_budget() -> usize {
    TOKENS_PER_REQUEST * CHARS_PER_TOKEN / 5 * 4
}

/// Default maximum number of items per embedding batch.
pub const DEFAULT_BATCH_SIZE: usize = 64;

/// Default worker-pool width for hashing, chunking, and cosine scoring.
/// Override with `SHARPSEARCH_MAX_PARALLELISM`.
pub const DEFAULT_MAX_PARALLELISM: usize = 16;

/// Default quiescence window before a project's pending reindex fires.
/// Override with `SHARPSEARCH_DEBOUNCE_SECS`.
pub const DEFAULT_DEBOUNCE_SECS: u64 = 60;

/// Fixed cadence at which the scheduler scans the pending-reindex map.
pub const SCHEDULER_TICK_SECS: u64 = 5;

/// OS-event coalescing window for the filesystem watcher, in milliseconds.
/// This is the notify-level debounce; the per-project quiescence window
/// above is layered on top of it.
pub const FSW_COALESCE_MS: u64 = 2000;

/// Deleted-slot ratio above which `remove_by_path` triggers compaction.
pub const COMPACT_DELETED_RATIO: f64 = 0.25;

/// Largest `k` served by the online bubble top-K; larger requests sort.
pub const TOPK_BUBBLE_LIMIT: usize = 20;

/// Default number of transient-failure retries per embedding batch.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay between embedding retries, in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 500;

/// Source extensions indexed by default. Treated as an opaque set; dispatch
/// falls back to sliding windows for extensions no backend claims.
pub const DEFAULT_EXTENSIONS: &[&str] = &["cs", "razor", "cshtml", "c", "h"];

/// Get the application data directory (`<app-data>/csharp-mcp-server/`).
///
/// Created if it does not exist.
pub fn app_data_dir() -> anyhow::Result<PathBuf> {
    let base = dirs::data_local_dir()
        .ok_or_else(|| anyhow::anyhow!("Could not determine local data directory"))?;

    let app_dir = base.join(APP_DIR_NAME);

    if !app_dir.exists() {
        std::fs::create_dir_all(&app_dir).map_err(|e| {
            anyhow::anyhow!(
                "Failed to create application data directory {}: {}",
                app_dir.display(),
                e
            )
        })?;
    }

    Ok(app_dir)
}

/// Get the state directory holding file-hash snapshots, creating it if needed.
pub fn state_dir() -> anyhow::Result<PathBuf> {
    let dir = app_data_dir()?.join(STATE_DIR_NAME);
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
    }
    Ok(dir)
}

/// Replace characters that are illegal in filenames with `_`, then lowercase.
/// Used to derive per-project database names.
pub fn sanitize_project_name(project: &str) -> String {
    project
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | ' ' => '_',
            other => other,
        })
        .collect::<String>()
        .to_lowercase()
}

/// Database filename for one project's chunk store.
pub fn chunk_store_db_name(project: &str) -> String {
    format!("codesearch-{}.db", sanitize_project_name(project))
}
