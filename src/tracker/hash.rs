//! Content hashing for change detection.
//!
//! Files are streamed through SHA-256 and reported as plain base64 (no
//! prefix, no suffix). Hashing a change set fans out over a bounded rayon
//! pool; a file that cannot be read is logged and skipped, never fatal.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Stream a file into a SHA-256 digest and return its base64 form.
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(BASE64.encode(hasher.finalize()))
}

/// Hash a string in memory. Used for chunk texts (embedding-cache keys) and
/// for the state-file name digest.
pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Hash many files on a bounded worker pool.
///
/// Returns `(path, hash)` pairs for every file that could be read; unreadable
/// files are logged and dropped from the result.
pub fn hash_files_parallel(paths: &[PathBuf], parallelism: usize) -> Vec<(PathBuf, String)> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(parallelism.max(1))
        .build();

    let hash_all = |paths: &[PathBuf]| -> Vec<(PathBuf, String)> {
        paths
            .par_iter()
            .filter_map(|path| match hash_file(path) {
                Ok(hash) => Some((path.clone(), hash)),
                Err(e) => {
                    warn!("Failed to hash {}: {}, skipping", path.display(), e);
                    None
                }
            })
            .collect()
    };

    match pool {
        Ok(pool) => pool.install(|| hash_all(paths)),
        // Pool construction can only fail on resource exhaustion; fall back
        // to the global pool rather than aborting the cycle.
        Err(e) => {
            warn!("Worker pool creation failed ({}), using global pool", e);
            hash_all(paths)
        }
    }
}

/// Filename-safe digest used in state-file names:
/// base64(SHA-256(lowercase(directory[|project]))) with `/`→`_`, `+`→`-`,
/// `=`→`_`.
pub fn state_key(directory: &str, project: Option<&str>) -> String {
    let input = match project {
        Some(p) => format!("{}|{}", directory, p).to_lowercase(),
        None => directory.to_lowercase(),
    };
    hash_text(&input)
        .replace('/', "_")
        .replace('+', "-")
        .replace('=', "_")
}
