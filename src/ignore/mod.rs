//! Fixed-rule ignore decisions for indexable files.
//!
//! Rules are evaluated in order with first match winning: directory
//! segments, extension suffixes, wildcard patterns, then the size gate.
//! All matching is case-insensitive over separator-normalized paths, so two
//! processes with the same build agree on every path.

use std::path::Path;
use tracing::debug;

use crate::constants::MAX_INDEXED_FILE_BYTES;

/// Directory segments that are never indexed, matched as whole path
/// components (build output, package restore, IDE state, EF migrations).
const IGNORED_DIRS: &[&str] = &[
    "bin",
    "obj",
    "packages",
    "testresults",
    "node_modules",
    "dist",
    "build",
    ".git",
    ".vs",
    "migrations",
];

/// Filename suffixes that are never indexed (compiled output, IDE caches,
/// minified assets).
const IGNORED_SUFFIXES: &[&str] = &[
    ".dll", ".exe", ".pdb", ".cache", ".user", ".suo", ".min.js", ".min.css",
];

/// Wildcard patterns: the pre-`*` part must occur in the path, then the
/// post-`*` part after it.
const IGNORED_WILDCARDS: &[&str] = &["_resharper*"];

/// Applies the fixed ignore rules for one project root.
#[derive(Debug, Clone, Default)]
pub struct IgnoreMatcher;

impl IgnoreMatcher {
    pub fn new() -> Self {
        Self
    }

    /// Full ignore decision for an absolute path: rule tables first, then
    /// the file-size gate. Metadata errors are swallowed (a file we cannot
    /// stat is not ignored *by size*; the hasher will report it later).
    pub fn is_ignored(&self, path: &Path, root: &Path) -> bool {
        let rel = normalize_relative(path, root);
        if self.is_ignored_by_rules(&rel) {
            return true;
        }

        match std::fs::metadata(path) {
            Ok(meta) => meta.len() > MAX_INDEXED_FILE_BYTES,
            Err(e) => {
                debug!("Could not stat {} ({}), size rule skipped", path.display(), e);
                false
            }
        }
    }

    /// Pure rule evaluation over a normalized relative path. Deterministic:
    /// depends only on the path string and the compiled tables.
    pub fn is_ignored_by_rules(&self, normalized_rel: &str) -> bool {
        let p = normalized_rel.to_lowercase();

        // 1. Directory rules: segment at the start or enclosed in separators.
        for dir in IGNORED_DIRS {
            if p.starts_with(&format!("{}/", dir)) || p.contains(&format!("/{}/", dir)) {
                return true;
            }
        }
        // 2. Extension rules on the full filename, so compound suffixes like
        //    `.min.js` are caught.
        for suffix in IGNORED_SUFFIXES {
            if p.ends_with(suffix) {
                return true;
            }
        }

        // 3. Wildcard rules: both halves must occur, in order.
        for pattern in IGNORED_WILDCARDS {
            if let Some((pre, post)) = pattern.split_once('*') {
                if let Some(at) = p.find(pre) {
                    if p[at + pre.len()..].contains(post) {
                        return true;
                    }
                }
            }
        }

        false
    }
}

/// Normalize to a root-relative, forward-slash path.
/// Falls back to the full path when `path` is not under `root`.
fn normalize_relative(path: &Path, root: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn matcher() -> IgnoreMatcher {
        IgnoreMatcher::new()
    }

    #[test]
    fn test_directory_rules() {
        let m = matcher();
        assert!(m.is_ignored_by_rules("bin/Debug/App.cs"));
        assert!(m.is_ignored_by_rules("src/obj/Release/x.cs"));
        assert!(m.is_ignored_by_rules("Web/node_modules/pkg/index.c"));
        assert!(m.is_ignored_by_rules(".git/hooks/pre-commit.c"));
        assert!(m.is_ignored_by_rules("Data/Migrations/20240101_Init.cs"));
        assert!(m.is_ignored_by_rules("x/_ReSharper.Caches/y.cs"));

        // Segment match, not substring: "binx" is not "bin".
        assert!(!m.is_ignored_by_rules("binx/App.cs"));
        assert!(!m.is_ignored_by_rules("src/Cabinet/Drawer.cs"));
    }

    #[test]
    fn test_case_insensitive() {
        let m = matcher();
        assert!(m.is_ignored_by_rules("BIN/Debug/App.cs"));
        assert!(m.is_ignored_by_rules("src/OBJ/x.cs"));
        assert!(m.is_ignored_by_rules("TestResults/run1/log.cs"));
        assert!(m.is_ignored_by_rules("app/Helper.DLL"));
    }

    #[test]
    fn test_suffix_rules() {
        let m = matcher();
        assert!(m.is_ignored_by_rules("lib/native.dll"));
        assert!(m.is_ignored_by_rules("out/app.exe"));
        assert!(m.is_ignored_by_rules("symbols/app.pdb"));
        assert!(m.is_ignored_by_rules("proj.csproj.user"));
        assert!(m.is_ignored_by_rules("wwwroot/site.min.js"));
        assert!(m.is_ignored_by_rules("wwwroot/site.min.css"));

        // Plain .js/.css are not in the tables (extension gating happens
        // upstream in the eligible set).
        assert!(!m.is_ignored_by_rules("wwwroot/site.js"));
        assert!(!m.is_ignored_by_rules("src/Program.cs"));
    }

    #[test]
    fn test_size_boundary() {
        let dir = tempdir().unwrap();
        let m = matcher();

        // Exactly 1 MiB is kept.
        let at_limit = dir.path().join("at_limit.cs");
        fs::write(&at_limit, vec![b'x'; MAX_INDEXED_FILE_BYTES as usize]).unwrap();
        assert!(!m.is_ignored(&at_limit, dir.path()));

        // One byte over is ignored.
        let over = dir.path().join("over.cs");
        fs::write(&over, vec![b'x'; MAX_INDEXED_FILE_BYTES as usize + 1]).unwrap();
        assert!(m.is_ignored(&over, dir.path()));
    }

    #[test]
    fn test_missing_file_not_ignored_by_size() {
        let m = matcher();
        let ghost = PathBuf::from("/nonexistent/dir/ghost.cs");
        assert!(!m.is_ignored(&ghost, Path::new("/nonexistent")));
    }

    #[test]
    fn test_determinism() {
        let m = matcher();
        for p in ["bin/a.cs", "src/Program.cs", "x/y/z.min.js", "obj/q.cs"] {
            assert_eq!(m.is_ignored_by_rules(p), m.is_ignored_by_rules(p));
        }
    }
}
