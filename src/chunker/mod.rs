//! Structural chunking of source files.
//!
//! A file is dispatched to one of three language backends by extension;
//! backends never fail — a file that defeats the scanner degrades to
//! whole-file or sliding-window chunks. Per-file post-processing dedups,
//! classifies domain signal (auth/security/config/controller/service), and
//! assigns stable identifiers.

mod cfamily;
mod managed;
mod markup;
pub mod window;

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::OnceLock;
use tracing::warn;

use crate::constants::{MAX_CHUNK_CHARS, SLIDING_WINDOW_TARGET_CHARS};
use crate::error::EngineError;

/// Closed set of chunk classifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkKind {
    Class,
    Method,
    Interface,
    Record,
    Enum,
    Property,
    LocalFunction,
    GlobalUsings,
    TopLevelStatements,
    SlidingWindow,
    MethodBody,
    Generated,
    File,
    CFunction,
    CStruct,
    CEnum,
    CTypedef,
    CMacro,
    CFile,
    CFunctionBody,
    RazorCode,
    RazorMethod,
    RazorMethodBody,
    RazorCodeBody,
    RazorHtml,
    RazorFile,
}

impl ChunkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChunkKind::Class => "class",
            ChunkKind::Method => "method",
            ChunkKind::Interface => "interface",
            ChunkKind::Record => "record",
            ChunkKind::Enum => "enum",
            ChunkKind::Property => "property",
            ChunkKind::LocalFunction => "local_function",
            ChunkKind::GlobalUsings => "global_usings",
            ChunkKind::TopLevelStatements => "top_level_statements",
            ChunkKind::SlidingWindow => "sliding_window",
            ChunkKind::MethodBody => "method-body",
            ChunkKind::Generated => "generated",
            ChunkKind::File => "file",
            ChunkKind::CFunction => "c-function",
            ChunkKind::CStruct => "c-struct",
            ChunkKind::CEnum => "c-enum",
            ChunkKind::CTypedef => "c-typedef",
            ChunkKind::CMacro => "c-macro",
            ChunkKind::CFile => "c-file",
            ChunkKind::CFunctionBody => "c-function-body",
            ChunkKind::RazorCode => "razor-code",
            ChunkKind::RazorMethod => "razor-method",
            ChunkKind::RazorMethodBody => "razor-method-body",
            ChunkKind::RazorCodeBody => "razor-code-body",
            ChunkKind::RazorHtml => "razor-html",
            ChunkKind::RazorFile => "razor-file",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "class" => ChunkKind::Class,
            "method" => ChunkKind::Method,
            "interface" => ChunkKind::Interface,
            "record" => ChunkKind::Record,
            "enum" => ChunkKind::Enum,
            "property" => ChunkKind::Property,
            "local_function" => ChunkKind::LocalFunction,
            "global_usings" => ChunkKind::GlobalUsings,
            "top_level_statements" => ChunkKind::TopLevelStatements,
            "sliding_window" => ChunkKind::SlidingWindow,
            "method-body" => ChunkKind::MethodBody,
            "generated" => ChunkKind::Generated,
            "file" => ChunkKind::File,
            "c-function" => ChunkKind::CFunction,
            "c-struct" => ChunkKind::CStruct,
            "c-enum" => ChunkKind::CEnum,
            "c-typedef" => ChunkKind::CTypedef,
            "c-macro" => ChunkKind::CMacro,
            "c-file" => ChunkKind::CFile,
            "c-function-body" => ChunkKind::CFunctionBody,
            "razor-code" => ChunkKind::RazorCode,
            "razor-method" => ChunkKind::RazorMethod,
            "razor-method-body" => ChunkKind::RazorMethodBody,
            "razor-code-body" => ChunkKind::RazorCodeBody,
            "razor-html" => ChunkKind::RazorHtml,
            "razor-file" => ChunkKind::RazorFile,
            _ => return None,
        })
    }

    /// Structural kinds carry a domain suffix; whole-file, window, body, and
    /// generated chunks do not.
    pub fn accepts_suffix(self) -> bool {
        !matches!(
            self,
            ChunkKind::SlidingWindow
                | ChunkKind::Generated
                | ChunkKind::File
                | ChunkKind::CFile
                | ChunkKind::RazorFile
                | ChunkKind::MethodBody
                | ChunkKind::CFunctionBody
                | ChunkKind::RazorMethodBody
                | ChunkKind::RazorCodeBody
        )
    }

    /// Class-like kinds eligible for the controller/service suffixes.
    pub fn is_class_like(self) -> bool {
        matches!(self, ChunkKind::Class)
    }

    pub fn is_method_like(self) -> bool {
        matches!(
            self,
            ChunkKind::Method | ChunkKind::LocalFunction | ChunkKind::CFunction | ChunkKind::RazorMethod
        )
    }
}

/// Domain signal appended to a structural kind, at most one per chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DomainSuffix {
    Auth,
    Security,
    Config,
    Controller,
    Service,
}

impl DomainSuffix {
    pub fn as_str(self) -> &'static str {
        match self {
            DomainSuffix::Auth => "-auth",
            DomainSuffix::Security => "-security",
            DomainSuffix::Config => "-config",
            DomainSuffix::Controller => "-controller",
            DomainSuffix::Service => "-service",
        }
    }
}

/// Parse a stored kind tag like `method-auth` back into kind + suffix.
pub fn parse_kind_tag(tag: &str) -> (Option<ChunkKind>, Option<DomainSuffix>) {
    if let Some(kind) = ChunkKind::parse(tag) {
        return (Some(kind), None);
    }
    for suffix in [
        DomainSuffix::Auth,
        DomainSuffix::Security,
        DomainSuffix::Config,
        DomainSuffix::Controller,
        DomainSuffix::Service,
    ] {
        if let Some(base) = tag.strip_suffix(suffix.as_str()) {
            return (ChunkKind::parse(base), Some(suffix));
        }
    }
    (None, None)
}

/// Unit of retrieval.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Stable identifier: `<path>:<start-line>[:<suffix>]`, unique per project.
    pub id: String,
    /// Absolute path, forward slashes.
    pub path: String,
    /// 1-based, inclusive.
    pub start_line: usize,
    pub end_line: usize,
    pub text: String,
    pub kind: ChunkKind,
    pub suffix: Option<DomainSuffix>,
    /// Modification timestamp of the source file.
    pub modified_at: DateTime<Utc>,
}

impl Chunk {
    /// Full classification tag, e.g. `method-auth` or `class`.
    pub fn kind_tag(&self) -> String {
        match self.suffix {
            Some(s) => format!("{}{}", self.kind.as_str(), s.as_str()),
            None => self.kind.as_str().to_string(),
        }
    }
}

/// A raw piece produced by a backend before post-processing.
#[derive(Debug, Clone)]
pub(crate) struct Piece {
    pub text: String,
    pub start_line: usize,
    pub end_line: usize,
    pub kind: ChunkKind,
}

/// Language backends, dispatched on file extension. A tagged variant rather
/// than trait objects: the set is closed and the dispatch site is one match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LanguageBackend {
    Managed,
    CFamily,
    Markup,
}

impl LanguageBackend {
    pub fn for_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "cs" => Some(LanguageBackend::Managed),
            "c" | "h" => Some(LanguageBackend::CFamily),
            "razor" | "cshtml" => Some(LanguageBackend::Markup),
            _ => None,
        }
    }
}

/// Splits source files into semantic chunks.
pub struct Chunker {
    file_path_context: bool,
}

impl Chunker {
    pub fn new(file_path_context: bool) -> Self {
        Self { file_path_context }
    }

    /// Chunk one file. The only error is a failed read; everything past the
    /// read degrades instead of failing.
    pub fn chunk_file(&self, path: &Path) -> Result<Vec<Chunk>, EngineError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::read_failure(path, e.to_string()))?;
        let modified_at = file_mtime(path);
        Ok(self.chunk_content(path, &content, modified_at))
    }

    /// Chunk already-read content. Deterministic except for the timestamp
    /// passed in.
    pub fn chunk_content(
        &self,
        path: &Path,
        content: &str,
        modified_at: DateTime<Utc>,
    ) -> Vec<Chunk> {
        let path_str = path.to_string_lossy().replace('\\', "/");
        let lines: Vec<&str> = content.lines().collect();

        let mut pieces = if let Some(piece) = generated_summary(path, &lines) {
            vec![piece]
        } else {
            let backend = LanguageBackend::for_path(path);
            let mut pieces = match backend {
                Some(LanguageBackend::Managed) => managed::parse(&lines),
                Some(LanguageBackend::CFamily) => cfamily::parse(path, &lines),
                Some(LanguageBackend::Markup) => markup::parse(path, &lines),
                None => Vec::new(),
            };
            if pieces.is_empty() {
                pieces = window::whole_file_fallback(&lines, backend);
            }
            pieces
        };

        dedup_pieces(&mut pieces);

        let prefix = if self.file_path_context {
            Some(format!("// File: {}\n", relative_display_path(path)))
        } else {
            None
        };

        let mut seen_ids: HashMap<String, usize> = HashMap::new();
        let mut chunks = Vec::with_capacity(pieces.len());

        for piece in pieces {
            let suffix = classify_domain(&piece, &path_str);

            let mut text = piece.text;
            if let Some(p) = &prefix {
                text.insert_str(0, p);
            }
            if text.chars().count() > MAX_CHUNK_CHARS {
                text = window::smart_truncate(&text, MAX_CHUNK_CHARS, "chunk over size limit");
            }

            let base_id = format!("{}:{}", path_str, piece.start_line);
            let n = seen_ids.entry(base_id.clone()).or_insert(0);
            let id = if *n == 0 {
                base_id.clone()
            } else {
                format!("{}:{}", base_id, n)
            };
            *n += 1;

            chunks.push(Chunk {
                id,
                path: path_str.clone(),
                start_line: piece.start_line,
                end_line: piece.end_line,
                text,
                kind: piece.kind,
                suffix,
                modified_at,
            });
        }

        chunks
    }
}

fn file_mtime(path: &Path) -> DateTime<Utc> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map(DateTime::from)
        .unwrap_or_else(|e| {
            warn!("No mtime for {}: {}", path.display(), e);
            Utc::now()
        })
}

/// Filename patterns that mark generated sources.
fn is_generated_filename(name: &str) -> bool {
    let lower = name.to_lowercase();
    let stem = lower.split('.').next().unwrap_or("");
    lower.contains(".designer.")
        || lower.contains(".g.")
        || lower.contains(".g.i.")
        || lower.starts_with("assemblyinfo.")
        || lower.starts_with("assemblyattributes.")
        || stem == "reference"
        || stem.ends_with("modelsnapshot")
}

/// Generated-file detection: matching filename patterns or an auto-generated
/// marker in the first ten lines collapse the file to one summary chunk.
fn generated_summary(path: &Path, lines: &[&str]) -> Option<Piece> {
    let name = path.file_name()?.to_str()?;
    let by_name = is_generated_filename(name);
    let by_marker = lines.iter().take(10).any(|l| {
        let lower = l.to_lowercase();
        lower.contains("<auto-generated>") || lower.contains("this code was generated")
    });
    if !by_name && !by_marker {
        return None;
    }

    let mut text = format!("// Generated file: {}\n", name);
    let mut chars = text.len();
    for line in lines.iter().take(30) {
        if chars + line.len() > SLIDING_WINDOW_TARGET_CHARS {
            break;
        }
        chars += line.len() + 1;
        text.push_str(line);
        text.push('\n');
    }

    Some(Piece {
        text,
        start_line: 1,
        end_line: lines.len().max(1),
        kind: ChunkKind::Generated,
    })
}

/// Drop exact-content duplicates, then any piece whose line range is fully
/// contained within another piece of the same kind (never across kinds).
fn dedup_pieces(pieces: &mut Vec<Piece>) {
    let mut seen_text: HashSet<String> = HashSet::new();
    pieces.retain(|p| seen_text.insert(p.text.clone()));

    let ranges: Vec<(usize, usize, ChunkKind)> = pieces
        .iter()
        .map(|p| (p.start_line, p.end_line, p.kind))
        .collect();

    let mut drop = vec![false; pieces.len()];
    for i in 0..ranges.len() {
        for j in 0..ranges.len() {
            if i == j || drop[j] {
                continue;
            }
            let (si, ei, ki) = ranges[i];
            let (sj, ej, kj) = ranges[j];
            // Strict containment within the same kind; identical ranges keep
            // the first occurrence.
            if ki == kj && sj <= si && ei <= ej && (sj < si || ej > ei) {
                drop[i] = true;
                break;
            }
        }
    }

    let mut idx = 0;
    pieces.retain(|_| {
        let keep = !drop[idx];
        idx += 1;
        keep
    });
}

struct DomainPatterns {
    auth_terms: Vec<&'static str>,
    auth_dirs: Vec<&'static str>,
    security_terms: Vec<&'static str>,
}

fn domain_patterns() -> &'static DomainPatterns {
    static PATTERNS: OnceLock<DomainPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| DomainPatterns {
        auth_terms: vec![
            "authenticate",
            "authorize",
            "login",
            "signin",
            "jwt",
            "bearer",
            "oauth",
            "saml",
            "claims",
            "identity",
            "principal",
            "token",
            "session",
            "cookie",
            "credential",
        ],
        auth_dirs: vec!["identity", "auth", "security"],
        security_terms: vec![
            "encrypt",
            "decrypt",
            "hash",
            "salt",
            "cryptography",
            "x509",
            "rsa",
            "aes",
            "hmac",
        ],
    })
}

fn is_startup_filename(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.starts_with("program.")
        || lower.starts_with("startup.")
        || lower.starts_with("appsettings")
}

/// Classify a piece against the domain pattern sets. At most one suffix, in
/// the order auth > security > config > controller > service.
fn classify_domain(piece: &Piece, path: &str) -> Option<DomainSuffix> {
    if !piece.kind.accepts_suffix() {
        return None;
    }

    let patterns = domain_patterns();
    let text = piece.text.to_lowercase();
    let lower_path = path.to_lowercase();
    let file_name = lower_path.rsplit('/').next().unwrap_or("").to_string();
    let dir_part = lower_path
        .rsplit_once('/')
        .map(|(d, _)| d.to_string())
        .unwrap_or_default();
    let dir_segments: Vec<&str> = dir_part.split('/').collect();

    let dir_hit = |hints: &[&str]| {
        dir_segments
            .iter()
            .any(|seg| hints.iter().any(|h| seg.contains(h)))
    };

    if patterns
        .auth_terms
        .iter()
        .any(|t| text.contains(t) || file_name.contains(t))
        || dir_hit(&patterns.auth_dirs)
    {
        return Some(DomainSuffix::Auth);
    }

    if patterns
        .security_terms
        .iter()
        .any(|t| text.contains(t) || file_name.contains(t))
    {
        return Some(DomainSuffix::Security);
    }

    if is_startup_filename(&file_name) {
        return Some(DomainSuffix::Config);
    }

    if piece.kind.is_class_like() {
        if file_name.contains("controller") || dir_hit(&["controllers"]) {
            return Some(DomainSuffix::Controller);
        }
        if text
            .lines()
            .next()
            .map(|l| l.to_lowercase().contains("controller"))
            .unwrap_or(false)
        {
            return Some(DomainSuffix::Controller);
        }
        if file_name.contains("service") || dir_hit(&["services"]) {
            return Some(DomainSuffix::Service);
        }
        if text
            .lines()
            .next()
            .map(|l| l.to_lowercase().contains("service"))
            .unwrap_or(false)
        {
            return Some(DomainSuffix::Service);
        }
    }

    None
}

/// Compute a short display path by walking upward from the file looking for
/// project-root markers (`*.csproj`, `*.sln`, `src/`, `.git`).
pub fn relative_display_path(path: &Path) -> String {
    let mut root: Option<&Path> = None;
    let mut dir = path.parent();
    while let Some(d) = dir {
        let has_marker = std::fs::read_dir(d)
            .map(|entries| {
                entries.filter_map(|e| e.ok()).any(|e| {
                    let name = e.file_name().to_string_lossy().to_lowercase();
                    name == ".git"
                        || name == "src"
                        || name.ends_with(".csproj")
                        || name.ends_with(".sln")
                })
            })
            .unwrap_or(false);
        if has_marker {
            root = Some(d);
            break;
        }
        dir = d.parent();
    }

    let rel = match root {
        Some(r) => path.strip_prefix(r).unwrap_or(path),
        None => Path::new(path.file_name().unwrap_or(path.as_os_str())),
    };
    rel.to_string_lossy().replace('\\', "/")
}
