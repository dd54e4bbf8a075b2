//! Markup backend: Razor components and views with embedded code blocks.

use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

use super::managed::{block_end, emit_body_windows};
use super::window;
use super::{ChunkKind, Piece};
use crate::constants::SLIDING_WINDOW_TARGET_CHARS;

fn code_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*@(code|functions)\b").unwrap())
}

fn method_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*(?:(?:public|private|protected|internal|static|async|override|virtual)\s+)*[A-Za-z_][\w<>\[\],\.\?]*\s+([A-Za-z_]\w*)\s*\([^;{]*\)\s*\{?\s*$",
        )
        .unwrap()
    })
}

pub(crate) fn parse(path: &Path, lines: &[&str]) -> Vec<Piece> {
    let component = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    let mut pieces = Vec::new();
    let mut code_ranges: Vec<(usize, usize)> = Vec::new();

    // @code / @functions blocks.
    let mut i = 0;
    while i < lines.len() {
        if !code_block_re().is_match(lines[i]) {
            i += 1;
            continue;
        }
        let Some(open) = (i..lines.len().min(i + 3)).find(|&j| lines[j].contains('{')) else {
            i += 1;
            continue;
        };
        let end = block_end(lines, open);
        code_ranges.push((i, end));

        let text: String = lines[i..=end].iter().map(|l| format!("{}\n", l)).collect();
        let oversized = text.chars().count() > SLIDING_WINDOW_TARGET_CHARS;
        pieces.push(Piece {
            text,
            start_line: i + 1,
            end_line: end + 1,
            kind: ChunkKind::RazorCode,
        });

        let method_count = emit_code_methods(lines, open, end, &component, &mut pieces);
        if oversized && method_count == 0 {
            emit_body_windows(lines, i, end, ChunkKind::RazorCodeBody, &mut pieces);
        }

        i = end + 1;
    }

    // Markup outside the code blocks, split into contiguous runs.
    let mut run_start: Option<usize> = None;
    let mut flush = |start: usize, stop: usize, pieces: &mut Vec<Piece>| {
        if stop < start {
            return;
        }
        let segment: Vec<&str> = lines[start..=stop].to_vec();
        if segment.iter().all(|l| l.trim().is_empty()) {
            return;
        }
        pieces.extend(window::sliding_windows(
            &segment,
            start + 1,
            SLIDING_WINDOW_TARGET_CHARS,
            ChunkKind::RazorHtml,
        ));
    };

    for idx in 0..lines.len() {
        let in_code = code_ranges.iter().any(|(s, e)| idx >= *s && idx <= *e);
        if in_code {
            if let Some(start) = run_start.take() {
                flush(start, idx.saturating_sub(1), &mut pieces);
            }
        } else if run_start.is_none() {
            run_start = Some(idx);
        }
    }
    if let Some(start) = run_start {
        flush(start, lines.len() - 1, &mut pieces);
    }

    pieces
}

/// Methods inside a code block, attributed to the component. Returns how
/// many were found.
fn emit_code_methods(
    lines: &[&str],
    open: usize,
    end: usize,
    component: &str,
    pieces: &mut Vec<Piece>,
) -> usize {
    let mut count = 0;
    let mut j = open + 1;
    while j < end {
        let matched = method_re().is_match(lines[j])
            && (lines[j].contains('{')
                || (j + 1 <= end && lines[j + 1].trim().starts_with('{')));
        if !matched {
            j += 1;
            continue;
        }

        let body_open = if lines[j].contains('{') { j } else { j + 1 };
        let method_end = block_end(lines, body_open).min(end);
        let raw: String = lines[j..=method_end]
            .iter()
            .map(|l| format!("{}\n", l))
            .collect();
        let text = format!("// Component: {}\n{}", component, raw);
        let oversized = text.chars().count() > SLIDING_WINDOW_TARGET_CHARS;
        pieces.push(Piece {
            text,
            start_line: j + 1,
            end_line: method_end + 1,
            kind: ChunkKind::RazorMethod,
        });
        if oversized {
            emit_body_windows(lines, j, method_end, ChunkKind::RazorMethodBody, pieces);
        }
        count += 1;
        j = method_end + 1;
    }
    count
}
