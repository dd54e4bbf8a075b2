//! Sliding windows and size-bounded truncation.
//!
//! Oversized content is split into overlapping line windows that prefer to
//! break at structurally quiet lines; texts over the hard chunk limit are
//! truncated at a line boundary with a marker recording what was cut.

use super::{ChunkKind, LanguageBackend, Piece};
use crate::constants::{
    SLIDING_WINDOW_TARGET_CHARS, WINDOW_OVERLAP_FRACTION, WINDOW_OVERLAP_MAX_LINES,
};

/// How far back from a hard window edge to look for a good breaking point.
const BREAK_SEARCH_LINES: usize = 10;

/// Lines where a window may end without splitting a logical unit: blank
/// lines, comments, brace lines, control-flow and declaration openers,
/// region markers.
pub fn is_good_break_point(line: &str) -> bool {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return true;
    }
    if trimmed.starts_with("//")
        || trimmed.starts_with("/*")
        || trimmed.starts_with('*')
        || trimmed.starts_with('#')
    {
        return true;
    }
    if matches!(trimmed, "{" | "}" | "};" | ")" | ");") {
        return true;
    }

    const KEYWORDS: &[&str] = &[
        "if", "else", "for", "foreach", "while", "switch", "return", "try", "catch", "finally",
        "break", "continue", "case", "do", "public", "private", "protected", "internal", "static",
        "var", "void", "using", "namespace", "class", "struct", "enum", "const", "typedef",
    ];
    let first_word = trimmed
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .next()
        .unwrap_or("");
    KEYWORDS.contains(&first_word)
}

/// Overlap lines for a window of the given height: a fraction of the height,
/// hard-capped.
pub fn overlap_lines(window_height: usize) -> usize {
    ((window_height as f64 * WINDOW_OVERLAP_FRACTION).round() as usize)
        .min(WINDOW_OVERLAP_MAX_LINES)
}

/// Split `lines` (starting at 1-based `first_line`) into overlapping windows
/// of roughly `target_chars`, each emitted as a piece of `kind`.
///
/// Windows break preferentially at a good breaking point within the last few
/// lines of the hard edge. Consecutive windows share `overlap_lines` lines.
pub fn sliding_windows(
    lines: &[&str],
    first_line: usize,
    target_chars: usize,
    kind: ChunkKind,
) -> Vec<Piece> {
    if lines.is_empty() {
        return Vec::new();
    }

    let mut pieces = Vec::new();
    let mut start = 0usize;

    while start < lines.len() {
        // Grow the window until the character budget is spent.
        let mut end = start;
        let mut chars = 0usize;
        while end < lines.len() {
            chars += lines[end].chars().count() + 1;
            if chars > target_chars && end > start {
                end -= 1;
                break;
            }
            if end + 1 == lines.len() {
                break;
            }
            end += 1;
        }

        // Prefer to end on a good breaking point near the hard edge.
        if end + 1 < lines.len() {
            let lower = end.saturating_sub(BREAK_SEARCH_LINES).max(start);
            for candidate in (lower..=end).rev() {
                if is_good_break_point(lines[candidate]) {
                    end = candidate;
                    break;
                }
            }
        }

        let text: String = lines[start..=end]
            .iter()
            .map(|l| format!("{}\n", l))
            .collect();
        pieces.push(Piece {
            text,
            start_line: first_line + start,
            end_line: first_line + end,
            kind,
        });

        if end + 1 >= lines.len() {
            break;
        }

        let height = end - start + 1;
        let overlap = overlap_lines(height);
        let next = (end + 1).saturating_sub(overlap);
        // Always make progress even when the overlap spans the whole window.
        start = next.max(start + 1);
    }

    pieces
}

/// Fallback when a backend finds no structural entity: the whole file when
/// it fits the window target, overlapping `sliding_window` pieces otherwise.
pub fn whole_file_fallback(lines: &[&str], backend: Option<LanguageBackend>) -> Vec<Piece> {
    if lines.is_empty() {
        return Vec::new();
    }

    let file_kind = match backend {
        Some(LanguageBackend::CFamily) => ChunkKind::CFile,
        Some(LanguageBackend::Markup) => ChunkKind::RazorFile,
        _ => ChunkKind::File,
    };

    let total_chars: usize = lines.iter().map(|l| l.chars().count() + 1).sum();
    if total_chars <= SLIDING_WINDOW_TARGET_CHARS {
        let text: String = lines.iter().map(|l| format!("{}\n", l)).collect();
        return vec![Piece {
            text,
            start_line: 1,
            end_line: lines.len(),
            kind: file_kind,
        }];
    }

    sliding_windows(
        lines,
        1,
        SLIDING_WINDOW_TARGET_CHARS,
        ChunkKind::SlidingWindow,
    )
}

/// Truncate `text` to at most `max_chars` characters at a line boundary,
/// keeping the head (signature and opening brace) and appending a marker
/// that records the original size and the reason. With insufficient room for
/// even one full line, the first line is kept alone (signature-only).
pub fn smart_truncate(text: &str, max_chars: usize, reason: &str) -> String {
    let total_chars = text.chars().count();
    if total_chars <= max_chars {
        return text.to_string();
    }

    let marker = format!("// [truncated: original {} chars, {}]", total_chars, reason);
    let budget = max_chars.saturating_sub(marker.chars().count() + 1);

    let mut kept = String::new();
    let mut used = 0usize;
    for line in text.lines() {
        let cost = line.chars().count() + 1;
        if used + cost > budget {
            break;
        }
        kept.push_str(line);
        kept.push('\n');
        used += cost;
    }

    if kept.is_empty() {
        // Signature-only: the first line, clipped to whatever room remains.
        let first: String = text
            .lines()
            .next()
            .unwrap_or("")
            .chars()
            .take(budget)
            .collect();
        return format!("{}\n{}", first, marker);
    }

    kept.push_str(&marker);
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_good_break_points() {
        assert!(is_good_break_point(""));
        assert!(is_good_break_point("    "));
        assert!(is_good_break_point("// comment"));
        assert!(is_good_break_point("    }"));
        assert!(is_good_break_point("{"));
        assert!(is_good_break_point("    if (x > 0)"));
        assert!(is_good_break_point("    public void M()"));
        assert!(is_good_break_point("#region Helpers"));
        assert!(is_good_break_point("    return x;"));

        assert!(!is_good_break_point("    x += Compute(y);"));
        assert!(!is_good_break_point("    total = a + b;"));
    }

    #[test]
    fn test_overlap_capped() {
        assert_eq!(overlap_lines(10), 2); // 15% of 10, rounded
        assert_eq!(overlap_lines(40), 6);
        assert_eq!(overlap_lines(1000), 10); // hard cap
    }

    #[test]
    fn test_windows_cover_all_lines() {
        let content: Vec<String> = (0..200).map(|i| format!("line number {:04};", i)).collect();
        let lines: Vec<&str> = content.iter().map(|s| s.as_str()).collect();

        let pieces = sliding_windows(&lines, 1, 500, ChunkKind::SlidingWindow);
        assert!(pieces.len() > 1);
        assert_eq!(pieces[0].start_line, 1);
        assert_eq!(pieces.last().unwrap().end_line, 200);

        // Consecutive windows overlap (or at least touch).
        for pair in pieces.windows(2) {
            assert!(pair[1].start_line <= pair[0].end_line + 1);
            assert!(pair[1].start_line > pair[0].start_line, "must progress");
        }
    }

    #[test]
    fn test_small_file_single_chunk() {
        let lines = vec!["int main(void)", "{", "    return 0;", "}"];
        let pieces = whole_file_fallback(&lines, Some(LanguageBackend::CFamily));
        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0].kind, ChunkKind::CFile);
        assert_eq!(pieces[0].start_line, 1);
        assert_eq!(pieces[0].end_line, 4);
    }

    #[test]
    fn test_large_file_windows() {
        let content: Vec<String> = (0..500).map(|i| format!("text {} without structure", i)).collect();
        let lines: Vec<&str> = content.iter().map(|s| s.as_str()).collect();
        let pieces = whole_file_fallback(&lines, None);
        assert!(pieces.len() > 1);
        assert!(pieces.iter().all(|p| p.kind == ChunkKind::SlidingWindow));
    }

    #[test]
    fn test_truncate_noop_at_limit() {
        let text = "abc\ndef\n";
        assert_eq!(smart_truncate(text, text.chars().count(), "test"), text);
    }

    #[test]
    fn test_truncate_over_limit() {
        let text: String = (0..100).map(|i| format!("line {}\n", i)).collect();
        let out = smart_truncate(&text, 200, "test reason");
        assert!(out.chars().count() <= 200);
        assert!(out.starts_with("line 0\n"), "head preserved");
        assert!(out.contains("[truncated: original"));
        assert!(out.contains("test reason"));
    }

    #[test]
    fn test_truncate_signature_only() {
        let long_line = "x".repeat(500);
        let text = format!("{}\n{}\n", long_line, long_line);
        let out = smart_truncate(&text, 120, "too small");
        assert!(out.contains("[truncated"));
        // Head is clipped to fit rather than dropped entirely.
        assert!(out.starts_with('x'));
    }
}
