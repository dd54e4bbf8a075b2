//! C-family backend: functions, structs, enums, typedefs, macros.

use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

use super::managed::{block_end, emit_body_windows};
use super::{ChunkKind, Piece};
use crate::constants::SLIDING_WINDOW_TARGET_CHARS;

fn define_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*#\s*define\s+([A-Za-z_]\w*)").unwrap())
}

fn struct_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(?:typedef\s+)?struct(?:\s+[A-Za-z_]\w*)?\s*\{?\s*$").unwrap())
}

fn enum_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(?:typedef\s+)?enum(?:\s+[A-Za-z_]\w*)?\s*\{?\s*$").unwrap())
}

fn typedef_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*typedef\s+[^{;]+;\s*$").unwrap())
}

fn func_def_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // A return type, a name, an opening parenthesis; no semicolon on the
    // line (prototypes are not definitions).
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][\w\s\*]*?\b([A-Za-z_]\w*)\s*\([^;]*$|^[A-Za-z_][\w\s\*]*?\b([A-Za-z_]\w*)\s*\([^;]*\)\s*\{?\s*$")
            .unwrap()
    })
}

const CONTROL_KEYWORDS: &[&str] = &["if", "else", "for", "while", "switch", "return", "do", "case"];

pub(crate) fn parse(path: &Path, lines: &[&str]) -> Vec<Piece> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let mut pieces = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];

        // Macros, extending through backslash continuations.
        if define_re().is_match(line) {
            let mut end = i;
            while end + 1 < lines.len() && lines[end].trim_end().ends_with('\\') {
                end += 1;
            }
            let text: String = lines[i..=end]
                .iter()
                .map(|l| format!("{}\n", l))
                .collect();
            pieces.push(Piece {
                text,
                start_line: i + 1,
                end_line: end + 1,
                kind: ChunkKind::CMacro,
            });
            i = end + 1;
            continue;
        }

        // struct / enum blocks (including `typedef struct { ... } name;`).
        if struct_re().is_match(line) || enum_re().is_match(line) {
            let kind = if struct_re().is_match(line) {
                ChunkKind::CStruct
            } else {
                ChunkKind::CEnum
            };
            let Some(open) = (i..lines.len().min(i + 3)).find(|&j| lines[j].contains('{')) else {
                i += 1;
                continue;
            };
            let end = block_end(lines, open);
            let text: String = lines[i..=end].iter().map(|l| format!("{}\n", l)).collect();
            pieces.push(Piece {
                text,
                start_line: i + 1,
                end_line: end + 1,
                kind,
            });
            i = end + 1;
            continue;
        }

        // Single-line typedefs.
        if typedef_line_re().is_match(line) {
            pieces.push(Piece {
                text: format!("{}\n", line.trim_end()),
                start_line: i + 1,
                end_line: i + 1,
                kind: ChunkKind::CTypedef,
            });
            i += 1;
            continue;
        }

        // Function definitions at file scope.
        if is_function_definition(lines, i) {
            let Some(open) = (i..lines.len().min(i + 4)).find(|&j| lines[j].contains('{')) else {
                i += 1;
                continue;
            };
            let end = block_end(lines, open);
            let raw: String = lines[i..=end].iter().map(|l| format!("{}\n", l)).collect();
            let text = format!("// In {}\n{}", file_name, raw);
            let oversized = text.chars().count() > SLIDING_WINDOW_TARGET_CHARS;
            pieces.push(Piece {
                text,
                start_line: i + 1,
                end_line: end + 1,
                kind: ChunkKind::CFunction,
            });
            if oversized {
                emit_body_windows(lines, i, end, ChunkKind::CFunctionBody, &mut pieces);
            }
            i = end + 1;
            continue;
        }

        i += 1;
    }

    pieces
}

/// A definition starts at column zero-ish with a type, has a parameter list,
/// and opens a block before any semicolon.
fn is_function_definition(lines: &[&str], i: usize) -> bool {
    let line = lines[i];
    if line.starts_with(char::is_whitespace) || line.trim_start().starts_with('#') {
        return false;
    }
    let trimmed = line.trim();
    let first_word = trimmed
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .next()
        .unwrap_or("");
    if CONTROL_KEYWORDS.contains(&first_word) {
        return false;
    }
    if !func_def_re().is_match(line) {
        return false;
    }
    if trimmed.ends_with(';') {
        return false;
    }
    // The block must open before any terminating semicolon.
    for j in i..lines.len().min(i + 4) {
        let l = lines[j];
        if l.contains('{') {
            return true;
        }
        if l.trim_end().ends_with(';') {
            return false;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_src(src: &str) -> Vec<Piece> {
        let lines: Vec<&str> = src.lines().collect();
        parse(Path::new("/p/util.c"), &lines)
    }

    #[test]
    fn test_macro() {
        let pieces = parse_src("#define PI 3.14159\n#define MAX(a, b) ((a) > (b) ? (a) : (b))\n");
        let macros: Vec<&Piece> = pieces.iter().filter(|p| p.kind == ChunkKind::CMacro).collect();
        assert_eq!(macros.len(), 2);
        assert!(macros[0].text.contains("PI"));
    }

    #[test]
    fn test_multiline_macro() {
        let src = "#define SWAP(a, b) do { \\\n    int t = a; a = b; b = t; \\\n} while (0)\n";
        let pieces = parse_src(src);
        let m = pieces.iter().find(|p| p.kind == ChunkKind::CMacro).unwrap();
        assert_eq!(m.start_line, 1);
        assert_eq!(m.end_line, 3);
    }

    #[test]
    fn test_struct_and_enum() {
        let src = "struct point\n{\n    int x;\n    int y;\n};\n\nenum color\n{\n    RED,\n    GREEN,\n};\n";
        let pieces = parse_src(src);
        assert!(pieces.iter().any(|p| p.kind == ChunkKind::CStruct));
        assert!(pieces.iter().any(|p| p.kind == ChunkKind::CEnum));
    }

    #[test]
    fn test_typedef_struct_is_struct() {
        let src = "typedef struct\n{\n    int fd;\n} handle_t;\n";
        let pieces = parse_src(src);
        assert!(pieces.iter().any(|p| p.kind == ChunkKind::CStruct));
    }

    #[test]
    fn test_single_line_typedef() {
        let pieces = parse_src("typedef unsigned long size_type;\n");
        let td = pieces.iter().find(|p| p.kind == ChunkKind::CTypedef).unwrap();
        assert!(td.text.contains("size_type"));
    }

    #[test]
    fn test_function_definition() {
        let src = "int add(int a, int b)\n{\n    return a + b;\n}\n";
        let pieces = parse_src(src);
        let f = pieces.iter().find(|p| p.kind == ChunkKind::CFunction).unwrap();
        assert!(f.text.starts_with("// In util.c\n"));
        assert!(f.text.contains("return a + b;"));
    }

    #[test]
    fn test_prototype_not_a_definition() {
        let pieces = parse_src("int add(int a, int b);\n");
        assert!(pieces.iter().all(|p| p.kind != ChunkKind::CFunction));
    }

    #[test]
    fn test_oversized_function_gets_body_windows() {
        let mut src = String::from("void generate(void)\n{\n");
        for i in 0..150 {
            src.push_str(&format!("    emit(table_{:04}, value_{:04});\n", i, i));
        }
        src.push_str("}\n");
        let pieces = parse_src(&src);
        assert_eq!(
            pieces.iter().filter(|p| p.kind == ChunkKind::CFunction).count(),
            1
        );
        assert!(
            pieces.iter().filter(|p| p.kind == ChunkKind::CFunctionBody).count() >= 2
        );
    }

    #[test]
    fn test_control_flow_not_a_function() {
        let src = "int main(void)\n{\n    if (check(a, b))\n    {\n        run();\n    }\n    return 0;\n}\n";
        let pieces = parse_src(src);
        let funcs: Vec<&Piece> = pieces.iter().filter(|p| p.kind == ChunkKind::CFunction).collect();
        assert_eq!(funcs.len(), 1, "only main: {:#?}", funcs);
    }
}
