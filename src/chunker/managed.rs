//! Managed-language backend: namespaces, usings, types, members.
//!
//! A line/brace-oriented scanner rather than a grammar: it recognizes the
//! declaration shapes that matter for retrieval (types, methods, properties,
//! local functions, top-level statements) and degrades to the caller's
//! whole-file fallback when nothing structural is found.

use regex::Regex;
use std::sync::OnceLock;

use super::window;
use super::{ChunkKind, Piece};
use crate::constants::{SIGNATURE_MEMBER_LIMIT, SLIDING_WINDOW_TARGET_CHARS};

fn namespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*namespace\s+([A-Za-z_][\w.]*)").unwrap())
}

fn type_decl_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*(?:\[[^\]]*\]\s*)*(?:(?:public|private|protected|internal|static|abstract|sealed|partial|readonly|ref|new)\s+)*(class|interface|record|enum|struct)\s+([A-Za-z_]\w*)",
        )
        .unwrap()
    })
}

fn global_using_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*global\s+using\s").unwrap())
}

fn using_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*using\s+[\w.=\s]+;").unwrap())
}

fn accessor_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bget\b|\bset\b|\binit\b").unwrap())
}

fn member_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([A-Za-z_]\w*)\s*(?:<[^>()]*>)?\s*\(").unwrap())
}

fn local_function_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Inside a method body: optional static/async, a return type, a name,
    // and a parameter list with nothing after it on the line.
    RE.get_or_init(|| {
        Regex::new(r"^\s*(?:static\s+|async\s+)*[A-Za-z_][\w<>\[\],\.\?]*\s+([A-Za-z_]\w*)\s*\([^;{]*\)\s*$")
            .unwrap()
    })
}

/// `'{' - '}'` over a line, skipping string and char literals and `//` tails.
pub(crate) fn brace_delta(line: &str) -> i32 {
    let mut delta = 0i32;
    let mut chars = line.chars().peekable();
    let mut in_string = false;
    let mut in_char = false;
    while let Some(c) = chars.next() {
        match c {
            '\\' if in_string || in_char => {
                chars.next();
            }
            '"' if !in_char => in_string = !in_string,
            '\'' if !in_string => in_char = !in_char,
            '/' if !in_string && !in_char => {
                if chars.peek() == Some(&'/') {
                    break;
                }
            }
            '{' if !in_string && !in_char => delta += 1,
            '}' if !in_string && !in_char => delta -= 1,
            _ => {}
        }
    }
    delta
}

/// Index of the line where the block opening at or after `open` closes.
/// Returns the last line when the block never closes (truncated file).
pub(crate) fn block_end(lines: &[&str], open: usize) -> usize {
    let mut depth = 0i32;
    let mut seen_open = false;
    for (i, line) in lines.iter().enumerate().skip(open) {
        if line.contains('{') {
            seen_open = true;
        }
        depth += brace_delta(line);
        if seen_open && depth <= 0 {
            return i;
        }
    }
    lines.len().saturating_sub(1)
}

pub(crate) fn parse(lines: &[&str]) -> Vec<Piece> {
    let mut pieces = Vec::new();

    // Namespace (block or file-scoped); used to enclose type signatures.
    let namespace = lines
        .iter()
        .find_map(|l| namespace_re().captures(l).map(|c| c[1].to_string()));

    // Global usings collapse into one chunk.
    let global_using_lines: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, l)| global_using_re().is_match(l))
        .map(|(i, _)| i)
        .collect();
    if let (Some(&first), Some(&last)) = (global_using_lines.first(), global_using_lines.last()) {
        let text: String = global_using_lines
            .iter()
            .map(|&i| format!("{}\n", lines[i]))
            .collect();
        pieces.push(Piece {
            text,
            start_line: first + 1,
            end_line: last + 1,
            kind: ChunkKind::GlobalUsings,
        });
    }

    // Type declarations with brace-matched bodies.
    let mut type_ranges: Vec<(usize, usize)> = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let Some(caps) = type_decl_re().captures(lines[i]) else {
            i += 1;
            continue;
        };
        let keyword = caps[1].to_string();
        let type_name = caps[2].to_string();

        // Positional records may close on the declaration line.
        if lines[i].trim_end().ends_with(';') && !lines[i].contains('{') {
            pieces.push(Piece {
                text: format!("{}\n", lines[i].trim_end()),
                start_line: i + 1,
                end_line: i + 1,
                kind: kind_for(&keyword),
            });
            type_ranges.push((i, i));
            i += 1;
            continue;
        }

        let Some(open) = (i..lines.len().min(i + 5)).find(|&j| lines[j].contains('{')) else {
            i += 1;
            continue;
        };
        let end = block_end(lines, open);
        type_ranges.push((i, end));

        if keyword == "enum" {
            let text: String = lines[i..=end].iter().map(|l| format!("{}\n", l)).collect();
            pieces.push(Piece {
                text,
                start_line: i + 1,
                end_line: end + 1,
                kind: ChunkKind::Enum,
            });
        } else {
            pieces.push(Piece {
                text: reconstruct_signature(lines, i, open, end, namespace.as_deref()),
                start_line: i + 1,
                end_line: end + 1,
                kind: kind_for(&keyword),
            });
            emit_members(lines, open, end, &type_name, &mut pieces);
        }

        i = end + 1;
    }

    // Top-level statements: code at file scope outside every type, skipping
    // usings, namespace declarations, attributes, and lone braces.
    let toplevel: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(idx, line)| {
            let trimmed = line.trim();
            !trimmed.is_empty()
                && !trimmed.starts_with("//")
                && !trimmed.starts_with('[')
                && !using_re().is_match(line)
                && !global_using_re().is_match(line)
                && !namespace_re().is_match(line)
                && !type_ranges.iter().any(|(s, e)| idx >= s && idx <= e)
                && !matches!(trimmed, "{" | "}")
        })
        .map(|(idx, _)| idx)
        .collect();

    if let (Some(&first), Some(&last)) = (toplevel.first(), toplevel.last()) {
        let text: String = lines[first..=last]
            .iter()
            .map(|l| format!("{}\n", l))
            .collect();
        pieces.push(Piece {
            text,
            start_line: first + 1,
            end_line: last + 1,
            kind: ChunkKind::TopLevelStatements,
        });
    }

    pieces
}

fn kind_for(keyword: &str) -> ChunkKind {
    match keyword {
        "interface" => ChunkKind::Interface,
        "record" => ChunkKind::Record,
        "enum" => ChunkKind::Enum,
        _ => ChunkKind::Class,
    }
}

#[derive(Debug, Default)]
struct MemberSig {
    fields: Vec<String>,
    properties: Vec<String>,
    methods: Vec<String>,
}

/// Signature-only reconstruction: the declaration plus bounded member lists,
/// enclosed in the declaring namespace when present.
fn reconstruct_signature(
    lines: &[&str],
    decl: usize,
    open: usize,
    end: usize,
    namespace: Option<&str>,
) -> String {
    let sig = collect_member_signatures(lines, open, end);

    let mut body = String::new();
    let decl_line = lines[decl].trim().trim_end_matches('{').trim_end();
    body.push_str(&format!("{}\n{{\n", decl_line));

    let mut push_list = |label: &str, items: &[String]| {
        if items.is_empty() {
            return;
        }
        body.push_str(&format!("    // {}:\n", label));
        for item in items.iter().take(SIGNATURE_MEMBER_LIMIT) {
            body.push_str(&format!("    {}\n", item));
        }
        if items.len() > SIGNATURE_MEMBER_LIMIT {
            body.push_str(&format!(
                "    // ... and {} more\n",
                items.len() - SIGNATURE_MEMBER_LIMIT
            ));
        }
    };
    push_list("Fields", &sig.fields);
    push_list("Properties", &sig.properties);
    push_list("Methods", &sig.methods);
    body.push_str("}\n");

    match namespace {
        Some(ns) => {
            let indented: String = body.lines().map(|l| format!("    {}\n", l)).collect();
            format!("namespace {}\n{{\n{}}}\n", ns, indented)
        }
        None => body,
    }
}

fn clean_decl(trimmed: &str) -> String {
    trimmed
        .trim_end_matches('{')
        .trim_end()
        .trim_end_matches("=>")
        .trim_end()
        .to_string()
}

fn collect_member_signatures(lines: &[&str], open: usize, end: usize) -> MemberSig {
    let mut sig = MemberSig::default();

    let mut depth = 0i32;
    let mut i = open;
    while i <= end && i < lines.len() {
        let trimmed = lines[i].trim();
        let scannable = depth == 1
            && !trimmed.is_empty()
            && !trimmed.starts_with("//")
            && !trimmed.starts_with('[')
            && !matches!(trimmed, "{" | "}");

        if scannable {
            match classify_member(lines, i, end) {
                Some(Member::Method { last }) => {
                    let last = last.min(end);
                    let decl = clean_decl(trimmed);
                    sig.methods.push(format!("{};", decl.trim_end_matches(';')));
                    depth += net_delta(lines, i, last);
                    i = last + 1;
                    continue;
                }
                Some(Member::Property { last }) => {
                    let last = last.min(end);
                    sig.properties.push(clean_decl(trimmed));
                    depth += net_delta(lines, i, last);
                    i = last + 1;
                    continue;
                }
                Some(Member::Field) => sig.fields.push(trimmed.to_string()),
                None => {}
            }
        }

        depth += brace_delta(lines[i]);
        i += 1;
    }

    sig
}

fn net_delta(lines: &[&str], from: usize, to: usize) -> i32 {
    lines[from..=to].iter().map(|l| brace_delta(l)).sum()
}

enum Member {
    Method { last: usize },
    Property { last: usize },
    Field,
}

/// Decide what the member declaration starting at `i` is, and where it ends.
fn classify_member(lines: &[&str], i: usize, end: usize) -> Option<Member> {
    let line = lines[i];
    let trimmed = line.trim();

    let paren = line.find('(');
    let assign = line.find('=').filter(|&p| {
        // `=>` is an expression body, not an assignment.
        line.as_bytes().get(p + 1) != Some(&b'>')
    });

    // Methods and constructors: a parameter list before any assignment.
    let is_callable = match (paren, assign) {
        (Some(p), Some(a)) => p < a,
        (Some(_), None) => true,
        _ => false,
    };
    if is_callable {
        return Some(Member::Method {
            last: member_end(lines, i, end),
        });
    }

    // Block property: the block carries an accessor keyword.
    if line.contains('{') {
        let last = member_end(lines, i, end);
        let block: String = lines[i..=last.min(end)].join("\n");
        if accessor_re().is_match(&block) {
            return Some(Member::Property { last });
        }
        return None;
    }

    // Expression-bodied property: `public string Name => _name;`
    if trimmed.contains("=>") && assign.is_none() {
        return Some(Member::Property {
            last: member_end(lines, i, end),
        });
    }

    if trimmed.ends_with(';') {
        return Some(Member::Field);
    }

    None
}

/// Last line of the member starting at `i`: brace-matched block,
/// expression-bodied to the terminating `;`, or the single line itself.
fn member_end(lines: &[&str], i: usize, end: usize) -> usize {
    let mut j = i;
    while j <= end {
        let line = lines[j];
        if line.contains('{') {
            return block_end(lines, j).min(end);
        }
        if line.trim_end().ends_with(';') {
            return j;
        }
        j += 1;
    }
    end
}

/// Emit method, property, and local-function pieces for one type body.
fn emit_members(lines: &[&str], open: usize, end: usize, type_name: &str, pieces: &mut Vec<Piece>) {
    let mut depth = 0i32;
    let mut i = open;
    while i <= end && i < lines.len() {
        let trimmed = lines[i].trim();
        let scannable = depth == 1
            && !trimmed.is_empty()
            && !trimmed.starts_with("//")
            && !trimmed.starts_with('[')
            && !matches!(trimmed, "{" | "}");

        if scannable {
            match classify_member(lines, i, end) {
                Some(Member::Method { last }) => {
                    let last = last.min(end);
                    let raw: String = lines[i..=last].iter().map(|l| format!("{}\n", l)).collect();
                    let text = format!("// Containing type: {}\n{}", type_name, raw);
                    let oversized = text.chars().count() > SLIDING_WINDOW_TARGET_CHARS;
                    pieces.push(Piece {
                        text,
                        start_line: i + 1,
                        end_line: last + 1,
                        kind: ChunkKind::Method,
                    });
                    if oversized {
                        emit_body_windows(lines, i, last, ChunkKind::MethodBody, pieces);
                    }
                    emit_local_functions(lines, i, last, type_name, pieces);

                    depth += net_delta(lines, i, last);
                    i = last + 1;
                    continue;
                }
                Some(Member::Property { last }) => {
                    let last = last.min(end);
                    let text: String = lines[i..=last].iter().map(|l| format!("{}\n", l)).collect();
                    pieces.push(Piece {
                        text,
                        start_line: i + 1,
                        end_line: last + 1,
                        kind: ChunkKind::Property,
                    });
                    depth += net_delta(lines, i, last);
                    i = last + 1;
                    continue;
                }
                _ => {}
            }
        }

        depth += brace_delta(lines[i]);
        i += 1;
    }
}

/// Body sub-chunks covering an oversized member with overlap.
pub(crate) fn emit_body_windows(
    lines: &[&str],
    decl: usize,
    last: usize,
    kind: ChunkKind,
    pieces: &mut Vec<Piece>,
) {
    let body_start = (decl..=last)
        .find(|&j| lines[j].contains('{'))
        .map(|j| j + 1)
        .unwrap_or(decl + 1);
    if body_start > last {
        return;
    }
    let body: Vec<&str> = lines[body_start..=last].to_vec();
    pieces.extend(window::sliding_windows(
        &body,
        body_start + 1,
        SLIDING_WINDOW_TARGET_CHARS,
        kind,
    ));
}

fn emit_local_functions(
    lines: &[&str],
    decl: usize,
    last: usize,
    type_name: &str,
    pieces: &mut Vec<Piece>,
) {
    let mut j = decl + 1;
    while j < last {
        if local_function_re().is_match(lines[j])
            && j + 1 <= last
            && lines[j + 1].trim().starts_with('{')
        {
            let end = block_end(lines, j + 1).min(last);
            let raw: String = lines[j..=end].iter().map(|l| format!("{}\n", l)).collect();
            pieces.push(Piece {
                text: format!("// Containing type: {}\n{}", type_name, raw),
                start_line: j + 1,
                end_line: end + 1,
                kind: ChunkKind::LocalFunction,
            });
            j = end + 1;
            continue;
        }
        j += 1;
    }
}

/// Extract the member name from a declaration line.
#[allow(dead_code)] // Diagnostic helper, exercised by tests
pub(crate) fn member_name(line: &str) -> Option<String> {
    member_name_re()
        .captures_iter(line)
        .last()
        .map(|c| c[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_src(src: &str) -> Vec<Piece> {
        let lines: Vec<&str> = src.lines().collect();
        parse(&lines)
    }

    const SERVICE_SRC: &str = r#"using System;

namespace Shop.Services
{
    public class OrderService
    {
        private readonly IOrderRepo _repo;
        private int _count;

        public int Count { get; private set; }

        public OrderService(IOrderRepo repo)
        {
            _repo = repo;
        }

        public Order GetOrder(int id)
        {
            var order = _repo.Find(id);
            return order;
        }
    }
}
"#;

    #[test]
    fn test_class_and_members() {
        let pieces = parse_src(SERVICE_SRC);

        let class = pieces.iter().find(|p| p.kind == ChunkKind::Class).unwrap();
        assert!(class.text.contains("namespace Shop.Services"));
        assert!(class.text.contains("public class OrderService"));
        assert!(class.text.contains("// Fields:"));
        assert!(class.text.contains("private readonly IOrderRepo _repo;"));
        assert!(class.text.contains("// Methods:"));

        let methods: Vec<&Piece> = pieces
            .iter()
            .filter(|p| p.kind == ChunkKind::Method)
            .collect();
        assert_eq!(methods.len(), 2, "ctor + GetOrder: {:#?}", methods);
        for m in &methods {
            assert!(m.text.starts_with("// Containing type: OrderService"));
        }

        let props: Vec<&Piece> = pieces
            .iter()
            .filter(|p| p.kind == ChunkKind::Property)
            .collect();
        assert_eq!(props.len(), 1);
        assert!(props[0].text.contains("public int Count"));
    }

    #[test]
    fn test_member_list_truncation() {
        let mut src = String::from("public class Big\n{\n");
        for i in 0..14 {
            src.push_str(&format!("    private int _f{};\n", i));
        }
        src.push_str("}\n");

        let pieces = parse_src(&src);
        let class = pieces.iter().find(|p| p.kind == ChunkKind::Class).unwrap();
        assert!(class.text.contains("// ... and 4 more"));
        // Exactly the first ten fields are listed.
        assert!(class.text.contains("_f9;"));
        assert!(!class.text.contains("_f10;"));
    }

    #[test]
    fn test_interface() {
        let src = "public interface IWidget\n{\n    void Render();\n    int Size { get; }\n}\n";
        let pieces = parse_src(src);
        let iface = pieces
            .iter()
            .find(|p| p.kind == ChunkKind::Interface)
            .unwrap();
        assert!(iface.text.contains("void Render();"));
    }

    #[test]
    fn test_positional_record() {
        let src = "namespace Geo;\n\npublic record Point(int X, int Y);\n";
        let pieces = parse_src(src);
        let rec = pieces.iter().find(|p| p.kind == ChunkKind::Record).unwrap();
        assert!(rec.text.contains("record Point"));
        assert_eq!(rec.start_line, rec.end_line);
    }

    #[test]
    fn test_enum_kept_whole() {
        let src = "public enum Color\n{\n    Red,\n    Green,\n    Blue,\n}\n";
        let pieces = parse_src(src);
        let e = pieces.iter().find(|p| p.kind == ChunkKind::Enum).unwrap();
        assert!(e.text.contains("Green,"));
    }

    #[test]
    fn test_global_usings_collapsed() {
        let src = "global using System;\nglobal using System.Linq;\n\npublic class A { }\n";
        let pieces = parse_src(src);
        let gu: Vec<&Piece> = pieces
            .iter()
            .filter(|p| p.kind == ChunkKind::GlobalUsings)
            .collect();
        assert_eq!(gu.len(), 1);
        assert!(gu[0].text.contains("System.Linq"));
    }

    #[test]
    fn test_top_level_statements() {
        let src = "using System;\n\nvar builder = WebApplication.CreateBuilder(args);\nvar app = builder.Build();\napp.MapGet(\"/\", () => \"ok\");\napp.Run();\n";
        let pieces = parse_src(src);
        let tls = pieces
            .iter()
            .find(|p| p.kind == ChunkKind::TopLevelStatements)
            .expect("top-level statements chunk");
        assert!(tls.text.contains("builder.Build()"));
        assert!(!tls.text.contains("using System;"));
    }

    #[test]
    fn test_expression_bodied_property() {
        let src = "public class P\n{\n    private string _name;\n    public string Name => _name;\n}\n";
        let pieces = parse_src(src);
        let props: Vec<&Piece> = pieces
            .iter()
            .filter(|p| p.kind == ChunkKind::Property)
            .collect();
        assert_eq!(props.len(), 1);
        assert!(props[0].text.contains("Name => _name"));
    }

    #[test]
    fn test_oversized_method_gets_body_windows() {
        let mut src = String::from("public class Gen\n{\n    public void Run()\n    {\n");
        for i in 0..150 {
            src.push_str(&format!("        Process(step_{:04}, state_{:04});\n", i, i));
        }
        src.push_str("    }\n}\n");

        let pieces = parse_src(&src);
        let primary: Vec<&Piece> = pieces
            .iter()
            .filter(|p| p.kind == ChunkKind::Method)
            .collect();
        assert_eq!(primary.len(), 1, "primary chunk still emitted");
        let bodies: Vec<&Piece> = pieces
            .iter()
            .filter(|p| p.kind == ChunkKind::MethodBody)
            .collect();
        assert!(bodies.len() >= 2, "body windows: {}", bodies.len());
        for b in &bodies {
            assert!(b.start_line >= primary[0].start_line);
            assert!(b.end_line <= primary[0].end_line);
        }
    }

    #[test]
    fn test_local_function() {
        let src = r#"public class Calc
{
    public int Total(int[] xs)
    {
        int Square(int v)
        {
            return v * v;
        }
        return xs.Sum(Square);
    }
}
"#;
        let pieces = parse_src(src);
        let local = pieces
            .iter()
            .find(|p| p.kind == ChunkKind::LocalFunction)
            .expect("local function piece");
        assert!(local.text.contains("int Square(int v)"));
    }

    #[test]
    fn test_brace_delta_ignores_strings_and_comments() {
        assert_eq!(brace_delta("if (x) {"), 1);
        assert_eq!(brace_delta("}"), -1);
        assert_eq!(brace_delta("var s = \"{{{\";"), 0);
        assert_eq!(brace_delta("var c = '{';"), 0);
        assert_eq!(brace_delta("call(); // closes }"), 0);
    }

    #[test]
    fn test_member_name_extraction() {
        assert_eq!(
            member_name("    public Task<Order> GetAsync(int id)"),
            Some("GetAsync".to_string())
        );
        assert_eq!(
            member_name("    public void Map<T>(T input)"),
            Some("Map".to_string())
        );
    }
}
