// crates/muninn-server/src/indexer/symbols.rs
// Heuristic symbol extraction. Deliberately not a compiler: line-oriented
// regex matchers good enough for retrieval ranking. The extract_symbols
// contract is load-bearing - call-graph edges and incremental persistence
// both key off its output.

use regex::Regex;
use std::sync::LazyLock;

/// Files above this size are skipped entirely.
pub const MAX_FILE_SIZE: usize = 50 * 1024;

/// An extracted symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub signature: String,
    pub line_start: usize,
    pub line_end: usize,
    pub is_exported: bool,
    pub parameters: Option<String>,
    pub returns: Option<String>,
    pub parent_class: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Function,
    Class,
    Interface,
    Type,
    Constant,
    Enum,
    Method,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Function => "function",
            SymbolKind::Class => "class",
            SymbolKind::Interface => "interface",
            SymbolKind::Type => "type",
            SymbolKind::Constant => "constant",
            SymbolKind::Enum => "enum",
            SymbolKind::Method => "method",
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, SymbolKind::Function | SymbolKind::Method)
    }
}

/// Result of parsing one file.
#[derive(Debug, Clone)]
pub struct ParsedFile {
    pub path: String,
    pub symbols: Vec<Symbol>,
    pub content_hash: String,
}

/// FNV-1a 32-bit hash, hex-encoded. Fast content fingerprint used to skip
/// unchanged files during reparse.
pub fn content_hash(content: &str) -> String {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in content.bytes() {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    format!("{hash:08x}")
}

#[allow(clippy::expect_used)]
static RE_FUNCTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?P<export>export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*(?P<name>\w+)\s*\((?P<params>[^)]*)\)(?:\s*:\s*(?P<ret>[^{;]+))?",
    )
    .expect("valid regex")
});
#[allow(clippy::expect_used)]
static RE_ARROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?P<export>export\s+)?const\s+(?P<name>\w+)\s*(?::\s*[^=]+)?=\s*(?:async\s+)?\((?P<params>[^)]*)\)(?:\s*:\s*(?P<ret>[^=]+))?\s*=>",
    )
    .expect("valid regex")
});
#[allow(clippy::expect_used)]
static RE_ARROW_BARE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?P<export>export\s+)?const\s+(?P<name>\w+)\s*=\s*(?:async\s+)?(?P<param>\w+)\s*=>")
        .expect("valid regex")
});
#[allow(clippy::expect_used)]
static RE_CLASS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?P<export>export\s+)?(?:default\s+)?(?:abstract\s+)?class\s+(?P<name>\w+)")
        .expect("valid regex")
});
#[allow(clippy::expect_used)]
static RE_INTERFACE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?P<export>export\s+)?interface\s+(?P<name>\w+)").expect("valid regex")
});
#[allow(clippy::expect_used)]
static RE_TYPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?P<export>export\s+)?type\s+(?P<name>\w+)\s*=").expect("valid regex")
});
#[allow(clippy::expect_used)]
static RE_ENUM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?P<export>export\s+)?(?:const\s+)?enum\s+(?P<name>\w+)")
        .expect("valid regex")
});
#[allow(clippy::expect_used)]
static RE_CONST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<export>export\s+)?const\s+(?P<name>\w+)\s*(?::\s*[^=]+)?=")
        .expect("valid regex")
});
#[allow(clippy::expect_used)]
static RE_METHOD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s+(?:public\s+|private\s+|protected\s+|static\s+|readonly\s+)*(?:async\s+)?(?P<name>\w+)\s*\((?P<params>[^)]*)\)(?:\s*:\s*(?P<ret>[^{;]+))?\s*\{",
    )
    .expect("valid regex")
});

/// Keywords that look like method definitions but aren't.
const METHOD_KEYWORDS: &[&str] = &[
    "if", "for", "while", "switch", "catch", "return", "constructor", "function", "new", "typeof",
    "else", "do", "await",
];

/// Extract symbols from file content. Returns an empty vec for oversized
/// input rather than an error - callers treat both the same way.
pub fn extract_symbols(content: &str) -> Vec<Symbol> {
    if content.len() > MAX_FILE_SIZE {
        return Vec::new();
    }

    let lines: Vec<&str> = content.lines().collect();
    let mut symbols = Vec::new();
    let mut class_stack: Vec<(String, usize, i32)> = Vec::new(); // (name, start, depth at entry)
    let mut depth: i32 = 0;

    for (idx, line) in lines.iter().enumerate() {
        let line_no = idx + 1;
        let trimmed = line.trim_start();

        // Close classes whose body ended before this line
        let opens = line.matches('{').count() as i32;
        let closes = line.matches('}').count() as i32;

        if let Some(caps) = RE_CLASS.captures(line) {
            let name = caps["name"].to_string();
            let end = find_block_end(&lines, idx);
            symbols.push(Symbol {
                name: name.clone(),
                kind: SymbolKind::Class,
                signature: trimmed.trim_end_matches('{').trim().to_string(),
                line_start: line_no,
                line_end: end,
                is_exported: caps.name("export").is_some(),
                parameters: None,
                returns: None,
                parent_class: None,
            });
            class_stack.push((name, line_no, depth));
        } else if let Some(caps) = RE_FUNCTION.captures(line) {
            symbols.push(Symbol {
                name: caps["name"].to_string(),
                kind: SymbolKind::Function,
                signature: trimmed.trim_end_matches('{').trim().to_string(),
                line_start: line_no,
                line_end: find_block_end(&lines, idx),
                is_exported: caps.name("export").is_some(),
                parameters: Some(caps["params"].trim().to_string()),
                returns: caps.name("ret").map(|m| m.as_str().trim().to_string()),
                parent_class: None,
            });
        } else if let Some(caps) = RE_ARROW.captures(line) {
            symbols.push(Symbol {
                name: caps["name"].to_string(),
                kind: SymbolKind::Function,
                signature: trimmed.trim_end_matches('{').trim().to_string(),
                line_start: line_no,
                line_end: find_block_end(&lines, idx),
                is_exported: caps.name("export").is_some(),
                parameters: Some(caps["params"].trim().to_string()),
                returns: caps.name("ret").map(|m| m.as_str().trim().to_string()),
                parent_class: None,
            });
        } else if let Some(caps) = RE_ARROW_BARE.captures(line) {
            symbols.push(Symbol {
                name: caps["name"].to_string(),
                kind: SymbolKind::Function,
                signature: trimmed.to_string(),
                line_start: line_no,
                line_end: find_block_end(&lines, idx),
                is_exported: caps.name("export").is_some(),
                parameters: Some(caps["param"].to_string()),
                returns: None,
                parent_class: None,
            });
        } else if let Some(caps) = RE_INTERFACE.captures(line) {
            symbols.push(simple_symbol(
                &caps,
                SymbolKind::Interface,
                trimmed,
                line_no,
                find_block_end(&lines, idx),
            ));
        } else if let Some(caps) = RE_ENUM.captures(line) {
            symbols.push(simple_symbol(
                &caps,
                SymbolKind::Enum,
                trimmed,
                line_no,
                find_block_end(&lines, idx),
            ));
        } else if let Some(caps) = RE_TYPE.captures(line) {
            symbols.push(simple_symbol(&caps, SymbolKind::Type, trimmed, line_no, line_no));
        } else if class_stack.is_empty() {
            // Top-level constants only (arrow functions matched earlier)
            if let Some(caps) = RE_CONST.captures(line) {
                symbols.push(simple_symbol(
                    &caps,
                    SymbolKind::Constant,
                    trimmed,
                    line_no,
                    line_no,
                ));
            }
        } else if let Some(caps) = RE_METHOD.captures(line) {
            let name = caps["name"].to_string();
            if !METHOD_KEYWORDS.contains(&name.as_str()) {
                let parent = class_stack.last().map(|(n, _, _)| n.clone());
                symbols.push(Symbol {
                    name,
                    kind: SymbolKind::Method,
                    signature: trimmed.trim_end_matches('{').trim().to_string(),
                    line_start: line_no,
                    line_end: find_block_end(&lines, idx),
                    is_exported: false,
                    parameters: Some(caps["params"].trim().to_string()),
                    returns: caps.name("ret").map(|m| m.as_str().trim().to_string()),
                    parent_class: parent,
                });
            }
        }

        depth += opens - closes;
        while let Some((_, _, entry_depth)) = class_stack.last() {
            if depth <= *entry_depth {
                class_stack.pop();
            } else {
                break;
            }
        }
    }

    symbols
}

/// Parse a file's content into its symbol set plus content hash.
pub fn parse_file(path: &str, content: &str) -> ParsedFile {
    ParsedFile {
        path: path.to_string(),
        symbols: extract_symbols(content),
        content_hash: content_hash(content),
    }
}

fn simple_symbol(
    caps: &regex::Captures<'_>,
    kind: SymbolKind,
    line: &str,
    line_start: usize,
    line_end: usize,
) -> Symbol {
    Symbol {
        name: caps["name"].to_string(),
        kind,
        signature: line.trim_end_matches('{').trim().to_string(),
        line_start,
        line_end,
        is_exported: caps.name("export").is_some(),
        parameters: None,
        returns: None,
        parent_class: None,
    }
}

/// Find the line where a brace block opened at `start_idx` closes.
/// Falls back to the start line for single-line or braceless constructs.
fn find_block_end(lines: &[&str], start_idx: usize) -> usize {
    let mut depth: i32 = 0;
    let mut seen_open = false;
    for (offset, line) in lines[start_idx..].iter().enumerate() {
        for c in line.chars() {
            match c {
                '{' => {
                    depth += 1;
                    seen_open = true;
                }
                '}' => depth -= 1,
                _ => {}
            }
        }
        if seen_open && depth <= 0 {
            return start_idx + offset + 1;
        }
        // Braceless declarations (type aliases, bare arrows) end where they start
        if !seen_open && offset > 0 {
            return start_idx + 1;
        }
    }
    lines.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names_of(symbols: &[Symbol], kind: SymbolKind) -> Vec<&str> {
        symbols
            .iter()
            .filter(|s| s.kind == kind)
            .map(|s| s.name.as_str())
            .collect()
    }

    #[test]
    fn test_content_hash_is_fnv1a() {
        // Known FNV-1a 32-bit vectors
        assert_eq!(content_hash(""), "811c9dc5");
        assert_eq!(content_hash("a"), "e40c292c");
        assert_eq!(content_hash("foobar"), "bf9cf968");
    }

    #[test]
    fn test_extract_function_declaration() {
        let symbols = extract_symbols("export async function loadUser(id: string): Promise<User> {\n  return fetch(id);\n}\n");
        assert_eq!(symbols.len(), 1);
        let f = &symbols[0];
        assert_eq!(f.name, "loadUser");
        assert_eq!(f.kind, SymbolKind::Function);
        assert!(f.is_exported);
        assert_eq!(f.parameters.as_deref(), Some("id: string"));
        assert_eq!(f.returns.as_deref(), Some("Promise<User>"));
        assert_eq!(f.line_start, 1);
        assert_eq!(f.line_end, 3);
    }

    #[test]
    fn test_extract_arrow_function() {
        let symbols =
            extract_symbols("const sum = (a: number, b: number) => a + b;\nexport const id = x => x;\n");
        let names = names_of(&symbols, SymbolKind::Function);
        assert_eq!(names, vec!["sum", "id"]);
        assert!(symbols[1].is_exported);
    }

    #[test]
    fn test_extract_class_with_methods() {
        let content = "export class SessionTracker {\n  private count = 0;\n\n  start(goal: string): void {\n    this.count += 1;\n  }\n\n  async finish() {\n    return this.count;\n  }\n}\n";
        let symbols = extract_symbols(content);
        assert_eq!(names_of(&symbols, SymbolKind::Class), vec!["SessionTracker"]);
        let methods = names_of(&symbols, SymbolKind::Method);
        assert_eq!(methods, vec!["start", "finish"]);
        for s in symbols.iter().filter(|s| s.kind == SymbolKind::Method) {
            assert_eq!(s.parent_class.as_deref(), Some("SessionTracker"));
        }
    }

    #[test]
    fn test_extract_interface_type_enum_const() {
        let content = "export interface Config {\n  path: string;\n}\ntype Mode = 'a' | 'b';\nexport enum Level {\n  Low,\n  High,\n}\nconst MAX_RETRIES = 3;\n";
        let symbols = extract_symbols(content);
        assert_eq!(names_of(&symbols, SymbolKind::Interface), vec!["Config"]);
        assert_eq!(names_of(&symbols, SymbolKind::Type), vec!["Mode"]);
        assert_eq!(names_of(&symbols, SymbolKind::Enum), vec!["Level"]);
        assert_eq!(names_of(&symbols, SymbolKind::Constant), vec!["MAX_RETRIES"]);
    }

    #[test]
    fn test_control_flow_not_methods() {
        let content = "class A {\n  run() {\n    if (x) {\n      return;\n    }\n    for (const y of z) {\n    }\n  }\n}\n";
        let symbols = extract_symbols(content);
        assert_eq!(names_of(&symbols, SymbolKind::Method), vec!["run"]);
    }

    #[test]
    fn test_oversized_file_skipped() {
        let content = format!("function f() {{}}\n{}", "x".repeat(MAX_FILE_SIZE + 1));
        assert!(extract_symbols(&content).is_empty());
    }

    #[test]
    fn test_parse_file_hash_matches_content() {
        let parsed = parse_file("src/a.ts", "const a = 1;\n");
        assert_eq!(parsed.content_hash, content_hash("const a = 1;\n"));
        assert_eq!(parsed.symbols.len(), 1);
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let content = "export function a() {}\nexport function b() {}\n";
        assert_eq!(extract_symbols(content), extract_symbols(content));
    }
}
