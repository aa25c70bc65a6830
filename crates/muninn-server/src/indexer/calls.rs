// crates/muninn-server/src/indexer/calls.rs
// Import resolution and call-graph construction. Heuristic, not
// compiler-accurate: confidences mark how each edge was resolved.
// Edges from a caller file are wholly replaced on each pass.

use super::symbols::{Symbol, extract_symbols};
use crate::args;
use crate::store::Store;
use anyhow::Result;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Confidence for a call resolved through a named/default import.
const CONF_IMPORT: f64 = 0.85;
/// Confidence for a namespace member call.
const CONF_NAMESPACE: f64 = 0.75;
/// Confidence for a call to a local callable symbol.
const CONF_LOCAL: f64 = 0.9;

/// Extensions probed when resolving an extensionless relative import.
const RESOLVE_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs", "cjs"];

/// An import binding visible in a file.
#[derive(Debug, Clone, PartialEq)]
pub enum ImportBinding {
    /// `import { a, b as c } from './x'` - binding name in this file
    Named(String),
    /// `import X from './x'`
    Default(String),
    /// `import * as ns from './x'`
    Namespace(String),
}

#[derive(Debug, Clone)]
pub struct ParsedImport {
    pub binding: ImportBinding,
    pub source: String,
}

/// A resolved call edge.
#[derive(Debug, Clone, PartialEq)]
pub struct CallEdge {
    pub caller_symbol: String,
    pub callee_file: String,
    pub callee_symbol: String,
    pub call_type: &'static str,
    pub confidence: f64,
}

#[allow(clippy::expect_used)]
static RE_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^\s*import\s+(?:(?P<default>\w+)\s*,\s*)?(?:(?P<default2>\w+)|\{(?P<named>[^}]*)\}|\*\s+as\s+(?P<ns>\w+))\s+from\s+['"](?P<source>[^'"]+)['"]"#,
    )
    .expect("valid regex")
});
#[allow(clippy::expect_used)]
static RE_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:(?P<obj>\w+)\.)?(?P<name>\w+)\s*\(").expect("valid regex")
});

/// Call-site names that are language keywords, not calls.
const CALL_KEYWORDS: &[&str] = &[
    "if", "for", "while", "switch", "catch", "return", "typeof", "function", "new", "await",
    "constructor", "super", "else", "do", "yield",
];

/// Parse import statements from file content.
pub fn parse_imports(content: &str) -> Vec<ParsedImport> {
    let mut imports = Vec::new();
    for line in content.lines() {
        let Some(caps) = RE_IMPORT.captures(line) else {
            continue;
        };
        let source = caps["source"].to_string();

        if let Some(default) = caps.name("default").or_else(|| caps.name("default2")) {
            imports.push(ParsedImport {
                binding: ImportBinding::Default(default.as_str().to_string()),
                source: source.clone(),
            });
        }
        if let Some(named) = caps.name("named") {
            for part in named.as_str().split(',') {
                let part = part.trim();
                if part.is_empty() {
                    continue;
                }
                // `orig as alias` binds the alias locally
                let binding = part
                    .rsplit(" as ")
                    .next()
                    .unwrap_or(part)
                    .trim()
                    .to_string();
                imports.push(ParsedImport {
                    binding: ImportBinding::Named(binding),
                    source: source.clone(),
                });
            }
        }
        if let Some(ns) = caps.name("ns") {
            imports.push(ParsedImport {
                binding: ImportBinding::Namespace(ns.as_str().to_string()),
                source: source.clone(),
            });
        }
    }
    imports
}

/// Resolve a relative import to a project-relative file path. Only
/// relative sources resolve; bare specifiers are external packages.
/// Probes the literal path, each known extension, then `index.*`.
pub fn resolve_import(project_root: &Path, importer: &str, source: &str) -> Option<String> {
    if !source.starts_with('.') {
        return None;
    }
    let importer_dir = Path::new(importer).parent().unwrap_or(Path::new(""));
    let joined = normalize(&importer_dir.join(source));

    let candidate = project_root.join(&joined);
    if candidate.is_file() {
        return Some(path_str(&joined));
    }
    for ext in RESOLVE_EXTENSIONS {
        let with_ext = joined.with_extension(ext);
        if project_root.join(&with_ext).is_file() {
            return Some(path_str(&with_ext));
        }
    }
    for ext in RESOLVE_EXTENSIONS {
        let index = joined.join(format!("index.{ext}"));
        if project_root.join(&index).is_file() {
            return Some(path_str(&index));
        }
    }
    None
}

/// Extract call edges for one file given its content and project layout.
pub fn extract_calls(project_root: &Path, file_path: &str, content: &str) -> Vec<CallEdge> {
    let symbols = extract_symbols(content);
    let imports = parse_imports(content);

    // Import binding -> resolved file
    let mut import_files: HashMap<&str, String> = HashMap::new();
    let mut namespace_files: HashMap<&str, String> = HashMap::new();
    for import in &imports {
        let Some(resolved) = resolve_import(project_root, file_path, &import.source) else {
            continue;
        };
        match &import.binding {
            ImportBinding::Named(name) | ImportBinding::Default(name) => {
                import_files.insert(name.as_str(), resolved);
            }
            ImportBinding::Namespace(name) => {
                namespace_files.insert(name.as_str(), resolved);
            }
        }
    }

    let local_callables: HashMap<&str, &Symbol> = symbols
        .iter()
        .filter(|s| s.kind.is_callable())
        .map(|s| (s.name.as_str(), s))
        .collect();

    let lines: Vec<&str> = content.lines().collect();
    let mut edges = Vec::new();

    for caller in symbols.iter().filter(|s| s.kind.is_callable()) {
        let body_start = caller.line_start; // skip the signature line itself
        let body_end = caller.line_end.min(lines.len());
        if body_start >= body_end {
            continue;
        }
        for line in &lines[body_start..body_end] {
            for caps in RE_CALL.captures_iter(line) {
                let name = &caps["name"];
                if CALL_KEYWORDS.contains(&name) {
                    continue;
                }
                if let Some(obj) = caps.name("obj") {
                    if let Some(target) = namespace_files.get(obj.as_str()) {
                        edges.push(CallEdge {
                            caller_symbol: caller.name.clone(),
                            callee_file: target.clone(),
                            callee_symbol: name.to_string(),
                            call_type: "method",
                            confidence: CONF_NAMESPACE,
                        });
                    }
                    continue;
                }
                if let Some(target) = import_files.get(name) {
                    edges.push(CallEdge {
                        caller_symbol: caller.name.clone(),
                        callee_file: target.clone(),
                        callee_symbol: name.to_string(),
                        call_type: "direct",
                        confidence: CONF_IMPORT,
                    });
                } else if let Some(local) = local_callables.get(name) {
                    if local.name != caller.name {
                        edges.push(CallEdge {
                            caller_symbol: caller.name.clone(),
                            callee_file: file_path.to_string(),
                            callee_symbol: local.name.clone(),
                            call_type: "direct",
                            confidence: CONF_LOCAL,
                        });
                    }
                }
            }
        }
    }

    edges.sort_by(|a, b| {
        (&a.caller_symbol, &a.callee_file, &a.callee_symbol)
            .cmp(&(&b.caller_symbol, &b.callee_file, &b.callee_symbol))
    });
    edges.dedup();
    edges
}

/// Rebuild call edges for a set of files, replacing each caller file's
/// edges wholesale.
pub async fn build_call_graph(
    store: &Store,
    project_id: i64,
    project_root: &Path,
    files: &[String],
) -> Result<usize> {
    let mut total = 0;
    for rel_path in files {
        let Ok(content) = std::fs::read_to_string(project_root.join(rel_path)) else {
            continue;
        };
        let edges = extract_calls(project_root, rel_path, &content);

        let mut stmts: Vec<(String, Vec<crate::store::Value>)> = vec![(
            "DELETE FROM call_edges WHERE project_id = ?1 AND caller_file = ?2".to_string(),
            args![project_id, rel_path],
        )];
        for edge in &edges {
            stmts.push((
                "INSERT INTO call_edges
                    (project_id, caller_file, caller_symbol, callee_file, callee_symbol,
                     call_type, confidence)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
                    .to_string(),
                args![
                    project_id,
                    rel_path,
                    edge.caller_symbol.clone(),
                    edge.callee_file.clone(),
                    edge.callee_symbol.clone(),
                    edge.call_type,
                    edge.confidence
                ],
            ));
        }
        total += edges.len();
        store.batch(stmts).await?;
    }
    Ok(total)
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other),
        }
    }
    out
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_named_imports_with_alias() {
        let imports = parse_imports("import { alpha, beta as b } from './util';\n");
        assert_eq!(imports.len(), 2);
        assert_eq!(imports[0].binding, ImportBinding::Named("alpha".into()));
        assert_eq!(imports[1].binding, ImportBinding::Named("b".into()));
    }

    #[test]
    fn test_parse_default_and_namespace() {
        let imports =
            parse_imports("import Client from './client';\nimport * as fmt from './fmt';\n");
        assert_eq!(imports[0].binding, ImportBinding::Default("Client".into()));
        assert_eq!(imports[1].binding, ImportBinding::Namespace("fmt".into()));
    }

    #[test]
    fn test_bare_specifiers_not_resolved() {
        let dir = tempfile::tempdir().unwrap();
        assert!(resolve_import(dir.path(), "src/a.ts", "react").is_none());
    }

    #[test]
    fn test_resolve_with_extension_probe() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/util.ts"), "").unwrap();
        assert_eq!(
            resolve_import(dir.path(), "src/a.ts", "./util"),
            Some("src/util.ts".to_string())
        );
    }

    #[test]
    fn test_resolve_index_probe() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/lib")).unwrap();
        std::fs::write(dir.path().join("src/lib/index.ts"), "").unwrap();
        assert_eq!(
            resolve_import(dir.path(), "src/a.ts", "./lib"),
            Some("src/lib/index.ts".to_string())
        );
    }

    #[test]
    fn test_extract_calls_imported_and_local() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/util.ts"), "export function helper() {}\n").unwrap();

        let content = "import { helper } from './util';\n\
                       function inner() {\n  return 1;\n}\n\
                       export function main() {\n  helper();\n  inner();\n}\n";
        let edges = extract_calls(dir.path(), "src/a.ts", content);

        let imported: Vec<_> = edges.iter().filter(|e| e.callee_file == "src/util.ts").collect();
        assert_eq!(imported.len(), 1);
        assert_eq!(imported[0].caller_symbol, "main");
        assert_eq!(imported[0].call_type, "direct");
        assert!((imported[0].confidence - 0.85).abs() < f64::EPSILON);

        let local: Vec<_> = edges.iter().filter(|e| e.callee_symbol == "inner").collect();
        assert_eq!(local.len(), 1);
        assert!((local[0].confidence - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn test_extract_calls_namespace_member() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/fmt.ts"), "export function pad() {}\n").unwrap();

        let content = "import * as fmt from './fmt';\n\
                       export function render() {\n  return fmt.pad();\n}\n";
        let edges = extract_calls(dir.path(), "src/a.ts", content);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].call_type, "method");
        assert_eq!(edges[0].callee_symbol, "pad");
        assert!((edges[0].confidence - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_keywords_not_calls() {
        let dir = tempfile::tempdir().unwrap();
        let content = "export function main() {\n  if (x) { return f(1); }\n  while (y) {}\n}\n";
        let edges = extract_calls(dir.path(), "src/a.ts", content);
        assert!(edges.is_empty(), "if/while/return are not calls, f is unresolvable");
    }

    #[tokio::test]
    async fn test_build_call_graph_replaces_stale_edges() {
        let store = Store::open_in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let project = crate::db::get_or_create_project(&store, "/p", None).await.unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/util.ts"), "export function helper() {}\n").unwrap();
        let a = dir.path().join("src/a.ts");
        std::fs::write(&a, "import { helper } from './util';\nexport function main() {\n  helper();\n}\n").unwrap();

        let files = vec!["src/a.ts".to_string()];
        build_call_graph(&store, project.id, dir.path(), &files).await.unwrap();
        async fn count(store: &Store) -> i64 {
            store
                .get("SELECT COUNT(*) FROM call_edges", args![])
                .await
                .unwrap()
                .unwrap()
                .get::<i64>(0)
                .unwrap()
        }
        assert_eq!(count(&store).await, 1);

        // Rewrite without the call: stale edge must disappear
        std::fs::write(&a, "export function main() {\n  return 1;\n}\n").unwrap();
        build_call_graph(&store, project.id, dir.path(), &files).await.unwrap();
        assert_eq!(count(&store).await, 0);
    }
}
