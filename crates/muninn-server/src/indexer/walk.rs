// crates/muninn-server/src/indexer/walk.rs
// Bounded project walk for full reindex passes: 2000 files, depth 15,
// 50 KB per file, common build directories ignored.

use super::symbols::MAX_FILE_SIZE;
use ignore::WalkBuilder;
use std::path::Path;

/// Walk limits.
const MAX_FILES: usize = 2000;
const MAX_DEPTH: usize = 15;

/// Directory names never descended into.
const IGNORED_DIRS: &[&str] = &[
    "node_modules",
    ".git",
    "dist",
    "build",
    "out",
    "target",
    "coverage",
    "vendor",
    ".next",
    ".cache",
];

/// Extensions collected by the walk.
const SOURCE_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs", "cjs"];

/// Collect parseable source files under `root`, relative to it.
/// Respects .gitignore via the walker; applies the hard bounds above.
pub fn collect_source_files(root: &Path) -> Vec<String> {
    let mut files = Vec::new();

    let walker = WalkBuilder::new(root)
        .max_depth(Some(MAX_DEPTH))
        .hidden(true)
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            !IGNORED_DIRS.contains(&name.as_ref())
        })
        .build();

    for entry in walker.flatten() {
        if files.len() >= MAX_FILES {
            break;
        }
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if !SOURCE_EXTENSIONS.contains(&ext) {
            continue;
        }
        if entry
            .metadata()
            .map(|m| m.len() as usize > MAX_FILE_SIZE)
            .unwrap_or(true)
        {
            continue;
        }
        if let Ok(rel) = path.strip_prefix(root) {
            files.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }

    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collects_only_source_extensions() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/a.ts"), "const a = 1;\n").unwrap();
        std::fs::write(dir.path().join("src/b.md"), "# doc\n").unwrap();
        std::fs::write(dir.path().join("src/c.jsx"), "const c = 1;\n").unwrap();

        let files = collect_source_files(dir.path());
        assert_eq!(files, vec!["src/a.ts", "src/c.jsx"]);
    }

    #[test]
    fn test_ignores_build_dirs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        std::fs::write(dir.path().join("node_modules/pkg/index.js"), "x\n").unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/a.ts"), "const a = 1;\n").unwrap();

        let files = collect_source_files(dir.path());
        assert_eq!(files, vec!["src/a.ts"]);
    }

    #[test]
    fn test_skips_oversized_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("big.ts"), "x".repeat(MAX_FILE_SIZE + 1)).unwrap();
        std::fs::write(dir.path().join("small.ts"), "const a = 1;\n").unwrap();
        assert_eq!(collect_source_files(dir.path()), vec!["small.ts"]);
    }
}
