// crates/muninn-server/src/indexer/mod.rs
// Code intelligence: heuristic symbol extraction, incremental
// persistence keyed on content hash, call-graph construction, blast
// radius, and test-to-source mapping.

mod blast;
mod calls;
mod persist;
mod symbols;
mod tests_map;
mod walk;

pub use blast::refresh_blast_radius;
pub use calls::{CallEdge, ImportBinding, build_call_graph, extract_calls, parse_imports, resolve_import};
pub use persist::{PersistStats, parse_and_persist};
pub use symbols::{MAX_FILE_SIZE, ParsedFile, Symbol, SymbolKind, content_hash, extract_symbols, parse_file};
pub use tests_map::{infer_source_path, map_tests_to_sources};
pub use walk::collect_source_files;
