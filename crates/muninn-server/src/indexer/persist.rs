// crates/muninn-server/src/indexer/persist.rs
// Incremental symbol persistence. A file's stored symbols are always
// consistent with its recorded content hash: unchanged hashes skip,
// changed hashes replace the symbol set wholesale, parse failures leave
// the prior symbols in place.

use super::symbols::{MAX_FILE_SIZE, parse_file};
use crate::args;
use crate::store::Store;
use anyhow::Result;
use std::path::Path;

/// Files per processing batch.
const BATCH_SIZE: usize = 10;

/// Outcome counts from a persistence pass.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct PersistStats {
    pub parsed: usize,
    pub skipped: usize,
    pub symbols: usize,
}

/// Parse and persist a set of files (paths relative to the project root).
pub async fn parse_and_persist(
    store: &Store,
    project_id: i64,
    project_root: &Path,
    files: &[String],
) -> Result<PersistStats> {
    let mut stats = PersistStats::default();

    for batch in files.chunks(BATCH_SIZE) {
        for rel_path in batch {
            match persist_one(store, project_id, project_root, rel_path).await {
                Ok(Some(count)) => {
                    stats.parsed += 1;
                    stats.symbols += count;
                }
                Ok(None) => stats.skipped += 1,
                Err(e) => {
                    tracing::debug!(file = %rel_path, "parse skipped: {}", e);
                    stats.skipped += 1;
                }
            }
        }
    }

    Ok(stats)
}

/// Persist a single file. Ok(None) = skipped (unchanged, oversized, or
/// unreadable); Ok(Some(n)) = replaced with n symbols.
async fn persist_one(
    store: &Store,
    project_id: i64,
    project_root: &Path,
    rel_path: &str,
) -> Result<Option<usize>> {
    let abs = project_root.join(rel_path);
    let metadata = std::fs::metadata(&abs)?;
    if metadata.len() as usize > MAX_FILE_SIZE {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&abs)?;
    let parsed = parse_file(rel_path, &content);

    let existing: Option<(i64, Option<String>)> = store
        .get(
            "SELECT id, content_hash FROM files WHERE project_id = ?1 AND path = ?2",
            args![project_id, rel_path],
        )
        .await?
        .map(|row| Ok::<_, anyhow::Error>((row.get::<i64>(0)?, row.get::<Option<String>>(1)?)))
        .transpose()?;

    if let Some((_, Some(hash))) = &existing {
        if *hash == parsed.content_hash {
            return Ok(None);
        }
    }

    let file_id = match existing {
        Some((id, _)) => {
            store
                .run(
                    "UPDATE files SET content_hash = ?2, updated_at = CURRENT_TIMESTAMP WHERE id = ?1",
                    args![id, parsed.content_hash.clone()],
                )
                .await?;
            id
        }
        None => {
            store
                .run(
                    "INSERT INTO files (project_id, path, content_hash, file_type)
                     VALUES (?1, ?2, ?3, ?4)",
                    args![
                        project_id,
                        rel_path,
                        parsed.content_hash.clone(),
                        Path::new(rel_path)
                            .extension()
                            .and_then(|e| e.to_str())
                            .map(str::to_string)
                    ],
                )
                .await?
                .last_insert_id
        }
    };

    // Replace the symbol set atomically with the hash they were parsed from
    let mut stmts: Vec<(String, Vec<crate::store::Value>)> = vec![(
        "DELETE FROM symbols WHERE file_id = ?1".to_string(),
        args![file_id],
    )];
    for symbol in &parsed.symbols {
        stmts.push((
            "INSERT INTO symbols
                (file_id, name, kind, signature, parameters, returns, parent_class,
                 line_start, line_end, is_exported)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                .to_string(),
            args![
                file_id,
                symbol.name.clone(),
                symbol.kind.as_str(),
                symbol.signature.clone(),
                symbol.parameters.clone(),
                symbol.returns.clone(),
                symbol.parent_class.clone(),
                symbol.line_start,
                symbol.line_end,
                symbol.is_exported
            ],
        ));
    }
    store.batch(stmts).await?;

    Ok(Some(parsed.symbols.len()))
}
