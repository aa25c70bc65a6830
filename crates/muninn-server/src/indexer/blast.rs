// crates/muninn-server/src/indexer/blast.rs
// Blast radius: reverse call-graph closure per file, answering "what
// breaks if this file changes". Cached in blast_radius/blast_summary and
// refreshed idempotently after call-graph passes.

use crate::args;
use crate::store::Store;
use anyhow::Result;
use std::collections::{HashMap, HashSet, VecDeque};

/// Traversal depth cap.
const MAX_DEPTH: i64 = 5;

/// Recompute the blast radius for the given files (typically the files
/// of the commit that triggered the call-graph pass).
pub async fn refresh_blast_radius(
    store: &Store,
    project_id: i64,
    files: &[String],
) -> Result<()> {
    // Reverse adjacency: callee_file -> caller_files
    let rows = store
        .all(
            "SELECT DISTINCT callee_file, caller_file FROM call_edges
             WHERE project_id = ?1 AND callee_file != caller_file",
            args![project_id],
        )
        .await?;
    let mut callers_of: HashMap<String, Vec<String>> = HashMap::new();
    for row in &rows {
        let callee: String = row.get(0)?;
        let caller: String = row.get(1)?;
        callers_of.entry(callee).or_default().push(caller);
    }

    for file in files {
        let mut visited: HashMap<String, i64> = HashMap::new();
        let mut queue: VecDeque<(String, i64)> = VecDeque::new();
        queue.push_back((file.clone(), 0));
        let mut seen: HashSet<String> = HashSet::new();
        seen.insert(file.clone());

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= MAX_DEPTH {
                continue;
            }
            for caller in callers_of.get(&current).into_iter().flatten() {
                if seen.insert(caller.clone()) {
                    visited.insert(caller.clone(), depth + 1);
                    queue.push_back((caller.clone(), depth + 1));
                }
            }
        }

        let mut stmts: Vec<(String, Vec<crate::store::Value>)> = vec![(
            "DELETE FROM blast_radius WHERE project_id = ?1 AND file_path = ?2".to_string(),
            args![project_id, file.clone()],
        )];
        let max_depth = visited.values().copied().max().unwrap_or(0);
        for (impacted, depth) in &visited {
            stmts.push((
                "INSERT INTO blast_radius (project_id, file_path, impacted_path, depth)
                 VALUES (?1, ?2, ?3, ?4)"
                    .to_string(),
                args![project_id, file.clone(), impacted.clone(), *depth],
            ));
        }
        stmts.push((
            "INSERT INTO blast_summary (project_id, file_path, impacted_count, max_depth, computed_at)
             VALUES (?1, ?2, ?3, ?4, CURRENT_TIMESTAMP)
             ON CONFLICT(project_id, file_path) DO UPDATE SET
                impacted_count = ?3, max_depth = ?4, computed_at = CURRENT_TIMESTAMP"
                .to_string(),
            args![project_id, file.clone(), visited.len(), max_depth],
        ));
        store.batch(stmts).await?;
    }

    Ok(())
}
