// crates/muninn-server/src/cli/promote.rs
// Learning promotion workflow: candidates are nominated from confidence
// and application counts, promoted learnings sync into a markdown section
// the assistant reads, stale ones get flagged, demotion reverses it.

use crate::args;
use crate::error::{MuninnError, Result};
use crate::store::Store;
use std::path::Path;

/// Nomination thresholds.
const CANDIDATE_MIN_CONFIDENCE: f64 = 7.0;
const CANDIDATE_MIN_APPLIED: i64 = 3;

/// Section file promoted learnings sync into.
const SECTION_FILE: &str = ".muninn/LEARNINGS.md";

/// Run a promote subcommand. Returns user-facing output.
pub async fn run_promote(
    store: &Store,
    project_id: i64,
    project_root: &Path,
    promote_args: &[String],
) -> Result<String> {
    match promote_args.first().map(String::as_str) {
        Some("candidates") => candidates(store, project_id).await,
        Some("sync") => sync(store, project_id, project_root).await,
        Some("stale") => stale(store, project_id).await,
        Some("demote") => {
            let id = promote_args
                .get(1)
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or_else(|| MuninnError::InvalidInput("demote needs a learning id".into()))?;
            demote(store, project_id, id).await
        }
        Some(id_str) => {
            let id = id_str
                .parse::<i64>()
                .map_err(|_| MuninnError::InvalidInput(format!("unknown action: {id_str}")))?;
            promote_one(store, project_id, id).await
        }
        None => Err(MuninnError::InvalidInput(
            "usage: promote {candidates|sync|stale|demote <id>|<id>}".into(),
        )),
    }
}

/// Nominate learnings that earned promotion and list them.
async fn candidates(store: &Store, project_id: i64) -> Result<String> {
    store
        .run(
            "UPDATE learnings SET promotion_status = 'candidate'
             WHERE project_id = ?1 AND archived_at IS NULL
               AND promotion_status = 'not_ready'
               AND confidence >= ?2 AND times_applied >= ?3",
            args![project_id, CANDIDATE_MIN_CONFIDENCE, CANDIDATE_MIN_APPLIED],
        )
        .await
        .map_err(|e| MuninnError::Store(e.to_string()))?;

    let rows = store
        .all(
            "SELECT id, title, confidence, times_applied FROM learnings
             WHERE project_id = ?1 AND promotion_status = 'candidate'
             ORDER BY confidence DESC",
            args![project_id],
        )
        .await
        .map_err(|e| MuninnError::Store(e.to_string()))?;

    if rows.is_empty() {
        return Ok("no promotion candidates".to_string());
    }
    let mut lines = Vec::new();
    for row in rows {
        lines.push(format!(
            "[{}] {} (confidence {:.1}, applied {}x)",
            row.get::<i64>(0)?,
            row.get::<String>(1)?,
            row.get::<f64>(2)?,
            row.get::<i64>(3)?
        ));
    }
    Ok(lines.join("\n"))
}

/// Promote one learning by id.
async fn promote_one(store: &Store, project_id: i64, id: i64) -> Result<String> {
    let result = store
        .run(
            "UPDATE learnings SET promotion_status = 'promoted',
                    promoted_to_section = 'learnings',
                    updated_at = CURRENT_TIMESTAMP
             WHERE id = ?1 AND project_id = ?2 AND archived_at IS NULL",
            args![id, project_id],
        )
        .await
        .map_err(|e| MuninnError::Store(e.to_string()))?;
    if result.changes == 0 {
        return Err(MuninnError::NotFound(format!("learning {id}")));
    }
    Ok(format!("learning {id} promoted; run `muninn promote sync` to write the section"))
}

/// Write all promoted learnings into the project's section file.
async fn sync(store: &Store, project_id: i64, project_root: &Path) -> Result<String> {
    let rows = store
        .all(
            "SELECT title, content FROM learnings
             WHERE project_id = ?1 AND promotion_status = 'promoted'
               AND archived_at IS NULL
             ORDER BY confidence DESC",
            args![project_id],
        )
        .await
        .map_err(|e| MuninnError::Store(e.to_string()))?;

    let mut body = String::from("# Promoted Learnings\n\n");
    for row in &rows {
        body.push_str(&format!(
            "## {}\n\n{}\n\n",
            row.get::<String>(0)?,
            row.get::<String>(1)?
        ));
    }

    let target = project_root.join(SECTION_FILE);
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&target, body)?;
    Ok(format!("synced {} learnings to {}", rows.len(), target.display()))
}

/// Promoted learnings that nothing has reinforced in 30 days.
async fn stale(store: &Store, project_id: i64) -> Result<String> {
    let rows = store
        .all(
            "SELECT id, title FROM learnings
             WHERE project_id = ?1 AND promotion_status = 'promoted'
               AND COALESCE(last_reinforced_at, updated_at) < datetime('now', '-30 days')",
            args![project_id],
        )
        .await
        .map_err(|e| MuninnError::Store(e.to_string()))?;
    if rows.is_empty() {
        return Ok("no stale promoted learnings".to_string());
    }
    let mut lines = Vec::new();
    for row in rows {
        lines.push(format!("[{}] {}", row.get::<i64>(0)?, row.get::<String>(1)?));
    }
    Ok(lines.join("\n"))
}

async fn demote(store: &Store, project_id: i64, id: i64) -> Result<String> {
    let result = store
        .run(
            "UPDATE learnings SET promotion_status = 'demoted',
                    promoted_to_section = NULL,
                    updated_at = CURRENT_TIMESTAMP
             WHERE id = ?1 AND project_id = ?2",
            args![id, project_id],
        )
        .await
        .map_err(|e| MuninnError::Store(e.to_string()))?;
    if result.changes == 0 {
        return Err(MuninnError::NotFound(format!("learning {id}")));
    }
    Ok(format!("learning {id} demoted"))
}
