// crates/muninn-server/src/outcomes/strategy.rs
// Strategy distillation, project ownership refresh, and codebase DNA.
// Periodic aggregators sharing the read-raw/compute/upsert shape.

use crate::args;
use crate::db::from_json_array;
use crate::store::Store;
use anyhow::Result;
use std::collections::HashMap;

/// Sessions examined per distillation pass.
const DISTILL_SESSION_WINDOW: i64 = 25;

/// A tool sequence must recur in this many successful sessions.
const STRATEGY_MIN_SESSIONS: usize = 3;

/// Distill recurring successful tool sequences into the strategy catalog.
/// A strategy is a 3-step tool prefix shared by successful sessions.
pub async fn distill_strategies(store: &Store, project_id: i64) -> Result<usize> {
    let rows = store
        .all(
            "SELECT tc.session_id, tc.tool_name
             FROM tool_calls tc
             JOIN sessions s ON s.id = tc.session_id
             WHERE tc.project_id = ?1 AND s.success = 2
               AND s.id IN (
                   SELECT id FROM sessions WHERE project_id = ?1 AND success = 2
                   ORDER BY started_at DESC LIMIT ?2
               )
             ORDER BY tc.session_id, tc.id",
            args![project_id, DISTILL_SESSION_WINDOW],
        )
        .await?;

    let mut prefixes: HashMap<String, Vec<i64>> = HashMap::new();
    let mut current: Option<(i64, Vec<String>)> = None;
    for row in &rows {
        let session_id: i64 = row.get(0)?;
        let tool: String = row.get(1)?;
        match &mut current {
            Some((sid, tools)) if *sid == session_id => tools.push(tool),
            _ => {
                flush_prefix(&mut prefixes, current.take());
                current = Some((session_id, vec![tool]));
            }
        }
    }
    flush_prefix(&mut prefixes, current.take());

    let mut distilled = 0;
    for (prefix, sessions) in prefixes {
        if sessions.len() < STRATEGY_MIN_SESSIONS {
            continue;
        }
        let name = format!("sequence:{prefix}");
        let steps: Vec<String> = prefix.split(',').map(str::to_string).collect();
        let source: Vec<String> = sessions.iter().map(|s| s.to_string()).collect();
        store
            .run(
                "INSERT INTO strategy_catalog
                    (project_id, name, trigger_pattern, steps, source_sessions, success_rate)
                 VALUES (?1, ?2, ?3, ?4, ?5, 1.0)
                 ON CONFLICT(project_id, name) DO UPDATE SET
                    source_sessions = ?5, updated_at = CURRENT_TIMESTAMP",
                args![
                    project_id,
                    name,
                    prefix,
                    crate::db::to_json_array(&steps),
                    crate::db::to_json_array(&source)
                ],
            )
            .await?;
        distilled += 1;
    }
    Ok(distilled)
}

fn flush_prefix(prefixes: &mut HashMap<String, Vec<i64>>, entry: Option<(i64, Vec<String>)>) {
    if let Some((session_id, tools)) = entry {
        if tools.len() >= 3 {
            prefixes.entry(tools[..3].join(",")).or_default().push(session_id);
        }
    }
}

/// Refresh per-file ownership tallies from commit history.
pub async fn refresh_ownership(store: &Store, project_id: i64) -> Result<usize> {
    let commits = store
        .all(
            "SELECT author, files_changed FROM git_commits
             WHERE project_id = ?1 AND author IS NOT NULL",
            args![project_id],
        )
        .await?;

    let mut tallies: HashMap<(String, String), i64> = HashMap::new();
    for row in &commits {
        let author: String = row.get(0)?;
        for file in from_json_array(row.get::<Option<String>>(1)?.as_deref()) {
            *tallies.entry((file, author.clone())).or_insert(0) += 1;
        }
    }

    for ((file, author), count) in &tallies {
        store
            .run(
                "INSERT INTO file_ownership (project_id, file_path, author, commit_count)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(project_id, file_path, author) DO UPDATE SET commit_count = ?4",
                args![project_id, file.clone(), author.clone(), *count],
            )
            .await?;
    }
    Ok(tallies.len())
}

/// Regenerate the project's "DNA": inferred type and stack from its file
/// extension distribution, written back onto the project row.
pub async fn regenerate_dna(store: &Store, project_id: i64) -> Result<()> {
    let rows = store
        .all(
            "SELECT file_type, COUNT(*) as n FROM files
             WHERE project_id = ?1 AND archived_at IS NULL AND file_type IS NOT NULL
             GROUP BY file_type ORDER BY n DESC LIMIT 5",
            args![project_id],
        )
        .await?;

    let mut stack: Vec<String> = Vec::new();
    for row in &rows {
        stack.push(row.get(0)?);
    }
    let project_type = match stack.first().map(String::as_str) {
        Some("ts" | "tsx") => "typescript",
        Some("js" | "jsx" | "mjs" | "cjs") => "javascript",
        Some(_) => "mixed",
        None => "unknown",
    };

    store
        .run(
            "UPDATE projects SET project_type = ?2, stack = ?3, updated_at = CURRENT_TIMESTAMP
             WHERE id = ?1",
            args![project_id, project_type, stack.join(",")],
        )
        .await?;
    Ok(())
}

/// Cross-project aggregation: promote project learnings that recur (same
/// title) across 3+ projects into global learnings (project_id NULL).
pub async fn aggregate_cross_project(store: &Store) -> Result<usize> {
    let rows = store
        .all(
            "SELECT title, COUNT(DISTINCT project_id) as n, MAX(content), MAX(category)
             FROM learnings
             WHERE project_id IS NOT NULL AND archived_at IS NULL
             GROUP BY title HAVING n >= 3",
            args![],
        )
        .await?;

    let mut promoted = 0;
    for row in rows {
        let title: String = row.get(0)?;
        let projects: i64 = row.get(1)?;
        let content: String = row.get(2)?;
        let category: Option<String> = row.get(3)?;

        let exists = store
            .get(
                "SELECT 1 FROM learnings WHERE project_id IS NULL AND title = ?1",
                args![title.clone()],
            )
            .await?;
        if exists.is_some() {
            continue;
        }
        store
            .run(
                "INSERT INTO learnings (project_id, category, title, content, context, confidence)
                 VALUES (NULL, ?1, ?2, ?3, ?4, 2.0)",
                args![
                    category.unwrap_or_else(|| "general".to_string()),
                    title,
                    content,
                    format!("seen in {projects} projects")
                ],
            )
            .await?;
        promoted += 1;
    }
    Ok(promoted)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seed(store: &Store) -> i64 {
        crate::db::get_or_create_project(store, "/p", None).await.unwrap().id
    }

    #[tokio::test]
    async fn test_distill_requires_recurrence() {
        let store = Store::open_in_memory().await.unwrap();
        let project_id = seed(&store).await;
        for i in 0..3 {
            let session = store
                .run(
                    "INSERT INTO sessions (project_id, session_number, ended_at, success)
                     VALUES (?1, ?2, CURRENT_TIMESTAMP, 2)",
                    args![project_id, i + 1],
                )
                .await
                .unwrap()
                .last_insert_id;
            for tool in ["Read", "Grep", "Edit", "Bash"] {
                store
                    .run(
                        "INSERT INTO tool_calls (project_id, session_id, tool_name) VALUES (?1, ?2, ?3)",
                        args![project_id, session, tool],
                    )
                    .await
                    .unwrap();
            }
        }

        assert_eq!(distill_strategies(&store, project_id).await.unwrap(), 1);
        let row = store
            .get("SELECT name, trigger_pattern FROM strategy_catalog", args![])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.get::<String>(0).unwrap(), "sequence:Read,Grep,Edit");

        // Idempotent re-run
        assert_eq!(distill_strategies(&store, project_id).await.unwrap(), 1);
        let count: i64 = store
            .get("SELECT COUNT(*) FROM strategy_catalog", args![])
            .await
            .unwrap()
            .unwrap()
            .get(0)
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_failed_sessions_not_distilled() {
        let store = Store::open_in_memory().await.unwrap();
        let project_id = seed(&store).await;
        for i in 0..4 {
            let session = store
                .run(
                    "INSERT INTO sessions (project_id, session_number, ended_at, success)
                     VALUES (?1, ?2, CURRENT_TIMESTAMP, 0)",
                    args![project_id, i + 1],
                )
                .await
                .unwrap()
                .last_insert_id;
            for tool in ["Read", "Grep", "Edit"] {
                store
                    .run(
                        "INSERT INTO tool_calls (project_id, session_id, tool_name) VALUES (?1, ?2, ?3)",
                        args![project_id, session, tool],
                    )
                    .await
                    .unwrap();
            }
        }
        assert_eq!(distill_strategies(&store, project_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ownership_tallies() {
        let store = Store::open_in_memory().await.unwrap();
        let project_id = seed(&store).await;
        for (hash, author) in [("h1", "jane"), ("h2", "jane"), ("h3", "sam")] {
            store
                .run(
                    "INSERT INTO git_commits (project_id, commit_hash, author, files_changed, analyzed)
                     VALUES (?1, ?2, ?3, '[\"src/a.ts\"]', 0)",
                    args![project_id, hash, author],
                )
                .await
                .unwrap();
        }
        refresh_ownership(&store, project_id).await.unwrap();

        let jane: i64 = store
            .get(
                "SELECT commit_count FROM file_ownership WHERE author = 'jane'",
                args![],
            )
            .await
            .unwrap()
            .unwrap()
            .get(0)
            .unwrap();
        assert_eq!(jane, 2);
    }

    #[tokio::test]
    async fn test_regenerate_dna_infers_stack() {
        let store = Store::open_in_memory().await.unwrap();
        let project_id = seed(&store).await;
        for (path, ext) in [("a.ts", "ts"), ("b.ts", "ts"), ("c.js", "js")] {
            store
                .run(
                    "INSERT INTO files (project_id, path, file_type) VALUES (?1, ?2, ?3)",
                    args![project_id, path, ext],
                )
                .await
                .unwrap();
        }
        regenerate_dna(&store, project_id).await.unwrap();

        let row = store
            .get("SELECT project_type, stack FROM projects WHERE id = ?1", args![project_id])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.get::<String>(0).unwrap(), "typescript");
        assert!(row.get::<String>(1).unwrap().starts_with("ts"));
    }

    #[tokio::test]
    async fn test_cross_project_promotion() {
        let store = Store::open_in_memory().await.unwrap();
        for path in ["/p1", "/p2", "/p3"] {
            let project = crate::db::get_or_create_project(&store, path, None).await.unwrap();
            store
                .run(
                    "INSERT INTO learnings (project_id, title, content)
                     VALUES (?1, 'always pin deps', 'lockfiles prevent drift')",
                    args![project.id],
                )
                .await
                .unwrap();
        }

        assert_eq!(aggregate_cross_project(&store).await.unwrap(), 1);
        assert_eq!(aggregate_cross_project(&store).await.unwrap(), 0, "already promoted");

        let global: i64 = store
            .get(
                "SELECT COUNT(*) FROM learnings WHERE project_id IS NULL",
                args![],
            )
            .await
            .unwrap()
            .unwrap()
            .get(0)
            .unwrap();
        assert_eq!(global, 1);
    }
}
