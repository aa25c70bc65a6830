// crates/muninn-server/src/ingest/commits.rs
// Commit ingestion, triggered by the post-commit hook via `ingest commit`.
// Inserts the commit row, bumps per-file stats, records pairwise
// co-changes, and enqueues the deferred analyses.

use crate::args;
use crate::db::{current_session, get_or_create_project, to_json_array, touch_file_for_commit};
use crate::git;
use crate::queue::{JobType, enqueue};
use crate::store::Store;
use anyhow::Result;
use std::path::Path;

/// Extensions eligible for symbol/call-graph analysis.
const PARSEABLE_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs", "cjs"];

/// Ingest the latest commit of the repository at `project_path`.
/// Returns the commit hash when a new row was recorded, None on replay.
pub async fn ingest_commit(store: &Store, project_path: &Path) -> Result<Option<String>> {
    let commit = git::latest_commit(project_path).map_err(|e| anyhow::anyhow!(e))?;
    let project =
        get_or_create_project(store, &project_path.to_string_lossy(), None).await?;

    // Replayed hook invocations are a no-op
    let exists = store
        .get(
            "SELECT 1 FROM git_commits WHERE project_id = ?1 AND commit_hash = ?2",
            args![project.id, commit.hash.clone()],
        )
        .await?;
    if exists.is_some() {
        return Ok(None);
    }

    let session = current_session(store, project.id).await?;
    let session_id = session.as_ref().map(|s| s.id);

    let paths: Vec<String> = commit.files.iter().map(|(_, _, p)| p.clone()).collect();
    let insertions: i64 = commit.files.iter().map(|(i, _, _)| i).sum();
    let deletions: i64 = commit.files.iter().map(|(_, d, _)| d).sum();

    store
        .run(
            "INSERT INTO git_commits
                (project_id, commit_hash, author, message, files_changed,
                 insertions, deletions, committed_at, session_id, analyzed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0)",
            args![
                project.id,
                commit.hash.clone(),
                commit.author.clone(),
                commit.subject.clone(),
                to_json_array(&paths),
                insertions,
                deletions,
                commit.committed_at.clone(),
                session_id
            ],
        )
        .await?;

    for path in &paths {
        touch_file_for_commit(store, project.id, path).await?;
    }

    if paths.len() >= 2 {
        record_cochanges(store, project.id, &paths).await?;
    }

    enqueue_commit_jobs(store, project.id, &project.path, &commit.hash, &paths).await?;

    Ok(Some(commit.hash))
}

/// Bump cochange_count for every unordered pair of files in the commit.
/// Pairs are keyed with file_a < file_b so (a,b) and (b,a) collapse.
async fn record_cochanges(store: &Store, project_id: i64, paths: &[String]) -> Result<()> {
    for (i, a) in paths.iter().enumerate() {
        for b in &paths[i + 1..] {
            let (first, second) = if a <= b { (a, b) } else { (b, a) };
            store
                .run(
                    "INSERT INTO file_correlations (project_id, file_a, file_b, cochange_count)
                     VALUES (?1, ?2, ?3, 1)
                     ON CONFLICT(project_id, file_a, file_b)
                     DO UPDATE SET cochange_count = cochange_count + 1",
                    args![project_id, first.clone(), second.clone()],
                )
                .await?;
        }
    }
    Ok(())
}

async fn enqueue_commit_jobs(
    store: &Store,
    project_id: i64,
    project_path: &str,
    commit_hash: &str,
    paths: &[String],
) -> Result<()> {
    let parseable: Vec<&String> = paths
        .iter()
        .filter(|p| {
            Path::new(p)
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| PARSEABLE_EXTENSIONS.contains(&e))
        })
        .collect();

    let payload = serde_json::json!({
        "project_id": project_id,
        "project_path": project_path,
        "commit_hash": commit_hash,
        "files": paths,
    });

    // Symbols before diff analysis: the classifier reads symbol tables.
    if !parseable.is_empty() {
        enqueue(store, JobType::ReindexSymbols, payload.clone()).await?;
        enqueue(store, JobType::BuildCallGraph, payload.clone()).await?;
    }
    enqueue(store, JobType::AnalyzeDiffs, payload.clone()).await?;
    enqueue(store, JobType::RunTests, payload.clone()).await?;
    enqueue(store, JobType::DetectReverts, payload.clone()).await?;
    enqueue(store, JobType::RefreshOwnership, payload).await?;
    Ok(())
}
