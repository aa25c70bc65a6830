// crates/muninn-server/src/query/mod.rs
// Read-only query surface: search, per-file checks, file/symbol
// suggestion, prediction bundles, tool enrichment, and the pull-only
// resources. Everything here recomputes on read.

use crate::args;
use crate::context::{self, ContextRequest, Format, Strategy};
use crate::db::from_json_array;
use crate::embedder::EmbedderClient;
use crate::outcomes;
use crate::state::EngineState;
use crate::store::Store;
use anyhow::Result;

/// Fragility at or above this yields a check warning.
const FRAGILE_WARNING_AT: f64 = 7.0;

/// Search modes accepted by `query`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryMode {
    #[default]
    Auto,
    Fts,
    Vector,
    Smart,
}

impl QueryMode {
    pub fn parse(s: &str) -> QueryMode {
        match s {
            "fts" => QueryMode::Fts,
            "vector" => QueryMode::Vector,
            "smart" => QueryMode::Smart,
            _ => QueryMode::Auto,
        }
    }
}

/// A ranked memory snippet.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Snippet {
    pub source_type: String,
    pub id: i64,
    pub title: String,
    pub content: String,
    pub similarity: f64,
}

/// `query(text, mode)` - ranked memory snippets.
pub async fn query(
    store: &Store,
    embedder: Option<&EmbedderClient>,
    project_id: i64,
    text: &str,
    mode: QueryMode,
    limit: usize,
) -> Result<Vec<Snippet>> {
    let embedding = match mode {
        QueryMode::Fts => None,
        _ => match embedder {
            Some(client) => client.embed(text).await,
            None => None,
        },
    };
    if mode == QueryMode::Vector && embedding.is_none() {
        return Ok(Vec::new());
    }

    let candidates =
        context::retrieve(store, project_id, text, embedding.as_deref(), limit.max(10)).await?;
    Ok(candidates
        .into_iter()
        .take(limit)
        .map(|c| Snippet {
            source_type: c.source_type.to_string(),
            id: c.id,
            title: c.title,
            content: c.content,
            similarity: c.similarity,
        })
        .collect())
}

/// A per-file warning from `check`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FileWarning {
    pub path: String,
    pub severity: String,
    pub message: String,
}

/// `check(files)` - warnings for fragile files, open critical issues,
/// stale knowledge, and superseded decisions touching the files.
pub async fn check(store: &Store, project_id: i64, files: &[String]) -> Result<Vec<FileWarning>> {
    let mut warnings = Vec::new();

    for path in files {
        if let Some(file) = crate::db::get_file(store, project_id, path).await? {
            if file.fragility >= FRAGILE_WARNING_AT {
                warnings.push(FileWarning {
                    path: path.clone(),
                    severity: "high".to_string(),
                    message: match &file.fragility_reason {
                        Some(reason) => format!("fragility {:.0}/10: {reason}", file.fragility),
                        None => format!("fragility {:.0}/10", file.fragility),
                    },
                });
            }
        }

        let issues = store
            .all(
                "SELECT title, severity FROM issues
                 WHERE project_id = ?1 AND status = 'open' AND severity >= 8
                   AND affected_files LIKE ?2",
                args![project_id, format!("%{path}%")],
            )
            .await?;
        for issue in issues {
            warnings.push(FileWarning {
                path: path.clone(),
                severity: "critical".to_string(),
                message: format!("open critical issue: {}", issue.get::<String>(0)?),
            });
        }

        let superseded = store
            .all(
                "SELECT title FROM decisions
                 WHERE project_id = ?1 AND status = 'superseded' AND affects LIKE ?2",
                args![project_id, format!("%{path}%")],
            )
            .await?;
        for decision in superseded {
            warnings.push(FileWarning {
                path: path.clone(),
                severity: "info".to_string(),
                message: format!(
                    "decision \"{}\" affecting this file was superseded",
                    decision.get::<String>(0)?
                ),
            });
        }

        let stale = store
            .get(
                "SELECT 1 FROM files
                 WHERE project_id = ?1 AND path = ?2 AND archived_at IS NULL
                   AND COALESCE(last_referenced_at, updated_at) < datetime('now', '-90 days')",
                args![project_id, path.clone()],
            )
            .await?;
        if stale.is_some() {
            warnings.push(FileWarning {
                path: path.clone(),
                severity: "info".to_string(),
                message: "knowledge about this file is over 90 days old".to_string(),
            });
        }
    }

    Ok(warnings)
}

/// A suggested file or symbol for a task.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Suggestion {
    pub kind: String, // "file" | "symbol"
    pub path: String,
    pub name: Option<String>,
    pub score: f64,
}

/// `suggest(task, limit, include_symbols)` - files and symbols ranked by
/// hybrid similarity to the task text.
pub async fn suggest(
    store: &Store,
    embedder: Option<&EmbedderClient>,
    project_id: i64,
    task: &str,
    limit: usize,
    include_symbols: bool,
) -> Result<Vec<Suggestion>> {
    let mut suggestions = Vec::new();

    let embedding = match embedder {
        Some(client) => client.embed(task).await,
        None => None,
    };
    let candidates =
        context::retrieve(store, project_id, task, embedding.as_deref(), limit * 2).await?;
    for candidate in candidates.iter().filter(|c| c.source_type == "file") {
        suggestions.push(Suggestion {
            kind: "file".to_string(),
            path: candidate.title.clone(),
            name: None,
            score: candidate.similarity,
        });
    }

    if include_symbols {
        let match_expr = context::fts_query(task);
        if !match_expr.is_empty() {
            // Symbol names have no FTS mirror; LIKE over extracted names
            for token in task.split_whitespace().filter(|t| t.len() >= 3).take(5) {
                let rows = store
                    .all(
                        "SELECT s.name, f.path FROM symbols s
                         JOIN files f ON f.id = s.file_id
                         WHERE f.project_id = ?1 AND s.name LIKE ?2
                         LIMIT 10",
                        args![project_id, format!("%{token}%")],
                    )
                    .await?;
                for row in rows {
                    suggestions.push(Suggestion {
                        kind: "symbol".to_string(),
                        path: row.get(1)?,
                        name: Some(row.get(0)?),
                        score: 0.5,
                    });
                }
            }
        }
    }

    suggestions.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    suggestions.dedup_by(|a, b| a.kind == b.kind && a.path == b.path && a.name == b.name);
    suggestions.truncate(limit);
    Ok(suggestions)
}

/// The `predict` bundle.
#[derive(Debug, Default, serde::Serialize)]
pub struct PredictBundle {
    pub related_files: Vec<String>,
    pub cochangers: Vec<(String, i64)>,
    pub decisions: Vec<String>,
    pub issues: Vec<String>,
    pub learnings: Vec<String>,
    pub tests: Vec<String>,
    pub workflow: Option<String>,
}

/// `predict(task?, files?)` - everything the engine can anticipate about
/// the upcoming work.
pub async fn predict(
    store: &Store,
    embedder: Option<&EmbedderClient>,
    state: &EngineState,
    project_id: i64,
    task: Option<&str>,
    files: &[String],
) -> Result<PredictBundle> {
    let mut bundle = PredictBundle::default();

    for path in files {
        let rows = store
            .all(
                "SELECT file_a, file_b, cochange_count FROM file_correlations
                 WHERE project_id = ?1 AND (file_a = ?2 OR file_b = ?2)
                 ORDER BY cochange_count DESC LIMIT 5",
                args![project_id, path.clone()],
            )
            .await?;
        for row in rows {
            let a: String = row.get(0)?;
            let b: String = row.get(1)?;
            let count: i64 = row.get(2)?;
            let other = if &a == path { b } else { a };
            bundle.cochangers.push((other, count));
        }

        let tests = store
            .all(
                "SELECT f2.path FROM relationships r
                 JOIN files f1 ON f1.id = r.target_id
                 JOIN files f2 ON f2.id = r.source_id
                 WHERE r.project_id = ?1 AND r.relationship = 'tests' AND f1.path = ?2",
                args![project_id, path.clone()],
            )
            .await?;
        for row in tests {
            bundle.tests.push(row.get(0)?);
        }
    }

    if let Some(task) = task {
        let embedding = match embedder {
            Some(client) => client.embed(task).await,
            None => None,
        };
        let candidates =
            context::retrieve(store, project_id, task, embedding.as_deref(), 30).await?;
        for candidate in candidates {
            match candidate.source_type {
                "decision" => bundle.decisions.push(candidate.title),
                "issue" => bundle.issues.push(candidate.title),
                "learning" => bundle.learnings.push(candidate.title),
                "file" => bundle.related_files.push(candidate.title),
                _ => {}
            }
        }
    }

    let recent: Vec<String> = store
        .all(
            "SELECT tool_name FROM tool_calls WHERE project_id = ?1 ORDER BY id DESC LIMIT 3",
            args![project_id],
        )
        .await?
        .iter()
        .rev()
        .map(|row| row.get::<String>(0))
        .collect::<Result<_, _>>()?;
    if let Some(prediction) =
        outcomes::predict_next_action(store, state, project_id, &recent).await?
    {
        bundle.workflow = Some(format!(
            "{} ({:.2})",
            prediction.predicted_tool, prediction.confidence
        ));
    }

    Ok(bundle)
}

/// `enrich(tool, input_json)` - contextual fragments for a specific
/// upcoming tool invocation.
pub async fn enrich(
    store: &Store,
    project_id: i64,
    tool: &str,
    input_json: &str,
) -> Result<Vec<String>> {
    let input: serde_json::Value = serde_json::from_str(input_json).unwrap_or_default();
    let files = crate::ingest::extract_file_paths(&input);
    let mut fragments = Vec::new();

    for warning in check(store, project_id, &files).await? {
        fragments.push(format!("[{}] {}: {}", warning.severity, warning.path, warning.message));
    }

    // Known fixes for errors this tool has produced before
    if tool == "Bash" {
        let rows = store
            .all(
                "SELECT error_signature FROM error_events
                 WHERE project_id = ?1 ORDER BY id DESC LIMIT 3",
                args![project_id],
            )
            .await?;
        for row in rows {
            let signature: String = row.get(0)?;
            if let Some(fix) = outcomes::lookup_fix(store, project_id, &signature).await? {
                fragments.push(format!(
                    "known fix ({:.0}% confident): {}",
                    fix.confidence * 100.0,
                    fix.fix_description
                ));
            }
        }
    }

    for path in &files {
        let rows = store
            .all(
                "SELECT impacted_count FROM blast_summary
                 WHERE project_id = ?1 AND file_path = ?2 AND impacted_count >= 3",
                args![project_id, path.clone()],
            )
            .await?;
        for row in rows {
            fragments.push(format!(
                "blast radius: {} files depend on {path}",
                row.get::<i64>(0)?
            ));
        }
    }

    Ok(fragments)
}

// ---------------------------------------------------------------------------
// Pull-only resources, recomputed on read
// ---------------------------------------------------------------------------

/// `muninn://context/current` - the standing context block.
pub async fn resource_context_current(
    store: &Store,
    embedder: Option<&EmbedderClient>,
    state: &EngineState,
    project_id: i64,
) -> Result<String> {
    let request = ContextRequest {
        query: Some("current project state".to_string()),
        format: Format::Markdown,
        max_tokens: Some(800),
        strategy: Strategy::Balanced,
        app: "muninn".to_string(),
        ..Default::default()
    };
    let assembled = context::build_context(
        store,
        embedder,
        state,
        &context::StuckLoopClassifier,
        project_id,
        None,
        &request,
    )
    .await?;
    Ok(assembled.block)
}

/// `muninn://context/errors` - recent errors with any known fixes.
pub async fn resource_context_errors(store: &Store, project_id: i64) -> Result<String> {
    let rows = store
        .all(
            "SELECT error_type, error_signature, created_at FROM error_events
             WHERE project_id = ?1 ORDER BY id DESC LIMIT 10",
            args![project_id],
        )
        .await?;
    if rows.is_empty() {
        return Ok("no recent errors".to_string());
    }
    let mut lines = Vec::new();
    for row in rows {
        let error_type: String = row.get(0)?;
        let signature: String = row.get(1)?;
        let mut line = format!("[{error_type}] {signature}");
        if let Some(fix) = outcomes::lookup_fix(store, project_id, &signature).await? {
            line.push_str(&format!(" -> fix: {}", fix.fix_description));
        }
        lines.push(line);
    }
    Ok(lines.join("\n"))
}

/// `muninn://warnings/active` - undismissed risk alerts.
pub async fn resource_warnings_active(store: &Store, project_id: i64) -> Result<String> {
    let rows = store
        .all(
            "SELECT severity, title, details FROM risk_alerts
             WHERE project_id = ?1 AND dismissed = 0
             ORDER BY CASE severity WHEN 'critical' THEN 0 WHEN 'warning' THEN 1 ELSE 2 END",
            args![project_id],
        )
        .await?;
    if rows.is_empty() {
        return Ok("no active warnings".to_string());
    }
    let mut lines = Vec::new();
    for row in rows {
        lines.push(format!(
            "[{}] {} - {}",
            row.get::<String>(0)?,
            row.get::<String>(1)?,
            row.get::<Option<String>>(2)?.unwrap_or_default()
        ));
    }
    Ok(lines.join("\n"))
}

/// `muninn://context/shared` - active multi-agent intents.
pub async fn resource_context_shared(store: &Store, project_id: i64) -> Result<String> {
    let intents = context::query_intents(store, project_id, None).await?;
    if intents.is_empty() {
        return Ok("no active agent intents".to_string());
    }
    Ok(intents
        .iter()
        .map(|intent| {
            format!(
                "{} intends {} on {}",
                intent.agent_id,
                intent.intent_type,
                intent.target_files.join(", ")
            )
        })
        .collect::<Vec<_>>()
        .join("\n"))
}

/// `muninn://briefing` - health, recent sessions, and open work.
pub async fn resource_briefing(store: &Store, project_id: i64) -> Result<String> {
    let health = outcomes::health_score(store, project_id).await?;
    let mut lines = vec![format!("health: {}/100", health.overall)];

    let sessions = store
        .all(
            "SELECT session_number, outcome, success FROM sessions
             WHERE project_id = ?1 AND ended_at IS NOT NULL
             ORDER BY id DESC LIMIT 3",
            args![project_id],
        )
        .await?;
    for row in sessions {
        lines.push(format!(
            "session #{}: {} (success {})",
            row.get::<i64>(0)?,
            row.get::<Option<String>>(1)?.unwrap_or_default(),
            row.get::<Option<i64>>(2)?.unwrap_or(1)
        ));
    }

    let open_issues: i64 = store
        .get(
            "SELECT COUNT(*) FROM issues WHERE project_id = ?1 AND status = 'open'",
            args![project_id],
        )
        .await?
        .map(|r| r.get(0))
        .transpose()?
        .unwrap_or(0);
    lines.push(format!("open issues: {open_issues}"));

    let pending: i64 = crate::queue::pending_count(store).await?;
    lines.push(format!("queued analyses: {pending}"));

    Ok(lines.join("\n"))
}

/// Convenience used by `check`-style warnings on decisions referencing
/// moved files: parse affects arrays without failing.
pub fn affects_overlap(affects: Option<&str>, files: &[String]) -> bool {
    from_json_array(affects).iter().any(|f| files.contains(f))
}
