// crates/muninn-server/src/context/overlay.rs
// Intelligence overlay: advisory lines appended after the formatted
// block. Strategy matches, stale tags, trajectory warnings, workflow
// prediction advisories, and per-task-type warnings.

use crate::args;
use crate::outcomes;
use crate::state::EngineState;
use crate::store::Store;
use anyhow::Result;

/// Prediction advisory threshold.
const PREDICTION_ADVISORY_MIN: f64 = 0.7;

/// Task-type warning: below this success share across >= 3 sessions.
const TASK_WARNING_RATE: f64 = 0.5;
const TASK_WARNING_MIN_SESSIONS: i64 = 3;

/// Trajectory signal contract; the detailed classifier is pluggable.
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectorySignal {
    pub pattern: String,
    pub confidence: f64,
    pub message: String,
    pub suggestion: Option<String>,
}

/// A recent tool call as seen by the trajectory classifier.
#[derive(Debug, Clone)]
pub struct ToolCallBrief {
    pub tool_name: String,
    pub success: bool,
}

/// External predicate over the recent call trajectory.
pub trait TrajectoryClassifier: Send + Sync {
    fn classify(&self, recent: &[ToolCallBrief]) -> Option<TrajectorySignal>;
}

/// Default heuristic: three or more consecutive calls to the same tool
/// with a majority failing looks stuck.
pub struct StuckLoopClassifier;

impl TrajectoryClassifier for StuckLoopClassifier {
    fn classify(&self, recent: &[ToolCallBrief]) -> Option<TrajectorySignal> {
        if recent.len() < 3 {
            return None;
        }
        let window = &recent[recent.len() - 3..];
        let tool = &window[0].tool_name;
        if !window.iter().all(|c| &c.tool_name == tool) {
            return None;
        }
        let failures = window.iter().filter(|c| !c.success).count();
        if failures < 2 {
            return None;
        }
        Some(TrajectorySignal {
            pattern: "stuck_loop".to_string(),
            confidence: 0.5 + 0.25 * (failures as f64 - 1.0),
            message: format!("{tool} has failed repeatedly in a row"),
            suggestion: Some("step back and re-read the error before retrying".to_string()),
        })
    }
}

/// Inputs the overlay consumes beyond the store.
pub struct OverlayInput<'a> {
    pub project_id: i64,
    pub query: &'a str,
    pub task_type: Option<&'a str>,
    pub included_ids: &'a [(String, i64)],
    pub recent_calls: Vec<ToolCallBrief>,
}

/// Compute advisory lines. Best-effort by contract: individual lookups
/// that fail simply contribute nothing.
pub async fn advisories(
    store: &Store,
    state: &EngineState,
    classifier: &dyn TrajectoryClassifier,
    input: &OverlayInput<'_>,
) -> Vec<String> {
    let mut lines = Vec::new();

    if let Ok(Some(line)) = matching_strategy(store, input.project_id, input.query).await {
        lines.push(line);
    }
    if let Ok(stale) = stale_tags(store, input.project_id, input.included_ids).await {
        lines.extend(stale);
    }
    if input.recent_calls.len() >= 3 {
        if let Some(signal) = classifier.classify(&input.recent_calls) {
            if signal.confidence > 0.5 {
                let mut line = format!("trajectory: {} ({})", signal.message, signal.pattern);
                if let Some(suggestion) = signal.suggestion {
                    line.push_str(&format!(" - {suggestion}"));
                }
                lines.push(line);
            }
        }
    }
    if let Some(line) = prediction_advisory(store, state, input).await {
        lines.push(line);
    }
    if let Some(task_type) = input.task_type {
        if let Ok(Some(line)) = task_type_warning(store, input.project_id, task_type).await {
            lines.push(line);
        }
    }

    lines
}

/// Strategy whose trigger pattern tokens appear in the query.
async fn matching_strategy(
    store: &Store,
    project_id: i64,
    query: &str,
) -> Result<Option<String>> {
    if query.is_empty() {
        return Ok(None);
    }
    let lower = query.to_lowercase();
    let rows = store
        .all(
            "SELECT name, trigger_pattern, steps FROM strategy_catalog
             WHERE project_id = ?1 ORDER BY success_rate DESC LIMIT 10",
            args![project_id],
        )
        .await?;
    for row in rows {
        let name: String = row.get(0)?;
        let trigger: Option<String> = row.get(1)?;
        let steps: Option<String> = row.get(2)?;
        let Some(trigger) = trigger else { continue };
        let hit = trigger
            .to_lowercase()
            .split(',')
            .any(|t| !t.trim().is_empty() && lower.contains(t.trim()));
        if hit {
            return Ok(Some(format!(
                "strategy: {name} has worked here before (steps: {})",
                steps.unwrap_or_default()
            )));
        }
    }
    Ok(None)
}

/// Stale tags on included decisions/learnings: knowledge untouched for
/// 90+ days gets flagged rather than dropped.
async fn stale_tags(
    store: &Store,
    project_id: i64,
    included: &[(String, i64)],
) -> Result<Vec<String>> {
    let mut tags = Vec::new();
    for (source_type, id) in included {
        let table = match source_type.as_str() {
            "decision" => "decisions",
            "learning" => "learnings",
            _ => continue,
        };
        let stale = store
            .get(
                &format!(
                    "SELECT title FROM {table}
                     WHERE id = ?1 AND project_id = ?2
                       AND updated_at < datetime('now', '-90 days')"
                ),
                args![*id, project_id],
            )
            .await?;
        if let Some(row) = stale {
            let title: String = row.get(0)?;
            tags.push(format!("stale: {source_type} \"{title}\" is over 90 days old"));
        }
    }
    Ok(tags)
}

/// Workflow prediction advisory at confidence > 0.7.
async fn prediction_advisory(
    store: &Store,
    state: &EngineState,
    input: &OverlayInput<'_>,
) -> Option<String> {
    let tools: Vec<String> = input
        .recent_calls
        .iter()
        .map(|c| c.tool_name.clone())
        .collect();
    let prediction = outcomes::predict_next_action(store, state, input.project_id, &tools)
        .await
        .ok()??;
    if prediction.confidence > PREDICTION_ADVISORY_MIN {
        Some(format!(
            "likely next: {} (confidence {:.2})",
            prediction.predicted_tool, prediction.confidence
        ))
    } else {
        None
    }
}

/// Warn when the current task type historically fails here.
async fn task_type_warning(
    store: &Store,
    project_id: i64,
    task_type: &str,
) -> Result<Option<String>> {
    let row = store
        .get(
            "SELECT COUNT(*), SUM(CASE WHEN success = 2 THEN 1 ELSE 0 END)
             FROM sessions
             WHERE project_id = ?1 AND task_type = ?2 AND ended_at IS NOT NULL",
            args![project_id, task_type],
        )
        .await?;
    let Some(row) = row else { return Ok(None) };
    let total: i64 = row.get(0)?;
    let wins: i64 = row.get::<Option<i64>>(1)?.unwrap_or(0);
    if total >= TASK_WARNING_MIN_SESSIONS && (wins as f64 / total as f64) < TASK_WARNING_RATE {
        return Ok(Some(format!(
            "warning: {task_type} tasks succeed only {wins}/{total} of the time in this project"
        )));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calls(spec: &[(&str, bool)]) -> Vec<ToolCallBrief> {
        spec.iter()
            .map(|(tool, success)| ToolCallBrief {
                tool_name: tool.to_string(),
                success: *success,
            })
            .collect()
    }

    #[test]
    fn test_stuck_loop_detected() {
        let signal = StuckLoopClassifier
            .classify(&calls(&[("Bash", false), ("Bash", false), ("Bash", true)]))
            .unwrap();
        assert_eq!(signal.pattern, "stuck_loop");
        assert!(signal.confidence > 0.5);
    }

    #[test]
    fn test_mixed_tools_not_stuck() {
        assert!(
            StuckLoopClassifier
                .classify(&calls(&[("Bash", false), ("Read", false), ("Bash", false)]))
                .is_none()
        );
    }

    #[test]
    fn test_mostly_succeeding_not_stuck() {
        assert!(
            StuckLoopClassifier
                .classify(&calls(&[("Bash", true), ("Bash", true), ("Bash", false)]))
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_task_type_warning_threshold() {
        let store = Store::open_in_memory().await.unwrap();
        let project_id = crate::db::get_or_create_project(&store, "/p", None).await.unwrap().id;
        for (i, success) in [0i64, 0, 2, 0].iter().enumerate() {
            store
                .run(
                    "INSERT INTO sessions
                        (project_id, session_number, ended_at, success, task_type)
                     VALUES (?1, ?2, CURRENT_TIMESTAMP, ?3, 'migration')",
                    args![project_id, (i + 1) as i64, *success],
                )
                .await
                .unwrap();
        }
        let warning = task_type_warning(&store, project_id, "migration").await.unwrap();
        assert!(warning.unwrap().contains("1/4"));

        // A mostly-successful task type stays quiet
        assert!(task_type_warning(&store, project_id, "refactor").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_strategy_match_on_query_tokens() {
        let store = Store::open_in_memory().await.unwrap();
        let project_id = crate::db::get_or_create_project(&store, "/p", None).await.unwrap().id;
        store
            .run(
                "INSERT INTO strategy_catalog (project_id, name, trigger_pattern, steps, success_rate)
                 VALUES (?1, 'sequence:Read,Grep,Edit', 'read,grep,edit', '[\"Read\",\"Grep\",\"Edit\"]', 1.0)",
                args![project_id],
            )
            .await
            .unwrap();

        let hit = matching_strategy(&store, project_id, "let me grep the codebase").await.unwrap();
        assert!(hit.unwrap().contains("sequence:Read,Grep,Edit"));

        let miss = matching_strategy(&store, project_id, "deploy to prod").await.unwrap();
        assert!(miss.is_none());
    }
}
