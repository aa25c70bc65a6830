// crates/muninn-server/src/session/mod.rs
// Session lifecycle: lazy auto-start around tool activity, auto-end on
// shutdown with outcome inference, and the fixed end-of-session job
// fan-out. autoEndSession never propagates an error.

use crate::args;
use crate::db::{SessionInfo, close_session, count_sessions, current_session, open_session};
use crate::queue::{JobType, enqueue};
use crate::state::EngineState;
use crate::store::Store;
use anyhow::Result;

/// Goal recorded for lazily-opened sessions.
const AUTO_GOAL: &str = "Auto-started session";

/// Tool names listed in the outcome summary.
const SUMMARY_TOP_TOOLS: usize = 10;

/// Ensure a session exists for the project (first tool call of a period
/// of activity opens one).
pub async fn auto_start_session(store: &Store, project_id: i64) -> Result<SessionInfo> {
    open_session(store, project_id, AUTO_GOAL).await
}

/// Observable signals feeding outcome inference.
#[derive(Debug, Default, Clone)]
pub struct SessionSignals {
    pub commits: i64,
    pub tests_passed: bool,
    pub tests_failed: bool,
    pub error_events: i64,
    pub tool_calls: i64,
}

/// Infer success in {0, 1, 2} from observable signals: commits and green
/// tests win, red tests or an error-heavy session loses, anything else
/// is partial.
pub fn infer_outcome(signals: &SessionSignals) -> i64 {
    if signals.tests_failed {
        return 0;
    }
    if signals.tool_calls > 0 && signals.error_events * 2 > signals.tool_calls {
        return 0;
    }
    if signals.commits > 0 && (signals.tests_passed || signals.error_events == 0) {
        return 2;
    }
    1
}

/// Close the open session (if any): summarize tool usage, infer the
/// outcome, enqueue the end-of-session analyses, and opportunistically
/// spawn a worker. Never returns an error to the caller.
pub async fn auto_end_session(store: &Store, state: &EngineState, project_id: i64) {
    if let Err(e) = try_end_session(store, state, project_id).await {
        tracing::warn!("session end failed (continuing): {}", e);
    }
}

async fn try_end_session(store: &Store, state: &EngineState, project_id: i64) -> Result<()> {
    let Some(session) = current_session(store, project_id).await? else {
        return Ok(());
    };

    let outcome = summarize_tools(store, session.id).await?;
    let signals = collect_signals(store, project_id, session.id).await?;
    let success = infer_outcome(&signals);

    close_session(store, session.id, &outcome, success).await?;

    enqueue_session_jobs(store, project_id, session.id).await?;

    if state.try_claim_worker_spawn() {
        spawn_worker();
    }
    Ok(())
}

/// Fixed end-of-session job order, plus the every-Nth-session jobs.
/// The dispatcher gives no cross-job ordering guarantees beyond this
/// enqueue order and data dependencies.
async fn enqueue_session_jobs(store: &Store, project_id: i64, session_id: i64) -> Result<()> {
    let payload = serde_json::json!({
        "project_id": project_id,
        "session_id": session_id,
    });

    for job_type in [
        JobType::MapErrorFixes,
        JobType::DetectPatterns,
        JobType::TrackDecisionOutcomes,
        JobType::CalibrateConfidence,
        JobType::ProcessContextFeedback,
        JobType::ReinforceLearnings,
    ] {
        enqueue(store, job_type, payload.clone()).await?;
    }

    let total = count_sessions(store, project_id).await?;
    if total % 5 == 0 {
        enqueue(store, JobType::DistillStrategies, payload.clone()).await?;
    }
    if total % 10 == 0 {
        enqueue(store, JobType::BuildWorkflowModel, payload.clone()).await?;
    }
    if total % 20 == 0 {
        enqueue(store, JobType::RegenerateDna, payload.clone()).await?;
    }

    enqueue(store, JobType::ComputeRiskAlerts, payload.clone()).await?;
    enqueue(store, JobType::RefreshValueMetrics, payload).await?;
    Ok(())
}

/// Top-10 tool usage summary for the session outcome text.
async fn summarize_tools(store: &Store, session_id: i64) -> Result<String> {
    let rows = store
        .all(
            "SELECT tool_name, COUNT(*) as n FROM tool_calls
             WHERE session_id = ?1 GROUP BY tool_name ORDER BY n DESC LIMIT ?2",
            args![session_id, SUMMARY_TOP_TOOLS],
        )
        .await?;
    if rows.is_empty() {
        return Ok("no tool activity".to_string());
    }
    let parts: Vec<String> = rows
        .iter()
        .map(|row| {
            Ok::<_, anyhow::Error>(format!(
                "{} x{}",
                row.get::<String>(0)?,
                row.get::<i64>(1)?
            ))
        })
        .collect::<Result<_>>()?;
    Ok(parts.join(", "))
}

async fn collect_signals(
    store: &Store,
    project_id: i64,
    session_id: i64,
) -> Result<SessionSignals> {
    let commits: i64 = store
        .get(
            "SELECT COUNT(*) FROM git_commits WHERE session_id = ?1",
            args![session_id],
        )
        .await?
        .map(|r| r.get(0))
        .transpose()?
        .unwrap_or(0);

    let test_status: Option<String> = store
        .get(
            "SELECT status FROM test_results
             WHERE project_id = ?1 AND (session_id = ?2 OR session_id IS NULL)
             ORDER BY id DESC LIMIT 1",
            args![project_id, session_id],
        )
        .await?
        .and_then(|r| r.get(0).ok());

    let error_events: i64 = store
        .get(
            "SELECT COUNT(*) FROM error_events WHERE session_id = ?1",
            args![session_id],
        )
        .await?
        .map(|r| r.get(0))
        .transpose()?
        .unwrap_or(0);

    let tool_calls: i64 = store
        .get(
            "SELECT COUNT(*) FROM tool_calls WHERE session_id = ?1",
            args![session_id],
        )
        .await?
        .map(|r| r.get(0))
        .transpose()?
        .unwrap_or(0);

    Ok(SessionSignals {
        commits,
        tests_passed: test_status.as_deref() == Some("passed"),
        tests_failed: test_status.as_deref() == Some("failed"),
        error_events,
        tool_calls,
    })
}

/// Spawn a detached worker process draining the queue once.
fn spawn_worker() {
    let Ok(exe) = std::env::current_exe() else {
        tracing::debug!("worker spawn skipped: current_exe unavailable");
        return;
    };
    match std::process::Command::new(exe)
        .args(["worker", "--once"])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
    {
        Ok(child) => tracing::debug!(pid = child.id(), "worker spawned"),
        Err(e) => tracing::debug!("worker spawn failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_inference() {
        // Commits with green tests: success
        assert_eq!(
            infer_outcome(&SessionSignals {
                commits: 2,
                tests_passed: true,
                tool_calls: 20,
                ..Default::default()
            }),
            2
        );
        // Red tests: failure
        assert_eq!(
            infer_outcome(&SessionSignals {
                commits: 2,
                tests_failed: true,
                tool_calls: 20,
                ..Default::default()
            }),
            0
        );
        // Error-dominated session: failure
        assert_eq!(
            infer_outcome(&SessionSignals {
                tool_calls: 10,
                error_events: 6,
                ..Default::default()
            }),
            0
        );
        // Activity without commits: partial
        assert_eq!(
            infer_outcome(&SessionSignals {
                tool_calls: 10,
                ..Default::default()
            }),
            1
        );
    }

    #[tokio::test]
    async fn test_auto_start_is_lazy_and_single() {
        let store = Store::open_in_memory().await.unwrap();
        let project_id = crate::db::get_or_create_project(&store, "/p", None).await.unwrap().id;

        let first = auto_start_session(&store, project_id).await.unwrap();
        let second = auto_start_session(&store, project_id).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.goal.as_deref(), Some(AUTO_GOAL));
    }

    #[tokio::test]
    async fn test_end_enqueues_fixed_job_set() {
        let store = Store::open_in_memory().await.unwrap();
        let state = EngineState::new();
        let project_id = crate::db::get_or_create_project(&store, "/p", None).await.unwrap().id;
        auto_start_session(&store, project_id).await.unwrap();

        // Claim the spawn slot first so the test never forks a process
        assert!(state.try_claim_worker_spawn());
        auto_end_session(&store, &state, project_id).await;

        let types: Vec<String> = store
            .all("SELECT job_type FROM work_queue ORDER BY id", args![])
            .await
            .unwrap()
            .iter()
            .map(|r| r.get::<String>(0).unwrap())
            .collect();
        assert_eq!(
            types,
            vec![
                "map_error_fixes",
                "detect_patterns",
                "track_decision_outcomes",
                "calibrate_confidence",
                "process_context_feedback",
                "reinforce_learnings",
                "compute_risk_alerts",
                "refresh_value_metrics",
            ]
        );

        let session = store
            .get("SELECT ended_at, success FROM sessions", args![])
            .await
            .unwrap()
            .unwrap();
        assert!(session.get::<Option<String>>(0).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_every_fifth_session_distills() {
        let store = Store::open_in_memory().await.unwrap();
        let state = EngineState::new();
        let project_id = crate::db::get_or_create_project(&store, "/p", None).await.unwrap().id;
        assert!(state.try_claim_worker_spawn());

        for _ in 0..5 {
            auto_start_session(&store, project_id).await.unwrap();
            auto_end_session(&store, &state, project_id).await;
        }

        let distills: i64 = store
            .get(
                "SELECT COUNT(*) FROM work_queue WHERE job_type = 'distill_strategies'",
                args![],
            )
            .await
            .unwrap()
            .unwrap()
            .get(0)
            .unwrap();
        assert_eq!(distills, 1, "only the 5th session distills");
    }

    #[tokio::test]
    async fn test_end_without_open_session_is_noop() {
        let store = Store::open_in_memory().await.unwrap();
        let state = EngineState::new();
        let project_id = crate::db::get_or_create_project(&store, "/p", None).await.unwrap().id;
        assert!(state.try_claim_worker_spawn());

        auto_end_session(&store, &state, project_id).await;
        let jobs: i64 = store
            .get("SELECT COUNT(*) FROM work_queue", args![])
            .await
            .unwrap()
            .unwrap()
            .get(0)
            .unwrap();
        assert_eq!(jobs, 0);
    }
}
