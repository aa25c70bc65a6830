// crates/muninn-server/src/worker.rs
// Worker-side wiring: registers every known job type on a dispatcher and
// drains the queue in "once" mode. The worker is the only writer of
// derived tables; the tool-handler process writes primary events.

use crate::indexer;
use crate::outcomes;
use crate::queue::{Dispatcher, Handler, JobContext, JobType};
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;

/// Payload fields shared by most jobs.
fn project_id(payload: &serde_json::Value) -> Result<i64> {
    payload
        .get("project_id")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| anyhow::anyhow!("payload missing project_id"))
}

fn session_id(payload: &serde_json::Value) -> Option<i64> {
    payload.get("session_id").and_then(|v| v.as_i64())
}

fn project_path(payload: &serde_json::Value) -> Result<PathBuf> {
    payload
        .get("project_path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .ok_or_else(|| anyhow::anyhow!("payload missing project_path"))
}

fn files(payload: &serde_json::Value) -> Vec<String> {
    payload
        .get("files")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|f| f.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

macro_rules! handler {
    (|$ctx:ident, $payload:ident| $body:expr) => {
        Box::new(move |$ctx: Arc<JobContext>, $payload: serde_json::Value| {
            Box::pin(async move { $body }) as futures::future::BoxFuture<'static, Result<()>>
        }) as Handler
    };
}

/// Register the closed handler set. Job types outside this set fail at
/// dispatch; analyses that need newer schema declare their floor here.
pub fn register_default_handlers(dispatcher: &mut Dispatcher) {
    dispatcher.register(
        JobType::ReindexSymbols,
        handler!(|ctx, payload| {
            let pid = project_id(&payload)?;
            let root = project_path(&payload)?;
            let list = files(&payload);
            indexer::parse_and_persist(&ctx.store, pid, &root, &list).await?;
            indexer::map_tests_to_sources(&ctx.store, pid, &list).await?;
            Ok(())
        }),
    );

    dispatcher.register(
        JobType::BuildCallGraph,
        handler!(|ctx, payload| {
            let pid = project_id(&payload)?;
            let root = project_path(&payload)?;
            let list = files(&payload);
            indexer::build_call_graph(&ctx.store, pid, &root, &list).await?;
            indexer::refresh_blast_radius(&ctx.store, pid, &list).await?;
            Ok(())
        }),
    );

    dispatcher.register(
        JobType::AnalyzeDiffs,
        handler!(|ctx, payload| {
            outcomes::analyze_pending_commits(&ctx.store, project_id(&payload)?).await?;
            Ok(())
        }),
    );

    dispatcher.register(
        JobType::RunTests,
        handler!(|ctx, payload| {
            let pid = project_id(&payload)?;
            let root = project_path(&payload)?;
            outcomes::run_tests_after_commit(&ctx.store, pid, &root, session_id(&payload)).await?;
            Ok(())
        }),
    );

    dispatcher.register(
        JobType::DetectReverts,
        handler!(|ctx, payload| {
            outcomes::detect_reverts(&ctx.store, project_id(&payload)?).await?;
            Ok(())
        }),
    );

    dispatcher.register(
        JobType::RefreshOwnership,
        handler!(|ctx, payload| {
            outcomes::refresh_ownership(&ctx.store, project_id(&payload)?).await?;
            Ok(())
        }),
    );

    dispatcher.register(
        JobType::MapErrorFixes,
        handler!(|ctx, payload| {
            let Some(sid) = session_id(&payload) else {
                return Ok(());
            };
            outcomes::process_session_errors(&ctx.store, sid).await?;
            Ok(())
        }),
    );

    dispatcher.register(
        JobType::DetectPatterns,
        handler!(|ctx, payload| {
            outcomes::detect_patterns(&ctx.store, project_id(&payload)?).await?;
            Ok(())
        }),
    );

    dispatcher.register(
        JobType::TrackDecisionOutcomes,
        handler!(|ctx, payload| {
            outcomes::track_decision_outcomes(&ctx.store, project_id(&payload)?).await?;
            Ok(())
        }),
    );

    dispatcher.register(
        JobType::CalibrateConfidence,
        handler!(|ctx, payload| {
            outcomes::calibrate_confidence(&ctx.store, project_id(&payload)?).await?;
            Ok(())
        }),
    );

    dispatcher.register(
        JobType::ProcessContextFeedback,
        handler!(|ctx, payload| {
            outcomes::process_context_feedback(&ctx.store, project_id(&payload)?).await?;
            Ok(())
        }),
    );

    dispatcher.register(
        JobType::ReinforceLearnings,
        handler!(|ctx, payload| {
            let pid = project_id(&payload)?;
            if let Some(sid) = session_id(&payload) {
                outcomes::reinforce_session_learnings(&ctx.store, sid).await?;
            }
            outcomes::decay_stale_learnings(&ctx.store, pid).await?;
            Ok(())
        }),
    );

    dispatcher.register(
        JobType::DistillStrategies,
        handler!(|ctx, payload| {
            outcomes::distill_strategies(&ctx.store, project_id(&payload)?).await?;
            outcomes::aggregate_cross_project(&ctx.store).await?;
            Ok(())
        }),
    );

    dispatcher.register(
        JobType::BuildWorkflowModel,
        handler!(|ctx, payload| {
            outcomes::build_workflow_model(&ctx.store, project_id(&payload)?).await?;
            Ok(())
        }),
    );

    dispatcher.register(
        JobType::RegenerateDna,
        handler!(|ctx, payload| {
            outcomes::regenerate_dna(&ctx.store, project_id(&payload)?).await?;
            Ok(())
        }),
    );

    dispatcher.register(
        JobType::ComputeRiskAlerts,
        handler!(|ctx, payload| {
            outcomes::compute_risk_alerts(&ctx.store, project_id(&payload)?).await?;
            Ok(())
        }),
    );

    // Profile writes need the (project_id, key) unique index from v2
    dispatcher.register_with_min_schema(
        JobType::RefreshValueMetrics,
        2,
        handler!(|ctx, payload| {
            outcomes::process_context_feedback(&ctx.store, project_id(&payload)?).await?;
            Ok(())
        }),
    );
}

/// Build a fully-wired dispatcher.
pub fn build_dispatcher(ctx: Arc<JobContext>) -> Dispatcher {
    let mut dispatcher = Dispatcher::new(ctx);
    register_default_handlers(&mut dispatcher);
    dispatcher
}

/// "Once" worker mode: drain pending jobs and return the count.
pub async fn run_once(ctx: Arc<JobContext>) -> Result<usize> {
    let dispatcher = build_dispatcher(ctx);
    dispatcher.drain().await
}
