// crates/muninn-server/src/context/mod.rs
// Context assembly: retrieve -> filter -> score -> pack -> format -> log,
// with the intelligence overlay appended as advisory lines. Retrieval
// falls back to FTS whenever no embedding is available; no caller ever
// waits on the embedder beyond its own timeout.

mod format;
mod intents;
mod overlay;
mod packing;
mod retrieval;
mod scoring;

pub use format::{Format, NativeRecord, native_escape, parse_native};
pub use intents::{AgentIntent, declare_intent, query_intents, release_intent};
pub use overlay::{
    OverlayInput, StuckLoopClassifier, ToolCallBrief, TrajectoryClassifier, TrajectorySignal,
};
pub use retrieval::{Candidate, fts_query, pool_size, retrieve, store_embedding};
pub use scoring::{Scored, Strategy, Weights, recency, score};

use crate::args;
use crate::embedder::EmbedderClient;
use crate::state::EngineState;
use crate::store::Store;
use anyhow::Result;
use sha2::{Digest, Sha256};

/// Caller intents for a context request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Intent {
    Edit,
    #[default]
    Read,
    Debug,
    Explore,
    Plan,
}

impl Intent {
    pub fn parse(s: &str) -> Intent {
        match s {
            "edit" => Intent::Edit,
            "debug" => Intent::Debug,
            "explore" => Intent::Explore,
            "plan" => Intent::Plan,
            _ => Intent::Read,
        }
    }
}

/// A context request.
#[derive(Debug, Clone, Default)]
pub struct ContextRequest {
    pub intent: Intent,
    pub files: Vec<String>,
    pub query: Option<String>,
    pub task: Option<String>,
    pub task_type: Option<String>,
    pub format: Format,
    pub max_tokens: Option<usize>,
    pub strategy: Strategy,
    pub app: String,
    pub scope: Option<String>,
}

/// An assembled context block.
#[derive(Debug)]
pub struct AssembledContext {
    pub block: String,
    pub advisories: Vec<String>,
    pub token_count: usize,
    pub total_candidates: usize,
    pub included: Vec<(String, i64)>,
}

/// Build a context block for injection into an LLM prompt.
pub async fn build_context(
    store: &Store,
    embedder: Option<&EmbedderClient>,
    state: &EngineState,
    classifier: &dyn TrajectoryClassifier,
    project_id: i64,
    session_id: Option<i64>,
    request: &ContextRequest,
) -> Result<AssembledContext> {
    let started = std::time::Instant::now();
    let max_tokens = request.max_tokens.unwrap_or(request.format.default_budget());

    // The prompt string drives both embedding and FTS
    let prompt = request
        .query
        .clone()
        .or_else(|| request.task.clone())
        .unwrap_or_else(|| request.files.join(" "));

    let embedding = match embedder {
        Some(client) => client.embed(&prompt).await,
        None => None,
    };

    let pool = pool_size(max_tokens);
    let candidates = retrieve(
        store,
        project_id,
        &prompt,
        embedding.as_deref(),
        pool,
    )
    .await?;
    let total_candidates = candidates.len();

    let scored = score(candidates, request.strategy);
    let packed = packing::pack(scored, max_tokens, request.format);

    let block = format::render(
        request.format,
        &request.app,
        request.scope.as_deref(),
        packed.token_count,
        &packed.included,
    );

    let included: Vec<(String, i64)> = packed
        .included
        .iter()
        .map(|s| (s.candidate.source_type.to_string(), s.candidate.id))
        .collect();

    // Overlay: advisory lines from derived intelligence
    let recent_calls = recent_tool_calls(store, project_id).await.unwrap_or_default();
    let advisories = overlay::advisories(
        store,
        state,
        classifier,
        &OverlayInput {
            project_id,
            query: &prompt,
            task_type: request.task_type.as_deref(),
            included_ids: &included,
            recent_calls,
        },
    )
    .await;

    // Logging is fire-and-forget: a failed log never fails the request.
    // Raw prompts are never stored, only their hash.
    let latency_ms = started.elapsed().as_millis() as i64;
    log_assembly(
        store,
        project_id,
        session_id,
        &request.app,
        &prompt,
        &included,
        total_candidates,
        packed.token_count,
        latency_ms,
    )
    .await;

    Ok(AssembledContext {
        block,
        advisories,
        token_count: packed.token_count,
        total_candidates,
        included,
    })
}

/// Record an explicit relevance signal for a prior injection.
pub async fn record_relevance(
    store: &Store,
    session_id: i64,
    source_type: &str,
    source_id: i64,
    signal: &str,
) -> Result<usize> {
    let result = store
        .run(
            "UPDATE context_injections SET relevance_signal = ?4
             WHERE session_id = ?1 AND source_type = ?2 AND source_id = ?3",
            args![session_id, source_type, source_id, signal],
        )
        .await?;
    Ok(result.changes)
}

async fn recent_tool_calls(store: &Store, project_id: i64) -> Result<Vec<ToolCallBrief>> {
    let rows = store
        .all(
            "SELECT tool_name, success FROM tool_calls
             WHERE project_id = ?1 ORDER BY id DESC LIMIT 5",
            args![project_id],
        )
        .await?;
    let mut calls: Vec<ToolCallBrief> = rows
        .iter()
        .map(|row| {
            Ok::<_, anyhow::Error>(ToolCallBrief {
                tool_name: row.get(0)?,
                success: row.get(1)?,
            })
        })
        .collect::<Result<_>>()?;
    calls.reverse();
    Ok(calls)
}

#[allow(clippy::too_many_arguments)]
async fn log_assembly(
    store: &Store,
    project_id: i64,
    session_id: Option<i64>,
    app: &str,
    prompt: &str,
    included: &[(String, i64)],
    total_candidates: usize,
    token_count: usize,
    latency_ms: i64,
) {
    let prompt_hash = format!("{:x}", Sha256::digest(prompt.as_bytes()));
    let memory_ids = serde_json::to_string(
        &included
            .iter()
            .map(|(t, id)| serde_json::json!({"type": t, "id": id}))
            .collect::<Vec<_>>(),
    )
    .unwrap_or_else(|_| "[]".to_string());

    if let Err(e) = store
        .run(
            "INSERT INTO context_log
                (project_id, app_id, prompt_hash, memory_ids, total_candidates,
                 token_count, latency_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            args![
                project_id,
                app,
                prompt_hash,
                memory_ids,
                total_candidates,
                token_count,
                latency_ms
            ],
        )
        .await
    {
        tracing::debug!("context log insert failed: {}", e);
    }

    for (source_type, source_id) in included {
        if let Err(e) = store
            .run(
                "INSERT INTO context_injections (project_id, session_id, source_type, source_id)
                 VALUES (?1, ?2, ?3, ?4)",
                args![project_id, session_id, source_type.clone(), *source_id],
            )
            .await
        {
            tracing::debug!("injection log insert failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::estimate_tokens;

    async fn seed_memories(store: &Store) -> i64 {
        let project = crate::db::get_or_create_project(store, "/p", None).await.unwrap();
        store
            .run(
                "INSERT INTO decisions (project_id, title, decision)
                 VALUES (?1, 'Session lifecycle', 'sessions auto-start on the first tool call and close on shutdown')",
                args![project.id],
            )
            .await
            .unwrap();
        store
            .run(
                "INSERT INTO decisions (project_id, title, decision)
                 VALUES (?1, 'Session numbering', 'sessions are numbered per project monotonically')",
                args![project.id],
            )
            .await
            .unwrap();
        store
            .run(
                "INSERT INTO learnings (project_id, title, content, confidence)
                 VALUES (?1, 'Session recovery', 'handle sessions carefully around crashes', 7.0)",
                args![project.id],
            )
            .await
            .unwrap();
        project.id
    }

    fn request(format: Format, max_tokens: usize) -> ContextRequest {
        ContextRequest {
            intent: Intent::Read,
            query: Some("how do we handle sessions".to_string()),
            format,
            max_tokens: Some(max_tokens),
            app: "muninn".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_assembled_xml_block_shape() {
        let store = Store::open_in_memory().await.unwrap();
        let state = EngineState::new();
        let project_id = seed_memories(&store).await;

        let assembled = build_context(
            &store,
            None,
            &state,
            &StuckLoopClassifier,
            project_id,
            None,
            &request(Format::Xml, 300),
        )
        .await
        .unwrap();

        assert!(assembled.block.starts_with("<muninn-context"));
        assert!(assembled.block.ends_with("</muninn-context>"));
        assert!(assembled.block.contains(&format!("tokens=\"{}\"", assembled.token_count)));
        assert!(assembled.token_count <= 300);
        // Diversity: at most two decision elements, learning included
        let decisions = assembled.block.matches("<decision").count();
        assert!(decisions <= 2);
        assert!(assembled.block.contains("<learning"));
    }

    #[tokio::test]
    async fn test_token_attribute_equals_summed_estimate() {
        let store = Store::open_in_memory().await.unwrap();
        let state = EngineState::new();
        let project_id = seed_memories(&store).await;

        let assembled = build_context(
            &store,
            None,
            &state,
            &StuckLoopClassifier,
            project_id,
            None,
            &request(Format::Xml, 300),
        )
        .await
        .unwrap();

        // Recompute the estimate from the included rows
        let mut expected = 0usize;
        for (source_type, id) in &assembled.included {
            let table = if source_type == "decision" { "decisions" } else { "learnings" };
            let column = if source_type == "decision" { "decision" } else { "content" };
            let content: String = store
                .get(
                    &format!("SELECT {column} FROM {table} WHERE id = ?1"),
                    args![*id],
                )
                .await
                .unwrap()
                .unwrap()
                .get(0)
                .unwrap();
            expected += estimate_tokens(&content).max(1);
        }
        assert_eq!(assembled.token_count, expected);
    }

    #[tokio::test]
    async fn test_assembly_logs_hash_not_prompt() {
        let store = Store::open_in_memory().await.unwrap();
        let state = EngineState::new();
        let project_id = seed_memories(&store).await;

        build_context(
            &store,
            None,
            &state,
            &StuckLoopClassifier,
            project_id,
            None,
            &request(Format::Markdown, 300),
        )
        .await
        .unwrap();

        let row = store
            .get(
                "SELECT prompt_hash, total_candidates, token_count FROM context_log",
                args![],
            )
            .await
            .unwrap()
            .unwrap();
        let hash: String = row.get(0).unwrap();
        assert_eq!(hash.len(), 64, "sha-256 hex");
        assert!(!hash.contains("sessions"), "raw prompt never stored");
        assert!(row.get::<i64>(1).unwrap() >= 1);
    }

    #[tokio::test]
    async fn test_injections_recorded_for_reinforcement() {
        let store = Store::open_in_memory().await.unwrap();
        let state = EngineState::new();
        let project_id = seed_memories(&store).await;
        let session = crate::db::open_session(&store, project_id, "g").await.unwrap();

        let assembled = build_context(
            &store,
            None,
            &state,
            &StuckLoopClassifier,
            project_id,
            Some(session.id),
            &request(Format::Xml, 300),
        )
        .await
        .unwrap();

        let count: i64 = store
            .get(
                "SELECT COUNT(*) FROM context_injections WHERE session_id = ?1",
                args![session.id],
            )
            .await
            .unwrap()
            .unwrap()
            .get(0)
            .unwrap();
        assert_eq!(count as usize, assembled.included.len());

        // Explicit relevance feedback lands on the injection rows
        let (source_type, id) = &assembled.included[0];
        let changed = record_relevance(&store, session.id, source_type, *id, "positive")
            .await
            .unwrap();
        assert_eq!(changed, 1);
    }

    #[tokio::test]
    async fn test_empty_project_produces_empty_block() {
        let store = Store::open_in_memory().await.unwrap();
        let state = EngineState::new();
        let project = crate::db::get_or_create_project(&store, "/empty", None).await.unwrap();

        let assembled = build_context(
            &store,
            None,
            &state,
            &StuckLoopClassifier,
            project.id,
            None,
            &request(Format::Xml, 300),
        )
        .await
        .unwrap();
        assert_eq!(assembled.total_candidates, 0);
        assert_eq!(assembled.token_count, 0);
    }
}
