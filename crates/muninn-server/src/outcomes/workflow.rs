// crates/muninn-server/src/outcomes/workflow.rs
// Workflow prediction: trigram -> next-tool frequencies with Laplace
// smoothing. The model rebuilds every ~10 sessions from the last 50
// sessions' tool calls; predictions are served through the 60-second
// in-process cache.

use crate::args;
use crate::state::{CachedPrediction, EngineState};
use crate::store::Store;
use anyhow::Result;
use std::collections::HashMap;

/// Sessions sampled when rebuilding.
const MODEL_SESSION_WINDOW: i64 = 50;

/// Sequences below this correct count are noise.
const MIN_CORRECT: i64 = 2;

/// Predictions below this confidence are not useful.
pub const MIN_USEFUL_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub predicted_tool: String,
    pub confidence: f64,
}

/// Laplace-smoothed confidence: (correct + 1) / (total + 2).
pub fn smoothed_confidence(correct: i64, total: i64) -> f64 {
    (correct + 1) as f64 / (total + 2) as f64
}

/// Rebuild the workflow model from recent tool-call history.
/// Returns the number of (trigram, next) rows persisted.
pub async fn build_workflow_model(store: &Store, project_id: i64) -> Result<usize> {
    let rows = store
        .all(
            "SELECT session_id, tool_name FROM tool_calls
             WHERE project_id = ?1 AND session_id IN (
                 SELECT id FROM sessions WHERE project_id = ?1
                 ORDER BY started_at DESC LIMIT ?2
             )
             ORDER BY session_id, id",
            args![project_id, MODEL_SESSION_WINDOW],
        )
        .await?;

    // Group call sequences per session
    let mut sequences: HashMap<i64, Vec<String>> = HashMap::new();
    for row in &rows {
        let session_id: i64 = row.get(0)?;
        sequences.entry(session_id).or_default().push(row.get(1)?);
    }

    // trigram -> next tool -> count; total per trigram
    let mut counts: HashMap<String, HashMap<String, i64>> = HashMap::new();
    for tools in sequences.values() {
        for window in tools.windows(4) {
            let trigram = window[..3].join(",");
            *counts
                .entry(trigram)
                .or_default()
                .entry(window[3].clone())
                .or_insert(0) += 1;
        }
    }

    let mut persisted = 0;
    for (trigram, nexts) in counts {
        let total: i64 = nexts.values().sum();
        for (next_tool, correct) in nexts {
            if correct < MIN_CORRECT {
                continue;
            }
            let confidence = smoothed_confidence(correct, total);
            store
                .run(
                    "INSERT INTO workflow_predictions
                        (project_id, trigger_sequence, predicted_tool, times_correct,
                         times_total, confidence)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(project_id, trigger_sequence, predicted_tool) DO UPDATE SET
                        times_correct = ?4, times_total = ?5, confidence = ?6,
                        updated_at = CURRENT_TIMESTAMP",
                    args![
                        project_id,
                        trigram.clone(),
                        next_tool,
                        correct,
                        total,
                        confidence
                    ],
                )
                .await?;
            persisted += 1;
        }
    }
    Ok(persisted)
}

/// Predict the next tool from the last three tool names. Served from the
/// in-process cache (60 s TTL) when fresh; otherwise reads the model and
/// caches the result.
pub async fn predict_next_action(
    store: &Store,
    state: &EngineState,
    project_id: i64,
    recent_tools: &[String],
) -> Result<Option<Prediction>> {
    if recent_tools.len() < 3 {
        return Ok(None);
    }
    let trigram = recent_tools[recent_tools.len() - 3..].join(",");

    if let Some(cached) = state.cached_prediction(&trigram) {
        return Ok(Some(Prediction {
            predicted_tool: cached.predicted_tool,
            confidence: cached.confidence,
        }));
    }

    let row = store
        .get(
            "SELECT predicted_tool, confidence FROM workflow_predictions
             WHERE project_id = ?1 AND trigger_sequence = ?2
             ORDER BY confidence DESC LIMIT 1",
            args![project_id, trigram.clone()],
        )
        .await?;
    let Some(row) = row else { return Ok(None) };

    let prediction = Prediction {
        predicted_tool: row.get(0)?,
        confidence: row.get(1)?,
    };
    if prediction.confidence < MIN_USEFUL_CONFIDENCE {
        return Ok(None);
    }

    state.cache_prediction(
        &trigram,
        CachedPrediction {
            predicted_tool: prediction.predicted_tool.clone(),
            confidence: prediction.confidence,
        },
    );
    Ok(Some(prediction))
}
