// crates/muninn-server/src/ingest/tool_calls.rs
// Tool-call logging: summarize the input, extract file paths from the
// tool-specific argument shape, and persist one row per call.

use crate::args;
use crate::db::to_json_array;
use crate::store::Store;
use crate::utils::truncate;
use anyhow::Result;
use std::collections::BTreeSet;

/// Input summary cap.
const SUMMARY_MAX: usize = 500;

/// A completed tool call ready to persist.
#[derive(Debug, Clone)]
pub struct ToolCallRecord {
    pub project_id: i64,
    pub session_id: Option<i64>,
    pub tool_name: String,
    pub input: serde_json::Value,
    pub success: bool,
    pub duration_ms: i64,
    pub error_message: Option<String>,
}

/// Extract file paths from a tool input. Handles the common shapes:
/// `path`, `file_path`, `files: [...]`, and a JSON string embedded under
/// `input` (enrichment requests). Deduplicates within the call.
pub fn extract_file_paths(input: &serde_json::Value) -> Vec<String> {
    let mut paths = BTreeSet::new();
    collect_paths(input, &mut paths, 0);
    paths.into_iter().collect()
}

fn collect_paths(value: &serde_json::Value, out: &mut BTreeSet<String>, depth: usize) {
    if depth > 2 {
        return;
    }
    let Some(obj) = value.as_object() else { return };

    for key in ["path", "file_path"] {
        if let Some(serde_json::Value::String(p)) = obj.get(key) {
            if !p.trim().is_empty() {
                out.insert(p.clone());
            }
        }
    }
    if let Some(serde_json::Value::Array(files)) = obj.get("files") {
        for f in files {
            if let Some(p) = f.as_str() {
                if !p.trim().is_empty() {
                    out.insert(p.to_string());
                }
            }
        }
    }
    // Enrichment requests carry the target tool's input as a JSON string
    if let Some(serde_json::Value::String(embedded)) = obj.get("input") {
        if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(embedded) {
            collect_paths(&parsed, out, depth + 1);
        }
    }
}

/// Compact JSON summary of the input, truncated to 500 chars.
pub fn summarize_input(input: &serde_json::Value) -> String {
    let rendered = if input.is_null() {
        String::new()
    } else {
        input.to_string()
    };
    truncate(&rendered, SUMMARY_MAX)
}

/// Persist a tool call. Returns the row id; callers treat failures as
/// best-effort (log and continue).
pub async fn log_tool_call(store: &Store, record: &ToolCallRecord) -> Result<i64> {
    let files = extract_file_paths(&record.input);
    let summary = summarize_input(&record.input);

    let result = store
        .run(
            "INSERT INTO tool_calls
                (project_id, session_id, tool_name, input_summary, files_involved,
                 success, duration_ms, error_message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            args![
                record.project_id,
                record.session_id,
                record.tool_name.clone(),
                summary,
                to_json_array(&files),
                record.success,
                record.duration_ms,
                record.error_message.clone()
            ],
        )
        .await?;

    // Reference tracking is best-effort on top of best-effort
    for path in &files {
        let _ = crate::db::mark_referenced(store, record.project_id, path).await;
    }

    Ok(result.last_insert_id)
}
