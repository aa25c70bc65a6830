// crates/muninn-server/src/mcp/requests.rs
// Request types for the MCP tool surface

use schemars::JsonSchema;
use serde::Deserialize;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct QueryRequest {
    #[schemars(description = "Free-text query over project memory")]
    pub text: String,
    #[schemars(description = "Search mode: auto (default), fts, vector, smart")]
    pub mode: Option<String>,
    #[schemars(description = "Maximum results (default 10)")]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CheckRequest {
    #[schemars(description = "File paths to check before editing")]
    pub files: Vec<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SuggestRequest {
    #[schemars(description = "Task description to match files and symbols against")]
    pub task: String,
    #[schemars(description = "Maximum suggestions (default 10)")]
    pub limit: Option<usize>,
    #[schemars(description = "Include symbol-level matches")]
    pub include_symbols: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct PredictRequest {
    #[schemars(description = "Upcoming task description")]
    pub task: Option<String>,
    #[schemars(description = "Files about to be touched")]
    pub files: Option<Vec<String>>,
    #[schemars(description = "Include advisory lines")]
    pub advise: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct EnrichRequest {
    #[schemars(description = "Tool about to be invoked (e.g. Edit, Bash)")]
    pub tool: String,
    #[schemars(description = "The tool's input as a JSON string")]
    pub input: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ContextRequestArgs {
    #[schemars(description = "Caller intent: edit, read, debug, explore, plan")]
    pub intent: Option<String>,
    #[schemars(description = "Free-text query")]
    pub query: Option<String>,
    #[schemars(description = "Task description")]
    pub task: Option<String>,
    #[schemars(description = "Files in focus")]
    pub files: Option<Vec<String>>,
    #[schemars(description = "Output format: xml (default), markdown, native, json")]
    pub format: Option<String>,
    #[schemars(description = "Token budget")]
    pub max_tokens: Option<usize>,
    #[schemars(description = "Scoring strategy: balanced (default), precise, broad")]
    pub strategy: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct IntentRequest {
    #[schemars(description = "Action: declare, query, release")]
    pub action: String,
    #[schemars(description = "Agent identifier")]
    pub agent_id: String,
    #[schemars(description = "Intent type for declare (e.g. edit, refactor)")]
    pub intent_type: Option<String>,
    #[schemars(description = "Human-readable description")]
    pub description: Option<String>,
    #[schemars(description = "Target files")]
    pub files: Option<Vec<String>>,
    #[schemars(description = "Intent id for release")]
    pub intent_id: Option<i64>,
}
