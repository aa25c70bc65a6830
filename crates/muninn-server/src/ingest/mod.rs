// crates/muninn-server/src/ingest/mod.rs
// Event ingestion: tool calls, git commits, and error output become
// durable rows plus queued analyses. Everything here is fire-and-forget
// from the caller's perspective - a failure to record must never fail
// the tool that triggered it.

mod commits;
mod errors;
mod tool_calls;

pub use commits::ingest_commit;
pub use errors::{DetectedError, detect_errors, record_errors};
pub use tool_calls::{ToolCallRecord, extract_file_paths, log_tool_call, summarize_input};
