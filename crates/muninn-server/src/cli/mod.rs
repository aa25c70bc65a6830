// crates/muninn-server/src/cli/mod.rs
// CLI surface: the long-lived MCP server plus the one-shot subcommands
// invoked by hooks and users.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod passthrough;
pub mod promote;
pub mod serve;

pub use passthrough::run_passthrough;
pub use promote::run_promote;
pub use serve::run_server;

#[derive(Parser)]
#[command(name = "muninn")]
#[command(about = "Persistent memory engine for coding assistants")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run as MCP server on stdio (default)
    Serve,

    /// Ingest external events
    Ingest {
        #[command(subcommand)]
        source: IngestSource,
    },

    /// Reindex the project's source files (symbols + call graph)
    Reindex {
        /// Project path (default: current directory)
        #[arg(short, long)]
        path: Option<PathBuf>,
    },

    /// Drain the work queue
    Worker {
        /// Process pending jobs and exit
        #[arg(long)]
        once: bool,
    },

    /// Learning promotion workflow
    Promote {
        /// candidates | sync | stale | demote <id> | <id>
        args: Vec<String>,
    },

    /// Record a relationship: relate <type:id> <relationship> <type:id>
    Relate {
        source: String,
        relationship: String,
        target: String,
        /// Relationship strength 1-10
        #[arg(long, default_value_t = 5.0)]
        strength: f64,
        #[arg(long)]
        note: Option<String>,
    },

    /// List relationships for an entity: relations <type:id>
    Relations { entity: String },

    /// Delete a relationship by id
    Unrelate { id: i64 },

    /// Run an allow-listed read-only command (quote-aware, no shell)
    Tool {
        /// Command line, e.g. "git log --oneline -5"
        command: String,
    },
}

#[derive(Subcommand)]
pub enum IngestSource {
    /// Ingest the latest commit (invoked by the post-commit hook)
    Commit {
        /// Repository root (default: current directory)
        #[arg(short, long)]
        path: Option<PathBuf>,
    },
}

/// Parse an `<entity_type>:<id>` argument.
pub fn parse_entity(s: &str) -> Result<(String, i64), String> {
    let (entity_type, id) = s
        .split_once(':')
        .ok_or_else(|| format!("expected <type>:<id>, got '{s}'"))?;
    let id = id
        .parse::<i64>()
        .map_err(|_| format!("invalid id in '{s}'"))?;
    Ok((entity_type.to_string(), id))
}
