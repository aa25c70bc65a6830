// crates/muninn-server/src/config.rs
// Environment-based configuration - single source of truth for all env vars
// and data-directory resolution.

use std::path::PathBuf;
use tracing::{debug, warn};

/// Result of an API key lookup. The raw value never reaches logs; error
/// strings that might embed a key must pass through [`redact_api_keys`].
pub struct KeyLookup {
    pub ok: bool,
    pub value: Option<String>,
}

/// API keys loaded from environment variables
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// Remote embedding / small-LLM API key (MUNINN_API_KEY or OPENAI_API_KEY)
    pub remote: Option<String>,
    /// Local embedding server host (MUNINN_EMBED_HOST, e.g. http://localhost:11434)
    pub local_embed: Option<String>,
}

impl ApiKeys {
    /// Load API keys from environment variables (single source of truth).
    ///
    /// Set `MUNINN_DISABLE_LLM=1` to suppress the remote key (forces
    /// heuristic fallbacks everywhere an LLM would be consulted).
    pub fn from_env() -> Self {
        let disabled = std::env::var("MUNINN_DISABLE_LLM")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let remote = if disabled {
            None
        } else {
            Self::read_key("MUNINN_API_KEY").or_else(|| Self::read_key("OPENAI_API_KEY"))
        };
        let local_embed = Self::read_key("MUNINN_EMBED_HOST");

        let keys = Self { remote, local_embed };
        keys.log_status();
        keys
    }

    /// Read a single key from environment, filtering empty values
    fn read_key(name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|k| !k.trim().is_empty())
    }

    fn log_status(&self) {
        let mut available = Vec::new();
        if self.remote.is_some() {
            available.push("remote");
        }
        if self.local_embed.is_some() {
            available.push("local-embed");
        }
        if available.is_empty() {
            debug!("No provider keys configured - running with FTS-only retrieval");
        } else {
            debug!(providers = ?available, "Provider keys loaded");
        }
    }
}

/// Look up a provider key by name. Never logs the raw value.
pub fn get_api_key(provider: &str) -> KeyLookup {
    let keys = ApiKeys::from_env();
    let value = match provider {
        "remote" | "openai" => keys.remote,
        "local" | "embed" => keys.local_embed,
        _ => None,
    };
    KeyLookup {
        ok: value.is_some(),
        value,
    }
}

/// Strip key-like tokens from an error string before it is surfaced.
/// Matches `sk-`-prefixed tokens and long opaque secrets.
pub fn redact_api_keys(s: &str) -> String {
    use regex::Regex;
    use std::sync::LazyLock;

    #[allow(clippy::expect_used)]
    static RE_SK: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"sk-[A-Za-z0-9_-]{8,}").expect("valid regex"));
    #[allow(clippy::expect_used)]
    static RE_BEARER: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)bearer\s+[A-Za-z0-9._-]{8,}").expect("valid regex"));
    #[allow(clippy::expect_used)]
    static RE_LONG: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\b[A-Za-z0-9]{32,}\b").expect("valid regex"));

    let s = RE_SK.replace_all(s, "[redacted]");
    let s = RE_BEARER.replace_all(&s, "[redacted]");
    RE_LONG.replace_all(&s, "[redacted]").to_string()
}

/// Embedding provider configuration
#[derive(Debug, Clone)]
pub struct EmbeddingsConfig {
    /// Vector dimensions (MUNINN_EMBEDDING_DIMENSIONS; default 768)
    pub dimensions: usize,
    /// Local model name served over HTTP
    pub local_model: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            dimensions: 768,
            local_model: "nomic-embed-text".to_string(),
            timeout_secs: 30,
        }
    }
}

impl EmbeddingsConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(dims) = std::env::var("MUNINN_EMBEDDING_DIMENSIONS")
            .ok()
            .and_then(|d| d.parse().ok())
        {
            debug!(dimensions = dims, "Custom embedding dimensions configured");
            config.dimensions = dims;
        }
        if let Ok(model) = std::env::var("MUNINN_EMBEDDING_MODEL") {
            config.local_model = model;
        }
        config
    }
}

/// Full engine configuration
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub api_keys: ApiKeys,
    pub embeddings: EmbeddingsConfig,
    /// Remote store URL (MUNINN_STORE_URL); local embedded store when unset
    pub store_url: Option<String>,
    pub store_token: Option<String>,
}

impl EnvConfig {
    pub fn load() -> Self {
        Self {
            api_keys: ApiKeys::from_env(),
            embeddings: EmbeddingsConfig::from_env(),
            store_url: std::env::var("MUNINN_STORE_URL").ok().filter(|s| !s.is_empty()),
            store_token: std::env::var("MUNINN_STORE_TOKEN").ok().filter(|s| !s.is_empty()),
        }
    }
}

/// Resolve the data directory: `MUNINN_HOME`, else `~/.muninn`.
pub fn data_dir() -> PathBuf {
    if let Ok(home) = std::env::var("MUNINN_HOME") {
        if !home.trim().is_empty() {
            return PathBuf::from(home);
        }
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".muninn")
}

/// Resolve the database path.
///
/// Precedence: `<project>/.muninn/memory.db` when it already exists (opt-in
/// per-project store), then `~/.muninn/memory.db`, then the legacy
/// `~/.claude/memory.db` when only that file exists.
pub fn db_path(project_root: Option<&std::path::Path>) -> PathBuf {
    if let Some(root) = project_root {
        let local = root.join(".muninn/memory.db");
        if local.exists() {
            return local;
        }
    }

    let primary = data_dir().join("memory.db");
    if primary.exists() {
        return primary;
    }

    let legacy = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".claude/memory.db");
    if legacy.exists() {
        warn!("Using legacy database path {}", legacy.display());
        return legacy;
    }

    primary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_sk_token() {
        let redacted = redact_api_keys("request failed: key sk-abc123def456ghi was rejected");
        assert!(!redacted.contains("sk-abc123def456ghi"));
        assert!(redacted.contains("[redacted]"));
    }

    #[test]
    fn test_redact_bearer_token() {
        let redacted = redact_api_keys("401 from server; Bearer eyJhbGciOiJIUzI1NiJ9 expired");
        assert!(!redacted.contains("eyJhbGciOiJIUzI1NiJ9"));
    }

    #[test]
    fn test_redact_leaves_normal_text() {
        let msg = "connection refused to localhost:11434";
        assert_eq!(redact_api_keys(msg), msg);
    }

    #[test]
    fn test_embeddings_config_default_dimensions() {
        assert_eq!(EmbeddingsConfig::default().dimensions, 768);
    }
}
