// crates/muninn-server/src/error.rs
// Standardized error types for Muninn

use thiserror::Error;

/// Main error type for the Muninn library
#[derive(Error, Debug)]
pub enum MuninnError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("project not set")]
    ProjectNotSet,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("task cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown error: {0}")]
    Other(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Convenience type alias for Result using MuninnError
pub type Result<T> = std::result::Result<T, MuninnError>;

impl MuninnError {
    /// True for error classes that are expected in normal operation and must
    /// not count toward the systemic-failure window: validation, not-found,
    /// network, database, and timeout failures.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            MuninnError::InvalidInput(_)
                | MuninnError::ProjectNotSet
                | MuninnError::NotFound(_)
                | MuninnError::Db(_)
                | MuninnError::Http(_)
                | MuninnError::Store(_)
                | MuninnError::Embedding(_)
                | MuninnError::Cancelled
        )
    }
}

impl From<String> for MuninnError {
    fn from(s: String) -> Self {
        MuninnError::Other(s)
    }
}

impl From<tokio::task::JoinError> for MuninnError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            MuninnError::Cancelled
        } else {
            MuninnError::Other(err.to_string())
        }
    }
}

impl From<MuninnError> for String {
    fn from(err: MuninnError) -> Self {
        err.to_string()
    }
}

/// Sliding window of unexpected errors. Only a sustained burst of
/// unexpected failures (more than `threshold` within `window`) should
/// terminate the server; everything else is recoverable.
pub struct ErrorWindow {
    events: std::collections::VecDeque<std::time::Instant>,
    threshold: usize,
    window: std::time::Duration,
}

impl ErrorWindow {
    pub fn new() -> Self {
        Self {
            events: std::collections::VecDeque::new(),
            threshold: 30,
            window: std::time::Duration::from_secs(120),
        }
    }

    /// Record an error; returns true when the systemic threshold is crossed.
    pub fn record(&mut self, err: &MuninnError) -> bool {
        if err.is_expected() {
            return false;
        }
        let now = std::time::Instant::now();
        self.events.push_back(now);
        while let Some(front) = self.events.front() {
            if now.duration_since(*front) > self.window {
                self.events.pop_front();
            } else {
                break;
            }
        }
        self.events.len() > self.threshold
    }
}

impl Default for ErrorWindow {
    fn default() -> Self {
        Self::new()
    }
}
