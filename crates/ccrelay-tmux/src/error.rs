//! Error types for the tmux backend.

use ccrelay_core::EngineError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TmuxError {
    #[error("tmux command failed: {0}")]
    CommandFailed(String),

    #[error("tmux target not found: {0}")]
    NotFound(String),

    #[error("failed to parse tmux output line {line_num}: {detail}")]
    ParseError { line_num: usize, detail: String },

    #[error("tmux io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TmuxError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<TmuxError> for EngineError {
    fn from(e: TmuxError) -> Self {
        match e {
            TmuxError::NotFound(target) => EngineError::stale(target),
            other => EngineError::transient("tmux", other),
        }
    }
}

/// Whether tmux stderr means the addressed pane, window or server is gone.
pub fn stderr_indicates_missing(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("can't find pane")
        || lower.contains("can't find window")
        || lower.contains("can't find session")
        || lower.contains("no server running")
        || lower.contains("session not found")
}
