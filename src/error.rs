use std::path::PathBuf;

/// Error type shared across the crate.
///
/// Variants distinguish user-fixable causes (a missing corpus root, a bad
/// date range on the command line) from internal ones (index write failure)
/// so that `main` can phrase its exit message accordingly. Failures that
/// affect only a subset of the corpus — one unreadable file, one malformed
/// line — are handled locally and never become a `RecollectError`.
#[derive(Debug, thiserror::Error)]
pub enum RecollectError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Corpus root not found: {0}")]
    CorpusRootMissing(PathBuf),

    #[error("Index corrupt at {path}: {reason}")]
    IndexCorrupt { path: PathBuf, reason: String },

    #[error("Unknown conversation id: {0}")]
    UnknownConversation(String),

    #[error("Invalid date range: {0}")]
    InvalidDateRange(String),

    #[error("Unknown date preset: {0}")]
    UnknownPreset(String),

    #[error("{0}")]
    Other(String),
}

impl RecollectError {
    /// True when the cause is something the user can fix from the command
    /// line (paths, arguments), as opposed to an internal failure.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            RecollectError::CorpusRootMissing(_)
                | RecollectError::InvalidDateRange(_)
                | RecollectError::UnknownPreset(_)
        )
    }
}
