//! Error types for Vigil.
//!
//! Library crates use [`VigilError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Two variants deserve special mention: [`VigilError::TransientApi`] marks
//! failures worth retrying (rate limits, timeouts), while
//! [`VigilError::FatalApi`] marks failures that abort a whole batch
//! (auth/permission), since retrying cannot help. Ambiguous workflow matches
//! are *not* errors; they are `Clarify` decisions.

use std::path::PathBuf;

/// Top-level error type for all Vigil operations.
#[derive(Debug, thiserror::Error)]
pub enum VigilError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// One or more workflow definition files failed to load.
    ///
    /// Loading never stops at the first bad file; `problems` lists every
    /// malformed definition found in the source directory.
    #[error("workflow definition error:\n{}", problems.join("\n"))]
    Definition { problems: Vec<String> },

    /// A label state transition that is not reachable from the current state.
    ///
    /// Always a logic bug, never expected in normal operation. Aborts the
    /// offending ticket only.
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Retryable tracker/discovery API failure (rate limit, timeout).
    #[error("transient API error: {0}")]
    TransientApi(String),

    /// Non-retryable tracker API failure (auth, permission). Aborts the batch.
    #[error("fatal API error: {0}")]
    FatalApi(String),

    /// Network/HTTP error outside the tracker API taxonomy.
    #[error("network error: {0}")]
    Network(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (schema mismatch, invalid format, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Deliverable template rendering error.
    #[error("render error: {0}")]
    Render(String),

    /// Version-control commit error.
    #[error("commit error: {0}")]
    Commit(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, VigilError>;

impl VigilError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create an invalid-transition error from state names.
    pub fn invalid_transition(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::InvalidTransition {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Whether this error is worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientApi(_))
    }

    /// Whether this error must abort the whole batch immediately.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::FatalApi(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = VigilError::config("missing tracker token");
        assert_eq!(err.to_string(), "config error: missing tracker token");

        let err = VigilError::invalid_transition("ready", "analysis");
        assert_eq!(err.to_string(), "invalid transition: ready -> analysis");
    }

    #[test]
    fn definition_error_lists_every_problem() {
        let err = VigilError::Definition {
            problems: vec![
                "a.yaml: trigger_labels must not be empty".into(),
                "b.yaml: duplicate id 'threat-analysis'".into(),
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("a.yaml"));
        assert!(msg.contains("b.yaml"));
    }

    #[test]
    fn transient_and_fatal_classification() {
        assert!(VigilError::TransientApi("429".into()).is_transient());
        assert!(!VigilError::TransientApi("429".into()).is_fatal());
        assert!(VigilError::FatalApi("401".into()).is_fatal());
        assert!(!VigilError::FatalApi("401".into()).is_transient());
    }
}
