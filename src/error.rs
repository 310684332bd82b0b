//! Error handling for the updater
//!
//! Library errors use thiserror. Step failures are NOT errors: a non-zero exit
//! code, a spawn failure or a timeout is recorded in the `InstallReport`.
//! Only problems that happen before any report exists surface as `UpdaterError`.

use thiserror::Error;

/// Main error type for the updater
#[derive(Error, Debug)]
pub enum UpdaterError {
    /// IO errors (file operations, terminal, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Environment detection failed or yielded an unsupported category,
    /// or the configuration file is invalid. No step has run.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Another updater holds the run lock
    #[error("Another update is already running (lock held on {0})")]
    Locked(String),

    /// Required external tools are missing
    #[error("Pre-flight check failed: {0}")]
    Preflight(String),

    /// Terminal/UI errors
    #[error("Terminal error: {0}")]
    Terminal(String),

    /// Run state machine transition errors
    #[error("Run state transition error: {0}")]
    Transition(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for updater operations
pub type Result<T> = std::result::Result<T, UpdaterError>;

impl UpdaterError {
    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a pre-flight error
    pub fn preflight(msg: impl Into<String>) -> Self {
        Self::Preflight(msg.into())
    }

    /// Create a terminal error
    pub fn terminal(msg: impl Into<String>) -> Self {
        Self::Terminal(msg.into())
    }

    /// Create a transition error
    pub fn transition(msg: impl Into<String>) -> Self {
        Self::Transition(msg.into())
    }

    /// True for errors raised before any step could run
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = UpdaterError::configuration("unsupported distribution: gentoo");
        assert_eq!(
            err.to_string(),
            "Configuration error: unsupported distribution: gentoo"
        );

        let err = UpdaterError::Locked("/tmp/cmi.lock".to_string());
        assert!(err.to_string().contains("/tmp/cmi.lock"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: UpdaterError = io_err.into();
        assert!(matches!(err, UpdaterError::Io(_)));
    }

    #[test]
    fn test_is_configuration() {
        assert!(UpdaterError::configuration("x").is_configuration());
        assert!(!UpdaterError::preflight("git").is_configuration());
        assert!(!UpdaterError::terminal("raw mode").is_configuration());
    }
}
