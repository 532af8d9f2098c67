/// Orchestrator error types
use crate::attempt::FailureClass;
use crate::backend::BackendId;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type BuildResult<T> = Result<T, BuildError>;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("No compatible backend available: {0}")]
    NoCompatibleBackend(String),

    #[error("Invalid option combination: {0}")]
    InvalidOption(String),

    #[error("Backend '{backend}' cannot express option '{option}'")]
    UnsupportedOption { backend: BackendId, option: String },

    #[error("Backend '{backend}' is not invocable: {reason}")]
    BackendUnavailable { backend: BackendId, reason: String },

    #[error("Backend '{backend}' exceeded its {timeout:?} budget")]
    BackendTimeout { backend: BackendId, timeout: Duration },

    #[error("Backend '{backend}' rejected the input: {reason}")]
    BackendPermanent { backend: BackendId, reason: String },

    #[error("Cache entry '{fingerprint}' is unreadable: {reason}")]
    CacheCorruption { fingerprint: String, reason: String },

    #[error("Build cancelled: {0}")]
    Cancelled(String),

    #[error("Hook '{hook}' failed: {reason}")]
    Hook { hook: String, reason: String },

    #[error("Internal orchestrator fault: {0}")]
    Internal(String),

    #[error("I/O error at {path}: {error}")]
    IoError {
        path: PathBuf,
        error: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BuildError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, error: std::io::Error) -> Self {
        Self::IoError {
            path: path.into(),
            error,
        }
    }

    /// Create an unsupported option error
    pub fn unsupported(backend: BackendId, option: impl Into<String>) -> Self {
        Self::UnsupportedOption {
            backend,
            option: option.into(),
        }
    }

    /// Create a hook failure
    pub fn hook(hook: impl Into<String>, reason: impl ToString) -> Self {
        Self::Hook {
            hook: hook.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a cache corruption error
    pub fn cache_corruption(fingerprint: impl Into<String>, reason: impl ToString) -> Self {
        Self::CacheCorruption {
            fingerprint: fingerprint.into(),
            reason: reason.to_string(),
        }
    }

    /// Failure class this error resolves to when it ends a build.
    pub fn class(&self) -> FailureClass {
        match self {
            Self::NoCompatibleBackend(_)
            | Self::InvalidOption(_)
            | Self::UnsupportedOption { .. }
            | Self::Hook { .. } => FailureClass::Configuration,
            Self::BackendPermanent { .. } => FailureClass::Permanent,
            Self::BackendUnavailable { .. } | Self::BackendTimeout { .. } => {
                FailureClass::Exhausted
            }
            Self::Cancelled(_) => FailureClass::Cancelled,
            Self::CacheCorruption { .. }
            | Self::Internal(_)
            | Self::IoError { .. }
            | Self::Io(_)
            | Self::Serialization(_) => FailureClass::Internal,
        }
    }

    /// Whether the orchestrator recovers from this error by advancing to the
    /// next candidate.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable { .. } | Self::BackendTimeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_errors_are_not_transient() {
        let err = BuildError::NoCompatibleBackend("nothing installed".to_string());
        assert_eq!(err.class(), FailureClass::Configuration);
        assert!(!err.is_transient());
    }

    #[test]
    fn test_timeout_is_transient() {
        let err = BuildError::BackendTimeout {
            backend: BackendId::Translator,
            timeout: Duration::from_secs(5),
        };
        assert!(err.is_transient());
        assert!(err.to_string().contains("translator"));
    }

    #[test]
    fn test_permanent_error_class() {
        let err = BuildError::BackendPermanent {
            backend: BackendId::Bundler,
            reason: "SyntaxError".to_string(),
        };
        assert_eq!(err.class(), FailureClass::Permanent);
        assert!(!err.is_transient());
    }

    #[test]
    fn test_unsupported_option_message() {
        let err = BuildError::unsupported(BackendId::Freezer, "onefile");
        assert_eq!(
            err.to_string(),
            "Backend 'freezer' cannot express option 'onefile'"
        );
    }
}
