use std::sync::Arc;

use thiserror::Error;

/// Boxed error returned by collaborators outside the container (artifact
/// factories, service registries).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug, Clone)]
pub enum PucError {
    #[error("I/O Error: {0}")]
    Io(#[from] Arc<std::io::Error>),

    #[error("JSON Parsing Error: {0}")]
    Json(#[from] Arc<serde_json::Error>),

    #[error("Semantic Versioning Error: {0}")]
    SemVer(#[from] Arc<semver::Error>),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Parsing Error in {0}: {1}")]
    Parse(&'static str, String),

    #[error("Invalid version '{0}'")]
    InvalidVersion(String),

    #[error("Invalid requirement for '{kind}': {reason}")]
    InvalidRequirement { kind: String, reason: String },

    #[error("Conflicting provider names in module {module}: {names:?}")]
    ConflictingProviderNames { module: String, names: Vec<String> },

    #[error("Incompatible version ranges: {0}")]
    IncompatibleRanges(String),

    #[error("Activation Error: {0}")]
    Activation(Arc<dyn std::error::Error + Send + Sync + 'static>),
}

impl PucError {
    pub fn invalid_requirement(kind: impl Into<String>, reason: impl Into<String>) -> Self {
        PucError::InvalidRequirement {
            kind: kind.into(),
            reason: reason.into(),
        }
    }

    /// Wraps a factory or registry failure without altering it.
    pub fn activation(err: BoxError) -> Self {
        PucError::Activation(Arc::from(err))
    }
}

impl From<std::io::Error> for PucError {
    fn from(err: std::io::Error) -> Self {
        PucError::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for PucError {
    fn from(err: serde_json::Error) -> Self {
        PucError::Json(Arc::new(err))
    }
}

impl From<semver::Error> for PucError {
    fn from(err: semver::Error) -> Self {
        PucError::SemVer(Arc::new(err))
    }
}

pub type Result<T> = std::result::Result<T, PucError>;
