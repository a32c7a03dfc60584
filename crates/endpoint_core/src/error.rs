//! Error types for the endpoint engine.

use thiserror::Error;

/// Result type alias for engine operations.
pub type EndpointResult<T> = Result<T, EndpointError>;

/// Errors surfaced by the session engine and its backends.
///
/// Step failures are not part of this taxonomy: a plugin that fails while
/// running is recorded inside its [`StepResult`](crate::model::StepResult).
#[derive(Error, Debug)]
pub enum EndpointError {
    #[error("No session; create one first")]
    NoSession,

    #[error("Malformed state: {0}")]
    MalformedState(String),

    #[error("Nothing left to process")]
    NothingToProcess,

    #[error("Unknown name: {0}")]
    UnknownName(String),

    #[error("Processing backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Backend error while running {plugin}: {message}")]
    Backend { plugin: String, message: String },

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EndpointError {
    /// Short, stable identifier used on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoSession => "no_session",
            Self::MalformedState(_) => "malformed_state",
            Self::NothingToProcess => "nothing_to_process",
            Self::UnknownName(_) => "unknown_name",
            Self::BackendUnavailable(_) => "backend_unavailable",
            Self::Backend { .. } => "backend",
            Self::Manifest(_) => "manifest",
            Self::Serialization(_) => "serialization",
        }
    }
}
