use crate::inference::InferenceError;
use thiserror::Error;

pub type EmbedResult<T> = Result<T, EmbedError>;

/// Errors surfaced to callers of the embedding core.
///
/// `Clone` because a single model failure is written into the result slot of
/// every item in the failing batch.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmbedError {
    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),

    #[error("Request timed out after {timeout_ms} ms")]
    RequestTimeout { timeout_ms: u64 },

    #[error("Service is stopping")]
    ServiceStopping,

    #[error("Service overloaded: {pending} items pending, limit {limit}")]
    Overloaded { pending: usize, limit: usize },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EmbedError {
    /// Short machine-readable label, used as a metrics tag.
    pub fn kind(&self) -> &'static str {
        match self {
            EmbedError::Inference(_) => "inference",
            EmbedError::RequestTimeout { .. } => "timeout",
            EmbedError::ServiceStopping => "stopping",
            EmbedError::Overloaded { .. } => "overloaded",
            EmbedError::Validation(_) => "validation",
            EmbedError::Config(_) => "config",
        }
    }
}
