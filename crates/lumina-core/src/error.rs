//! Error types for Lumina.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LuminaError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Retrieval error: {0}")]
    Retrieval(String),

    #[error("Audit sink error: {0}")]
    Audit(String),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LuminaError {
    /// Short machine-readable tag used in audit reasons.
    pub fn tag(&self) -> &'static str {
        match self {
            LuminaError::Config(_) => "config",
            LuminaError::Retrieval(_) => "retrieval",
            LuminaError::Audit(_) => "audit",
            LuminaError::Metrics(_) => "metrics",
            LuminaError::Io(_) => "io",
            LuminaError::Json(_) => "json",
        }
    }
}

pub type Result<T> = std::result::Result<T, LuminaError>;
