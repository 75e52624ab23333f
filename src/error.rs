//! Error types for the model builder
//!
//! Only input that cannot be read as an event collection at all, and misuse of
//! the model lifecycle, surface as `Err`. Defective individual events are
//! recorded as [`crate::diagnostics::Diagnostic`] values and never abort a pass.

use thiserror::Error;

/// Errors returned by ingestion and finalization
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Invalid trace: {0}")]
    InvalidTrace(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid filter expression: {0}")]
    Filter(String),

    #[error("Model is sealed: call reset() before ingesting a new capture")]
    Sealed,

    #[error("Model build cancelled before pass '{0}'")]
    Cancelled(&'static str),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ModelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_trace_display() {
        let err = ModelError::InvalidTrace("expected array".to_string());
        assert_eq!(err.to_string(), "Invalid trace: expected array");
    }

    #[test]
    fn test_cancelled_names_pass() {
        let err = ModelError::Cancelled("hierarchy");
        assert!(err.to_string().contains("hierarchy"));
    }

    #[test]
    fn test_json_error_converts() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: ModelError = json_err.into();
        assert!(matches!(err, ModelError::Json(_)));
    }
}
