use std::path::Path;

/// Errors raised by the correction engine and its adapters.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Too few rows to fit something meaningful. Training aborts or skips
    /// the sub-target, depending on the caller.
    #[error("Insufficient data for {context}: {available} rows, need at least {required}")]
    InsufficientData {
        context: String,
        available: usize,
        required: usize,
    },

    /// No persisted bundle exists yet; the serving layer should fall back to
    /// raw NWP output.
    #[error("Model not trained: no bundle at {0}")]
    ModelNotTrained(String),

    #[error("Incompatible model bundle {path}: {reason}")]
    IncompatibleBundle { path: String, reason: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    /// A failure inside the engine itself, such as a panicked worker task.
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

impl AppError {
    pub fn insufficient(context: impl Into<String>, available: usize, required: usize) -> Self {
        AppError::InsufficientData {
            context: context.into(),
            available,
            required,
        }
    }

    pub fn incompatible(path: &Path, reason: impl Into<String>) -> Self {
        AppError::IncompatibleBundle {
            path: path.display().to_string(),
            reason: reason.into(),
        }
    }

    /// True for the "no bundle yet" condition the serving layer is expected
    /// to handle by serving uncorrected forecasts.
    pub fn is_untrained(&self) -> bool {
        matches!(self, AppError::ModelNotTrained(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_data_message_names_context_and_counts() {
        let err = AppError::insufficient("paired rows", 120, 500);
        let msg = err.to_string();
        assert!(msg.contains("paired rows"), "got: {}", msg);
        assert!(msg.contains("120"));
        assert!(msg.contains("500"));
    }

    #[test]
    fn test_is_untrained() {
        assert!(AppError::ModelNotTrained("models/weather_model.json".into()).is_untrained());
        assert!(!AppError::InvalidInput("x".into()).is_untrained());
    }

    #[test]
    fn test_incompatible_includes_path() {
        let err = AppError::incompatible(Path::new("/tmp/m.json"), "format version 9");
        assert_eq!(
            err.to_string(),
            "Incompatible model bundle /tmp/m.json: format version 9"
        );
    }
}
