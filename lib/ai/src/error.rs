//! Error types for the AI crate.

use std::fmt;

/// Errors from text operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AiError {
    /// The prompt was blank.
    EmptyPrompt,
    /// A conversation analysis was requested for zero messages.
    NoMessages,
    /// The backend could not produce output.
    GenerationFailed { reason: String },
}

impl fmt::Display for AiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyPrompt => write!(f, "prompt must not be empty"),
            Self::NoMessages => write!(f, "conversation has no messages"),
            Self::GenerationFailed { reason } => write!(f, "text generation failed: {reason}"),
        }
    }
}

impl std::error::Error for AiError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_failed_display() {
        let err = AiError::GenerationFailed {
            reason: "model offline".to_string(),
        };
        assert!(err.to_string().contains("model offline"));
    }
}
