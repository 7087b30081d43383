//! Analytics error types.

use std::fmt;

/// Errors from event tracking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalyticsError {
    /// The event name was blank.
    EmptyEventName,
    /// Event properties were not a JSON object.
    InvalidProperties { event: String },
}

impl fmt::Display for AnalyticsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyEventName => write!(f, "event name must not be empty"),
            Self::InvalidProperties { event } => {
                write!(f, "properties for event '{event}' must be a JSON object")
            }
        }
    }
}

impl std::error::Error for AnalyticsError {}
