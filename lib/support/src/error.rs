//! Support workflow error types.
//!
//! `Engine` and `Service` name the operation that failed; the underlying
//! engine or service error is kept as a child of the report.

use std::fmt;

/// Errors from the support workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupportError {
    /// The engine was built without an action the workflow needs.
    MissingAction { name: String },
    /// The engine rejected the workflow or a request.
    Engine { operation: &'static str },
    /// The ticket cannot be opened.
    InvalidTicket { reason: String },
    /// A collaborator service failed.
    Service { operation: &'static str },
}

impl fmt::Display for SupportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingAction { name } => {
                write!(f, "engine has no '{name}' action; build it with the support actions")
            }
            Self::Engine { operation } => write!(f, "workflow engine failed to {operation}"),
            Self::InvalidTicket { reason } => write!(f, "invalid ticket: {reason}"),
            Self::Service { operation } => write!(f, "support service failed to {operation}"),
        }
    }
}

impl std::error::Error for SupportError {}
