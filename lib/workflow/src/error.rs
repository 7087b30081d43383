//! Error types for the workflow crate.
//!
//! Errors are split by the layer that raises them:
//! - `ValidationError`: a workflow definition breaks a graph or config rule
//! - `EngineError`: a synchronous engine call was rejected
//! - `HandlerError`: a step handler could not produce output
//! - `StepError`: a dispatched step failed (wraps `HandlerError`)
//!
//! Engine and validation errors are returned to the caller. Step errors are
//! never returned; they fail the instance and surface as a `workflowFailed`
//! event.

use crate::definition::WorkflowStatus;
use crate::step::{StepId, StepType};
use caseflow_core::{InstanceId, WorkflowId};
use std::fmt;
use std::time::Duration;

/// A workflow definition is malformed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The workflow name is blank.
    EmptyName,
    /// The workflow has no steps.
    NoSteps,
    /// A step has a blank id.
    EmptyStepId { index: usize },
    /// Two steps share an id.
    DuplicateStepId { step_id: StepId },
    /// `next_steps` names a step that does not exist.
    UnknownSuccessor { step_id: StepId, successor: StepId },
    /// `next_steps` names the same successor twice.
    DuplicateSuccessor { step_id: StepId, successor: StepId },
    /// A step lists itself as a successor.
    SelfLoop { step_id: StepId },
    /// A step has more than one predecessor.
    JoinNotSupported {
        step_id: StepId,
        predecessors: Vec<StepId>,
    },
    /// The entry step is the successor of another step.
    EntryHasPredecessor { step_id: StepId },
    /// The step graph contains a cycle.
    CycleDetected,
    /// A step can never run because the entry step does not reach it.
    UnreachableStep { step_id: StepId },
    /// The trigger configuration is invalid.
    InvalidTrigger { reason: String },
    /// A step's configuration is invalid.
    InvalidStepConfig { step_id: StepId, reason: String },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyName => write!(f, "workflow name must not be empty"),
            Self::NoSteps => write!(f, "workflow must contain at least one step"),
            Self::EmptyStepId { index } => write!(f, "step at position {index} has an empty id"),
            Self::DuplicateStepId { step_id } => write!(f, "duplicate step id '{step_id}'"),
            Self::UnknownSuccessor { step_id, successor } => {
                write!(f, "step '{step_id}' references unknown step '{successor}'")
            }
            Self::DuplicateSuccessor { step_id, successor } => {
                write!(f, "step '{step_id}' lists successor '{successor}' more than once")
            }
            Self::SelfLoop { step_id } => write!(f, "step '{step_id}' lists itself as a successor"),
            Self::JoinNotSupported {
                step_id,
                predecessors,
            } => {
                let names: Vec<&str> = predecessors.iter().map(StepId::as_str).collect();
                write!(
                    f,
                    "step '{step_id}' has multiple predecessors ({}); joins are not supported",
                    names.join(", ")
                )
            }
            Self::EntryHasPredecessor { step_id } => {
                write!(f, "entry step '{step_id}' must not be the successor of another step")
            }
            Self::CycleDetected => write!(f, "step graph contains a cycle"),
            Self::UnreachableStep { step_id } => {
                write!(f, "step '{step_id}' is not reachable from the entry step")
            }
            Self::InvalidTrigger { reason } => write!(f, "invalid trigger: {reason}"),
            Self::InvalidStepConfig { step_id, reason } => {
                write!(f, "invalid configuration for step '{step_id}': {reason}")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// A synchronous engine operation was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The workflow definition failed validation.
    Validation(ValidationError),
    /// No workflow with this id is stored.
    WorkflowNotFound { workflow_id: WorkflowId },
    /// No instance with this id is tracked.
    InstanceNotFound { instance_id: InstanceId },
    /// The workflow exists but is not active.
    WorkflowInactive {
        workflow_id: WorkflowId,
        status: WorkflowStatus,
    },
    /// No approval is pending for this instance step.
    ApprovalNotFound {
        instance_id: InstanceId,
        step_id: StepId,
    },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(e) => write!(f, "validation failed: {e}"),
            Self::WorkflowNotFound { workflow_id } => write!(f, "workflow not found: {workflow_id}"),
            Self::InstanceNotFound { instance_id } => write!(f, "instance not found: {instance_id}"),
            Self::WorkflowInactive {
                workflow_id,
                status,
            } => write!(f, "workflow {workflow_id} is {status} and cannot be started"),
            Self::ApprovalNotFound {
                instance_id,
                step_id,
            } => write!(f, "no pending approval for step '{step_id}' of {instance_id}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Validation(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ValidationError> for EngineError {
    fn from(e: ValidationError) -> Self {
        Self::Validation(e)
    }
}

/// A step handler could not produce output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// An action step named an action that is not registered.
    UnknownAction { action: String },
    /// The step configuration does not match the handler.
    InvalidConfig { reason: String },
    /// An approval step was rejected.
    ApprovalRejected {
        decided_by: String,
        comment: Option<String>,
    },
    /// A notification could not be delivered and retrying will not help.
    DeliveryFailed { channel: String, reason: String },
    /// Any other handler failure.
    Failed { message: String },
}

impl HandlerError {
    /// Creates a generic failure with the given message.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownAction { action } => write!(f, "Unknown action: {action}"),
            Self::InvalidConfig { reason } => write!(f, "invalid step configuration: {reason}"),
            Self::ApprovalRejected {
                decided_by,
                comment,
            } => match comment {
                Some(comment) => write!(f, "approval rejected by {decided_by}: {comment}"),
                None => write!(f, "approval rejected by {decided_by}"),
            },
            Self::DeliveryFailed { channel, reason } => {
                write!(f, "notification delivery on '{channel}' failed: {reason}")
            }
            Self::Failed { message } => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for HandlerError {}

/// A dispatched step failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepError {
    /// No handler is registered for the step's type.
    UnknownStepType {
        step_id: StepId,
        step_type: StepType,
    },
    /// The step is missing from the workflow snapshot.
    StepNotFound { step_id: StepId },
    /// The handler returned an error.
    HandlerExecution {
        step_id: StepId,
        source: HandlerError,
    },
    /// The handler did not finish before the step deadline.
    TimedOut { step_id: StepId, after: Duration },
    /// The handler panicked.
    Panicked { step_id: StepId },
}

impl StepError {
    /// Returns the step that failed.
    #[must_use]
    pub fn step_id(&self) -> &StepId {
        match self {
            Self::UnknownStepType { step_id, .. }
            | Self::StepNotFound { step_id }
            | Self::HandlerExecution { step_id, .. }
            | Self::TimedOut { step_id, .. }
            | Self::Panicked { step_id } => step_id,
        }
    }
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownStepType { step_id, step_type } => {
                write!(f, "step '{step_id}' has unknown step type '{step_type}'")
            }
            Self::StepNotFound { step_id } => write!(f, "step '{step_id}' not found in workflow"),
            Self::HandlerExecution { step_id, source } => {
                write!(f, "step '{step_id}' failed: {source}")
            }
            Self::TimedOut { step_id, after } => {
                write!(f, "step '{step_id}' timed out after {}ms", after.as_millis())
            }
            Self::Panicked { step_id } => write!(f, "step '{step_id}' handler panicked"),
        }
    }
}

impl std::error::Error for StepError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::HandlerExecution { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_action_message() {
        let err = HandlerError::UnknownAction {
            action: "doesNotExist".to_string(),
        };
        assert_eq!(err.to_string(), "Unknown action: doesNotExist");
    }

    #[test]
    fn handler_execution_wraps_message() {
        let err = StepError::HandlerExecution {
            step_id: StepId::from("A"),
            source: HandlerError::UnknownAction {
                action: "doesNotExist".to_string(),
            },
        };
        let message = err.to_string();
        assert!(message.contains("step 'A' failed"));
        assert!(message.contains("Unknown action: doesNotExist"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn join_error_lists_predecessors() {
        let err = ValidationError::JoinNotSupported {
            step_id: StepId::from("D"),
            predecessors: vec![StepId::from("B"), StepId::from("C")],
        };
        assert!(err.to_string().contains("(B, C)"));
    }

    #[test]
    fn engine_error_from_validation() {
        let err: EngineError = ValidationError::NoSteps.into();
        assert!(matches!(err, EngineError::Validation(ValidationError::NoSteps)));
        assert!(err.to_string().contains("at least one step"));
    }

    #[test]
    fn timed_out_reports_millis() {
        let err = StepError::TimedOut {
            step_id: StepId::from("wait"),
            after: Duration::from_millis(250),
        };
        assert_eq!(err.to_string(), "step 'wait' timed out after 250ms");
        assert_eq!(err.step_id().as_str(), "wait");
    }
}
