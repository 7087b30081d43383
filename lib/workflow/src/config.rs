//! Engine configuration.

use crate::event::DEFAULT_EVENT_CAPACITY;
use crate::step::{StepType, WorkflowStep};
use serde::Deserialize;
use std::time::Duration;

/// Tunables for [`WorkflowEngine`](crate::WorkflowEngine).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    /// Deadline for steps without their own `timeoutMs`, in milliseconds.
    /// `None` or 0 means no deadline.
    #[serde(default)]
    pub default_step_timeout_ms: Option<u64>,

    /// Deadline for approval steps without their own `timeoutMs`.
    /// Long enough for a person to respond; 0 disables it.
    #[serde(default = "default_approval_timeout_ms")]
    pub approval_timeout_ms: Option<u64>,

    /// Buffer size of the event broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_approval_timeout_ms() -> Option<u64> {
    Some(24 * 60 * 60 * 1000)
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_step_timeout_ms: None,
            approval_timeout_ms: default_approval_timeout_ms(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl EngineConfig {
    /// Returns the deadline that applies to `step`, if any.
    #[must_use]
    pub fn step_deadline(&self, step: &WorkflowStep) -> Option<Duration> {
        let millis = match step.timeout_ms {
            Some(ms) => Some(ms),
            None if step.step_type() == StepType::Approval => self.approval_timeout_ms,
            None => self.default_step_timeout_ms,
        };
        millis.filter(|ms| *ms > 0).map(Duration::from_millis)
    }
}
