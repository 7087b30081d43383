//! Instance execution state machine.
//!
//! The state tracks:
//! - Overall instance status
//! - Steps currently dispatched
//! - Accumulated instance data
//!
//! Legal transitions are `running -> completed | failed | cancelled`. Every
//! terminal status is final; later transitions are ignored and report
//! `false` rather than erroring.

use crate::data::{DataBag, DataPatch};
use crate::step::StepId;
use caseflow_core::{InstanceId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The overall status of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Steps are executing or waiting.
    Running,
    /// Every branch reached a terminal step.
    Completed,
    /// A step failed.
    Failed,
    /// Cancelled by a caller.
    Cancelled,
}

impl InstanceStatus {
    /// Returns true if this is a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A point-in-time view of an instance, as returned by the status query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSnapshot {
    pub instance_id: InstanceId,
    pub workflow_id: WorkflowId,
    pub status: InstanceStatus,
    /// Steps dispatched and not yet finished.
    pub current_steps: Vec<StepId>,
    /// Steps that completed, in completion order.
    pub completed_steps: Vec<StepId>,
    pub data: DataBag,
    /// The step that failed the instance, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<StepId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// What a step completion did to the instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StepAdvance {
    /// The instance is terminal or the step was not active; nothing changed.
    Ignored,
    /// Data was merged and the successors are now active.
    Continue,
    /// Data was merged and no active steps remain; the instance completed.
    Finished,
}

/// Mutable state of one instance, owned by its driver.
#[derive(Debug, Clone)]
pub(crate) struct InstanceState {
    instance_id: InstanceId,
    workflow_id: WorkflowId,
    status: InstanceStatus,
    active: Vec<StepId>,
    completed: Vec<StepId>,
    data: DataBag,
    failed_step: Option<StepId>,
    error: Option<String>,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl InstanceState {
    /// Creates a running instance with the entry step active.
    pub(crate) fn start(
        instance_id: InstanceId,
        workflow_id: WorkflowId,
        entry: StepId,
        data: DataBag,
    ) -> Self {
        Self {
            instance_id,
            workflow_id,
            status: InstanceStatus::Running,
            active: vec![entry],
            completed: Vec::new(),
            data,
            failed_step: None,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub(crate) fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    pub(crate) fn status(&self) -> InstanceStatus {
        self.status
    }

    pub(crate) fn data(&self) -> &DataBag {
        &self.data
    }

    pub(crate) fn active_steps(&self) -> &[StepId] {
        &self.active
    }

    /// Records a step completion: merges its patch and activates successors.
    pub(crate) fn complete_step(
        &mut self,
        step_id: &StepId,
        patch: &DataPatch,
        successors: &[StepId],
    ) -> StepAdvance {
        if self.status.is_terminal() {
            return StepAdvance::Ignored;
        }
        let Some(position) = self.active.iter().position(|id| id == step_id) else {
            return StepAdvance::Ignored;
        };

        self.active.remove(position);
        self.completed.push(step_id.clone());
        self.data.apply(patch);
        self.active.extend(successors.iter().cloned());

        if self.active.is_empty() {
            self.finish(InstanceStatus::Completed);
            StepAdvance::Finished
        } else {
            StepAdvance::Continue
        }
    }

    /// Fails the instance. Returns false if it was already terminal.
    pub(crate) fn fail(&mut self, step_id: &StepId, error: String) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.failed_step = Some(step_id.clone());
        self.error = Some(error);
        self.finish(InstanceStatus::Failed);
        true
    }

    /// Cancels the instance. Returns false if it was already terminal.
    pub(crate) fn cancel(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.finish(InstanceStatus::Cancelled);
        true
    }

    fn finish(&mut self, status: InstanceStatus) {
        self.status = status;
        self.active.clear();
        self.finished_at = Some(Utc::now());
    }

    pub(crate) fn snapshot(&self) -> InstanceSnapshot {
        InstanceSnapshot {
            instance_id: self.instance_id,
            workflow_id: self.workflow_id,
            status: self.status,
            current_steps: self.active.clone(),
            completed_steps: self.completed.clone(),
            data: self.data.clone(),
            failed_step: self.failed_step.clone(),
            error: self.error.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}
