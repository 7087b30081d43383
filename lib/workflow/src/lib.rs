//! Workflow engine for the caseflow platform.
//!
//! This crate provides the workflow execution engine, including:
//!
//! - **Definitions**: Validated step graphs stored with an id and timestamps
//! - **Steps**: Approval, notification, action, condition, and custom steps
//! - **Execution**: One driver task per instance, with fan-out and first-failure semantics
//! - **Events**: Typed lifecycle events for listeners and broadcast subscribers
//! - **Approvals**: Pending decisions resolved by callers
//! - **Triggers**: Event, schedule, and manual trigger metadata

pub mod action;
pub mod approval;
pub mod condition;
pub mod config;
pub mod data;
pub mod definition;
pub mod engine;
pub mod error;
pub mod event;
pub mod execution;
pub mod expression;
pub mod graph;
pub mod handler;
pub mod notification;
mod orchestrator;
pub mod step;
mod tracker;
pub mod trigger;

pub use action::{Action, ActionRegistry, ActionStepHandler};
pub use approval::{APPROVALS_KEY, ApprovalBook, ApprovalDecision, ApprovalStepHandler, PendingApproval};
pub use condition::{CONDITION_RESULT_KEY, ConditionStepHandler};
pub use config::EngineConfig;
pub use data::{DataBag, DataPatch, PatchOp};
pub use definition::{Workflow, WorkflowDefinition, WorkflowStatus, WorkflowSummary, WorkflowUpdate};
pub use engine::{EngineBuilder, WorkflowEngine};
pub use error::{EngineError, HandlerError, StepError, ValidationError};
pub use event::{EngineEvent, EventBus, EventKind, ListenerId};
pub use execution::{InstanceSnapshot, InstanceStatus};
pub use expression::{CompareOp, Expr, ExprError};
pub use graph::WorkflowGraph;
pub use handler::{StepContext, StepHandler, StepRegistry};
pub use notification::{DeliveryError, LogNotifier, Notification, NotificationStepHandler, Notifier};
pub use step::{
    ActionConfig, ApprovalConfig, ConditionConfig, NotificationConfig, StepConfig, StepId, StepType,
    WorkflowStep,
};
pub use trigger::{Trigger, TriggerType};
pub use caseflow_core::{InstanceId, UserId, WorkflowId};
