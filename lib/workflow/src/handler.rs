//! The step handler seam.
//!
//! Each step type is executed by a [`StepHandler`]. The engine looks the
//! handler up by the step's type, hands it a snapshot of the instance data,
//! and merges whatever the handler changed back into the instance.

use crate::data::DataBag;
use crate::error::HandlerError;
use crate::step::{StepType, WorkflowStep};
use async_trait::async_trait;
use caseflow_core::{InstanceId, WorkflowId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// What a handler knows about the step it is running.
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    /// The instance being advanced.
    pub instance_id: InstanceId,
    /// The workflow the instance runs.
    pub workflow_id: WorkflowId,
    /// The step definition, including its typed configuration.
    pub step: &'a WorkflowStep,
}

/// Executes one kind of step.
///
/// Handlers may be abandoned mid-flight when their instance is cancelled,
/// fails on a sibling branch, or times out. Side effects should be
/// idempotent.
#[async_trait]
pub trait StepHandler: Send + Sync {
    /// Runs the step against a snapshot of the instance data.
    ///
    /// Returns the data for the step's successors. Keys added, changed, or
    /// removed relative to `data` are applied to the instance.
    async fn execute(&self, ctx: &StepContext<'_>, data: DataBag) -> Result<DataBag, HandlerError>;
}

/// Handlers keyed by step type.
#[derive(Clone, Default)]
pub struct StepRegistry {
    handlers: HashMap<StepType, Arc<dyn StepHandler>>,
}

impl StepRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler, replacing any previous one for the same type.
    pub fn register(&mut self, step_type: StepType, handler: Arc<dyn StepHandler>) {
        self.handlers.insert(step_type, handler);
    }

    /// Returns the handler for a step type.
    #[must_use]
    pub fn get(&self, step_type: &StepType) -> Option<Arc<dyn StepHandler>> {
        self.handlers.get(step_type).cloned()
    }

    /// Returns true if a handler is registered for the type.
    #[must_use]
    pub fn contains(&self, step_type: &StepType) -> bool {
        self.handlers.contains_key(step_type)
    }

    /// Returns the registered step types.
    pub fn step_types(&self) -> impl Iterator<Item = &StepType> {
        self.handlers.keys()
    }
}

impl fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepRegistry")
            .field("step_types", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
