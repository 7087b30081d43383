//! Workflow definition types.
//!
//! A [`WorkflowDefinition`] is what a builder submits. Once validated and
//! stored it becomes a [`Workflow`]: the same fields plus an id, timestamps,
//! and the validated step graph.

use crate::error::ValidationError;
use crate::graph::WorkflowGraph;
use crate::step::{StepConfig, StepId, WorkflowStep};
use crate::trigger::Trigger;
use caseflow_core::WorkflowId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a stored workflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// New instances may be started.
    #[default]
    Active,
    /// Temporarily disabled.
    Inactive,
    /// Retired; kept for reference only.
    Archived,
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Inactive => write!(f, "inactive"),
            Self::Archived => write!(f, "archived"),
        }
    }
}

/// A workflow as submitted by a builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    /// Human-readable name.
    pub name: String,
    /// Description of what this workflow does.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// How the workflow is expected to be started.
    #[serde(default)]
    pub trigger: Trigger,
    /// Steps; the first one is the entry.
    pub steps: Vec<WorkflowStep>,
    /// Initial status.
    #[serde(default)]
    pub status: WorkflowStatus,
}

impl WorkflowDefinition {
    /// Creates an active, manually triggered definition.
    #[must_use]
    pub fn new(name: impl Into<String>, steps: Vec<WorkflowStep>) -> Self {
        Self {
            name: name.into(),
            description: None,
            trigger: Trigger::Manual,
            steps,
            status: WorkflowStatus::Active,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the trigger.
    #[must_use]
    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = trigger;
        self
    }

    /// Sets the initial status.
    #[must_use]
    pub fn with_status(mut self, status: WorkflowStatus) -> Self {
        self.status = status;
        self
    }

    /// Validates the definition and builds its graph.
    ///
    /// # Errors
    ///
    /// Returns the first validation rule the definition breaks.
    pub fn validate(&self) -> Result<WorkflowGraph, ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }
        self.trigger.validate()?;
        let graph = WorkflowGraph::build(&self.steps)?;
        for step in &self.steps {
            validate_step_config(step)?;
        }
        Ok(graph)
    }
}

fn validate_step_config(step: &WorkflowStep) -> Result<(), ValidationError> {
    let invalid = |reason: &str| ValidationError::InvalidStepConfig {
        step_id: step.id.clone(),
        reason: reason.to_string(),
    };

    if step.timeout_ms == Some(0) {
        return Err(invalid("timeoutMs must be greater than zero"));
    }

    match &step.config {
        StepConfig::Action(config) if config.action.trim().is_empty() => {
            Err(invalid("action name must not be empty"))
        }
        StepConfig::Notification(config) if config.channel.trim().is_empty() => {
            Err(invalid("notification channel must not be empty"))
        }
        StepConfig::Notification(config) if config.template.is_empty() => {
            Err(invalid("notification template must not be empty"))
        }
        StepConfig::Custom { kind, .. } if kind.trim().is_empty() => {
            Err(invalid("step type must not be empty"))
        }
        StepConfig::Custom { kind, .. } if is_builtin_tag(kind) => {
            Err(invalid("custom step type must not reuse a built-in type name"))
        }
        _ => Ok(()),
    }
}

fn is_builtin_tag(kind: &str) -> bool {
    matches!(kind, "approval" | "notification" | "action" | "condition")
}

/// A stored workflow.
///
/// Instances hold an `Arc<Workflow>` taken when they start, so an update
/// never changes the steps of a run already in flight.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    /// Unique identifier for this workflow.
    pub id: WorkflowId,
    /// Human-readable name.
    pub name: String,
    /// Description, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// How the workflow is expected to be started.
    pub trigger: Trigger,
    /// Steps; the first one is the entry.
    pub steps: Vec<WorkflowStep>,
    /// Lifecycle status.
    pub status: WorkflowStatus,
    /// When this workflow was created.
    pub created_at: DateTime<Utc>,
    /// When this workflow was last updated.
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    graph: WorkflowGraph,
}

impl Workflow {
    /// Validates a definition and stamps it with a fresh id and timestamps.
    ///
    /// # Errors
    ///
    /// Returns the first validation rule the definition breaks.
    pub fn from_definition(definition: WorkflowDefinition) -> Result<Self, ValidationError> {
        let graph = definition.validate()?;
        let now = Utc::now();
        Ok(Self {
            id: WorkflowId::new(),
            name: definition.name,
            description: definition.description,
            trigger: definition.trigger,
            steps: definition.steps,
            status: definition.status,
            created_at: now,
            updated_at: now,
            graph,
        })
    }

    /// Returns the entry step.
    #[must_use]
    pub fn entry_step(&self) -> &WorkflowStep {
        // The graph only validates with at least one step.
        &self.steps[0]
    }

    /// Looks up a step by id.
    #[must_use]
    pub fn step(&self, step_id: &StepId) -> Option<&WorkflowStep> {
        self.graph
            .position(step_id)
            .and_then(|index| self.steps.get(index))
    }

    /// Returns the validated graph.
    #[must_use]
    pub fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    /// Returns true if new instances may be started.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == WorkflowStatus::Active
    }

    /// Returns the editable part of this workflow.
    #[must_use]
    pub fn to_definition(&self) -> WorkflowDefinition {
        WorkflowDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            trigger: self.trigger.clone(),
            steps: self.steps.clone(),
            status: self.status,
        }
    }

    /// Marks the workflow as updated (bumps updated_at timestamp).
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// A partial change to a stored workflow. `None` fields are left as they are.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<Trigger>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<WorkflowStep>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<WorkflowStatus>,
}

impl WorkflowUpdate {
    /// Creates an empty update.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = Some(trigger);
        self
    }

    #[must_use]
    pub fn steps(mut self, steps: Vec<WorkflowStep>) -> Self {
        self.steps = Some(steps);
        self
    }

    #[must_use]
    pub fn status(mut self, status: WorkflowStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Applies the update to a copy of `workflow`, re-validating the result.
    ///
    /// The id and `created_at` are preserved; `updated_at` is refreshed.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the updated workflow is invalid; the
    /// original is untouched in that case.
    pub fn apply(self, workflow: &Workflow) -> Result<Workflow, ValidationError> {
        let mut definition = workflow.to_definition();
        if let Some(name) = self.name {
            definition.name = name;
        }
        if let Some(description) = self.description {
            definition.description = Some(description);
        }
        if let Some(trigger) = self.trigger {
            definition.trigger = trigger;
        }
        if let Some(steps) = self.steps {
            definition.steps = steps;
        }
        if let Some(status) = self.status {
            definition.status = status;
        }

        let graph = definition.validate()?;
        let mut updated = Workflow {
            id: workflow.id,
            name: definition.name,
            description: definition.description,
            trigger: definition.trigger,
            steps: definition.steps,
            status: definition.status,
            created_at: workflow.created_at,
            updated_at: workflow.updated_at,
            graph,
        };
        updated.touch();
        Ok(updated)
    }
}

/// Summary information about a workflow (for listings).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSummary {
    /// Workflow ID.
    pub id: WorkflowId,
    /// Workflow name.
    pub name: String,
    /// Description, if any.
    pub description: Option<String>,
    /// Lifecycle status.
    pub status: WorkflowStatus,
    /// Number of steps.
    pub step_count: usize,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last updated timestamp.
    pub updated_at: DateTime<Utc>,
}

impl From<&Workflow> for WorkflowSummary {
    fn from(workflow: &Workflow) -> Self {
        Self {
            id: workflow.id,
            name: workflow.name.clone(),
            description: workflow.description.clone(),
            status: workflow.status,
            step_count: workflow.steps.len(),
            created_at: workflow.created_at,
            updated_at: workflow.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::Expr;
    use serde_json::json;

    fn triage() -> WorkflowDefinition {
        WorkflowDefinition::new(
            "triage",
            vec![
                WorkflowStep::action("A", "Process", "processDocument").then(["B"]),
                WorkflowStep::condition("B", "Check", Expr::parse("documentProcessed == true").unwrap())
                    .then(["C"]),
                WorkflowStep::notification("C", "Notify", "email", "Done with {{ticketId}}"),
            ],
        )
    }

    #[test]
    fn definition_from_json() {
        let definition: WorkflowDefinition = serde_json::from_value(json!({
            "name": "triage",
            "trigger": {"type": "event", "config": {"event": "ticket.created"}},
            "steps": [
                {"id": "A", "name": "Process", "type": "action",
                 "config": {"action": "processDocument"}, "nextSteps": ["B"]},
                {"id": "B", "name": "Notify", "type": "notification",
                 "config": {"channel": "email", "template": "hi"}}
            ]
        }))
        .expect("deserialize");

        assert_eq!(definition.status, WorkflowStatus::Active);
        assert_eq!(definition.trigger, Trigger::event("ticket.created"));
        assert!(definition.validate().is_ok());
    }

    #[test]
    fn create_assigns_id_and_timestamps() {
        let workflow = Workflow::from_definition(triage()).expect("valid");

        assert_eq!(workflow.entry_step().id.as_str(), "A");
        assert_eq!(workflow.created_at, workflow.updated_at);
        assert!(workflow.is_active());
        assert_eq!(workflow.step(&StepId::from("C")).map(|s| s.name.as_str()), Some("Notify"));
        assert!(workflow.step(&StepId::from("Z")).is_none());
    }

    #[test]
    fn blank_name_rejected() {
        let mut definition = triage();
        definition.name = "  ".to_string();
        assert_eq!(definition.validate().unwrap_err(), ValidationError::EmptyName);
    }

    #[test]
    fn empty_action_rejected() {
        let definition = WorkflowDefinition::new("x", vec![WorkflowStep::action("A", "A", "")]);
        assert!(matches!(
            definition.validate(),
            Err(ValidationError::InvalidStepConfig { .. })
        ));
    }

    #[test]
    fn zero_timeout_rejected() {
        let mut step = WorkflowStep::action("A", "A", "processDocument");
        step.timeout_ms = Some(0);
        let definition = WorkflowDefinition::new("x", vec![step]);
        assert!(matches!(
            definition.validate(),
            Err(ValidationError::InvalidStepConfig { .. })
        ));
    }

    #[test]
    fn custom_kind_cannot_shadow_builtin() {
        let definition = WorkflowDefinition::new(
            "x",
            vec![WorkflowStep::custom("A", "A", "action", json!({}))],
        );
        assert!(matches!(
            definition.validate(),
            Err(ValidationError::InvalidStepConfig { .. })
        ));
    }

    #[test]
    fn invalid_trigger_rejected() {
        let definition = triage().with_trigger(Trigger::schedule("every day"));
        assert!(matches!(
            definition.validate(),
            Err(ValidationError::InvalidTrigger { .. })
        ));
    }

    #[test]
    fn update_refreshes_updated_at_and_keeps_identity() {
        let workflow = Workflow::from_definition(triage()).expect("valid");
        std::thread::sleep(std::time::Duration::from_millis(2));

        let updated = WorkflowUpdate::new()
            .name("triage v2")
            .status(WorkflowStatus::Inactive)
            .apply(&workflow)
            .expect("valid update");

        assert_eq!(updated.id, workflow.id);
        assert_eq!(updated.created_at, workflow.created_at);
        assert!(updated.updated_at > workflow.updated_at);
        assert_eq!(updated.name, "triage v2");
        assert!(!updated.is_active());
    }

    #[test]
    fn invalid_update_is_rejected() {
        let workflow = Workflow::from_definition(triage()).expect("valid");
        let result = WorkflowUpdate::new()
            .steps(vec![WorkflowStep::action("A", "A", "x").then(["missing"])])
            .apply(&workflow);
        assert!(matches!(result, Err(ValidationError::UnknownSuccessor { .. })));
    }

    #[test]
    fn serializes_camel_case_without_graph() {
        let workflow = Workflow::from_definition(triage()).expect("valid");
        let json = serde_json::to_value(&workflow).expect("serialize");

        assert!(json.get("createdAt").is_some());
        assert!(json.get("graph").is_none());
        assert_eq!(json["status"], "active");
        assert_eq!(json["steps"][0]["nextSteps"], json!(["B"]));
    }

    #[test]
    fn summary_counts_steps() {
        let workflow = Workflow::from_definition(triage()).expect("valid");
        let summary = WorkflowSummary::from(&workflow);
        assert_eq!(summary.step_count, 3);
        assert_eq!(summary.name, "triage");
    }
}
