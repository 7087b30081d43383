//! Workflow steps and their typed configurations.
//!
//! A step is one node of the workflow graph. Its `type` tag selects the
//! handler that runs it and the shape of its `config`:
//!
//! ```json
//! {
//!   "id": "classify",
//!   "name": "Is it urgent?",
//!   "type": "condition",
//!   "config": { "condition": "priority == \"urgent\"" },
//!   "nextSteps": ["notify"]
//! }
//! ```
//!
//! The four built-in kinds get typed configs. Any other `type` becomes a
//! [`StepConfig::Custom`] step, dispatched to whatever handler was registered
//! under that name.

use crate::expression::{Expr, ExprError};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::borrow::Borrow;
use std::fmt;
use std::time::Duration;

/// Identifier of a step, unique within its workflow.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(String);

impl StepId {
    /// Creates a step id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StepId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for StepId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for StepId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// The kind of a step, used as the handler registry key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StepType {
    /// Waits for an external decision.
    Approval,
    /// Sends a message; never changes data.
    Notification,
    /// Runs a named action from the action registry.
    Action,
    /// Evaluates a predicate into `conditionResult`.
    Condition,
    /// A kind registered by the embedding application.
    Custom(String),
}

impl StepType {
    /// Returns the `type` tag used in definitions.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Approval => "approval",
            Self::Notification => "notification",
            Self::Action => "action",
            Self::Condition => "condition",
            Self::Custom(kind) => kind,
        }
    }

    /// Maps a `type` tag to a step type.
    #[must_use]
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "approval" => Self::Approval,
            "notification" => Self::Notification,
            "action" => Self::Action,
            "condition" => Self::Condition,
            other => Self::Custom(other.to_string()),
        }
    }

    /// Returns true for the four built-in kinds.
    #[must_use]
    pub fn is_builtin(&self) -> bool {
        !matches!(self, Self::Custom(_))
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for an approval step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalConfig {
    /// Who may decide (roles or user names); informational.
    #[serde(default)]
    pub approvers: Vec<String>,
    /// Question shown to the approver.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

/// Configuration for a notification step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationConfig {
    /// Delivery channel, e.g. `email` or `slack`.
    pub channel: String,
    /// Recipient address or handle, if the channel needs one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    /// Message template; `{{path}}` is replaced from the data bag.
    pub template: String,
}

/// Configuration for an action step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionConfig {
    /// Name of the registered action.
    pub action: String,
    /// Action-specific parameters.
    #[serde(default, skip_serializing_if = "JsonValue::is_null")]
    pub params: JsonValue,
}

/// Configuration for a condition step.
///
/// Deserializes from either an expression string or an expression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawConditionConfig")]
pub struct ConditionConfig {
    /// The predicate to evaluate.
    pub condition: Expr,
}

#[derive(Deserialize)]
struct RawConditionConfig {
    condition: ConditionSource,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ConditionSource {
    Text(String),
    Tree(Expr),
}

impl TryFrom<RawConditionConfig> for ConditionConfig {
    type Error = ExprError;

    fn try_from(raw: RawConditionConfig) -> Result<Self, Self::Error> {
        let condition = match raw.condition {
            ConditionSource::Text(text) => Expr::parse(&text)?,
            ConditionSource::Tree(expr) => expr,
        };
        Ok(Self { condition })
    }
}

/// Typed configuration of a step; the variant is the step's type.
#[derive(Debug, Clone, PartialEq)]
pub enum StepConfig {
    Approval(ApprovalConfig),
    Notification(NotificationConfig),
    Action(ActionConfig),
    Condition(ConditionConfig),
    /// A registered extension kind with free-form parameters.
    Custom { kind: String, params: JsonValue },
}

impl StepConfig {
    /// Returns the step type for this configuration.
    #[must_use]
    pub fn step_type(&self) -> StepType {
        match self {
            Self::Approval(_) => StepType::Approval,
            Self::Notification(_) => StepType::Notification,
            Self::Action(_) => StepType::Action,
            Self::Condition(_) => StepType::Condition,
            Self::Custom { kind, .. } => StepType::Custom(kind.clone()),
        }
    }
}

/// A single step of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawStep", into = "RawStep")]
pub struct WorkflowStep {
    /// Identifier, unique within the workflow.
    pub id: StepId,
    /// Human-readable name.
    pub name: String,
    /// Typed configuration.
    pub config: StepConfig,
    /// Successor steps, all started when this step completes.
    pub next_steps: Vec<StepId>,
    /// Deadline override for this step, in milliseconds.
    pub timeout_ms: Option<u64>,
}

impl WorkflowStep {
    /// Creates a terminal step with the given configuration.
    #[must_use]
    pub fn new(id: impl Into<StepId>, name: impl Into<String>, config: StepConfig) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            config,
            next_steps: Vec::new(),
            timeout_ms: None,
        }
    }

    /// Creates an action step.
    #[must_use]
    pub fn action(id: impl Into<StepId>, name: impl Into<String>, action: impl Into<String>) -> Self {
        Self::new(
            id,
            name,
            StepConfig::Action(ActionConfig {
                action: action.into(),
                params: JsonValue::Null,
            }),
        )
    }

    /// Creates a condition step.
    #[must_use]
    pub fn condition(id: impl Into<StepId>, name: impl Into<String>, condition: Expr) -> Self {
        Self::new(id, name, StepConfig::Condition(ConditionConfig { condition }))
    }

    /// Creates a notification step.
    #[must_use]
    pub fn notification(
        id: impl Into<StepId>,
        name: impl Into<String>,
        channel: impl Into<String>,
        template: impl Into<String>,
    ) -> Self {
        Self::new(
            id,
            name,
            StepConfig::Notification(NotificationConfig {
                channel: channel.into(),
                recipient: None,
                template: template.into(),
            }),
        )
    }

    /// Creates an approval step.
    #[must_use]
    pub fn approval<S: Into<String>>(
        id: impl Into<StepId>,
        name: impl Into<String>,
        approvers: impl IntoIterator<Item = S>,
    ) -> Self {
        Self::new(
            id,
            name,
            StepConfig::Approval(ApprovalConfig {
                approvers: approvers.into_iter().map(Into::into).collect(),
                prompt: None,
            }),
        )
    }

    /// Creates a step of a custom registered kind.
    #[must_use]
    pub fn custom(
        id: impl Into<StepId>,
        name: impl Into<String>,
        kind: impl Into<String>,
        params: JsonValue,
    ) -> Self {
        Self::new(
            id,
            name,
            StepConfig::Custom {
                kind: kind.into(),
                params,
            },
        )
    }

    /// Sets the successor steps.
    #[must_use]
    pub fn then<S: Into<StepId>>(mut self, next: impl IntoIterator<Item = S>) -> Self {
        self.next_steps = next.into_iter().map(Into::into).collect();
        self
    }

    /// Sets action parameters. No effect on other step kinds.
    #[must_use]
    pub fn with_params(mut self, params: JsonValue) -> Self {
        if let StepConfig::Action(config) = &mut self.config {
            config.params = params;
        }
        self
    }

    /// Sets a deadline for this step.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Returns the step type.
    #[must_use]
    pub fn step_type(&self) -> StepType {
        self.config.step_type()
    }

    /// Returns true if the step has no successors.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.next_steps.is_empty()
    }
}

/// Wire shape of a step: `type` tag plus an untyped `config` object.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStep {
    id: StepId,
    #[serde(default)]
    name: String,
    #[serde(rename = "type")]
    step_type: String,
    #[serde(default)]
    config: JsonValue,
    #[serde(default)]
    next_steps: Vec<StepId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timeout_ms: Option<u64>,
}

impl TryFrom<RawStep> for WorkflowStep {
    type Error = serde_json::Error;

    fn try_from(raw: RawStep) -> Result<Self, Self::Error> {
        // A missing config is an empty object so that optional fields default.
        let config_value = match raw.config {
            JsonValue::Null => JsonValue::Object(serde_json::Map::new()),
            other => other,
        };
        let config = match StepType::from_tag(&raw.step_type) {
            StepType::Approval => StepConfig::Approval(serde_json::from_value(config_value)?),
            StepType::Notification => StepConfig::Notification(serde_json::from_value(config_value)?),
            StepType::Action => StepConfig::Action(serde_json::from_value(config_value)?),
            StepType::Condition => StepConfig::Condition(serde_json::from_value(config_value)?),
            StepType::Custom(kind) => StepConfig::Custom {
                kind,
                params: config_value,
            },
        };
        Ok(Self {
            id: raw.id,
            name: raw.name,
            config,
            next_steps: raw.next_steps,
            timeout_ms: raw.timeout_ms,
        })
    }
}

impl From<WorkflowStep> for RawStep {
    fn from(step: WorkflowStep) -> Self {
        let step_type = step.step_type().as_str().to_string();
        let config = match step.config {
            StepConfig::Approval(c) => serde_json::to_value(c),
            StepConfig::Notification(c) => serde_json::to_value(c),
            StepConfig::Action(c) => serde_json::to_value(c),
            StepConfig::Condition(c) => serde_json::to_value(c),
            StepConfig::Custom { params, .. } => Ok(params),
        }
        .unwrap_or(JsonValue::Null);
        Self {
            id: step.id,
            name: step.name,
            step_type,
            config,
            next_steps: step.next_steps,
            timeout_ms: step.timeout_ms,
        }
    }
}
