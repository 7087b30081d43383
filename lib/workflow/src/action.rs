//! Named actions run by `action` steps.
//!
//! An action step's config names an action (`"action": "processDocument"`)
//! and passes it free-form `params`. Actions are looked up in an
//! [`ActionRegistry`] owned by the engine; an unknown name fails the step.

use crate::data::DataBag;
use crate::error::HandlerError;
use crate::handler::{StepContext, StepHandler};
use crate::step::StepConfig;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value as JsonValue, json};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// A named unit of business logic.
#[async_trait]
pub trait Action: Send + Sync {
    /// Runs the action. Returns the data for the step's successors.
    async fn run(&self, params: &JsonValue, data: DataBag) -> Result<DataBag, HandlerError>;
}

/// Actions keyed by name.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with `processDocument` and `updateDatabase`.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("processDocument", Arc::new(ProcessDocument));
        registry.register("updateDatabase", Arc::new(UpdateDatabase));
        registry
    }

    /// Registers an action, replacing any previous one with the same name.
    pub fn register(&mut self, name: impl Into<String>, action: Arc<dyn Action>) {
        self.actions.insert(name.into(), action);
    }

    /// Returns the action registered under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(name).cloned()
    }

    /// Returns the registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.names())
            .finish()
    }
}

/// Step handler for `action` steps.
#[derive(Debug, Clone)]
pub struct ActionStepHandler {
    actions: Arc<ActionRegistry>,
}

impl ActionStepHandler {
    /// Creates a handler backed by the given registry.
    #[must_use]
    pub fn new(actions: Arc<ActionRegistry>) -> Self {
        Self { actions }
    }
}

#[async_trait]
impl StepHandler for ActionStepHandler {
    async fn execute(&self, ctx: &StepContext<'_>, data: DataBag) -> Result<DataBag, HandlerError> {
        let StepConfig::Action(config) = &ctx.step.config else {
            return Err(HandlerError::InvalidConfig {
                reason: "action handler received a non-action step".to_string(),
            });
        };
        let action = self
            .actions
            .get(&config.action)
            .ok_or_else(|| HandlerError::UnknownAction {
                action: config.action.clone(),
            })?;

        debug!(action = %config.action, step_id = %ctx.step.id, "running action");
        action.run(&config.params, data).await
    }
}

/// Computes simple statistics for a text field.
///
/// Params: `field` (default `"document"`) names the data key holding the
/// text. Sets `documentProcessed` and `documentStats {words, characters}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessDocument;

#[async_trait]
impl Action for ProcessDocument {
    async fn run(&self, params: &JsonValue, data: DataBag) -> Result<DataBag, HandlerError> {
        let field = params
            .get("field")
            .and_then(JsonValue::as_str)
            .unwrap_or("document");
        let text = data
            .lookup(field)
            .and_then(JsonValue::as_str)
            .ok_or_else(|| HandlerError::failed(format!("no text found in field '{field}'")))?;

        let stats = json!({
            "words": text.split_whitespace().count(),
            "characters": text.chars().count(),
        });
        Ok(data.with("documentProcessed", true).with("documentStats", stats))
    }
}

/// Records that a row was written to `params.table`.
///
/// Persistence belongs to the embedding application; this action only
/// stamps the data with `databaseUpdated` and `lastUpdate`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateDatabase;

#[async_trait]
impl Action for UpdateDatabase {
    async fn run(&self, params: &JsonValue, data: DataBag) -> Result<DataBag, HandlerError> {
        let table = params
            .get("table")
            .and_then(JsonValue::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| HandlerError::InvalidConfig {
                reason: "updateDatabase requires a 'table' parameter".to_string(),
            })?;

        Ok(data.with("databaseUpdated", table).with("lastUpdate", Utc::now().to_rfc3339()))
    }
}
