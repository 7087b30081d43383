//! The workflow engine.
//!
//! [`WorkflowEngine`] stores workflow definitions, starts instances, and
//! answers status queries. Each started instance is advanced by its own
//! driver task (see the `orchestrator` module); the engine only holds the
//! handles needed to observe and cancel it.
//!
//! ```no_run
//! # use caseflow_workflow::{WorkflowEngine, WorkflowDefinition, WorkflowStep, DataBag, Expr};
//! # async fn demo() -> Result<(), caseflow_workflow::EngineError> {
//! let engine = WorkflowEngine::new();
//! let workflow_id = engine.create_workflow(WorkflowDefinition::new(
//!     "triage",
//!     vec![
//!         WorkflowStep::action("A", "Process", "processDocument").then(["B"]),
//!         WorkflowStep::condition("B", "Processed?", Expr::parse("documentProcessed == true").unwrap()),
//!     ],
//! ))?;
//! let instance_id = engine.start_workflow(workflow_id, DataBag::new().with("document", "hi"))?;
//! let snapshot = engine.wait_for_instance(instance_id).await;
//! # Ok(())
//! # }
//! ```

use crate::action::{Action, ActionRegistry, ActionStepHandler};
use crate::approval::{ApprovalBook, ApprovalDecision, ApprovalStepHandler, PendingApproval};
use crate::condition::ConditionStepHandler;
use crate::config::EngineConfig;
use crate::data::DataBag;
use crate::definition::{Workflow, WorkflowDefinition, WorkflowSummary, WorkflowUpdate};
use crate::error::EngineError;
use crate::event::EventBus;
use crate::execution::{InstanceSnapshot, InstanceState, InstanceStatus};
use crate::handler::{StepHandler, StepRegistry};
use crate::notification::{LogNotifier, NotificationStepHandler, Notifier};
use crate::orchestrator::InstanceDriver;
use crate::step::{StepId, StepType};
use crate::tracker::InstanceTracker;
use caseflow_core::{InstanceId, WorkflowId};
use chrono::Utc;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

struct Inner {
    config: EngineConfig,
    workflows: RwLock<HashMap<WorkflowId, Arc<Workflow>>>,
    /// Replaced wholesale on registration; running instances keep the
    /// registry they started with.
    handlers: RwLock<Arc<StepRegistry>>,
    tracker: InstanceTracker,
    approvals: ApprovalBook,
    events: EventBus,
    actions: Arc<ActionRegistry>,
}

/// In-process workflow engine. Cloning shares the engine.
#[derive(Clone)]
pub struct WorkflowEngine {
    inner: Arc<Inner>,
}

impl WorkflowEngine {
    /// Creates an engine with default configuration and built-in handlers.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Returns a builder for customizing actions, notifier, and handlers.
    #[must_use]
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Validates and stores a workflow. Returns its new id.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Validation` if the definition is malformed;
    /// nothing is stored in that case.
    #[instrument(skip_all, fields(name = %definition.name))]
    pub fn create_workflow(&self, definition: WorkflowDefinition) -> Result<WorkflowId, EngineError> {
        let workflow = Workflow::from_definition(definition)?;
        let id = workflow.id;
        self.write_workflows().insert(id, Arc::new(workflow));
        info!(workflow_id = %id, "workflow created");
        Ok(id)
    }

    /// Applies a partial update. Returns false if the workflow is unknown.
    ///
    /// Instances already running keep the version they started with.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Validation` if the updated workflow is invalid;
    /// the stored workflow is left unchanged.
    #[instrument(skip(self, update))]
    pub fn update_workflow(&self, id: WorkflowId, update: WorkflowUpdate) -> Result<bool, EngineError> {
        let mut workflows = self.write_workflows();
        let Some(current) = workflows.get(&id) else {
            return Ok(false);
        };
        let updated = update.apply(current)?;
        workflows.insert(id, Arc::new(updated));
        info!("workflow updated");
        Ok(true)
    }

    /// Removes a workflow. Returns false if it was unknown.
    ///
    /// Running instances are not affected; they finish against the snapshot
    /// they started with.
    #[instrument(skip(self))]
    pub fn delete_workflow(&self, id: WorkflowId) -> bool {
        let removed = self.write_workflows().remove(&id).is_some();
        if removed {
            let running = self.inner.tracker.running_for(id).len();
            info!(running, "workflow deleted");
        }
        removed
    }

    /// Returns a stored workflow.
    #[must_use]
    pub fn get_workflow(&self, id: WorkflowId) -> Option<Arc<Workflow>> {
        self.read_workflows().get(&id).cloned()
    }

    /// Returns summaries of all stored workflows, oldest first.
    ///
    /// Workflows created at the same instant are ordered by id.
    #[must_use]
    pub fn list_workflows(&self) -> Vec<WorkflowSummary> {
        let mut summaries: Vec<WorkflowSummary> = self
            .read_workflows()
            .values()
            .map(|w| WorkflowSummary::from(w.as_ref()))
            .collect();
        summaries.sort_by_key(|s| (s.created_at, s.id));
        summaries
    }

    /// Starts an instance and returns its id without waiting for any step.
    ///
    /// Step failures after this returns are reported through the instance
    /// status and a `workflowFailed` event, never to the caller. Must be
    /// called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowNotFound` for an unknown id and `WorkflowInactive` if
    /// the workflow is not active.
    #[instrument(skip(self, initial_data))]
    pub fn start_workflow(&self, workflow_id: WorkflowId, initial_data: DataBag) -> Result<InstanceId, EngineError> {
        let workflow = self
            .get_workflow(workflow_id)
            .ok_or(EngineError::WorkflowNotFound { workflow_id })?;
        if !workflow.is_active() {
            return Err(EngineError::WorkflowInactive {
                workflow_id,
                status: workflow.status,
            });
        }

        let instance_id = InstanceId::new();
        let state = InstanceState::start(
            instance_id,
            workflow_id,
            workflow.entry_step().id.clone(),
            initial_data,
        );
        let (tx, rx) = watch::channel(state.snapshot());
        let cancel = CancellationToken::new();
        self.inner
            .tracker
            .insert(instance_id, workflow_id, rx, cancel.clone());

        let handlers = Arc::clone(&*self.inner.handlers.read().unwrap_or_else(PoisonError::into_inner));
        InstanceDriver::new(
            workflow,
            state,
            tx,
            handlers,
            self.inner.events.clone(),
            self.inner.config.clone(),
            cancel,
        )
        .spawn();

        info!(%instance_id, "instance started");
        Ok(instance_id)
    }

    /// Returns the latest snapshot of an instance, or `None` if unknown.
    #[must_use]
    pub fn get_workflow_status(&self, instance_id: InstanceId) -> Option<InstanceSnapshot> {
        self.inner.tracker.status(instance_id)
    }

    /// Waits until an instance reaches a terminal status.
    ///
    /// Returns `None` if the instance is unknown.
    pub async fn wait_for_instance(&self, instance_id: InstanceId) -> Option<InstanceSnapshot> {
        let mut rx = self.inner.tracker.watch(instance_id)?;
        let waited = rx
            .wait_for(|s| s.status.is_terminal())
            .await
            .map(|snapshot| snapshot.clone());
        let snapshot = match waited {
            Ok(snapshot) => snapshot,
            // The driver is gone; the last published snapshot is final.
            Err(_) => rx.borrow().clone(),
        };
        Some(snapshot)
    }

    /// Cancels a running instance and waits for the driver to stop it.
    ///
    /// Returns false if the instance had already reached another terminal
    /// status. Handlers already running are abandoned, not rolled back.
    ///
    /// # Errors
    ///
    /// Returns `InstanceNotFound` for an unknown id.
    #[instrument(skip(self))]
    pub async fn cancel_instance(&self, instance_id: InstanceId) -> Result<bool, EngineError> {
        let token = self
            .inner
            .tracker
            .cancel_token(instance_id)
            .ok_or(EngineError::InstanceNotFound { instance_id })?;
        if self
            .get_workflow_status(instance_id)
            .is_some_and(|s| s.status.is_terminal())
        {
            return Ok(false);
        }
        token.cancel();
        let snapshot = self
            .wait_for_instance(instance_id)
            .await
            .ok_or(EngineError::InstanceNotFound { instance_id })?;
        Ok(snapshot.status == InstanceStatus::Cancelled)
    }

    /// Delivers a decision to a waiting approval step.
    ///
    /// # Errors
    ///
    /// Returns `InstanceNotFound` for an unknown instance and
    /// `ApprovalNotFound` if the step is not waiting for a decision.
    #[instrument(skip(self, decision), fields(approved = decision.is_approved()))]
    pub fn resolve_approval(
        &self,
        instance_id: InstanceId,
        step_id: &StepId,
        decision: ApprovalDecision,
    ) -> Result<(), EngineError> {
        if self.inner.tracker.status(instance_id).is_none() {
            return Err(EngineError::InstanceNotFound { instance_id });
        }
        if !self.inner.approvals.resolve(instance_id, step_id, decision) {
            warn!(%step_id, "no pending approval");
            return Err(EngineError::ApprovalNotFound {
                instance_id,
                step_id: step_id.clone(),
            });
        }
        Ok(())
    }

    /// Returns every approval waiting for a decision.
    #[must_use]
    pub fn pending_approvals(&self) -> Vec<PendingApproval> {
        self.inner.approvals.pending()
    }

    /// Registers a handler for a step type, replacing any existing one.
    ///
    /// Takes effect for instances started afterwards.
    pub fn register_step_handler(&self, step_type: StepType, handler: Arc<dyn StepHandler>) {
        let mut handlers = self
            .inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let mut registry = StepRegistry::clone(&handlers);
        registry.register(step_type, handler);
        *handlers = Arc::new(registry);
    }

    /// The engine's event bus.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// The actions available to `action` steps.
    #[must_use]
    pub fn actions(&self) -> &ActionRegistry {
        &self.inner.actions
    }

    /// The engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Removes terminal instances that finished more than `older_than` ago.
    /// Returns how many were removed.
    #[instrument(skip(self))]
    pub fn purge_finished_instances(&self, older_than: chrono::Duration) -> usize {
        let removed = self.inner.tracker.purge_finished(Utc::now() - older_than);
        info!(removed, "purged finished instances");
        removed
    }

    fn read_workflows(&self) -> std::sync::RwLockReadGuard<'_, HashMap<WorkflowId, Arc<Workflow>>> {
        self.inner
            .workflows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_workflows(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<WorkflowId, Arc<Workflow>>> {
        self.inner
            .workflows
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for WorkflowEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("workflows", &self.read_workflows().len())
            .field("instances", &self.inner.tracker.len())
            .field("config", &self.inner.config)
            .finish()
    }
}

/// Assembles a [`WorkflowEngine`].
pub struct EngineBuilder {
    config: EngineConfig,
    actions: ActionRegistry,
    notifier: Arc<dyn Notifier>,
    handlers: Vec<(StepType, Arc<dyn StepHandler>)>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            config: EngineConfig::default(),
            actions: ActionRegistry::with_builtins(),
            notifier: Arc::new(LogNotifier),
            handlers: Vec::new(),
        }
    }
}

impl EngineBuilder {
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Adds a named action, replacing a built-in of the same name.
    #[must_use]
    pub fn action(mut self, name: impl Into<String>, action: Arc<dyn Action>) -> Self {
        self.actions.register(name, action);
        self
    }

    /// Adds several named actions.
    #[must_use]
    pub fn actions<N: Into<String>>(mut self, actions: impl IntoIterator<Item = (N, Arc<dyn Action>)>) -> Self {
        for (name, action) in actions {
            self.actions.register(name, action);
        }
        self
    }

    /// Sets the notifier used by `notification` steps.
    #[must_use]
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Adds a step handler. Registering a built-in type replaces its handler.
    #[must_use]
    pub fn step_handler(mut self, step_type: StepType, handler: Arc<dyn StepHandler>) -> Self {
        self.handlers.push((step_type, handler));
        self
    }

    #[must_use]
    pub fn build(self) -> WorkflowEngine {
        let events = EventBus::new(self.config.event_capacity);
        let approvals = ApprovalBook::new();
        let actions = Arc::new(self.actions);

        let mut registry = StepRegistry::new();
        registry.register(
            StepType::Action,
            Arc::new(ActionStepHandler::new(Arc::clone(&actions))),
        );
        registry.register(StepType::Condition, Arc::new(ConditionStepHandler));
        registry.register(
            StepType::Notification,
            Arc::new(NotificationStepHandler::new(self.notifier)),
        );
        registry.register(
            StepType::Approval,
            Arc::new(ApprovalStepHandler::new(approvals.clone(), events.clone())),
        );
        for (step_type, handler) in self.handlers {
            registry.register(step_type, handler);
        }

        WorkflowEngine {
            inner: Arc::new(Inner {
                config: self.config,
                workflows: RwLock::new(HashMap::new()),
                handlers: RwLock::new(Arc::new(registry)),
                tracker: InstanceTracker::new(),
                approvals,
                events,
                actions,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::WorkflowStatus;
    use crate::error::{HandlerError, ValidationError};
    use crate::event::{EngineEvent, EventKind};
    use crate::expression::Expr;
    use crate::handler::StepContext;
    use crate::step::WorkflowStep;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::time::Duration;

    async fn wait(engine: &WorkflowEngine, id: InstanceId) -> InstanceSnapshot {
        tokio::time::timeout(Duration::from_secs(5), engine.wait_for_instance(id))
            .await
            .expect("instance finishes")
            .expect("instance known")
    }

    fn record(engine: &WorkflowEngine) -> Arc<Mutex<Vec<EngineEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        for kind in [
            EventKind::StepCompleted,
            EventKind::WorkflowCompleted,
            EventKind::WorkflowFailed,
            EventKind::WorkflowCancelled,
        ] {
            let events = Arc::clone(&events);
            engine
                .events()
                .on(kind, move |event| events.lock().unwrap().push(event.clone()));
        }
        events
    }

    fn triage() -> WorkflowDefinition {
        WorkflowDefinition::new(
            "triage",
            vec![
                WorkflowStep::action("A", "Stamp", "updateDatabase")
                    .with_params(json!({"table": "tickets"}))
                    .then(["B"]),
                WorkflowStep::condition("B", "Known?", Expr::parse("databaseUpdated == \"tickets\"").unwrap())
                    .then(["C"]),
                WorkflowStep::notification("C", "Notify", "email", "Ticket {{ticketId}} triaged"),
            ],
        )
    }

    /// Counts executions and sets `<step id>: true`.
    struct Counting {
        runs: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl StepHandler for Counting {
        async fn execute(&self, ctx: &StepContext<'_>, data: DataBag) -> Result<DataBag, HandlerError> {
            self.runs.lock().unwrap().push(ctx.step.id.to_string());
            Ok(data.with(ctx.step.id.as_str(), true))
        }
    }

    #[test]
    fn create_stores_definition_with_fresh_id() {
        let engine = WorkflowEngine::new();
        let ids: HashSet<_> = (0..3)
            .map(|_| engine.create_workflow(triage()).expect("valid"))
            .collect();
        assert_eq!(ids.len(), 3);

        let id = *ids.iter().next().unwrap();
        let stored = engine.get_workflow(id).expect("stored");
        assert_eq!(stored.to_definition(), triage());
        assert_eq!(engine.list_workflows().len(), 3);
    }

    #[tokio::test]
    async fn list_is_ordered_by_creation_not_update() {
        let engine = WorkflowEngine::new();
        let first = engine.create_workflow(triage()).expect("valid");
        tokio::time::sleep(Duration::from_millis(2)).await;
        let second = engine.create_workflow(triage()).expect("valid");
        assert!(engine
            .update_workflow(first, WorkflowUpdate::new().name("renamed"))
            .expect("valid"));

        let listed: Vec<_> = engine.list_workflows().iter().map(|s| s.id).collect();
        assert_eq!(listed, vec![first, second]);
    }

    #[test]
    fn dangling_successor_is_rejected_and_not_stored() {
        let engine = WorkflowEngine::new();
        let definition = WorkflowDefinition::new(
            "broken",
            vec![WorkflowStep::action("A", "A", "processDocument").then(["missing"])],
        );

        let err = engine.create_workflow(definition).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Validation(ValidationError::UnknownSuccessor { .. })
        ));
        assert!(engine.list_workflows().is_empty());
    }

    #[tokio::test]
    async fn triage_scenario_completes() {
        let engine = WorkflowEngine::new();
        let events = record(&engine);
        let id = engine.create_workflow(triage()).expect("valid");

        let instance_id = engine
            .start_workflow(id, DataBag::new().with("ticketId", "T1"))
            .expect("started");
        let snapshot = wait(&engine, instance_id).await;

        assert_eq!(snapshot.status, InstanceStatus::Completed);
        assert_eq!(snapshot.data.get_str("ticketId"), Some("T1"));
        assert_eq!(snapshot.data.get("conditionResult"), Some(&json!(true)));

        let kinds: Vec<EventKind> = events.lock().unwrap().iter().map(EngineEvent::kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::StepCompleted,
                EventKind::StepCompleted,
                EventKind::StepCompleted,
                EventKind::WorkflowCompleted
            ]
        );
    }

    #[tokio::test]
    async fn single_step_merges_initial_data_with_output() {
        let engine = WorkflowEngine::new();
        let id = engine
            .create_workflow(WorkflowDefinition::new(
                "single",
                vec![WorkflowStep::action("A", "Process", "processDocument")],
            ))
            .expect("valid");

        let instance_id = engine
            .start_workflow(id, DataBag::new().with("document", "two words"))
            .expect("started");
        let snapshot = wait(&engine, instance_id).await;

        assert_eq!(snapshot.status, InstanceStatus::Completed);
        assert_eq!(snapshot.data.get_str("document"), Some("two words"));
        assert_eq!(snapshot.data.get("documentProcessed"), Some(&json!(true)));
        assert_eq!(snapshot.data.lookup("documentStats.words"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn unknown_action_fails_with_message() {
        let engine = WorkflowEngine::new();
        let events = record(&engine);
        let id = engine
            .create_workflow(WorkflowDefinition::new(
                "bad action",
                vec![
                    WorkflowStep::action("A", "Nope", "doesNotExist").then(["B"]),
                    WorkflowStep::notification("B", "Notify", "email", "unreachable"),
                ],
            ))
            .expect("valid");

        let instance_id = engine.start_workflow(id, DataBag::new()).expect("started");
        let snapshot = wait(&engine, instance_id).await;
        assert_eq!(snapshot.status, InstanceStatus::Failed);

        let events = events.lock().unwrap().clone();
        assert_eq!(events.len(), 1);
        match &events[0] {
            EngineEvent::WorkflowFailed { step_id, error, .. } => {
                assert_eq!(step_id.as_str(), "A");
                assert!(error.contains("Unknown action: doesNotExist"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn fan_out_runs_each_branch_once() {
        let runs = Arc::new(Mutex::new(Vec::new()));
        let engine = WorkflowEngine::builder()
            .step_handler(
                StepType::Custom("count".to_string()),
                Arc::new(Counting {
                    runs: Arc::clone(&runs),
                }),
            )
            .build();
        let id = engine
            .create_workflow(WorkflowDefinition::new(
                "fan out",
                vec![
                    WorkflowStep::custom("A", "A", "count", json!({})).then(["B", "C"]),
                    WorkflowStep::custom("B", "B", "count", json!({})),
                    WorkflowStep::custom("C", "C", "count", json!({})),
                ],
            ))
            .expect("valid");

        let instance_id = engine.start_workflow(id, DataBag::new()).expect("started");
        let snapshot = wait(&engine, instance_id).await;

        assert_eq!(snapshot.status, InstanceStatus::Completed);
        assert_eq!(snapshot.data.get("B"), Some(&json!(true)));
        assert_eq!(snapshot.data.get("C"), Some(&json!(true)));
        let mut runs = runs.lock().unwrap().clone();
        runs.sort();
        assert_eq!(runs, vec!["A", "B", "C"]);
    }

    #[test]
    fn unknown_instance_status_is_none() {
        let engine = WorkflowEngine::new();
        assert!(engine.get_workflow_status(InstanceId::new()).is_none());
    }

    #[tokio::test]
    async fn start_unknown_or_inactive_workflow_fails() {
        let engine = WorkflowEngine::new();
        assert!(matches!(
            engine.start_workflow(WorkflowId::new(), DataBag::new()),
            Err(EngineError::WorkflowNotFound { .. })
        ));

        let id = engine
            .create_workflow(triage().with_status(WorkflowStatus::Inactive))
            .expect("valid");
        assert!(matches!(
            engine.start_workflow(id, DataBag::new()),
            Err(EngineError::WorkflowInactive { .. })
        ));
    }

    fn review_flow() -> WorkflowDefinition {
        WorkflowDefinition::new(
            "review",
            vec![
                WorkflowStep::approval("review", "Review", ["supervisor"]).then(["stamp"]),
                WorkflowStep::action("stamp", "Stamp", "updateDatabase").with_params(json!({"table": "tickets"})),
            ],
        )
    }

    async fn wait_for_pending(engine: &WorkflowEngine) {
        let mut rx = engine.events().subscribe();
        if engine.pending_approvals().is_empty() {
            tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("approval requested")
                .expect("event");
        }
    }

    #[tokio::test]
    async fn delete_while_running_keeps_frozen_snapshot() {
        let engine = WorkflowEngine::new();
        let id = engine.create_workflow(review_flow()).expect("valid");
        let instance_id = engine.start_workflow(id, DataBag::new()).expect("started");
        wait_for_pending(&engine).await;

        assert!(engine.delete_workflow(id));
        assert!(engine.get_workflow(id).is_none());
        engine
            .resolve_approval(instance_id, &StepId::from("review"), ApprovalDecision::approve("lead"))
            .expect("pending");

        let snapshot = wait(&engine, instance_id).await;
        assert_eq!(snapshot.status, InstanceStatus::Completed);
        assert_eq!(snapshot.data.get_str("databaseUpdated"), Some("tickets"));
        assert_eq!(snapshot.data.lookup("approvals.review.decidedBy"), Some(&json!("lead")));
    }

    #[tokio::test]
    async fn rejected_approval_fails_instance() {
        let engine = WorkflowEngine::new();
        let id = engine.create_workflow(review_flow()).expect("valid");
        let instance_id = engine.start_workflow(id, DataBag::new()).expect("started");
        wait_for_pending(&engine).await;

        engine
            .resolve_approval(instance_id, &StepId::from("review"), ApprovalDecision::reject("lead"))
            .expect("pending");
        let snapshot = wait(&engine, instance_id).await;

        assert_eq!(snapshot.status, InstanceStatus::Failed);
        assert!(snapshot.error.unwrap_or_default().contains("approval rejected by lead"));
    }

    #[tokio::test]
    async fn resolve_without_pending_approval_fails() {
        let engine = WorkflowEngine::new();
        assert!(matches!(
            engine.resolve_approval(InstanceId::new(), &StepId::from("x"), ApprovalDecision::approve("a")),
            Err(EngineError::InstanceNotFound { .. })
        ));

        let id = engine.create_workflow(review_flow()).expect("valid");
        let instance_id = engine.start_workflow(id, DataBag::new()).expect("started");
        assert!(matches!(
            engine.resolve_approval(instance_id, &StepId::from("stamp"), ApprovalDecision::approve("a")),
            Err(EngineError::ApprovalNotFound { .. })
        ));
        engine.cancel_instance(instance_id).await.expect("known");
    }

    #[tokio::test]
    async fn cancel_stops_waiting_instance_and_withdraws_approval() {
        let engine = WorkflowEngine::new();
        let events = record(&engine);
        let id = engine.create_workflow(review_flow()).expect("valid");
        let instance_id = engine.start_workflow(id, DataBag::new()).expect("started");
        wait_for_pending(&engine).await;

        assert!(engine.cancel_instance(instance_id).await.expect("known"));
        let snapshot = engine.get_workflow_status(instance_id).expect("tracked");
        assert_eq!(snapshot.status, InstanceStatus::Cancelled);

        // A second cancel is a no-op on a terminal instance.
        assert!(!engine.cancel_instance(instance_id).await.expect("known"));

        let kinds: Vec<EventKind> = events.lock().unwrap().iter().map(EngineEvent::kind).collect();
        assert_eq!(kinds, vec![EventKind::WorkflowCancelled]);

        tokio::time::timeout(Duration::from_secs(5), async {
            while !engine.pending_approvals().is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("approval withdrawn");
    }

    #[tokio::test]
    async fn cancel_unknown_instance_fails() {
        let engine = WorkflowEngine::new();
        assert!(matches!(
            engine.cancel_instance(InstanceId::new()).await,
            Err(EngineError::InstanceNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn approval_deadline_fails_step() {
        let engine = WorkflowEngine::builder()
            .config(EngineConfig {
                approval_timeout_ms: Some(30),
                ..EngineConfig::default()
            })
            .build();
        let id = engine.create_workflow(review_flow()).expect("valid");
        let instance_id = engine.start_workflow(id, DataBag::new()).expect("started");

        let snapshot = wait(&engine, instance_id).await;
        assert_eq!(snapshot.status, InstanceStatus::Failed);
        assert_eq!(snapshot.error.as_deref(), Some("step 'review' timed out after 30ms"));
    }

    #[tokio::test]
    async fn update_does_not_affect_running_instance() {
        let engine = WorkflowEngine::new();
        let id = engine.create_workflow(review_flow()).expect("valid");
        let instance_id = engine.start_workflow(id, DataBag::new()).expect("started");
        wait_for_pending(&engine).await;

        let updated = engine
            .update_workflow(
                id,
                WorkflowUpdate::new().steps(vec![WorkflowStep::action("only", "Only", "doesNotExist")]),
            )
            .expect("valid update");
        assert!(updated);

        engine
            .resolve_approval(instance_id, &StepId::from("review"), ApprovalDecision::approve("lead"))
            .expect("pending");
        let snapshot = wait(&engine, instance_id).await;
        assert_eq!(snapshot.status, InstanceStatus::Completed);
    }

    #[test]
    fn update_unknown_workflow_returns_false() {
        let engine = WorkflowEngine::new();
        assert!(!engine
            .update_workflow(WorkflowId::new(), WorkflowUpdate::new().name("x"))
            .expect("no validation error"));
    }

    #[test]
    fn delete_unknown_workflow_returns_false() {
        assert!(!WorkflowEngine::new().delete_workflow(WorkflowId::new()));
    }

    #[tokio::test]
    async fn registered_handler_applies_to_new_instances() {
        let engine = WorkflowEngine::new();
        let id = engine
            .create_workflow(WorkflowDefinition::new(
                "custom",
                vec![WorkflowStep::custom("A", "A", "count", json!({}))],
            ))
            .expect("valid");

        let before = engine.start_workflow(id, DataBag::new()).expect("started");
        assert_eq!(wait(&engine, before).await.status, InstanceStatus::Failed);

        let runs = Arc::new(Mutex::new(Vec::new()));
        engine.register_step_handler(
            StepType::Custom("count".to_string()),
            Arc::new(Counting {
                runs: Arc::clone(&runs),
            }),
        );
        let after = engine.start_workflow(id, DataBag::new()).expect("started");
        assert_eq!(wait(&engine, after).await.status, InstanceStatus::Completed);
        assert_eq!(runs.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn wait_returns_final_snapshot_again_and_none_when_unknown() {
        let engine = WorkflowEngine::new();
        let id = engine.create_workflow(triage()).expect("valid");
        let instance_id = engine
            .start_workflow(id, DataBag::new().with("ticketId", "T1"))
            .expect("started");

        let first = wait(&engine, instance_id).await;
        let again = wait(&engine, instance_id).await;
        assert_eq!(first.status, InstanceStatus::Completed);
        assert_eq!(again, first);
        assert!(engine.wait_for_instance(InstanceId::new()).await.is_none());
    }

    #[tokio::test]
    async fn purge_removes_finished_instances() {
        let engine = WorkflowEngine::new();
        let id = engine.create_workflow(triage()).expect("valid");
        let instance_id = engine
            .start_workflow(id, DataBag::new().with("ticketId", "T1"))
            .expect("started");
        wait(&engine, instance_id).await;

        assert_eq!(engine.purge_finished_instances(chrono::Duration::hours(1)), 0);
        assert_eq!(engine.purge_finished_instances(chrono::Duration::seconds(-1)), 1);
        assert!(engine.get_workflow_status(instance_id).is_none());
    }
}
