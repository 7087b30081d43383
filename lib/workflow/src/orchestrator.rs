//! Instance driver.
//!
//! One driver per instance:
//! - Dispatches steps as tasks on a `JoinSet`
//! - Applies each completion to the instance state (the only writer)
//! - Publishes snapshots for the tracker and emits lifecycle events
//! - Stops on completion, the first failure, or cancellation
//!
//! The driver loop:
//! 1. Dispatch the entry step
//! 2. Wait for the next step outcome or cancellation
//! 3. Merge the step's changes and dispatch its successors
//! 4. Finalize when no active steps remain

use crate::config::EngineConfig;
use crate::data::DataBag;
use crate::definition::Workflow;
use crate::error::{HandlerError, StepError};
use crate::event::{EngineEvent, EventBus};
use crate::execution::{InstanceSnapshot, InstanceState, StepAdvance};
use crate::handler::{StepContext, StepRegistry};
use crate::step::StepId;
use caseflow_core::InstanceId;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, debug_span, info, info_span, warn};

/// The result of running one step.
struct StepOutcome {
    step_id: StepId,
    /// The data snapshot the step was given.
    input: DataBag,
    result: Result<DataBag, StepError>,
}

enum Signal {
    Cancelled,
    Joined(Option<Result<StepOutcome, JoinError>>),
}

/// Drives a single instance to a terminal status.
pub(crate) struct InstanceDriver {
    workflow: Arc<Workflow>,
    state: InstanceState,
    snapshots: watch::Sender<InstanceSnapshot>,
    handlers: Arc<StepRegistry>,
    events: EventBus,
    config: EngineConfig,
    cancel: CancellationToken,
    tasks: JoinSet<StepOutcome>,
}

impl InstanceDriver {
    pub(crate) fn new(
        workflow: Arc<Workflow>,
        state: InstanceState,
        snapshots: watch::Sender<InstanceSnapshot>,
        handlers: Arc<StepRegistry>,
        events: EventBus,
        config: EngineConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            workflow,
            state,
            snapshots,
            handlers,
            events,
            config,
            cancel,
            tasks: JoinSet::new(),
        }
    }

    /// Runs the driver on its own task.
    pub(crate) fn spawn(self) -> JoinHandle<()> {
        let span = info_span!(
            "instance",
            instance_id = %self.instance_id(),
            workflow_id = %self.workflow.id,
        );
        tokio::spawn(self.run().instrument(span))
    }

    fn instance_id(&self) -> InstanceId {
        self.state.instance_id()
    }

    async fn run(mut self) {
        let entry = self.workflow.entry_step().id.clone();
        let data = self.state.data().clone();
        self.dispatch(entry, data);

        while !self.state.status().is_terminal() {
            let signal = tokio::select! {
                biased;
                () = self.cancel.cancelled() => Signal::Cancelled,
                joined = self.tasks.join_next() => Signal::Joined(joined),
            };

            match signal {
                Signal::Cancelled => self.on_cancelled(),
                Signal::Joined(Some(Ok(outcome))) => self.handle_outcome(outcome),
                Signal::Joined(Some(Err(err))) => {
                    warn!(error = %err, "step task ended without an outcome");
                }
                Signal::Joined(None) => self.on_stalled(),
            }
        }

        self.tasks.abort_all();
    }

    fn handle_outcome(&mut self, outcome: StepOutcome) {
        let StepOutcome {
            step_id,
            input,
            result,
        } = outcome;
        match result {
            Ok(output) => self.on_step_completed(step_id, &input, output),
            Err(error) => self.on_step_failed(&error),
        }
    }

    fn on_step_completed(&mut self, step_id: StepId, input: &DataBag, output: DataBag) {
        let successors = self
            .workflow
            .step(&step_id)
            .map(|step| step.next_steps.clone())
            .unwrap_or_default();
        let patch = output.changes_since(input);

        let advance = self.state.complete_step(&step_id, &patch, &successors);
        if advance == StepAdvance::Ignored {
            return;
        }

        let instance_id = self.instance_id();
        debug!(step_id = %step_id, changed = patch.ops().len(), "step completed");
        self.publish();
        self.events.emit(EngineEvent::StepCompleted {
            instance_id,
            step_id,
            result: output,
        });

        match advance {
            StepAdvance::Finished => {
                info!("instance completed");
                self.events.emit(EngineEvent::WorkflowCompleted {
                    instance_id,
                    result: self.state.data().clone(),
                });
            }
            StepAdvance::Continue => {
                let data = self.state.data().clone();
                for next in successors {
                    self.dispatch(next, data.clone());
                }
            }
            StepAdvance::Ignored => {}
        }
    }

    fn on_step_failed(&mut self, error: &StepError) {
        let message = error.to_string();
        if !self.state.fail(error.step_id(), message.clone()) {
            return;
        }
        warn!(step_id = %error.step_id(), error = %message, "instance failed");
        self.tasks.abort_all();
        self.publish();
        self.events.emit(EngineEvent::WorkflowFailed {
            instance_id: self.instance_id(),
            step_id: error.step_id().clone(),
            error: message,
        });
    }

    fn on_cancelled(&mut self) {
        if !self.state.cancel() {
            return;
        }
        info!("instance cancelled");
        self.tasks.abort_all();
        self.publish();
        self.events.emit(EngineEvent::WorkflowCancelled {
            instance_id: self.instance_id(),
        });
    }

    /// Active steps remain but no task will report them.
    fn on_stalled(&mut self) {
        let step_id = self
            .state
            .active_steps()
            .first()
            .cloned()
            .unwrap_or_else(|| self.workflow.entry_step().id.clone());
        self.on_step_failed(&StepError::HandlerExecution {
            step_id,
            source: HandlerError::failed("step task ended without an outcome"),
        });
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.state.snapshot());
    }

    fn dispatch(&mut self, step_id: StepId, data: DataBag) {
        let workflow = Arc::clone(&self.workflow);
        let handlers = Arc::clone(&self.handlers);
        let deadline = workflow
            .step(&step_id)
            .and_then(|step| self.config.step_deadline(step));
        let instance_id = self.instance_id();

        debug!(step_id = %step_id, ?deadline, "dispatching step");
        let span = debug_span!("step", step_id = %step_id);
        self.tasks.spawn(
            async move {
                let result =
                    execute_step(&workflow, &handlers, instance_id, &step_id, data.clone(), deadline).await;
                StepOutcome {
                    step_id,
                    input: data,
                    result,
                }
            }
            .instrument(span),
        );
    }
}

/// Looks up the handler for a step and runs it under the step's deadline.
async fn execute_step(
    workflow: &Workflow,
    handlers: &StepRegistry,
    instance_id: InstanceId,
    step_id: &StepId,
    data: DataBag,
    deadline: Option<Duration>,
) -> Result<DataBag, StepError> {
    let step = workflow.step(step_id).ok_or_else(|| StepError::StepNotFound {
        step_id: step_id.clone(),
    })?;
    let step_type = step.step_type();
    let handler = handlers
        .get(&step_type)
        .ok_or_else(|| StepError::UnknownStepType {
            step_id: step_id.clone(),
            step_type,
        })?;

    let ctx = StepContext {
        instance_id,
        workflow_id: workflow.id,
        step,
    };
    let run = AssertUnwindSafe(handler.execute(&ctx, data)).catch_unwind();
    let outcome = match deadline {
        Some(after) => tokio::time::timeout(after, run)
            .await
            .map_err(|_| StepError::TimedOut {
                step_id: step_id.clone(),
                after,
            })?,
        None => run.await,
    };

    match outcome {
        Ok(result) => result.map_err(|source| StepError::HandlerExecution {
            step_id: step_id.clone(),
            source,
        }),
        Err(_) => Err(StepError::Panicked {
            step_id: step_id.clone(),
        }),
    }
}
