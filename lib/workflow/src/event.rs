//! Lifecycle events and the event bus.
//!
//! The bus has two delivery paths for every emission:
//! - Listeners registered with [`EventBus::on`] run synchronously inside
//!   `emit`, in registration order, before `emit` returns.
//! - Subscribers from [`EventBus::subscribe`] receive a copy through a tokio
//!   broadcast channel. Slow subscribers may lag and miss events.

use crate::data::DataBag;
use crate::step::StepId;
use caseflow_core::InstanceId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;

/// Default capacity of the broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Names of the events the engine emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    StepCompleted,
    WorkflowCompleted,
    WorkflowFailed,
    WorkflowCancelled,
    ApprovalRequested,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::StepCompleted => "stepCompleted",
            Self::WorkflowCompleted => "workflowCompleted",
            Self::WorkflowFailed => "workflowFailed",
            Self::WorkflowCancelled => "workflowCancelled",
            Self::ApprovalRequested => "approvalRequested",
        };
        f.write_str(name)
    }
}

/// A lifecycle event with its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum EngineEvent {
    /// A step's handler returned successfully.
    StepCompleted {
        instance_id: InstanceId,
        step_id: StepId,
        /// The data the step returned.
        result: DataBag,
    },
    /// Every branch finished; `result` is the final instance data.
    WorkflowCompleted {
        instance_id: InstanceId,
        result: DataBag,
    },
    /// A step failed and the instance stopped.
    WorkflowFailed {
        instance_id: InstanceId,
        step_id: StepId,
        error: String,
    },
    /// The instance was cancelled.
    WorkflowCancelled { instance_id: InstanceId },
    /// An approval step is waiting for `resolve_approval`.
    ApprovalRequested {
        instance_id: InstanceId,
        step_id: StepId,
        approvers: Vec<String>,
        prompt: Option<String>,
    },
}

impl EngineEvent {
    /// Returns the event name.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::StepCompleted { .. } => EventKind::StepCompleted,
            Self::WorkflowCompleted { .. } => EventKind::WorkflowCompleted,
            Self::WorkflowFailed { .. } => EventKind::WorkflowFailed,
            Self::WorkflowCancelled { .. } => EventKind::WorkflowCancelled,
            Self::ApprovalRequested { .. } => EventKind::ApprovalRequested,
        }
    }

    /// Returns the instance the event belongs to.
    #[must_use]
    pub fn instance_id(&self) -> InstanceId {
        match self {
            Self::StepCompleted { instance_id, .. }
            | Self::WorkflowCompleted { instance_id, .. }
            | Self::WorkflowFailed { instance_id, .. }
            | Self::WorkflowCancelled { instance_id }
            | Self::ApprovalRequested { instance_id, .. } => *instance_id,
        }
    }
}

/// Handle returned by [`EventBus::on`], used to remove the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&EngineEvent) + Send + Sync>;

struct Registration {
    id: ListenerId,
    kind: EventKind,
    listener: Listener,
}

struct Inner {
    tx: broadcast::Sender<EngineEvent>,
    listeners: RwLock<Vec<Registration>>,
    next_id: AtomicU64,
}

/// Publish/subscribe hub for engine events. Cloning shares the bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl EventBus {
    /// Creates a bus whose broadcast channel buffers `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                tx,
                listeners: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Registers a listener for one kind of event.
    ///
    /// The listener runs on the emitting task and must not block.
    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&EngineEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Registration {
                id,
                kind,
                listener: Arc::new(listener),
            });
        id
    }

    /// Removes a listener. Returns false if it was not registered for `kind`.
    pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        let mut listeners = self
            .inner
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|r| !(r.id == id && r.kind == kind));
        listeners.len() != before
    }

    /// Removes every listener for `kind`, or every listener if `None`.
    pub fn remove_all_listeners(&self, kind: Option<EventKind>) {
        let mut listeners = self
            .inner
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match kind {
            Some(kind) => listeners.retain(|r| r.kind != kind),
            None => listeners.clear(),
        }
    }

    /// Number of listeners registered for `kind`.
    #[must_use]
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.inner
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.kind == kind)
            .count()
    }

    /// Delivers an event to its listeners, then to broadcast subscribers.
    pub fn emit(&self, event: EngineEvent) {
        let kind = event.kind();
        // Listeners are called outside the lock so they may call on/off.
        let matching: Vec<Listener> = self
            .inner
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.kind == kind)
            .map(|r| Arc::clone(&r.listener))
            .collect();
        for listener in matching {
            listener(&event);
        }
        // Ignore error if no receivers
        let _ = self.inner.tx.send(event);
    }

    /// Subscribes to every future event.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self
            .inner
            .listeners
            .read()
            .map(|l| l.len())
            .unwrap_or_default();
        f.debug_struct("EventBus")
            .field("listeners", &listeners)
            .field("subscribers", &self.inner.tx.receiver_count())
            .finish()
    }
}
