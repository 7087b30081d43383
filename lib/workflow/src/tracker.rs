//! Instance tracker.
//!
//! Maps each instance to the latest snapshot published by its driver and the
//! token that cancels it. The tracker never mutates instance state itself;
//! the owning driver is the only writer.

use crate::execution::InstanceSnapshot;
use caseflow_core::{InstanceId, WorkflowId};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct Tracked {
    workflow_id: WorkflowId,
    snapshot: watch::Receiver<InstanceSnapshot>,
    cancel: CancellationToken,
}

/// Shared index of instances. Cloning shares the tracker.
#[derive(Debug, Clone, Default)]
pub(crate) struct InstanceTracker {
    instances: Arc<RwLock<HashMap<InstanceId, Tracked>>>,
}

impl InstanceTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(
        &self,
        instance_id: InstanceId,
        workflow_id: WorkflowId,
        snapshot: watch::Receiver<InstanceSnapshot>,
        cancel: CancellationToken,
    ) {
        self.instances
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                instance_id,
                Tracked {
                    workflow_id,
                    snapshot,
                    cancel,
                },
            );
    }

    /// Returns the latest snapshot, or `None` for an unknown instance.
    pub(crate) fn status(&self, instance_id: InstanceId) -> Option<InstanceSnapshot> {
        self.instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&instance_id)
            .map(|t| t.snapshot.borrow().clone())
    }

    /// Returns a receiver that observes every snapshot the driver publishes.
    pub(crate) fn watch(&self, instance_id: InstanceId) -> Option<watch::Receiver<InstanceSnapshot>> {
        self.instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&instance_id)
            .map(|t| t.snapshot.clone())
    }

    pub(crate) fn cancel_token(&self, instance_id: InstanceId) -> Option<CancellationToken> {
        self.instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&instance_id)
            .map(|t| t.cancel.clone())
    }

    /// Instances of `workflow_id` that have not reached a terminal status.
    pub(crate) fn running_for(&self, workflow_id: WorkflowId) -> Vec<InstanceId> {
        self.instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, t)| t.workflow_id == workflow_id && !t.snapshot.borrow().status.is_terminal())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Removes terminal instances that finished before `before`.
    pub(crate) fn purge_finished(&self, before: DateTime<Utc>) -> usize {
        let mut instances = self.instances.write().unwrap_or_else(PoisonError::into_inner);
        let count = instances.len();
        instances.retain(|_, t| {
            let snapshot = t.snapshot.borrow();
            let expired = snapshot.status.is_terminal() && snapshot.finished_at.is_some_and(|at| at < before);
            !expired
        });
        count - instances.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.instances.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}
