//! Resumable approval steps.
//!
//! An approval step records a [`PendingApproval`] in the [`ApprovalBook`],
//! emits `approvalRequested`, and parks until someone calls
//! `WorkflowEngine::resolve_approval`. There is no human-task integration
//! here; the embedding application decides how approvers are reached.

use crate::data::DataBag;
use crate::error::HandlerError;
use crate::event::{EngineEvent, EventBus};
use crate::handler::{StepContext, StepHandler};
use crate::step::{StepConfig, StepId};
use async_trait::async_trait;
use caseflow_core::InstanceId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;
use tracing::{debug, info};

/// Data key under which approval outcomes are recorded.
pub const APPROVALS_KEY: &str = "approvals";

/// The outcome of an approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ApprovalDecision {
    Approved {
        decided_by: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        comment: Option<String>,
    },
    Rejected {
        decided_by: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        comment: Option<String>,
    },
}

impl ApprovalDecision {
    #[must_use]
    pub fn approve(decided_by: impl Into<String>) -> Self {
        Self::Approved {
            decided_by: decided_by.into(),
            comment: None,
        }
    }

    #[must_use]
    pub fn reject(decided_by: impl Into<String>) -> Self {
        Self::Rejected {
            decided_by: decided_by.into(),
            comment: None,
        }
    }

    /// Attaches a comment to the decision.
    #[must_use]
    pub fn with_comment(mut self, text: impl Into<String>) -> Self {
        match &mut self {
            Self::Approved { comment, .. } | Self::Rejected { comment, .. } => {
                *comment = Some(text.into());
            }
        }
        self
    }

    #[must_use]
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved { .. })
    }
}

/// An approval waiting for a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingApproval {
    pub instance_id: InstanceId,
    pub step_id: StepId,
    pub approvers: Vec<String>,
    pub prompt: Option<String>,
    pub requested_at: DateTime<Utc>,
}

struct Waiting {
    pending: PendingApproval,
    tx: oneshot::Sender<ApprovalDecision>,
}

type Key = (InstanceId, StepId);

/// Registry of approvals waiting for a decision. Cloning shares the book.
#[derive(Clone, Default)]
pub struct ApprovalBook {
    waiting: Arc<Mutex<HashMap<Key, Waiting>>>,
}

impl ApprovalBook {
    /// Creates an empty book.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a pending approval.
    ///
    /// Returns the receiver for the decision and a guard that withdraws the
    /// record when dropped, so an abandoned step leaves nothing behind.
    pub fn open(&self, pending: PendingApproval) -> (oneshot::Receiver<ApprovalDecision>, OpenApproval) {
        let (tx, rx) = oneshot::channel();
        let key = (pending.instance_id, pending.step_id.clone());
        self.lock().insert(key.clone(), Waiting { pending, tx });
        let guard = OpenApproval {
            book: self.clone(),
            key,
        };
        (rx, guard)
    }

    /// Delivers a decision. Returns false if nothing is pending for the step.
    pub fn resolve(&self, instance_id: InstanceId, step_id: &StepId, decision: ApprovalDecision) -> bool {
        let Some(waiting) = self.lock().remove(&(instance_id, step_id.clone())) else {
            return false;
        };
        waiting.tx.send(decision).is_ok()
    }

    /// Returns every pending approval, oldest first.
    #[must_use]
    pub fn pending(&self) -> Vec<PendingApproval> {
        let mut pending: Vec<PendingApproval> = self.lock().values().map(|w| w.pending.clone()).collect();
        pending.sort_by_key(|p| p.requested_at);
        pending
    }

    /// Returns the pending approvals of one instance.
    #[must_use]
    pub fn pending_for(&self, instance_id: InstanceId) -> Vec<PendingApproval> {
        self.pending()
            .into_iter()
            .filter(|p| p.instance_id == instance_id)
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Key, Waiting>> {
        self.waiting.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ApprovalBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalBook")
            .field("pending", &self.lock().len())
            .finish()
    }
}

/// Withdraws a pending approval when dropped.
#[derive(Debug)]
pub struct OpenApproval {
    book: ApprovalBook,
    key: Key,
}

impl Drop for OpenApproval {
    fn drop(&mut self) {
        self.book.lock().remove(&self.key);
    }
}

/// Step handler for `approval` steps.
#[derive(Debug, Clone)]
pub struct ApprovalStepHandler {
    book: ApprovalBook,
    events: EventBus,
}

impl ApprovalStepHandler {
    #[must_use]
    pub fn new(book: ApprovalBook, events: EventBus) -> Self {
        Self { book, events }
    }
}

#[async_trait]
impl StepHandler for ApprovalStepHandler {
    async fn execute(&self, ctx: &StepContext<'_>, data: DataBag) -> Result<DataBag, HandlerError> {
        let StepConfig::Approval(config) = &ctx.step.config else {
            return Err(HandlerError::InvalidConfig {
                reason: "approval handler received a non-approval step".to_string(),
            });
        };

        let pending = PendingApproval {
            instance_id: ctx.instance_id,
            step_id: ctx.step.id.clone(),
            approvers: config.approvers.clone(),
            prompt: config.prompt.clone(),
            requested_at: Utc::now(),
        };
        let (decision, _open) = self.book.open(pending);
        debug!(instance_id = %ctx.instance_id, step_id = %ctx.step.id, "approval requested");
        self.events.emit(EngineEvent::ApprovalRequested {
            instance_id: ctx.instance_id,
            step_id: ctx.step.id.clone(),
            approvers: config.approvers.clone(),
            prompt: config.prompt.clone(),
        });

        let decision = decision
            .await
            .map_err(|_| HandlerError::failed("approval was withdrawn before a decision"))?;
        info!(
            instance_id = %ctx.instance_id,
            step_id = %ctx.step.id,
            approved = decision.is_approved(),
            "approval resolved"
        );

        match decision {
            ApprovalDecision::Approved { decided_by, comment } => {
                let mut approvals = match data.get(APPROVALS_KEY) {
                    Some(JsonValue::Object(map)) => map.clone(),
                    _ => Map::new(),
                };
                approvals.insert(
                    ctx.step.id.to_string(),
                    json!({"approved": true, "decidedBy": decided_by, "comment": comment}),
                );
                Ok(data.with(APPROVALS_KEY, JsonValue::Object(approvals)))
            }
            ApprovalDecision::Rejected { decided_by, comment } => {
                Err(HandlerError::ApprovalRejected { decided_by, comment })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use crate::step::WorkflowStep;
    use caseflow_core::WorkflowId;
    use std::time::Duration;

    fn pending(instance_id: InstanceId, step: &str) -> PendingApproval {
        PendingApproval {
            instance_id,
            step_id: StepId::from(step),
            approvers: vec!["supervisor".to_string()],
            prompt: None,
            requested_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn resolve_delivers_decision() {
        let book = ApprovalBook::new();
        let instance_id = InstanceId::new();
        let (rx, _open) = book.open(pending(instance_id, "review"));

        assert_eq!(book.pending_for(instance_id).len(), 1);
        assert!(book.resolve(instance_id, &StepId::from("review"), ApprovalDecision::approve("ana")));
        assert_eq!(rx.await.expect("decision"), ApprovalDecision::approve("ana"));
        assert!(book.pending().is_empty());
    }

    #[test]
    fn resolve_unknown_returns_false() {
        let book = ApprovalBook::new();
        assert!(!book.resolve(InstanceId::new(), &StepId::from("x"), ApprovalDecision::approve("a")));
    }

    #[test]
    fn dropping_guard_withdraws_record() {
        let book = ApprovalBook::new();
        let instance_id = InstanceId::new();
        let (_rx, open) = book.open(pending(instance_id, "review"));
        drop(open);

        assert!(book.pending().is_empty());
        assert!(!book.resolve(instance_id, &StepId::from("review"), ApprovalDecision::approve("a")));
    }

    async fn run_with_decision(decision: ApprovalDecision) -> Result<DataBag, HandlerError> {
        let book = ApprovalBook::new();
        let events = EventBus::default();
        let instance_id = InstanceId::new();

        let resolver = book.clone();
        let decision_slot = Arc::new(Mutex::new(Some(decision)));
        events.on(EventKind::ApprovalRequested, move |event| {
            if let EngineEvent::ApprovalRequested { instance_id, step_id, .. } = event {
                if let Some(decision) = decision_slot.lock().unwrap().take() {
                    resolver.resolve(*instance_id, step_id, decision);
                }
            }
        });

        let handler = ApprovalStepHandler::new(book, events);
        let step = WorkflowStep::approval("review", "Review", ["supervisor"]);
        let ctx = StepContext {
            instance_id,
            workflow_id: WorkflowId::new(),
            step: &step,
        };
        let data = DataBag::new().with("ticketId", "T1");
        tokio::time::timeout(Duration::from_secs(5), handler.execute(&ctx, data))
            .await
            .expect("decision arrives")
    }

    #[tokio::test]
    async fn approval_records_decision() {
        let output = run_with_decision(ApprovalDecision::approve("ana").with_comment("ok"))
            .await
            .expect("approved");

        assert_eq!(
            output.lookup("approvals.review"),
            Some(&json!({"approved": true, "decidedBy": "ana", "comment": "ok"}))
        );
        assert_eq!(output.get_str("ticketId"), Some("T1"));
    }

    #[tokio::test]
    async fn rejection_fails_step() {
        let err = run_with_decision(ApprovalDecision::reject("ana"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            HandlerError::ApprovalRejected {
                decided_by: "ana".to_string(),
                comment: None
            }
        );
    }

    #[test]
    fn decision_serializes_with_tag() {
        let json = serde_json::to_value(ApprovalDecision::reject("bo").with_comment("no")).unwrap();
        assert_eq!(json, json!({"decision": "rejected", "decidedBy": "bo", "comment": "no"}));
    }
}
