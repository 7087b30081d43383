//! Customer support triage workflow.
//!
//! ```text
//! analyze ─▶ classify ─┬▶ suggest ─▶ review ─▶ notify
//!                      └▶ tag ─▶ track
//! ```
//!
//! `classify` flags tickets that need a supervisor (negative sentiment or
//! high priority). The reply branch waits for a supervisor to approve the
//! drafted response before notifying the customer; the bookkeeping branch
//! tags the ticket and records it.

use crate::actions::{
    ANALYZE_TICKET, AnalyzeTicket, SUGGEST_RESPONSE, SuggestResponse, TAG_TICKET, TRACK_TICKET, TRANSCRIPT_KEY,
    TagTicket, TrackTicket,
};
use crate::error::SupportError;
use crate::ticket::Ticket;
use caseflow_ai::TextService;
use caseflow_analytics::Analytics;
use caseflow_core::{InstanceId, Result, UserId, WorkflowId};
use caseflow_security::SecurityService;
use caseflow_workflow::{
    Action, ApprovalConfig, ApprovalDecision, CompareOp, DataBag, EngineBuilder, Expr, StepConfig, StepId, Trigger,
    WorkflowDefinition, WorkflowEngine, WorkflowStep,
};
use rootcause::prelude::ResultExt;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument};

/// Name of the registered workflow.
pub const WORKFLOW_NAME: &str = "Customer Support Triage";
/// Event that starts the workflow.
pub const TICKET_CREATED_EVENT: &str = "ticket.created";

pub const ANALYZE_STEP: &str = "analyze";
pub const CLASSIFY_STEP: &str = "classify";
pub const SUGGEST_STEP: &str = "suggest";
pub const REVIEW_STEP: &str = "review";
pub const NOTIFY_STEP: &str = "notify";
pub const TAG_STEP: &str = "tag";
pub const TRACK_STEP: &str = "track";

/// Collaborator services used by the support actions.
#[derive(Clone)]
pub struct SupportServices {
    pub text: Arc<dyn TextService>,
    pub security: Arc<dyn SecurityService>,
    pub analytics: Arc<dyn Analytics>,
    /// User recorded in audit entries written by the workflow.
    pub actor: UserId,
}

impl SupportServices {
    #[must_use]
    pub fn new(
        text: Arc<dyn TextService>,
        security: Arc<dyn SecurityService>,
        analytics: Arc<dyn Analytics>,
        actor: UserId,
    ) -> Self {
        Self {
            text,
            security,
            analytics,
            actor,
        }
    }

    /// The actions the support workflow runs, keyed by name.
    #[must_use]
    pub fn actions(&self) -> Vec<(&'static str, Arc<dyn Action>)> {
        let analyze: Arc<dyn Action> = Arc::new(AnalyzeTicket::new(Arc::clone(&self.text)));
        let suggest: Arc<dyn Action> = Arc::new(SuggestResponse::new(Arc::clone(&self.text)));
        let tag: Arc<dyn Action> = Arc::new(TagTicket::new(Arc::clone(&self.text), Arc::clone(&self.security)));
        let track: Arc<dyn Action> = Arc::new(TrackTicket::new(
            Arc::clone(&self.security),
            Arc::clone(&self.analytics),
            self.actor,
        ));
        vec![
            (ANALYZE_TICKET, analyze),
            (SUGGEST_RESPONSE, suggest),
            (TAG_TICKET, tag),
            (TRACK_TICKET, track),
        ]
    }

    /// Adds the support actions to an engine builder.
    #[must_use]
    pub fn install(&self, builder: EngineBuilder) -> EngineBuilder {
        builder.actions(self.actions())
    }
}

/// The support workflow registered on an engine.
#[derive(Clone)]
pub struct CustomerSupportWorkflow {
    engine: WorkflowEngine,
    workflow_id: WorkflowId,
    security: Arc<dyn SecurityService>,
}

impl CustomerSupportWorkflow {
    /// The workflow definition.
    #[must_use]
    pub fn definition() -> WorkflowDefinition {
        let needs_supervisor = Expr::Or {
            any: vec![
                Expr::compare(
                    CompareOp::Eq,
                    Expr::field("analysis.sentiment"),
                    Expr::literal("negative"),
                ),
                Expr::compare(CompareOp::Eq, Expr::field("priority"), Expr::literal("high")),
            ],
        };
        let review = StepConfig::Approval(ApprovalConfig {
            approvers: vec!["supervisor".to_string()],
            prompt: Some("Approve the drafted reply before it is sent".to_string()),
        });

        WorkflowDefinition::new(
            WORKFLOW_NAME,
            vec![
                WorkflowStep::action(ANALYZE_STEP, "Analyze conversation", ANALYZE_TICKET).then([CLASSIFY_STEP]),
                WorkflowStep::condition(CLASSIFY_STEP, "Needs supervisor", needs_supervisor)
                    .then([SUGGEST_STEP, TAG_STEP]),
                WorkflowStep::action(SUGGEST_STEP, "Draft reply", SUGGEST_RESPONSE).then([REVIEW_STEP]),
                WorkflowStep::new(REVIEW_STEP, "Review reply", review).then([NOTIFY_STEP]),
                WorkflowStep::notification(
                    NOTIFY_STEP,
                    "Send reply",
                    "email",
                    "Re: {{subject}} (ticket {{ticketId}})\n\n{{suggestedResponse}}",
                ),
                WorkflowStep::action(TAG_STEP, "Tag ticket", TAG_TICKET)
                    .with_params(json!({"role": "agent"}))
                    .then([TRACK_STEP]),
                WorkflowStep::action(TRACK_STEP, "Record ticket", TRACK_TICKET),
            ],
        )
        .with_description("Analyzes new tickets, drafts a reviewed reply, and records the ticket")
        .with_trigger(Trigger::event(TICKET_CREATED_EVENT))
    }

    /// Registers the workflow on `engine`.
    ///
    /// # Errors
    ///
    /// Returns `MissingAction` if the engine was not built with
    /// [`SupportServices::install`], or `Engine` if the engine rejects the
    /// definition.
    #[instrument(skip_all)]
    pub fn register(engine: WorkflowEngine, services: &SupportServices) -> Result<Self, SupportError> {
        for name in [ANALYZE_TICKET, SUGGEST_RESPONSE, TAG_TICKET, TRACK_TICKET] {
            if engine.actions().get(name).is_none() {
                return Err(SupportError::MissingAction {
                    name: name.to_string(),
                }
                .into());
            }
        }
        let workflow_id = engine
            .create_workflow(Self::definition())
            .context(SupportError::Engine {
                operation: "register the support workflow",
            })?;
        info!(%workflow_id, "support workflow registered");

        Ok(Self {
            engine,
            workflow_id,
            security: Arc::clone(&services.security),
        })
    }

    #[must_use]
    pub fn workflow_id(&self) -> WorkflowId {
        self.workflow_id
    }

    #[must_use]
    pub fn engine(&self) -> &WorkflowEngine {
        &self.engine
    }

    /// Starts triage for a new ticket.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTicket` for a ticket without an id, or `Engine` if
    /// the instance cannot be started.
    #[instrument(skip_all, fields(ticket_id = %ticket.ticket_id))]
    pub fn open_ticket(&self, ticket: &Ticket) -> Result<InstanceId, SupportError> {
        if ticket.ticket_id.trim().is_empty() {
            return Err(SupportError::InvalidTicket {
                reason: "ticket id must not be empty".to_string(),
            }
            .into());
        }
        let instance_id = self
            .engine
            .start_workflow(self.workflow_id, ticket.to_data())
            .context(SupportError::Engine {
                operation: "open the ticket",
            })?;
        info!(%instance_id, "ticket opened");
        Ok(instance_id)
    }

    /// Approves or rejects the drafted reply of a ticket.
    ///
    /// # Errors
    ///
    /// Returns `Engine` if the ticket is not waiting for review.
    pub fn review_reply(&self, instance_id: InstanceId, decision: ApprovalDecision) -> Result<(), SupportError> {
        self.engine
            .resolve_approval(instance_id, &StepId::from(REVIEW_STEP), decision)
            .context(SupportError::Engine {
                operation: "review the reply",
            })?;
        Ok(())
    }

    /// Decrypts the transcript archived by the `track` step, if present.
    ///
    /// # Errors
    ///
    /// Returns `Service` if the transcript cannot be decrypted.
    pub async fn read_transcript(&self, data: &DataBag) -> Result<Option<String>, SupportError> {
        let Some(ciphertext) = data.get_str(TRANSCRIPT_KEY) else {
            return Ok(None);
        };
        let plaintext = self
            .security
            .decrypt_message(ciphertext)
            .await
            .context(SupportError::Service {
                operation: "decrypt the transcript",
            })?;
        Ok(Some(plaintext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{ESCALATED_KEY, SUGGESTED_RESPONSE_KEY, TAGS_KEY, TICKET_TRIAGED_EVENT};
    use crate::ticket::Priority;
    use caseflow_ai::{KeywordTextService, Message};
    use caseflow_analytics::RecordingAnalytics;
    use caseflow_security::{Grants, InMemorySecurity, SecurityError};
    use caseflow_workflow::{EngineError, InstanceSnapshot, InstanceStatus};
    use std::time::Duration;

    struct Fixture {
        support: CustomerSupportWorkflow,
        security: Arc<InMemorySecurity>,
        analytics: Arc<RecordingAnalytics>,
    }

    fn fixture(security: InMemorySecurity) -> Fixture {
        let security = Arc::new(security);
        let analytics = Arc::new(RecordingAnalytics::new());
        let services = SupportServices::new(
            Arc::new(KeywordTextService::new()),
            security.clone(),
            analytics.clone(),
            UserId::new(),
        );
        let engine = services.install(WorkflowEngine::builder()).build();
        let support = CustomerSupportWorkflow::register(engine, &services).expect("registered");
        Fixture {
            support,
            security,
            analytics,
        }
    }

    fn billing_ticket() -> Ticket {
        Ticket::new("T1", "Double charge")
            .with_message(Message::customer("I was charged twice and I'm frustrated. Refund ASAP."))
    }

    async fn wait_for_review(support: &CustomerSupportWorkflow, instance_id: InstanceId) {
        let pending = |s: &CustomerSupportWorkflow| {
            s.engine()
                .pending_approvals()
                .iter()
                .any(|p| p.instance_id == instance_id)
        };
        let mut rx = support.engine().events().subscribe();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !pending(support) {
                // Any event may be the one that opened the review.
                let _ = rx.recv().await;
            }
        })
        .await
        .expect("review requested");
    }

    async fn finish(support: &CustomerSupportWorkflow, instance_id: InstanceId) -> InstanceSnapshot {
        tokio::time::timeout(Duration::from_secs(5), support.engine().wait_for_instance(instance_id))
            .await
            .expect("instance finishes")
            .expect("instance known")
    }

    #[test]
    fn definition_is_valid() {
        let definition = CustomerSupportWorkflow::definition();
        assert!(definition.validate().is_ok());
        assert_eq!(definition.steps[0].id.as_str(), ANALYZE_STEP);
    }

    #[test]
    fn register_requires_support_actions() {
        let services = SupportServices::new(
            Arc::new(KeywordTextService::new()),
            Arc::new(InMemorySecurity::new()),
            Arc::new(RecordingAnalytics::new()),
            UserId::new(),
        );
        let err = CustomerSupportWorkflow::register(WorkflowEngine::new(), &services)
            .err()
            .expect("missing actions");
        assert!(err.to_string().contains("analyzeTicket"));
    }

    #[tokio::test]
    async fn approved_ticket_completes_both_branches() {
        let Fixture {
            support,
            security,
            analytics,
        } = fixture(InMemorySecurity::new());
        let instance_id = support.open_ticket(&billing_ticket()).expect("opened");

        wait_for_review(&support, instance_id).await;
        support
            .review_reply(instance_id, ApprovalDecision::approve("lead"))
            .expect("pending review");
        let snapshot = finish(&support, instance_id).await;

        assert_eq!(snapshot.status, InstanceStatus::Completed);
        let data = &snapshot.data;
        assert_eq!(data.lookup("analysis.sentiment"), Some(&json!("negative")));
        assert_eq!(data.get("conditionResult"), Some(&json!(true)));
        assert_eq!(data.get(ESCALATED_KEY), Some(&json!(true)));
        assert_eq!(data.get(TAGS_KEY), Some(&json!(["billing", "urgent"])));
        assert!(data.get_str(SUGGESTED_RESPONSE_KEY).is_some());
        assert_eq!(data.lookup("approvals.review.decidedBy"), Some(&json!("lead")));

        let transcript = support.read_transcript(data).await.expect("decrypts");
        assert_eq!(
            transcript.as_deref(),
            Some("I was charged twice and I'm frustrated. Refund ASAP.")
        );
        assert_eq!(analytics.count(TICKET_TRIAGED_EVENT), 1);
        assert_eq!(security.audit_log().len(), 1);
    }

    #[tokio::test]
    async fn calm_low_priority_ticket_is_not_escalated() {
        let Fixture { support, .. } = fixture(InMemorySecurity::new());
        let ticket = Ticket::new("T2", "Where is my package")
            .with_message(Message::customer("Thanks, just checking on my package"))
            .with_priority(Priority::Low);
        let instance_id = support.open_ticket(&ticket).expect("opened");

        wait_for_review(&support, instance_id).await;
        support
            .review_reply(instance_id, ApprovalDecision::approve("lead"))
            .expect("pending review");
        let snapshot = finish(&support, instance_id).await;

        assert_eq!(snapshot.status, InstanceStatus::Completed);
        assert_eq!(snapshot.data.get("conditionResult"), Some(&json!(false)));
        assert_eq!(snapshot.data.get(ESCALATED_KEY), Some(&json!(false)));
    }

    #[tokio::test]
    async fn denied_tagging_fails_the_ticket() {
        let Fixture {
            support, analytics, ..
        } = fixture(InMemorySecurity::with_grants(Grants::new()));
        let instance_id = support.open_ticket(&billing_ticket()).expect("opened");

        let snapshot = finish(&support, instance_id).await;
        assert_eq!(snapshot.status, InstanceStatus::Failed);
        assert_eq!(snapshot.failed_step, Some(StepId::from(TAG_STEP)));
        assert!(snapshot.error.unwrap_or_default().contains("denied"));
        assert_eq!(analytics.count(TICKET_TRIAGED_EVENT), 0);
    }

    #[tokio::test]
    async fn rejected_reply_fails_the_ticket() {
        let Fixture { support, .. } = fixture(InMemorySecurity::new());
        let instance_id = support.open_ticket(&billing_ticket()).expect("opened");

        wait_for_review(&support, instance_id).await;
        support
            .review_reply(
                instance_id,
                ApprovalDecision::reject("lead").with_comment("too casual"),
            )
            .expect("pending review");
        let snapshot = finish(&support, instance_id).await;

        assert_eq!(snapshot.status, InstanceStatus::Failed);
        assert_eq!(snapshot.failed_step, Some(StepId::from(REVIEW_STEP)));
    }

    #[test]
    fn review_of_unknown_ticket_keeps_engine_error() {
        let Fixture { support, .. } = fixture(InMemorySecurity::new());
        let err = support
            .review_reply(InstanceId::new(), ApprovalDecision::approve("lead"))
            .unwrap_err();

        assert_eq!(
            err.current_context(),
            &SupportError::Engine {
                operation: "review the reply"
            }
        );
        assert!(err.iter_reports().any(|report| {
            matches!(
                report.downcast_current_context::<EngineError>(),
                Some(EngineError::InstanceNotFound { .. })
            )
        }));
    }

    #[tokio::test]
    async fn unreadable_transcript_keeps_security_error() {
        let Fixture { support, .. } = fixture(InMemorySecurity::new());
        let data = DataBag::new().with(TRANSCRIPT_KEY, "not base64!");
        let err = support.read_transcript(&data).await.unwrap_err();

        assert!(matches!(err.current_context(), SupportError::Service { .. }));
        assert!(err.iter_reports().any(|report| {
            matches!(
                report.downcast_current_context::<SecurityError>(),
                Some(SecurityError::InvalidCiphertext { .. })
            )
        }));
    }

    #[test]
    fn blank_ticket_id_is_rejected() {
        let Fixture { support, .. } = fixture(InMemorySecurity::new());
        assert!(support.open_ticket(&Ticket::new(" ", "x")).is_err());
    }
}
