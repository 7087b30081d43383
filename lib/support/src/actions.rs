//! Actions registered by the support workflow.
//!
//! Each action reads the ticket fields from the instance data, calls one or
//! more collaborator services, and writes its result back under its own
//! key. Service failures become step failures carrying the service's
//! message.

use crate::ticket::{MESSAGES_KEY, SUBJECT_KEY, TICKET_ID_KEY};
use async_trait::async_trait;
use caseflow_ai::{Message, Role as MessageRole, TextService};
use caseflow_analytics::Analytics;
use caseflow_core::UserId;
use caseflow_security::{AuditEntry, Permission, Resource, Role, SecurityService};
use caseflow_workflow::{Action, CONDITION_RESULT_KEY, DataBag, HandlerError};
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;
use tracing::debug;

pub const ANALYZE_TICKET: &str = "analyzeTicket";
pub const SUGGEST_RESPONSE: &str = "suggestResponse";
pub const TAG_TICKET: &str = "tagTicket";
pub const TRACK_TICKET: &str = "trackTicket";

/// Data key written by `analyzeTicket`.
pub const ANALYSIS_KEY: &str = "analysis";
/// Data key written by `suggestResponse`.
pub const SUGGESTED_RESPONSE_KEY: &str = "suggestedResponse";
/// Data key written by `suggestResponse`; true when the condition step matched.
pub const ESCALATED_KEY: &str = "escalated";
/// Data key written by `tagTicket`.
pub const TAGS_KEY: &str = "tags";
/// Data key written by `trackTicket`; the encrypted conversation.
pub const TRANSCRIPT_KEY: &str = "transcript";

/// Analytics event recorded for each tracked ticket.
pub const TICKET_TRIAGED_EVENT: &str = "ticket_triaged";

fn ticket_id(data: &DataBag) -> Result<&str, HandlerError> {
    data.get_str(TICKET_ID_KEY)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| HandlerError::failed("ticket data has no ticketId"))
}

fn messages(data: &DataBag) -> Result<Vec<Message>, HandlerError> {
    let Some(value) = data.get(MESSAGES_KEY) else {
        return Ok(Vec::new());
    };
    serde_json::from_value(value.clone()).map_err(|e| HandlerError::InvalidConfig {
        reason: format!("ticket messages are malformed: {e}"),
    })
}

/// Subject and message text as one block.
fn ticket_text(data: &DataBag, messages: &[Message]) -> String {
    let mut text = data.get_str(SUBJECT_KEY).unwrap_or_default().to_string();
    for message in messages {
        text.push('\n');
        text.push_str(&message.content);
    }
    text
}

/// Analyzes the ticket conversation and stores sentiment, topics, and
/// next actions under `analysis`.
pub struct AnalyzeTicket {
    text: Arc<dyn TextService>,
}

impl AnalyzeTicket {
    #[must_use]
    pub fn new(text: Arc<dyn TextService>) -> Self {
        Self { text }
    }
}

#[async_trait]
impl Action for AnalyzeTicket {
    async fn run(&self, _params: &JsonValue, data: DataBag) -> Result<DataBag, HandlerError> {
        let mut messages = messages(&data)?;
        if messages.is_empty() {
            // Treat the subject as the opening message.
            if let Some(subject) = data.get_str(SUBJECT_KEY) {
                messages.push(Message::customer(subject));
            }
        }
        let analysis = self
            .text
            .analyze_conversation(&messages)
            .await
            .map_err(|report| HandlerError::failed(report.to_string()))?;
        debug!(sentiment = %analysis.sentiment, "ticket analyzed");

        let analysis = serde_json::to_value(&analysis).map_err(|e| HandlerError::failed(e.to_string()))?;
        Ok(data.with(ANALYSIS_KEY, analysis))
    }
}

/// Drafts a reply from the subject and the latest customer message.
pub struct SuggestResponse {
    text: Arc<dyn TextService>,
}

impl SuggestResponse {
    #[must_use]
    pub fn new(text: Arc<dyn TextService>) -> Self {
        Self { text }
    }
}

#[async_trait]
impl Action for SuggestResponse {
    async fn run(&self, _params: &JsonValue, data: DataBag) -> Result<DataBag, HandlerError> {
        let messages = messages(&data)?;
        let mut prompt = data.get_str(SUBJECT_KEY).unwrap_or_default().to_string();
        if let Some(latest) = messages.iter().rev().find(|m| m.role == MessageRole::Customer) {
            prompt.push('\n');
            prompt.push_str(&latest.content);
        }

        let reply = self
            .text
            .generate_suggestions(&prompt)
            .await
            .map_err(|report| HandlerError::failed(report.to_string()))?;
        let escalated = data.get(CONDITION_RESULT_KEY) == Some(&JsonValue::Bool(true));

        Ok(data
            .with(SUGGESTED_RESPONSE_KEY, reply)
            .with(ESCALATED_KEY, escalated))
    }
}

/// Labels the ticket. The acting role (param `role`, default `agent`)
/// needs write permission on the ticket.
pub struct TagTicket {
    text: Arc<dyn TextService>,
    security: Arc<dyn SecurityService>,
}

impl TagTicket {
    #[must_use]
    pub fn new(text: Arc<dyn TextService>, security: Arc<dyn SecurityService>) -> Self {
        Self { text, security }
    }
}

#[async_trait]
impl Action for TagTicket {
    async fn run(&self, params: &JsonValue, data: DataBag) -> Result<DataBag, HandlerError> {
        let role = match params.get("role") {
            Some(role) => serde_json::from_value::<Role>(role.clone()).map_err(|e| HandlerError::InvalidConfig {
                reason: format!("unknown role: {e}"),
            })?,
            None => Role::Agent,
        };
        let resource = Resource::ticket(ticket_id(&data)?);
        self.security
            .require_permission(role, Permission::Write, &resource)
            .await
            .map_err(|report| HandlerError::failed(report.to_string()))?;

        let messages = messages(&data)?;
        let tags = self
            .text
            .generate_tags(&ticket_text(&data, &messages))
            .await
            .map_err(|report| HandlerError::failed(report.to_string()))?;
        debug!(?tags, "ticket tagged");
        Ok(data.with(TAGS_KEY, tags))
    }
}

/// Archives the encrypted transcript, records the triage in analytics, and
/// writes an audit entry for the acting user.
pub struct TrackTicket {
    security: Arc<dyn SecurityService>,
    analytics: Arc<dyn Analytics>,
    actor: UserId,
}

impl TrackTicket {
    #[must_use]
    pub fn new(security: Arc<dyn SecurityService>, analytics: Arc<dyn Analytics>, actor: UserId) -> Self {
        Self {
            security,
            analytics,
            actor,
        }
    }
}

#[async_trait]
impl Action for TrackTicket {
    async fn run(&self, _params: &JsonValue, data: DataBag) -> Result<DataBag, HandlerError> {
        let id = ticket_id(&data)?.to_string();
        let messages = messages(&data)?;
        let transcript: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        let transcript = self
            .security
            .encrypt_message(&transcript.join("\n"))
            .await
            .map_err(|report| HandlerError::failed(report.to_string()))?;

        let properties = json!({
            "ticketId": &id,
            "sentiment": data.lookup("analysis.sentiment").cloned().unwrap_or(JsonValue::Null),
            "tags": data.get(TAGS_KEY).cloned().unwrap_or_else(|| json!([])),
        });
        self.analytics
            .track_event(TICKET_TRIAGED_EVENT, properties)
            .await
            .map_err(|report| HandlerError::failed(report.to_string()))?;

        self.security
            .log_audit(AuditEntry::new(self.actor, "triage", Resource::ticket(id), true))
            .await
            .map_err(|report| HandlerError::failed(report.to_string()))?;

        Ok(data.with(TRANSCRIPT_KEY, transcript))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caseflow_ai::KeywordTextService;
    use caseflow_analytics::RecordingAnalytics;
    use caseflow_security::InMemorySecurity;

    fn ticket() -> DataBag {
        DataBag::new()
            .with(TICKET_ID_KEY, "T1")
            .with(SUBJECT_KEY, "Double charge")
            .with(
                MESSAGES_KEY,
                json!([
                    {"role": "customer", "content": "I was charged twice, this is unacceptable"},
                    {"role": "agent", "content": "Sorry, checking now"}
                ]),
            )
    }

    #[tokio::test]
    async fn analyze_stores_analysis() {
        let action = AnalyzeTicket::new(Arc::new(KeywordTextService::new()));
        let data = action.run(&json!({}), ticket()).await.unwrap();
        assert_eq!(data.lookup("analysis.sentiment"), Some(&json!("negative")));
        assert_eq!(data.lookup("analysis.topics.0"), Some(&json!("billing")));
    }

    #[tokio::test]
    async fn analyze_falls_back_to_subject() {
        let action = AnalyzeTicket::new(Arc::new(KeywordTextService::new()));
        let data = DataBag::new().with(SUBJECT_KEY, "Package never arrived");
        let data = action.run(&json!({}), data).await.unwrap();
        assert_eq!(data.lookup("analysis.topics.0"), Some(&json!("shipping")));
    }

    #[tokio::test]
    async fn malformed_messages_fail() {
        let action = AnalyzeTicket::new(Arc::new(KeywordTextService::new()));
        let data = DataBag::new().with(MESSAGES_KEY, "not a list");
        assert!(matches!(
            action.run(&json!({}), data).await,
            Err(HandlerError::InvalidConfig { .. })
        ));
    }

    #[tokio::test]
    async fn suggest_marks_escalation_from_condition() {
        let action = SuggestResponse::new(Arc::new(KeywordTextService::new()));
        let data = ticket().with(CONDITION_RESULT_KEY, true);
        let data = action.run(&json!({}), data).await.unwrap();
        assert_eq!(data.get(ESCALATED_KEY), Some(&json!(true)));
        assert!(data.get_str(SUGGESTED_RESPONSE_KEY).unwrap().contains("billing"));
    }

    #[tokio::test]
    async fn tag_requires_write_permission() {
        let text = Arc::new(KeywordTextService::new());
        let security = Arc::new(InMemorySecurity::new());
        let action = TagTicket::new(text, security);

        let data = action.run(&json!({}), ticket()).await.unwrap();
        assert_eq!(data.get(TAGS_KEY), Some(&json!(["billing"])));

        let err = action.run(&json!({"role": "viewer"}), ticket()).await.unwrap_err();
        assert!(err.to_string().contains("denied"));
    }

    #[tokio::test]
    async fn track_encrypts_records_and_audits() {
        let security = Arc::new(InMemorySecurity::new());
        let analytics = Arc::new(RecordingAnalytics::new());
        let actor = UserId::new();
        let action = TrackTicket::new(security.clone(), analytics.clone(), actor);

        let data = action
            .run(&json!({}), ticket().with(TAGS_KEY, json!(["billing"])))
            .await
            .unwrap();

        let transcript = data.get_str(TRANSCRIPT_KEY).unwrap();
        assert!(!transcript.contains("charged"));
        assert_eq!(
            security.decrypt_message(transcript).await.unwrap(),
            "I was charged twice, this is unacceptable\nSorry, checking now"
        );

        let events = analytics.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, TICKET_TRIAGED_EVENT);
        assert_eq!(events[0].properties["tags"], json!(["billing"]));

        let audit = security.audit_log();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].user_id, actor);
    }

    #[tokio::test]
    async fn missing_ticket_id_fails() {
        let security = Arc::new(InMemorySecurity::new());
        let analytics = Arc::new(RecordingAnalytics::new());
        let action = TrackTicket::new(security, analytics.clone(), UserId::new());
        assert!(action.run(&json!({}), DataBag::new()).await.is_err());
        assert!(analytics.events().is_empty());
    }
}
