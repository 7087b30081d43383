//! Support tickets.

use caseflow_ai::Message;
use caseflow_workflow::DataBag;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use std::fmt;

/// Data key holding the ticket id.
pub const TICKET_ID_KEY: &str = "ticketId";
/// Data key holding the ticket subject.
pub const SUBJECT_KEY: &str = "subject";
/// Data key holding the conversation messages.
pub const MESSAGES_KEY: &str = "messages";
/// Data key holding the ticket priority.
pub const PRIORITY_KEY: &str = "priority";

/// Ticket priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl Priority {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A customer support ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub ticket_id: String,
    pub subject: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub priority: Priority,
}

impl Ticket {
    #[must_use]
    pub fn new(ticket_id: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            ticket_id: ticket_id.into(),
            subject: subject.into(),
            messages: Vec::new(),
            priority: Priority::default(),
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Initial instance data for this ticket.
    #[must_use]
    pub fn to_data(&self) -> DataBag {
        let messages: Vec<JsonValue> = self
            .messages
            .iter()
            .map(|m| json!({"role": m.role, "content": m.content}))
            .collect();
        DataBag::new()
            .with(TICKET_ID_KEY, self.ticket_id.as_str())
            .with(SUBJECT_KEY, self.subject.as_str())
            .with(MESSAGES_KEY, messages)
            .with(PRIORITY_KEY, self.priority.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_data_uses_workflow_keys() {
        let ticket = Ticket::new("T1", "Refund")
            .with_message(Message::customer("Please refund me"))
            .with_priority(Priority::High);

        let data = ticket.to_data();
        assert_eq!(data.get_str("ticketId"), Some("T1"));
        assert_eq!(data.get_str("priority"), Some("high"));
        assert_eq!(data.lookup("messages.0.role"), Some(&json!("customer")));
    }

    #[test]
    fn deserializes_with_default_priority() {
        let ticket: Ticket = serde_json::from_value(json!({
            "ticketId": "T2",
            "subject": "Hi",
            "messages": [{"role": "customer", "content": "hello"}]
        }))
        .expect("deserialize");
        assert_eq!(ticket.priority, Priority::Normal);
        assert_eq!(ticket.messages.len(), 1);
    }
}
