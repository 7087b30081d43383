//! Text service abstraction.
//!
//! Workflow actions call the text service to draft replies, read the mood of
//! a conversation, and label tickets. Implementations may be backed by a
//! model or by simple rules.

use crate::error::AiError;
use async_trait::async_trait;
use caseflow_core::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Who wrote a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Agent,
    System,
}

/// One message of a support conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    #[must_use]
    pub fn customer(content: impl Into<String>) -> Self {
        Self {
            role: Role::Customer,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn agent(content: impl Into<String>) -> Self {
        Self {
            role: Role::Agent,
            content: content.into(),
        }
    }
}

/// Overall mood of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

impl Sentiment {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Neutral => "neutral",
            Self::Negative => "negative",
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of analyzing a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationAnalysis {
    pub sentiment: Sentiment,
    /// Topics mentioned, most relevant first.
    pub topics: Vec<String>,
    /// Suggested follow-ups for the agent.
    pub next_actions: Vec<String>,
}

/// Text capability used by workflow actions.
#[async_trait]
pub trait TextService: Send + Sync {
    /// Drafts a reply for the given prompt.
    async fn generate_suggestions(&self, prompt: &str) -> Result<String, AiError>;

    /// Reads sentiment, topics, and follow-ups from a conversation.
    async fn analyze_conversation(&self, messages: &[Message]) -> Result<ConversationAnalysis, AiError>;

    /// Labels a piece of text.
    async fn generate_tags(&self, text: &str) -> Result<Vec<String>, AiError>;
}
