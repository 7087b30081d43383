//! Rule-based text service.
//!
//! Matches words against fixed lexicons. Output depends only on the input,
//! which makes it suitable for tests and for running without a model.

use crate::error::AiError;
use crate::text::{ConversationAnalysis, Message, Role, Sentiment, TextService};
use async_trait::async_trait;
use caseflow_core::Result;
use tracing::{debug, instrument};

const TOPICS: &[(&str, &[&str])] = &[
    (
        "billing",
        &["bill", "billing", "charge", "charged", "invoice", "payment", "price", "refund"],
    ),
    (
        "shipping",
        &["arrived", "delivery", "package", "shipment", "shipped", "shipping", "tracking"],
    ),
    ("account", &["account", "locked", "login", "password", "signin"]),
    (
        "technical",
        &["broken", "bug", "crash", "crashes", "error", "outage", "working"],
    ),
];

const POSITIVE: &[&str] = &["excellent", "great", "happy", "love", "perfect", "thank", "thanks"];

const NEGATIVE: &[&str] = &[
    "angry",
    "awful",
    "broken",
    "disappointed",
    "frustrated",
    "terrible",
    "unacceptable",
    "worst",
];

const URGENT: &[&str] = &["asap", "emergency", "immediately", "urgent"];

const GENERAL_TAG: &str = "general";

/// Keyword-matching [`TextService`].
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordTextService;

impl KeywordTextService {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

/// Topics found in `text`, most hits first. Ties keep lexicon order.
fn topics(text: &str) -> Vec<&'static str> {
    let words: Vec<String> = words(text).collect();
    let mut hits: Vec<(&'static str, usize)> = TOPICS
        .iter()
        .map(|(topic, lexicon)| {
            let count = words.iter().filter(|w| lexicon.contains(&w.as_str())).count();
            (*topic, count)
        })
        .filter(|(_, count)| *count > 0)
        .collect();
    hits.sort_by(|a, b| b.1.cmp(&a.1));
    hits.into_iter().map(|(topic, _)| topic).collect()
}

fn sentiment(text: &str) -> Sentiment {
    let score = words(text).fold(0i64, |score, w| {
        if POSITIVE.contains(&w.as_str()) {
            score + 1
        } else if NEGATIVE.contains(&w.as_str()) {
            score - 1
        } else {
            score
        }
    });
    match score {
        s if s > 0 => Sentiment::Positive,
        s if s < 0 => Sentiment::Negative,
        _ => Sentiment::Neutral,
    }
}

fn is_urgent(text: &str) -> bool {
    words(text).any(|w| URGENT.contains(&w.as_str()))
}

fn follow_up(topic: &str) -> &'static str {
    match topic {
        "billing" => "review billing history",
        "shipping" => "check shipment status",
        "account" => "verify account access",
        "technical" => "collect error details",
        _ => "ask for more details",
    }
}

fn reply_line(topic: &str) -> &'static str {
    match topic {
        "billing" => "I've pulled up your billing history and will look into the charge.",
        "shipping" => "I'm checking the status of your shipment with our carrier.",
        "account" => "I can help you get back into your account.",
        "technical" => "Could you share the exact error you're seeing?",
        _ => "Could you tell me a little more about the issue?",
    }
}

#[async_trait]
impl TextService for KeywordTextService {
    #[instrument(skip_all, fields(prompt_len = prompt.len()))]
    async fn generate_suggestions(&self, prompt: &str) -> Result<String, AiError> {
        if prompt.trim().is_empty() {
            return Err(AiError::EmptyPrompt.into());
        }
        let topic = topics(prompt).first().copied().unwrap_or(GENERAL_TAG);
        let mut reply = String::from("Thanks for reaching out. ");
        reply.push_str(reply_line(topic));
        if is_urgent(prompt) {
            reply.push_str(" I've marked this as a priority.");
        }
        debug!(topic, "drafted reply");
        Ok(reply)
    }

    #[instrument(skip_all, fields(messages = messages.len()))]
    async fn analyze_conversation(&self, messages: &[Message]) -> Result<ConversationAnalysis, AiError> {
        if messages.is_empty() {
            return Err(AiError::NoMessages.into());
        }

        let all: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        let customer: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::Customer)
            .map(|m| m.content.as_str())
            .collect();

        let topics = topics(&all.join(" "));
        let sentiment = sentiment(&customer.join(" "));

        let mut next_actions: Vec<String> = topics.iter().map(|t| follow_up(t).to_string()).collect();
        if next_actions.is_empty() {
            next_actions.push(follow_up(GENERAL_TAG).to_string());
        }
        if sentiment == Sentiment::Negative {
            next_actions.push("escalate to supervisor".to_string());
        }

        debug!(%sentiment, topics = topics.len(), "conversation analyzed");
        Ok(ConversationAnalysis {
            sentiment,
            topics: topics.into_iter().map(str::to_string).collect(),
            next_actions,
        })
    }

    #[instrument(skip_all)]
    async fn generate_tags(&self, text: &str) -> Result<Vec<String>, AiError> {
        let mut tags: Vec<String> = topics(text).into_iter().map(str::to_string).collect();
        if tags.is_empty() {
            tags.push(GENERAL_TAG.to_string());
        }
        if is_urgent(text) {
            tags.push("urgent".to_string());
        }
        Ok(tags)
    }
}
