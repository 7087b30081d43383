//! Trigger descriptions.
//!
//! The engine does not fire triggers itself. A trigger records what external
//! signal is expected to call `start_workflow`, and is validated when the
//! workflow is stored.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The type of trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    /// A named application event, e.g. `ticket.created`.
    Event,
    /// Time-based trigger with a cron expression.
    Schedule,
    /// Started by a user or an API call.
    Manual,
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Event => write!(f, "event"),
            Self::Schedule => write!(f, "schedule"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// How a workflow is expected to be started.
///
/// Serialized as `{"type": "...", "config": {...}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "config", rename_all = "snake_case")]
pub enum Trigger {
    /// Started when the named event occurs.
    Event {
        /// Event name.
        event: String,
    },
    /// Started on a cron schedule.
    Schedule {
        /// Cron expression (e.g. "0 7 * * *" for 7am daily).
        cron: String,
        /// IANA timezone for the schedule.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timezone: Option<String>,
    },
    /// Started on demand.
    #[default]
    Manual,
}

impl Trigger {
    /// Creates an event trigger.
    #[must_use]
    pub fn event(event: impl Into<String>) -> Self {
        Self::Event {
            event: event.into(),
        }
    }

    /// Creates a schedule trigger in the server's timezone.
    #[must_use]
    pub fn schedule(cron: impl Into<String>) -> Self {
        Self::Schedule {
            cron: cron.into(),
            timezone: None,
        }
    }

    /// Returns the trigger type.
    #[must_use]
    pub fn trigger_type(&self) -> TriggerType {
        match self {
            Self::Event { .. } => TriggerType::Event,
            Self::Schedule { .. } => TriggerType::Schedule,
            Self::Manual => TriggerType::Manual,
        }
    }

    /// Checks the trigger configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTrigger` for a blank event name or a malformed cron
    /// expression.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::Event { event } if event.trim().is_empty() => Err(invalid("event name must not be empty")),
            Self::Schedule { cron, timezone } => {
                validate_cron(cron)?;
                if timezone.as_deref().is_some_and(|tz| tz.trim().is_empty()) {
                    return Err(invalid("timezone must not be empty when given"));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

fn invalid(reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidTrigger {
        reason: reason.into(),
    }
}

/// Shallow cron check: 5 or 6 fields drawn from the cron alphabet.
fn validate_cron(cron: &str) -> Result<(), ValidationError> {
    let fields: Vec<&str> = cron.split_whitespace().collect();
    if !(5..=6).contains(&fields.len()) {
        return Err(invalid(format!(
            "cron expression must have 5 or 6 fields, found {}",
            fields.len()
        )));
    }
    for field in fields {
        let valid = field
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '*' | ',' | '-' | '/' | '?' | 'L' | '#'));
        if !valid {
            return Err(invalid(format!("invalid cron field '{field}'")));
        }
    }
    Ok(())
}
