//! Notification steps.
//!
//! A notification step renders its template over the instance data and
//! hands the message to a [`Notifier`]. Data passes through unchanged.
//! Retriable delivery failures are logged and swallowed; permanent ones
//! fail the step.

use crate::data::DataBag;
use crate::error::HandlerError;
use crate::handler::{StepContext, StepHandler};
use crate::step::StepConfig;
use async_trait::async_trait;
use caseflow_core::InstanceId;
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// A rendered message ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub instance_id: InstanceId,
    pub channel: String,
    pub recipient: Option<String>,
    pub message: String,
}

/// Why a delivery failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// A transient failure; a later attempt might succeed.
    Retriable { reason: String },
    /// The message can never be delivered as addressed.
    Permanent { reason: String },
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retriable { reason } => write!(f, "retriable delivery failure: {reason}"),
            Self::Permanent { reason } => write!(f, "permanent delivery failure: {reason}"),
        }
    }
}

impl std::error::Error for DeliveryError {}

/// Sends notifications on behalf of notification steps.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError>;
}

/// Notifier that writes each message to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError> {
        info!(
            instance_id = %notification.instance_id,
            channel = %notification.channel,
            recipient = notification.recipient.as_deref().unwrap_or("-"),
            message = %notification.message,
            "notification sent"
        );
        Ok(())
    }
}

/// Replaces every `{{path}}` in `template` with the value at that data path.
///
/// Strings are inserted without quotes, other values as JSON. Unknown paths
/// render as an empty string; an unclosed `{{` is left as written.
#[must_use]
pub fn render_template(template: &str, data: &DataBag) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let path = after[..end].trim();
        match data.lookup(path) {
            Some(JsonValue::String(s)) => out.push_str(s),
            Some(JsonValue::Null) | None => {}
            Some(other) => out.push_str(&other.to_string()),
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

/// Step handler for `notification` steps.
#[derive(Clone)]
pub struct NotificationStepHandler {
    notifier: Arc<dyn Notifier>,
}

impl NotificationStepHandler {
    #[must_use]
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }
}

impl fmt::Debug for NotificationStepHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationStepHandler").finish_non_exhaustive()
    }
}

#[async_trait]
impl StepHandler for NotificationStepHandler {
    async fn execute(&self, ctx: &StepContext<'_>, data: DataBag) -> Result<DataBag, HandlerError> {
        let StepConfig::Notification(config) = &ctx.step.config else {
            return Err(HandlerError::InvalidConfig {
                reason: "notification handler received a non-notification step".to_string(),
            });
        };

        let notification = Notification {
            instance_id: ctx.instance_id,
            channel: config.channel.clone(),
            recipient: config.recipient.clone(),
            message: render_template(&config.template, &data),
        };

        match self.notifier.deliver(&notification).await {
            Ok(()) => Ok(data),
            Err(DeliveryError::Retriable { reason }) => {
                warn!(
                    instance_id = %ctx.instance_id,
                    step_id = %ctx.step.id,
                    channel = %config.channel,
                    %reason,
                    "notification not delivered; continuing"
                );
                Ok(data)
            }
            Err(DeliveryError::Permanent { reason }) => Err(HandlerError::DeliveryFailed {
                channel: config.channel.clone(),
                reason,
            }),
        }
    }
}
