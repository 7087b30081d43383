//! Runner configuration.
//!
//! Loaded via the `config` crate from environment variables prefixed with
//! `CASEFLOW`, using `__` between prefix and nested keys, for example
//! `CASEFLOW__ENGINE__APPROVAL_TIMEOUT_MS=60000` or
//! `CASEFLOW__DEMO__AUTO_APPROVE=false`.

use caseflow_support::Priority;
use caseflow_workflow::EngineConfig;
use serde::Deserialize;

/// Runner configuration composed from library configs.
#[derive(Debug, Default, Deserialize)]
pub struct AppConfig {
    /// Workflow engine tunables.
    #[serde(default)]
    pub engine: EngineConfig,

    /// The demo ticket and how it is reviewed.
    #[serde(default)]
    pub demo: DemoConfig,
}

/// The ticket run through the support workflow.
#[derive(Debug, Clone, Deserialize)]
pub struct DemoConfig {
    /// Approve drafted replies as soon as review is requested.
    /// When false, the run waits for Ctrl-C and cancels the ticket.
    #[serde(default = "default_auto_approve")]
    pub auto_approve: bool,

    /// Name recorded as the approver.
    #[serde(default = "default_approver")]
    pub approver: String,

    #[serde(default = "default_ticket_id")]
    pub ticket_id: String,

    #[serde(default = "default_subject")]
    pub subject: String,

    /// The customer's opening message.
    #[serde(default = "default_message")]
    pub message: String,

    #[serde(default)]
    pub priority: Priority,
}

fn default_auto_approve() -> bool {
    true
}

fn default_approver() -> String {
    "demo-supervisor".to_string()
}

fn default_ticket_id() -> String {
    "DEMO-1".to_string()
}

fn default_subject() -> String {
    "Double charge on my invoice".to_string()
}

fn default_message() -> String {
    "I was charged twice this month and I'm frustrated. Please refund ASAP.".to_string()
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            auto_approve: default_auto_approve(),
            approver: default_approver(),
            ticket_id: default_ticket_id(),
            subject: default_subject(),
            message: default_message(),
            priority: Priority::default(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed into its field.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::with_prefix("CASEFLOW")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
