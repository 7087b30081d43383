//! Customer support triage for the caseflow platform.
//!
//! Registers a workflow that analyzes incoming tickets, drafts a reply for
//! supervisor review, tags the ticket, and records it. The workflow's
//! actions call the text, security, and analytics services through
//! [`SupportServices`].

pub mod actions;
pub mod error;
pub mod ticket;
pub mod workflow;

pub use error::SupportError;
pub use ticket::{Priority, Ticket};
pub use workflow::{CustomerSupportWorkflow, SupportServices};
