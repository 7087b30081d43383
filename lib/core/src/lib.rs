//! Core types shared by every caseflow crate.
//!
//! Provides the strongly-typed identifiers and the `Result` alias used by
//! the service crates.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{InstanceId, ParseIdError, UserId, WorkflowId};
