//! Permission checks, audit logging, and message encryption for caseflow.
//!
//! [`SecurityService`] is the contract used by support workflows;
//! [`InMemorySecurity`] implements it with a fixed role policy and only
//! obfuscates messages through [`InsecureDevCipher`].

pub mod cipher;
pub mod error;
pub mod memory;
pub mod service;
pub mod types;

pub use cipher::InsecureDevCipher;
pub use error::SecurityError;
pub use memory::{Grants, InMemorySecurity};
pub use service::SecurityService;
pub use types::{AuditEntry, Permission, Resource, ResourceType, Role};
