//! Authorization and audit types.

use caseflow_core::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Roles a support user can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Supervisor,
    Agent,
    Viewer,
}

impl Role {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Supervisor => "supervisor",
            Self::Agent => "agent",
            Self::Viewer => "viewer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Permissions that can be checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Can view the resource.
    Read,
    /// Can modify the resource.
    Write,
    /// Can approve pending work on the resource.
    Approve,
    /// Can delete the resource.
    Delete,
}

impl Permission {
    /// All permissions.
    pub const ALL: [Self; 4] = [Self::Read, Self::Write, Self::Approve, Self::Delete];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Approve => "approve",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Resource types in the authorization model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    /// A support ticket.
    Ticket,
    /// A customer conversation.
    Conversation,
    /// A workflow definition.
    Workflow,
}

impl ResourceType {
    /// All resource types.
    pub const ALL: [Self; 3] = [Self::Ticket, Self::Conversation, Self::Workflow];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ticket => "ticket",
            Self::Conversation => "conversation",
            Self::Workflow => "workflow",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A resource in the authorization model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resource {
    /// The type of resource.
    pub resource_type: ResourceType,
    /// The resource ID.
    pub id: String,
}

impl Resource {
    /// Creates a new resource.
    #[must_use]
    pub fn new(resource_type: ResourceType, id: impl Into<String>) -> Self {
        Self {
            resource_type,
            id: id.into(),
        }
    }

    /// Creates a ticket resource.
    #[must_use]
    pub fn ticket(id: impl Into<String>) -> Self {
        Self::new(ResourceType::Ticket, id)
    }

    /// Creates a conversation resource.
    #[must_use]
    pub fn conversation(id: impl Into<String>) -> Self {
        Self::new(ResourceType::Conversation, id)
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource_type, self.id)
    }
}

/// One audited operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub user_id: UserId,
    pub action: String,
    pub resource: Resource,
    pub success: bool,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
    /// Creates an entry stamped with the current time.
    #[must_use]
    pub fn new(user_id: UserId, action: impl Into<String>, resource: Resource, success: bool) -> Self {
        Self {
            user_id,
            action: action.into(),
            resource,
            success,
            recorded_at: Utc::now(),
        }
    }
}
