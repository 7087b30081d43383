//! In-memory security service.
//!
//! Grants live in a role policy table and audit entries in a vector.
//! Messages are only obfuscated with an [`InsecureDevCipher`]; use a real
//! `SecurityService` wherever transcripts must stay confidential.

use crate::cipher::InsecureDevCipher;
use crate::error::SecurityError;
use crate::service::SecurityService;
use crate::types::{AuditEntry, Permission, Resource, ResourceType, Role};
use async_trait::async_trait;
use caseflow_core::Result;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, instrument};

/// Permissions granted to each role, per resource type.
pub type Grants = HashMap<Role, HashSet<(Permission, ResourceType)>>;

/// [`SecurityService`] backed by process memory. Cloning shares the audit log.
#[derive(Debug, Clone)]
pub struct InMemorySecurity {
    grants: Arc<Grants>,
    cipher: InsecureDevCipher,
    audit: Arc<Mutex<Vec<AuditEntry>>>,
}

impl Default for InMemorySecurity {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySecurity {
    /// Creates a service with the default support-desk policy.
    ///
    /// - admin: everything
    /// - supervisor: read, write, and approve on everything
    /// - agent: read and write tickets and conversations
    /// - viewer: read everything
    #[must_use]
    pub fn new() -> Self {
        let mut grants = Grants::new();
        for resource in ResourceType::ALL {
            for permission in Permission::ALL {
                grants.entry(Role::Admin).or_default().insert((permission, resource));
            }
            for permission in [Permission::Read, Permission::Write, Permission::Approve] {
                grants.entry(Role::Supervisor).or_default().insert((permission, resource));
            }
            grants.entry(Role::Viewer).or_default().insert((Permission::Read, resource));
        }
        for resource in [ResourceType::Ticket, ResourceType::Conversation] {
            for permission in [Permission::Read, Permission::Write] {
                grants.entry(Role::Agent).or_default().insert((permission, resource));
            }
        }
        Self::with_grants(grants)
    }

    /// Creates a service with an explicit grant table.
    #[must_use]
    pub fn with_grants(grants: Grants) -> Self {
        Self {
            grants: Arc::new(grants),
            cipher: InsecureDevCipher::default(),
            audit: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Replaces the message cipher.
    #[must_use]
    pub fn with_cipher(mut self, cipher: InsecureDevCipher) -> Self {
        self.cipher = cipher;
        self
    }

    /// Returns every audit entry recorded so far, oldest first.
    #[must_use]
    pub fn audit_log(&self) -> Vec<AuditEntry> {
        self.audit.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl SecurityService for InMemorySecurity {
    #[instrument(skip(self), fields(resource = %resource))]
    async fn has_permission(&self, role: Role, permission: Permission, resource: &Resource) -> Result<bool, SecurityError> {
        let allowed = self
            .grants
            .get(&role)
            .is_some_and(|g| g.contains(&(permission, resource.resource_type)));
        debug!(allowed, "permission check result");
        Ok(allowed)
    }

    async fn encrypt_message(&self, plaintext: &str) -> Result<String, SecurityError> {
        Ok(self.cipher.seal(plaintext))
    }

    async fn decrypt_message(&self, ciphertext: &str) -> Result<String, SecurityError> {
        self.cipher.open(ciphertext)
    }

    #[instrument(skip_all, fields(user_id = %entry.user_id, action = %entry.action, success = entry.success))]
    async fn log_audit(&self, entry: AuditEntry) -> Result<(), SecurityError> {
        info!(resource = %entry.resource, "audit");
        self.audit
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
        Ok(())
    }
}
