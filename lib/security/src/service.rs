//! Security service contract.

use crate::error::SecurityError;
use crate::types::{AuditEntry, Permission, Resource, Role};
use async_trait::async_trait;
use caseflow_core::Result;

/// Permission checks, audit logging, and message encryption.
#[async_trait]
pub trait SecurityService: Send + Sync {
    /// Checks if a role has a permission on a resource.
    async fn has_permission(&self, role: Role, permission: Permission, resource: &Resource) -> Result<bool, SecurityError>;

    /// Checks permission and returns an error if denied.
    async fn require_permission(&self, role: Role, permission: Permission, resource: &Resource) -> Result<(), SecurityError> {
        let allowed = self.has_permission(role, permission, resource).await?;
        if !allowed {
            return Err(SecurityError::PermissionDenied {
                role: role.to_string(),
                permission: permission.to_string(),
                resource: resource.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Encrypts a message for storage.
    async fn encrypt_message(&self, plaintext: &str) -> Result<String, SecurityError>;

    /// Reverses [`encrypt_message`](Self::encrypt_message).
    async fn decrypt_message(&self, ciphertext: &str) -> Result<String, SecurityError>;

    /// Records an audited operation.
    async fn log_audit(&self, entry: AuditEntry) -> Result<(), SecurityError>;
}
