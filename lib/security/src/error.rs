//! Security error types.

use std::fmt;

/// Security errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityError {
    /// Permission denied.
    PermissionDenied {
        /// The role that was checked.
        role: String,
        /// The permission that was requested.
        permission: String,
        /// The resource that was accessed.
        resource: String,
    },
    /// Ciphertext is not valid for this key.
    InvalidCiphertext {
        /// Error details.
        details: String,
    },
    /// An audit record could not be stored.
    AuditFailed {
        /// Error details.
        details: String,
    },
}

impl fmt::Display for SecurityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PermissionDenied {
                role,
                permission,
                resource,
            } => {
                write!(
                    f,
                    "permission '{permission}' denied to role '{role}' on resource '{resource}'"
                )
            }
            Self::InvalidCiphertext { details } => write!(f, "invalid ciphertext: {details}"),
            Self::AuditFailed { details } => write!(f, "failed to record audit entry: {details}"),
        }
    }
}

impl std::error::Error for SecurityError {}
