//! Error types for the Store Provisioner
//!
//! Provides structured error types for quota enforcement, the provisioning
//! pipeline, the store directory, and the cluster control plane.

use crate::domain::ports::StoreStatus;
use thiserror::Error;

// =============================================================================
// Quota Violations
// =============================================================================

/// Reason a provisioning request was rejected by the quota guard
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuotaViolation {
    #[error("store limit reached: {current} of {max} stores in use")]
    StoreLimitReached { current: u32, max: u32 },

    #[error(
        "storage quota exceeded: {used}Gi used + {requested}Gi requested > {max}Gi allowed"
    )]
    StorageQuotaExceeded { used: u32, requested: u32, max: u32 },
}

// =============================================================================
// Error
// =============================================================================

/// Unified error type for the provisioner
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Caller Errors
    // =========================================================================
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(#[from] QuotaViolation),

    #[error("Owner not found: {owner_id}")]
    OwnerNotFound { owner_id: i64 },

    #[error("Store not found: {store_id}")]
    NotFound { store_id: String },

    #[error("Owner {owner_id} is not authorized to manage store {store_id}")]
    Unauthorized { store_id: String, owner_id: i64 },

    #[error("Request validation failed: {0}")]
    Validation(String),

    // =========================================================================
    // Provisioning Errors
    // =========================================================================
    #[error("Provisioning of store {store_id} failed at stage {stage}: {reason}")]
    ProvisioningFailed {
        store_id: String,
        stage: String,
        reason: String,
    },

    #[error("Deletion of store {store_id} incomplete: {reason}")]
    DeletionIncomplete { store_id: String, reason: String },

    #[error("Could not allocate a free store id after {attempts} attempts")]
    IdSpaceExhausted { attempts: u32 },

    // =========================================================================
    // Cluster Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Cluster error: {0}")]
    Cluster(String),

    // =========================================================================
    // Directory Errors
    // =========================================================================
    #[error("Invalid status transition for store {store_id}: {from} -> {to}")]
    InvalidStatusTransition {
        store_id: String,
        from: StoreStatus,
        to: StoreStatus,
    },

    #[error("Store already registered: {store_id}")]
    StoreExists { store_id: String },

    #[error("Directory persistence error: {0}")]
    Persistence(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML render error: {0}")]
    YamlRender(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable, machine-readable tag for this error
    pub fn kind(&self) -> &'static str {
        match self {
            Error::QuotaExceeded(_) => "quota_exceeded",
            Error::OwnerNotFound { .. } => "owner_not_found",
            Error::NotFound { .. } => "not_found",
            Error::Unauthorized { .. } => "unauthorized",
            Error::Validation(_) => "invalid_request",
            Error::ProvisioningFailed { .. } => "provisioning_failed",
            Error::DeletionIncomplete { .. } => "deletion_incomplete",
            Error::IdSpaceExhausted { .. } => "id_space_exhausted",
            Error::Kube(_) | Error::Cluster(_) => "cluster_error",
            Error::InvalidStatusTransition { .. } => "invalid_status_transition",
            Error::StoreExists { .. } => "store_exists",
            Error::Persistence(_) | Error::JsonParse(_) | Error::Io(_) => "persistence_error",
            Error::Configuration(_) => "configuration_error",
            Error::YamlRender(_) | Error::Internal(_) => "internal_error",
        }
    }

    /// Whether the caller caused this error (no side effects happened)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::QuotaExceeded(_)
                | Error::OwnerNotFound { .. }
                | Error::NotFound { .. }
                | Error::Unauthorized { .. }
                | Error::Validation(_)
        )
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Kube(_) | Error::Cluster(_) | Error::Io(_))
    }
}

/// Result type alias for the provisioner
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let err = Error::QuotaExceeded(QuotaViolation::StoreLimitReached { current: 2, max: 2 });
        assert_eq!(err.kind(), "quota_exceeded");
        assert!(err.is_client_error());

        let err = Error::ProvisioningFailed {
            store_id: "abcd1234".into(),
            stage: "database-workload".into(),
            reason: "boom".into(),
        };
        assert_eq!(err.kind(), "provisioning_failed");
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_quota_violation_message() {
        let err: Error = QuotaViolation::StorageQuotaExceeded {
            used: 5,
            requested: 8,
            max: 10,
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Quota exceeded: storage quota exceeded: 5Gi used + 8Gi requested > 10Gi allowed"
        );
    }

    #[test]
    fn test_transient() {
        assert!(Error::Cluster("connection reset".into()).is_transient());
        assert!(!Error::Validation("bad".into()).is_transient());
    }
}
