//! Domain Ports - Core trait definitions for the store provisioner
//!
//! These traits define the boundaries between the provisioning logic and
//! external systems: the cluster control plane and the store directory.
//! Adapters implement these traits to provide concrete functionality.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{
    ConfigMap, Namespace, PersistentVolumeClaim, Secret, Service,
};
use k8s_openapi::api::networking::v1::Ingress;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Owners
// =============================================================================

/// Identifier of a quota-bearing account
pub type OwnerId = i64;

/// Quota-bearing account that stores belong to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub id: OwnerId,
    /// Display name
    pub username: String,
    /// Opaque credential, never interpreted here
    pub password_hash: String,
    /// Ceiling on non-deleted stores
    pub max_stores: u32,
    /// Ceiling on summed storage of non-deleted stores, in Gi
    pub max_storage_gi: u32,
}

/// Aggregate consumption of an owner's non-deleted stores
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerUsage {
    pub store_count: u32,
    pub total_storage_gi: u32,
}

// =============================================================================
// Store Lifecycle
// =============================================================================

/// Lifecycle status of a store, as recorded in the directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreStatus {
    Initialized,
    Provisioning,
    Ready,
    Failed,
    Deleted,
}

impl StoreStatus {
    fn rank(self) -> u8 {
        match self {
            StoreStatus::Initialized => 0,
            StoreStatus::Provisioning => 1,
            StoreStatus::Ready | StoreStatus::Failed => 2,
            StoreStatus::Deleted => 3,
        }
    }

    /// Whether moving from `self` to `next` keeps the lifecycle monotonic.
    /// Rewriting the current status is a no-op and allowed.
    pub fn can_transition_to(self, next: StoreStatus) -> bool {
        self == next || next.rank() > self.rank()
    }

    /// Whether the store still counts against its owner's quota
    pub fn is_live(self) -> bool {
        self != StoreStatus::Deleted
    }
}

impl std::fmt::Display for StoreStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreStatus::Initialized => write!(f, "initialized"),
            StoreStatus::Provisioning => write!(f, "provisioning"),
            StoreStatus::Ready => write!(f, "ready"),
            StoreStatus::Failed => write!(f, "failed"),
            StoreStatus::Deleted => write!(f, "deleted"),
        }
    }
}

/// Durable record of a store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreRecord {
    pub id: String,
    pub owner_id: OwnerId,
    pub name: String,
    /// Public hostname the ingress routes
    #[serde(default)]
    pub hostname: String,
    /// Storage accounted against the owner (application + database tier)
    pub storage_size_gi: u32,
    pub status: StoreStatus,
    pub created_at: DateTime<Utc>,
}

/// Registration request for a new store
#[derive(Debug, Clone)]
pub struct NewStore {
    pub id: String,
    pub owner_id: OwnerId,
    pub name: String,
    pub hostname: String,
    pub storage_size_gi: u32,
}

/// Store record joined with its owner's display name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreWithOwner {
    pub record: StoreRecord,
    pub owner_username: String,
}

// =============================================================================
// Cluster Types
// =============================================================================

/// Aggregate health of the pods in a namespace (or a subset of them)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Readiness {
    Provisioning,
    Ready,
    Failed,
    Unknown,
}

impl std::fmt::Display for Readiness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Readiness::Provisioning => write!(f, "provisioning"),
            Readiness::Ready => write!(f, "ready"),
            Readiness::Failed => write!(f, "failed"),
            Readiness::Unknown => write!(f, "unknown"),
        }
    }
}

/// Result of an idempotent create call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

// =============================================================================
// Cluster Provider Port
// =============================================================================

/// Port for cluster control plane operations.
///
/// Every `create_*` call is idempotent: an object that already exists is
/// reported as [`CreateOutcome::AlreadyExists`], never as an error.
#[async_trait]
pub trait ClusterProvider: Send + Sync {
    /// Create a namespace
    async fn create_namespace(&self, namespace: &Namespace) -> Result<CreateOutcome>;

    /// Delete a namespace and everything inside it
    async fn delete_namespace(&self, name: &str) -> Result<()>;

    /// Check whether a namespace exists
    async fn namespace_exists(&self, name: &str) -> Result<bool>;

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<CreateOutcome>;

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<CreateOutcome>;

    async fn create_stateful_set(
        &self,
        namespace: &str,
        stateful_set: &StatefulSet,
    ) -> Result<CreateOutcome>;

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<CreateOutcome>;

    async fn create_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<CreateOutcome>;

    async fn create_persistent_volume_claim(
        &self,
        namespace: &str,
        claim: &PersistentVolumeClaim,
    ) -> Result<CreateOutcome>;

    async fn create_ingress(&self, namespace: &str, ingress: &Ingress) -> Result<CreateOutcome>;

    /// List namespace names matching a label selector
    async fn list_namespaces(&self, label_selector: &str) -> Result<Vec<String>>;

    /// Derive readiness from the pods in `namespace`, optionally restricted
    /// to a label selector. Query failures yield [`Readiness::Unknown`].
    async fn pod_readiness(&self, namespace: &str, label_selector: Option<&str>) -> Readiness;
}

// =============================================================================
// Store Directory Port
// =============================================================================

/// Port for the durable registry of owners and stores
#[async_trait]
pub trait StoreDirectory: Send + Sync {
    /// Look up an owner
    async fn get_owner(&self, owner_id: OwnerId) -> Result<Option<Owner>>;

    /// Count and summed storage of an owner's non-deleted stores
    async fn owner_usage(&self, owner_id: OwnerId) -> Result<OwnerUsage>;

    /// Re-check the owner's quota and register the store as `initialized`,
    /// as one atomic step
    async fn reserve_store(&self, store: NewStore) -> Result<StoreRecord>;

    /// Move a store forward in its lifecycle
    async fn update_store_status(&self, store_id: &str, status: StoreStatus) -> Result<()>;

    /// Remove a store record entirely
    async fn deregister_store(&self, store_id: &str) -> Result<()>;

    /// Look up a store
    async fn get_store(&self, store_id: &str) -> Result<Option<StoreRecord>>;

    /// Every store keyed by id, joined with its owner
    async fn list_stores_with_owners(&self) -> Result<BTreeMap<String, StoreWithOwner>>;

    /// Register an owner account
    async fn insert_owner(&self, owner: Owner) -> Result<()>;

    /// Every owner account
    async fn list_owners(&self) -> Result<Vec<Owner>>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ClusterProviderRef = Arc<dyn ClusterProvider>;
pub type StoreDirectoryRef = Arc<dyn StoreDirectory>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        assert_eq!(format!("{}", StoreStatus::Initialized), "initialized");
        assert_eq!(format!("{}", StoreStatus::Provisioning), "provisioning");
        assert_eq!(format!("{}", StoreStatus::Deleted), "deleted");
        assert_eq!(format!("{}", Readiness::Unknown), "unknown");
    }

    #[test]
    fn test_status_transitions_are_forward_only() {
        use StoreStatus::*;

        assert!(Initialized.can_transition_to(Provisioning));
        assert!(Provisioning.can_transition_to(Ready));
        assert!(Provisioning.can_transition_to(Failed));
        assert!(Ready.can_transition_to(Deleted));
        assert!(Failed.can_transition_to(Deleted));
        assert!(Initialized.can_transition_to(Deleted));
        assert!(Ready.can_transition_to(Ready));

        assert!(!Provisioning.can_transition_to(Initialized));
        assert!(!Ready.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Ready));
        assert!(!Ready.can_transition_to(Provisioning));
        assert!(!Deleted.can_transition_to(Ready));
    }

    #[test]
    fn test_status_serde() {
        let json = serde_json::to_string(&StoreStatus::Ready).unwrap();
        assert_eq!(json, "\"ready\"");
        let back: StoreStatus = serde_json::from_str("\"failed\"").unwrap();
        assert_eq!(back, StoreStatus::Failed);
    }
}
