//! Store Provisioner
//!
//! Provisions isolated WooCommerce stores on a shared Kubernetes cluster.
//! Each store gets its own namespace holding a MySQL tier, a WordPress tier
//! and an ingress route, created by a quota-gated, fail-fast pipeline.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                       REST API / CLI (axum, clap)                     │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │                      Provisioning Orchestrator                        │
//! │     create_store ─ list_stores ─ delete_store ─ ProvisioningMetrics   │
//! ├───────────────────┬───────────────────────┬──────────────────────────┤
//! │   Quota Guard     │   Manifest Catalog    │  Cluster Resource        │
//! │                   │   (k8s-openapi types) │  Provider                │
//! │   Store Directory │                       │  (kube / in-memory)      │
//! │   (JSON document) │                       │                          │
//! └───────────────────┴───────────────────────┴──────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`catalog`]: Builders for the per-store resource topology
//! - [`cluster`]: Cluster provider adapters and readiness derivation
//! - [`controlplane`]: Orchestrator, metrics and REST API
//! - [`directory`]: Owner/store registry and quota rules
//! - [`domain`]: Core domain types and ports
//! - [`error`]: Error types and handling

pub mod catalog;
pub mod cluster;
pub mod controlplane;
pub mod directory;
pub mod domain;
pub mod error;

// Re-export commonly used types
pub use catalog::{CatalogConfig, StoreSpec, StoreTopology};

pub use cluster::{InMemoryCluster, KubeCluster, ReadinessPolicy};

pub use controlplane::{
    ApiServer, ApiServerConfig, CreateStoreRequest, Orchestrator, OrchestratorConfig,
    ProvisionedStore, ProvisioningMetrics, ProvisioningStage, StoreSummary,
};

pub use directory::{seed_default_owners, JsonStoreDirectory, QuotaGuard};

pub use domain::ports::{
    ClusterProvider, Owner, OwnerId, Readiness, StoreDirectory, StoreRecord, StoreStatus,
};

pub use error::{Error, QuotaViolation, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
