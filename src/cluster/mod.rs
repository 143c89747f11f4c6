//! Cluster Resource Providers
//!
//! Adapters implementing [`ClusterProvider`](crate::domain::ports::ClusterProvider):
//! - Kubernetes: the real control plane via `kube`
//! - In-memory: standalone mode and tests

pub mod kubernetes;
pub mod memory;
pub mod readiness;

pub use kubernetes::*;
pub use memory::*;
pub use readiness::*;
