//! Control Plane Module
//!
//! The provisioning orchestrator, its metrics, and the API that exposes it.

pub mod api;
pub mod metrics;
pub mod orchestrator;

pub use api::*;
pub use metrics::*;
pub use orchestrator::*;
