//! Domain layer - Core store types and port definitions
//!
//! This module defines the core traits (ports) that the cluster and
//! directory adapters implement, following hexagonal architecture principles.

pub mod ports;

pub use ports::*;
