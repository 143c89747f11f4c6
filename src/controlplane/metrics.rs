//! Provisioning Metrics
//!
//! Prometheus collectors for the store lifecycle, held in a dedicated
//! registry so several orchestrators (and tests) never collide.

use crate::error::{Error, Result};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder,
};

/// Outcome label values
pub const OUTCOME_READY: &str = "ready";
pub const OUTCOME_FAILED: &str = "failed";
pub const OUTCOME_REJECTED: &str = "rejected";
pub const OUTCOME_DELETED: &str = "deleted";
pub const OUTCOME_INCOMPLETE: &str = "incomplete";

/// Collectors for store provisioning and deletion
#[derive(Clone)]
pub struct ProvisioningMetrics {
    registry: Registry,
    provisions: IntCounterVec,
    pipeline_failures: IntCounterVec,
    deletions: IntCounterVec,
    provision_duration: Histogram,
}

impl ProvisioningMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let provisions = IntCounterVec::new(
            Opts::new("store_provisions_total", "Store creation requests by outcome"),
            &["outcome"],
        )
        .map_err(metrics_error)?;
        let pipeline_failures = IntCounterVec::new(
            Opts::new(
                "store_pipeline_failures_total",
                "Provisioning pipeline failures by stage",
            ),
            &["stage"],
        )
        .map_err(metrics_error)?;
        let deletions = IntCounterVec::new(
            Opts::new("store_deletions_total", "Store deletions by outcome"),
            &["outcome"],
        )
        .map_err(metrics_error)?;
        let provision_duration = Histogram::with_opts(
            HistogramOpts::new(
                "store_provision_duration_seconds",
                "Wall time of the provisioning pipeline",
            )
            .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(provisions.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(pipeline_failures.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(deletions.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(provision_duration.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            registry,
            provisions,
            pipeline_failures,
            deletions,
            provision_duration,
        })
    }

    pub fn record_provision(&self, outcome: &str) {
        self.provisions.with_label_values(&[outcome]).inc();
    }

    pub fn record_pipeline_failure(&self, stage: &str) {
        self.pipeline_failures.with_label_values(&[stage]).inc();
    }

    pub fn record_deletion(&self, outcome: &str) {
        self.deletions.with_label_values(&[outcome]).inc();
    }

    pub fn observe_provision_duration(&self, seconds: f64) {
        self.provision_duration.observe(seconds);
    }

    pub fn provisions(&self, outcome: &str) -> u64 {
        self.provisions.with_label_values(&[outcome]).get()
    }

    pub fn pipeline_failures(&self, stage: &str) -> u64 {
        self.pipeline_failures.with_label_values(&[stage]).get()
    }

    pub fn deletions(&self, outcome: &str) -> u64 {
        self.deletions.with_label_values(&[outcome]).get()
    }

    /// Render every collector in the Prometheus text format
    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(e.to_string()))
    }
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_encoding() {
        let metrics = ProvisioningMetrics::new().unwrap();
        metrics.record_provision(OUTCOME_READY);
        metrics.record_provision(OUTCOME_READY);
        metrics.record_pipeline_failure("database-workload");
        metrics.observe_provision_duration(4.2);

        assert_eq!(metrics.provisions(OUTCOME_READY), 2);
        assert_eq!(metrics.pipeline_failures("database-workload"), 1);
        assert_eq!(metrics.deletions(OUTCOME_DELETED), 0);

        let text = metrics.encode().unwrap();
        assert!(text.contains("store_provisions_total{outcome=\"ready\"} 2"));
        assert!(text.contains("store_provision_duration_seconds_count 1"));
    }

    #[test]
    fn test_registries_are_independent() {
        let a = ProvisioningMetrics::new().unwrap();
        let b = ProvisioningMetrics::new().unwrap();
        a.record_deletion(OUTCOME_DELETED);
        assert_eq!(b.deletions(OUTCOME_DELETED), 0);
    }
}
