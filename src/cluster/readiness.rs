//! Readiness derivation and bounded readiness polling

use crate::domain::ports::{ClusterProvider, Readiness};
use backoff::ExponentialBackoffBuilder;
use k8s_openapi::api::core::v1::Pod;
use std::time::Duration;
use tracing::debug;

// =============================================================================
// Pod Snapshots
// =============================================================================

/// The parts of a pod that readiness depends on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodSnapshot {
    /// Pod phase as reported by the kubelet (`Pending`, `Running`, ...)
    pub phase: String,
    /// Ready flag of every container status
    pub containers_ready: Vec<bool>,
}

impl PodSnapshot {
    pub fn running(containers: usize) -> Self {
        Self {
            phase: "Running".to_string(),
            containers_ready: vec![true; containers],
        }
    }

    pub fn pending() -> Self {
        Self {
            phase: "Pending".to_string(),
            containers_ready: Vec::new(),
        }
    }

    pub fn failed() -> Self {
        Self {
            phase: "Failed".to_string(),
            containers_ready: vec![false],
        }
    }

    /// Running with every container reporting ready. A pod that has not
    /// published container statuses yet is not ready.
    pub fn is_ready(&self) -> bool {
        self.phase == "Running"
            && !self.containers_ready.is_empty()
            && self.containers_ready.iter().all(|r| *r)
    }
}

impl From<&Pod> for PodSnapshot {
    fn from(pod: &Pod) -> Self {
        let status = pod.status.as_ref();
        Self {
            phase: status
                .and_then(|s| s.phase.clone())
                .unwrap_or_else(|| "Unknown".to_string()),
            containers_ready: status
                .and_then(|s| s.container_statuses.as_ref())
                .map(|cs| cs.iter().map(|c| c.ready).collect())
                .unwrap_or_default(),
        }
    }
}

/// Aggregate readiness of a set of pods
pub fn derive_readiness(pods: &[PodSnapshot]) -> Readiness {
    if pods.is_empty() {
        return Readiness::Provisioning;
    }
    if pods.iter().all(PodSnapshot::is_ready) {
        return Readiness::Ready;
    }
    if pods.iter().any(|p| p.phase == "Failed") {
        return Readiness::Failed;
    }
    Readiness::Provisioning
}

// =============================================================================
// Readiness Polling
// =============================================================================

/// Backoff policy for waiting on a workload
#[derive(Debug, Clone)]
pub struct ReadinessPolicy {
    /// First poll delay
    pub initial_interval: Duration,
    /// Upper bound on a single poll delay
    pub max_interval: Duration,
    /// Give up after this long
    pub timeout: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(2),
            max_interval: Duration::from_secs(15),
            timeout: Duration::from_secs(300),
        }
    }
}

/// Poll `pod_readiness` until the selected pods are ready.
///
/// Returns the last observed readiness on failure: `Failed` as soon as a pod
/// fails, otherwise whatever was seen when the timeout elapsed.
pub async fn wait_until_ready(
    provider: &dyn ClusterProvider,
    namespace: &str,
    label_selector: &str,
    policy: &ReadinessPolicy,
) -> std::result::Result<(), Readiness> {
    let backoff = ExponentialBackoffBuilder::new()
        .with_initial_interval(policy.initial_interval)
        .with_max_interval(policy.max_interval)
        .with_max_elapsed_time(Some(policy.timeout))
        .build();

    backoff::future::retry(backoff, || async move {
        match provider.pod_readiness(namespace, Some(label_selector)).await {
            Readiness::Ready => Ok(()),
            Readiness::Failed => Err(backoff::Error::permanent(Readiness::Failed)),
            other => {
                debug!(namespace, selector = label_selector, readiness = %other, "Workload not ready yet");
                Err(backoff::Error::transient(other))
            }
        }
    })
    .await
}
