//! In-memory cluster
//!
//! A cluster provider that keeps every object in process memory. Used by
//! `--standalone` mode and as the fake control plane in tests: it supports
//! failure injection per resource kind, scripted pod health, and records
//! every call it receives.

use crate::cluster::readiness::{derive_readiness, PodSnapshot};
use crate::domain::ports::{ClusterProvider, CreateOutcome, Readiness};
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{
    ConfigMap, Namespace, PersistentVolumeClaim, Secret, Service,
};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

type Labels = BTreeMap<String, String>;

/// Health given to pods synthesized for new workloads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodBehaviour {
    Ready,
    Pending,
    Failed,
}

#[derive(Debug, Clone)]
struct SimulatedPod {
    labels: Labels,
    snapshot: PodSnapshot,
}

#[derive(Debug, Default)]
struct ClusterState {
    /// Namespace name -> labels
    namespaces: BTreeMap<String, Labels>,
    /// (namespace, kind, name)
    objects: BTreeSet<(String, String, String)>,
    /// Namespace -> pods
    pods: BTreeMap<String, Vec<SimulatedPod>>,
}

/// Cluster provider backed by process memory
pub struct InMemoryCluster {
    state: RwLock<ClusterState>,
    /// Resource kinds whose create call fails
    failing_kinds: RwLock<BTreeSet<String>>,
    fail_namespace_delete: RwLock<bool>,
    fail_queries: RwLock<bool>,
    pod_behaviour: RwLock<PodBehaviour>,
    calls: Mutex<Vec<String>>,
}

impl Default for InMemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCluster {
    /// Create an empty cluster whose workloads become ready immediately
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ClusterState::default()),
            failing_kinds: RwLock::new(BTreeSet::new()),
            fail_namespace_delete: RwLock::new(false),
            fail_queries: RwLock::new(false),
            pod_behaviour: RwLock::new(PodBehaviour::Ready),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Make every create call for `kind` fail
    pub fn fail_on(&self, kind: &str) {
        self.failing_kinds.write().insert(kind.to_string());
    }

    /// Stop failing create calls for `kind`
    pub fn heal(&self, kind: &str) {
        self.failing_kinds.write().remove(kind);
    }

    pub fn fail_namespace_delete(&self, fail: bool) {
        *self.fail_namespace_delete.write() = fail;
    }

    /// Make list and readiness queries error
    pub fn fail_queries(&self, fail: bool) {
        *self.fail_queries.write() = fail;
    }

    /// Health of pods created for subsequently submitted workloads
    pub fn set_pod_behaviour(&self, behaviour: PodBehaviour) {
        *self.pod_behaviour.write() = behaviour;
    }

    /// Replace the health of every pod in a namespace
    pub fn set_namespace_pods(&self, namespace: &str, snapshot: PodSnapshot) {
        let mut state = self.state.write();
        if let Some(pods) = state.pods.get_mut(namespace) {
            for pod in pods.iter_mut() {
                pod.snapshot = snapshot.clone();
            }
        }
    }

    /// Add a namespace without going through the provider API
    pub fn insert_namespace(&self, name: &str, labels: Labels) {
        self.state.write().namespaces.insert(name.to_string(), labels);
    }

    pub fn has_namespace(&self, name: &str) -> bool {
        self.state.read().namespaces.contains_key(name)
    }

    pub fn has_object(&self, namespace: &str, kind: &str, name: &str) -> bool {
        self.state.read().objects.contains(&(
            namespace.to_string(),
            kind.to_string(),
            name.to_string(),
        ))
    }

    /// Number of objects (excluding the namespace) held in a namespace
    pub fn object_count(&self, namespace: &str) -> usize {
        self.state
            .read()
            .objects
            .iter()
            .filter(|(ns, _, _)| ns == namespace)
            .count()
    }

    /// Every call received, oldest first (`"<verb> <kind> <namespace>/<name>"`)
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, call: String) {
        debug!(call = %call, "In-memory cluster call");
        self.calls.lock().push(call);
    }

    fn check_failure(&self, kind: &str, name: &str) -> Result<()> {
        if self.failing_kinds.read().contains(kind) {
            return Err(Error::Cluster(format!(
                "injected failure creating {}/{}",
                kind, name
            )));
        }
        Ok(())
    }

    fn create_object(
        &self,
        namespace: &str,
        kind: &str,
        meta: &ObjectMeta,
        pod_labels: Option<Labels>,
    ) -> Result<CreateOutcome> {
        let name = meta.name.clone().unwrap_or_default();
        self.record(format!("create {} {}/{}", kind, namespace, name));
        self.check_failure(kind, &name)?;

        let mut state = self.state.write();
        if !state.namespaces.contains_key(namespace) {
            return Err(Error::Cluster(format!("namespace {} not found", namespace)));
        }

        let key = (namespace.to_string(), kind.to_string(), name.clone());
        if !state.objects.insert(key) {
            debug!(kind, namespace, name = %name, "Object already exists");
            return Ok(CreateOutcome::AlreadyExists);
        }

        if let Some(labels) = pod_labels {
            let snapshot = match *self.pod_behaviour.read() {
                PodBehaviour::Ready => PodSnapshot::running(1),
                PodBehaviour::Pending => PodSnapshot::pending(),
                PodBehaviour::Failed => PodSnapshot::failed(),
            };
            state
                .pods
                .entry(namespace.to_string())
                .or_default()
                .push(SimulatedPod { labels, snapshot });
        }

        Ok(CreateOutcome::Created)
    }
}

/// Parse a `k=v,k2=v2` equality selector
fn parse_selector(selector: &str) -> Labels {
    selector
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

fn matches_selector(labels: &Labels, selector: &Labels) -> bool {
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}

fn template_labels(template_meta: Option<&ObjectMeta>) -> Labels {
    template_meta
        .and_then(|m| m.labels.clone())
        .unwrap_or_default()
}

#[async_trait]
impl ClusterProvider for InMemoryCluster {
    async fn create_namespace(&self, namespace: &Namespace) -> Result<CreateOutcome> {
        let name = namespace.metadata.name.clone().unwrap_or_default();
        self.record(format!("create Namespace {}", name));
        self.check_failure("Namespace", &name)?;

        let mut state = self.state.write();
        if state.namespaces.contains_key(&name) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        let labels = namespace.metadata.labels.clone().unwrap_or_default();
        state.namespaces.insert(name.clone(), labels);
        info!(namespace = %name, "Created namespace");
        Ok(CreateOutcome::Created)
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        self.record(format!("delete Namespace {}", name));
        if *self.fail_namespace_delete.read() {
            return Err(Error::Cluster(format!("injected failure deleting namespace {}", name)));
        }

        let mut state = self.state.write();
        if state.namespaces.remove(name).is_none() {
            return Err(Error::Cluster(format!("namespace {} not found", name)));
        }
        state.objects.retain(|(ns, _, _)| ns != name);
        state.pods.remove(name);
        info!(namespace = name, "Deleted namespace");
        Ok(())
    }

    async fn namespace_exists(&self, name: &str) -> Result<bool> {
        if *self.fail_queries.read() {
            return Err(Error::Cluster("injected query failure".into()));
        }
        Ok(self.has_namespace(name))
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<CreateOutcome> {
        self.create_object(namespace, "Secret", &secret.metadata, None)
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<CreateOutcome> {
        self.create_object(namespace, "Service", &service.metadata, None)
    }

    async fn create_stateful_set(
        &self,
        namespace: &str,
        stateful_set: &StatefulSet,
    ) -> Result<CreateOutcome> {
        let labels = stateful_set
            .spec
            .as_ref()
            .map(|s| template_labels(s.template.metadata.as_ref()));
        self.create_object(namespace, "StatefulSet", &stateful_set.metadata, labels)
    }

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<CreateOutcome> {
        let labels = deployment
            .spec
            .as_ref()
            .map(|s| template_labels(s.template.metadata.as_ref()));
        self.create_object(namespace, "Deployment", &deployment.metadata, labels)
    }

    async fn create_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<CreateOutcome> {
        self.create_object(namespace, "ConfigMap", &config_map.metadata, None)
    }

    async fn create_persistent_volume_claim(
        &self,
        namespace: &str,
        claim: &PersistentVolumeClaim,
    ) -> Result<CreateOutcome> {
        self.create_object(namespace, "PersistentVolumeClaim", &claim.metadata, None)
    }

    async fn create_ingress(&self, namespace: &str, ingress: &Ingress) -> Result<CreateOutcome> {
        self.create_object(namespace, "Ingress", &ingress.metadata, None)
    }

    async fn list_namespaces(&self, label_selector: &str) -> Result<Vec<String>> {
        if *self.fail_queries.read() {
            return Err(Error::Cluster("injected query failure".into()));
        }
        let selector = parse_selector(label_selector);
        Ok(self
            .state
            .read()
            .namespaces
            .iter()
            .filter(|(_, labels)| matches_selector(labels, &selector))
            .map(|(name, _)| name.clone())
            .collect())
    }

    async fn pod_readiness(&self, namespace: &str, label_selector: Option<&str>) -> Readiness {
        if *self.fail_queries.read() {
            return Readiness::Unknown;
        }
        let selector = label_selector.map(parse_selector).unwrap_or_default();
        let state = self.state.read();
        let pods: Vec<PodSnapshot> = state
            .pods
            .get(namespace)
            .map(|pods| {
                pods.iter()
                    .filter(|p| matches_selector(&p.labels, &selector))
                    .map(|p| p.snapshot.clone())
                    .collect()
            })
            .unwrap_or_default();
        derive_readiness(&pods)
    }
}
