//! Provisioning Orchestrator
//!
//! Coordinates the store lifecycle:
//! - Quota-gated, fail-fast creation of the per-store topology
//! - Listing that joins live namespaces with the store directory
//! - Owner-checked deletion
//!
//! Status transitions are persisted in the directory before the next stage
//! starts, so the directory always reflects how far a store got.

use crate::catalog::{
    database_pod_selector, hostname_for, namespace_for, store_id_from_namespace, CatalogConfig,
    StoreCredentials, StoreSpec, StoreTopology, DEFAULT_SAMPLE_PRODUCTS,
    STORE_NAMESPACE_SELECTOR,
};
use crate::cluster::readiness::{wait_until_ready, ReadinessPolicy};
use crate::controlplane::metrics::{
    ProvisioningMetrics, OUTCOME_DELETED, OUTCOME_FAILED, OUTCOME_INCOMPLETE, OUTCOME_READY,
    OUTCOME_REJECTED,
};
use crate::directory::quota::{requested_storage, QuotaGuard};
use crate::domain::ports::{
    ClusterProviderRef, CreateOutcome, NewStore, OwnerId, Readiness, StoreDirectoryRef,
    StoreStatus,
};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

// =============================================================================
// Pipeline Stages
// =============================================================================

/// One step of the provisioning pipeline, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProvisioningStage {
    Namespace,
    DatabaseSecret,
    DatabaseService,
    DatabaseWorkload,
    DatabaseReady,
    AppConfig,
    AppStorage,
    AppBootstrap,
    AppDeployment,
    AppService,
    Ingress,
}

impl ProvisioningStage {
    pub const PIPELINE: [ProvisioningStage; 11] = [
        ProvisioningStage::Namespace,
        ProvisioningStage::DatabaseSecret,
        ProvisioningStage::DatabaseService,
        ProvisioningStage::DatabaseWorkload,
        ProvisioningStage::DatabaseReady,
        ProvisioningStage::AppConfig,
        ProvisioningStage::AppStorage,
        ProvisioningStage::AppBootstrap,
        ProvisioningStage::AppDeployment,
        ProvisioningStage::AppService,
        ProvisioningStage::Ingress,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisioningStage::Namespace => "namespace",
            ProvisioningStage::DatabaseSecret => "database-secret",
            ProvisioningStage::DatabaseService => "database-service",
            ProvisioningStage::DatabaseWorkload => "database-workload",
            ProvisioningStage::DatabaseReady => "database-ready",
            ProvisioningStage::AppConfig => "app-config",
            ProvisioningStage::AppStorage => "app-storage",
            ProvisioningStage::AppBootstrap => "app-bootstrap",
            ProvisioningStage::AppDeployment => "app-deployment",
            ProvisioningStage::AppService => "app-service",
            ProvisioningStage::Ingress => "ingress",
        }
    }
}

impl std::fmt::Display for ProvisioningStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct StageFailure {
    stage: ProvisioningStage,
    reason: String,
}

// =============================================================================
// Orchestrator Configuration
// =============================================================================

/// Configuration for the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Hostname suffix used when a request does not name one
    pub default_domain_suffix: String,
    /// Application storage used when a request does not name one, in Gi
    pub default_storage_gi: u32,
    /// Upper bound on requested application storage, in Gi
    pub max_storage_gi: u32,
    /// Admin account created by the bootstrap
    pub admin_user: String,
    pub admin_email: String,
    /// How many fresh ids to try before giving up
    pub id_attempts: u32,
    /// Database readiness polling
    pub readiness: ReadinessPolicy,
    /// Images and knobs for the manifest builders
    pub catalog: CatalogConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_domain_suffix: "local".to_string(),
            default_storage_gi: 2,
            max_storage_gi: 1024,
            admin_user: "admin".to_string(),
            admin_email: "admin@example.com".to_string(),
            id_attempts: 5,
            readiness: ReadinessPolicy::default(),
            catalog: CatalogConfig::default(),
        }
    }
}

// =============================================================================
// Requests and Responses
// =============================================================================

/// Parameters of a store creation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateStoreRequest {
    pub owner_id: OwnerId,
    /// Display name, defaults to the namespace name
    #[serde(default)]
    pub name: Option<String>,
    /// `name|price|description` rows seeded into the catalogue
    #[serde(default)]
    pub sample_products: Option<String>,
    /// Domain the store hostname is placed under
    #[serde(default, alias = "store_url")]
    pub hostname_suffix: Option<String>,
    /// Admin password; generated when absent
    #[serde(default)]
    pub admin_password: Option<String>,
    /// Application storage in Gi
    #[serde(default, alias = "storageSize")]
    pub storage_size_gi: Option<u32>,
}

/// A fully provisioned store and its access details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionedStore {
    pub id: String,
    pub name: String,
    pub namespace: String,
    pub hostname: String,
    pub url: String,
    pub admin_url: String,
    pub admin_user: String,
    pub admin_password: String,
    /// Owner display name
    pub owner: String,
    pub status: StoreStatus,
    /// Storage accounted against the owner (application + database tier)
    pub storage_size_gi: u32,
    pub created_at: DateTime<Utc>,
}

/// Where a listed store's status came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SummaryStatus {
    /// Lifecycle status from the store directory
    Recorded(StoreStatus),
    /// Derived from pod health for namespaces the directory does not know
    Live(Readiness),
}

impl std::fmt::Display for SummaryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SummaryStatus::Recorded(s) => write!(f, "{}", s),
            SummaryStatus::Live(r) => write!(f, "{}", r),
        }
    }
}

/// One entry of a store listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSummary {
    pub id: String,
    pub namespace: String,
    pub url: String,
    pub status: SummaryStatus,
    /// `None` for namespaces without a directory record
    pub name: Option<String>,
    pub owner: Option<String>,
    pub owner_id: Option<OwnerId>,
    pub storage_size_gi: Option<u32>,
    pub created_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Identifier Generation
// =============================================================================

/// Source of candidate store ids
pub type IdGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// 8 lowercase hex characters from the thread-local CSPRNG
pub fn generate_store_id() -> String {
    hex::encode(rand::random::<[u8; 4]>())
}

/// 16 alphanumeric characters from the thread-local CSPRNG
pub fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect()
}

fn is_valid_store_id(store_id: &str) -> bool {
    !store_id.is_empty()
        && store_id.len() <= 48
        && store_id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

fn is_valid_domain_suffix(suffix: &str) -> bool {
    !suffix.is_empty()
        && suffix.len() <= 200
        && suffix.split('.').all(|label| {
            !label.is_empty()
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        })
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Drives store creation, listing and deletion
pub struct Orchestrator {
    config: OrchestratorConfig,
    cluster: ClusterProviderRef,
    directory: StoreDirectoryRef,
    quota: QuotaGuard,
    metrics: ProvisioningMetrics,
    id_generator: IdGenerator,
}

impl Orchestrator {
    /// Create a new orchestrator
    pub fn new(
        config: OrchestratorConfig,
        cluster: ClusterProviderRef,
        directory: StoreDirectoryRef,
        metrics: ProvisioningMetrics,
    ) -> Self {
        Self {
            config,
            cluster,
            quota: QuotaGuard::new(directory.clone()),
            directory,
            metrics,
            id_generator: Arc::new(generate_store_id),
        }
    }

    /// Replace the store id source
    pub fn with_id_generator(mut self, generator: IdGenerator) -> Self {
        self.id_generator = generator;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn metrics(&self) -> &ProvisioningMetrics {
        &self.metrics
    }

    pub fn directory(&self) -> &StoreDirectoryRef {
        &self.directory
    }

    // =========================================================================
    // Create
    // =========================================================================

    /// Provision a new store for `request.owner_id`.
    ///
    /// Nothing touches the cluster until the quota check passes. A failing
    /// stage leaves the store `failed` with every earlier object in place.
    #[instrument(skip(self, request), fields(owner_id = request.owner_id))]
    pub async fn create_store(&self, request: CreateStoreRequest) -> Result<ProvisionedStore> {
        let started = Instant::now();

        let app_storage_gi = request.storage_size_gi.unwrap_or(self.config.default_storage_gi);
        let suffix = request
            .hostname_suffix
            .as_deref()
            .map(|s| s.trim().trim_start_matches('.').to_lowercase())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| self.config.default_domain_suffix.clone());
        self.validate_request(&request, app_storage_gi, &suffix)?;

        let requested_gi = requested_storage(app_storage_gi, self.config.catalog.database_storage_gi);
        let owner = self
            .quota
            .check_quota(request.owner_id, requested_gi)
            .await
            .map_err(|e| self.reject(e))?;

        let store_id = self.allocate_store_id().await?;
        let spec = StoreSpec {
            name: request
                .name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| namespace_for(&store_id)),
            hostname: hostname_for(&store_id, &suffix),
            credentials: StoreCredentials {
                admin_user: self.config.admin_user.clone(),
                admin_password: request.admin_password.unwrap_or_else(generate_password),
                admin_email: self.config.admin_email.clone(),
                root_password: generate_password(),
            },
            sample_products: request
                .sample_products
                .unwrap_or_else(|| DEFAULT_SAMPLE_PRODUCTS.to_string()),
            storage_size_gi: app_storage_gi,
            store_id,
        };

        let record = self
            .directory
            .reserve_store(NewStore {
                id: spec.store_id.clone(),
                owner_id: owner.id,
                name: spec.name.clone(),
                hostname: spec.hostname.clone(),
                storage_size_gi: requested_gi,
            })
            .await
            .map_err(|e| self.reject(e))?;

        info!(
            store_id = %record.id,
            namespace = %spec.namespace(),
            hostname = %spec.hostname,
            storage_gi = requested_gi,
            "Provisioning store"
        );

        self.directory
            .update_store_status(&record.id, StoreStatus::Provisioning)
            .await?;

        if let Err(failure) = self.run_pipeline(&spec).await {
            error!(
                store_id = %record.id,
                stage = %failure.stage,
                reason = %failure.reason,
                "Provisioning failed"
            );
            self.metrics.record_pipeline_failure(failure.stage.as_str());
            self.metrics.record_provision(OUTCOME_FAILED);
            if let Err(e) = self
                .directory
                .update_store_status(&record.id, StoreStatus::Failed)
                .await
            {
                warn!(store_id = %record.id, error = %e, "Could not record failed status");
            }
            return Err(Error::ProvisioningFailed {
                store_id: record.id,
                stage: failure.stage.to_string(),
                reason: failure.reason,
            });
        }

        if let Err(e) = self
            .directory
            .update_store_status(&record.id, StoreStatus::Ready)
            .await
        {
            error!(store_id = %record.id, error = %e, "Store provisioned but ready status not recorded");
            self.metrics.record_provision(OUTCOME_FAILED);
            return Err(Error::Persistence(format!(
                "store {} provisioned but its ready status was not recorded: {}",
                record.id, e
            )));
        }

        let elapsed = started.elapsed().as_secs_f64();
        self.metrics.record_provision(OUTCOME_READY);
        self.metrics.observe_provision_duration(elapsed);
        info!(store_id = %record.id, elapsed_secs = elapsed, "Store ready");

        let url = spec.site_url();
        Ok(ProvisionedStore {
            namespace: spec.namespace(),
            admin_url: format!("{}/wp-admin", url),
            url,
            hostname: spec.hostname,
            name: spec.name,
            admin_user: spec.credentials.admin_user,
            admin_password: spec.credentials.admin_password,
            owner: owner.username,
            status: StoreStatus::Ready,
            storage_size_gi: record.storage_size_gi,
            created_at: record.created_at,
            id: record.id,
        })
    }

    fn validate_request(
        &self,
        request: &CreateStoreRequest,
        app_storage_gi: u32,
        suffix: &str,
    ) -> Result<()> {
        if app_storage_gi == 0 || app_storage_gi > self.config.max_storage_gi {
            return Err(Error::Validation(format!(
                "storage size must be between 1 and {} Gi, got {}",
                self.config.max_storage_gi, app_storage_gi
            )));
        }
        if !is_valid_domain_suffix(suffix) {
            return Err(Error::Validation(format!("invalid hostname suffix: {}", suffix)));
        }
        if matches!(request.admin_password.as_deref(), Some(p) if p.is_empty()) {
            return Err(Error::Validation("admin password must not be empty".into()));
        }
        Ok(())
    }

    fn reject(&self, e: Error) -> Error {
        if matches!(e, Error::QuotaExceeded(_)) {
            warn!(error = %e, "Store creation rejected");
            self.metrics.record_provision(OUTCOME_REJECTED);
        }
        e
    }

    /// Draw ids until one is free in both the cluster and the directory
    async fn allocate_store_id(&self) -> Result<String> {
        for attempt in 1..=self.config.id_attempts {
            let candidate = (self.id_generator)();
            let taken = self.cluster.namespace_exists(&namespace_for(&candidate)).await?
                || self.directory.get_store(&candidate).await?.is_some();
            if !taken {
                return Ok(candidate);
            }
            warn!(store_id = %candidate, attempt, "Store id already in use");
        }
        Err(Error::IdSpaceExhausted {
            attempts: self.config.id_attempts,
        })
    }

    /// Submit every object of the topology, stopping at the first failure
    async fn run_pipeline(&self, spec: &StoreSpec) -> std::result::Result<(), StageFailure> {
        use ProvisioningStage as Stage;

        let topology = StoreTopology::build(spec, &self.config.catalog);
        let ns = spec.namespace();
        let cluster = &self.cluster;

        self.submit(spec, Stage::Namespace, cluster.create_namespace(&topology.namespace))
            .await?;
        self.submit(spec, Stage::DatabaseSecret, cluster.create_secret(&ns, &topology.database_secret))
            .await?;
        self.submit(spec, Stage::DatabaseService, cluster.create_service(&ns, &topology.database_service))
            .await?;
        self.submit(
            spec,
            Stage::DatabaseWorkload,
            cluster.create_stateful_set(&ns, &topology.database_workload),
        )
        .await?;

        debug!(namespace = %ns, "Waiting for database");
        wait_until_ready(cluster.as_ref(), &ns, &database_pod_selector(), &self.config.readiness)
            .await
            .map_err(|last| StageFailure {
                stage: Stage::DatabaseReady,
                reason: format!("database did not become ready (last observed: {})", last),
            })?;

        self.submit(spec, Stage::AppConfig, cluster.create_config_map(&ns, &topology.app_config))
            .await?;
        self.submit(
            spec,
            Stage::AppStorage,
            cluster.create_persistent_volume_claim(&ns, &topology.app_storage),
        )
        .await?;
        self.submit(spec, Stage::AppBootstrap, cluster.create_config_map(&ns, &topology.app_bootstrap))
            .await?;
        self.submit(spec, Stage::AppDeployment, cluster.create_deployment(&ns, &topology.app_deployment))
            .await?;
        self.submit(spec, Stage::AppService, cluster.create_service(&ns, &topology.app_service))
            .await?;
        self.submit(spec, Stage::Ingress, cluster.create_ingress(&ns, &topology.ingress))
            .await?;

        Ok(())
    }

    async fn submit(
        &self,
        spec: &StoreSpec,
        stage: ProvisioningStage,
        call: impl Future<Output = Result<CreateOutcome>>,
    ) -> std::result::Result<(), StageFailure> {
        match call.await {
            Ok(outcome) => {
                debug!(store_id = %spec.store_id, stage = %stage, ?outcome, "Stage complete");
                Ok(())
            }
            Err(e) => Err(StageFailure {
                stage,
                reason: e.to_string(),
            }),
        }
    }

    // =========================================================================
    // List
    // =========================================================================

    /// Enumerate store namespaces, joined with their directory records.
    ///
    /// With `owner_filter`, only that owner's stores are returned and
    /// namespaces unknown to the directory are left out.
    #[instrument(skip(self))]
    pub async fn list_stores(&self, owner_filter: Option<OwnerId>) -> Result<Vec<StoreSummary>> {
        let namespaces = self.cluster.list_namespaces(STORE_NAMESPACE_SELECTOR).await?;
        let records = self.directory.list_stores_with_owners().await?;

        let mut stores = Vec::with_capacity(namespaces.len());
        let mut unmanaged = Vec::new();
        for namespace in namespaces {
            let Some(store_id) = store_id_from_namespace(&namespace) else {
                continue;
            };

            match records.get(store_id) {
                Some(entry) => {
                    if owner_filter.is_some_and(|owner| owner != entry.record.owner_id) {
                        continue;
                    }
                    let record = &entry.record;
                    let hostname = if record.hostname.is_empty() {
                        hostname_for(store_id, &self.config.default_domain_suffix)
                    } else {
                        record.hostname.clone()
                    };
                    stores.push(StoreSummary {
                        id: record.id.clone(),
                        url: format!("http://{}", hostname),
                        status: SummaryStatus::Recorded(record.status),
                        name: Some(record.name.clone()),
                        owner: Some(entry.owner_username.clone()),
                        owner_id: Some(record.owner_id),
                        storage_size_gi: Some(record.storage_size_gi),
                        created_at: Some(record.created_at),
                        namespace,
                    });
                }
                None if owner_filter.is_some() => {}
                None => unmanaged.push((store_id.to_string(), namespace)),
            }
        }

        // Namespaces without a record only have live pod health to go on
        let live = futures::future::join_all(
            unmanaged
                .iter()
                .map(|(_, namespace)| self.cluster.pod_readiness(namespace, None)),
        )
        .await;
        stores.extend(unmanaged.into_iter().zip(live).map(|((id, namespace), readiness)| {
            StoreSummary {
                url: format!(
                    "http://{}",
                    hostname_for(&id, &self.config.default_domain_suffix)
                ),
                status: SummaryStatus::Live(readiness),
                name: None,
                owner: None,
                owner_id: None,
                storage_size_gi: None,
                created_at: None,
                id,
                namespace,
            }
        }));

        debug!(count = stores.len(), "Listed stores");
        Ok(stores)
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Delete a store's namespace and deregister it.
    ///
    /// With `owner_filter`, the store must be recorded under that owner.
    /// If the namespace delete fails the record is kept, marked `deleted`.
    #[instrument(skip(self))]
    pub async fn delete_store(&self, store_id: &str, owner_filter: Option<OwnerId>) -> Result<()> {
        if !is_valid_store_id(store_id) {
            return Err(Error::Validation(format!("invalid store id: {}", store_id)));
        }

        let record = self.directory.get_store(store_id).await?;
        if let Some(owner_id) = owner_filter {
            match &record {
                None => {
                    return Err(Error::NotFound {
                        store_id: store_id.to_string(),
                    })
                }
                Some(r) if r.owner_id != owner_id => {
                    warn!(store_id, owner_id, "Refusing to delete another owner's store");
                    return Err(Error::Unauthorized {
                        store_id: store_id.to_string(),
                        owner_id,
                    });
                }
                Some(_) => {}
            }
        }

        let namespace = namespace_for(store_id);
        if !self.cluster.namespace_exists(&namespace).await? {
            return Err(Error::NotFound {
                store_id: store_id.to_string(),
            });
        }

        if record.is_some() {
            if let Err(e) = self
                .directory
                .update_store_status(store_id, StoreStatus::Deleted)
                .await
            {
                warn!(store_id, error = %e, "Could not mark store deleted");
            }
        }

        info!(store_id, namespace = %namespace, "Deleting store");
        if let Err(e) = self.cluster.delete_namespace(&namespace).await {
            error!(store_id, error = %e, "Namespace deletion failed");
            self.metrics.record_deletion(OUTCOME_INCOMPLETE);
            return Err(Error::DeletionIncomplete {
                store_id: store_id.to_string(),
                reason: e.to_string(),
            });
        }

        if record.is_some() {
            self.directory.deregister_store(store_id).await?;
        }
        self.metrics.record_deletion(OUTCOME_DELETED);
        info!(store_id, "Store deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{
        APP_CONFIG_NAME, DATABASE_SECRET_NAME, DATABASE_SERVICE_NAME, INGRESS_NAME,
    };
    use crate::cluster::memory::{InMemoryCluster, PodBehaviour};
    use crate::directory::store::JsonStoreDirectory;
    use crate::domain::ports::{ClusterProvider, Owner, OwnerUsage, StoreDirectory};
    use crate::error::QuotaViolation;
    use assert_matches::assert_matches;
    use parking_lot::Mutex;
    use std::collections::{BTreeMap, VecDeque};
    use std::time::Duration;

    struct Fixture {
        cluster: Arc<InMemoryCluster>,
        directory: Arc<JsonStoreDirectory>,
        orchestrator: Orchestrator,
    }

    fn fast_config() -> OrchestratorConfig {
        OrchestratorConfig {
            readiness: ReadinessPolicy {
                initial_interval: Duration::from_millis(5),
                max_interval: Duration::from_millis(10),
                timeout: Duration::from_millis(150),
            },
            ..Default::default()
        }
    }

    fn owner(id: OwnerId, username: &str, max_stores: u32, max_storage_gi: u32) -> Owner {
        Owner {
            id,
            username: username.into(),
            password_hash: "opaque".into(),
            max_stores,
            max_storage_gi,
        }
    }

    async fn fixture(max_stores: u32, max_storage_gi: u32) -> Fixture {
        let cluster = Arc::new(InMemoryCluster::new());
        let directory = Arc::new(JsonStoreDirectory::in_memory());
        directory
            .insert_owner(owner(1, "acme", max_stores, max_storage_gi))
            .await
            .unwrap();
        directory.insert_owner(owner(2, "globex", 5, 50)).await.unwrap();

        let orchestrator = Orchestrator::new(
            fast_config(),
            cluster.clone(),
            directory.clone(),
            ProvisioningMetrics::new().unwrap(),
        );
        Fixture {
            cluster,
            directory,
            orchestrator,
        }
    }

    fn request(owner_id: OwnerId, storage: u32) -> CreateStoreRequest {
        CreateStoreRequest {
            owner_id,
            storage_size_gi: Some(storage),
            ..Default::default()
        }
    }

    fn scripted_ids(ids: &[&str]) -> IdGenerator {
        let queue = Mutex::new(ids.iter().map(|s| s.to_string()).collect::<VecDeque<_>>());
        Arc::new(move || queue.lock().pop_front().unwrap_or_else(generate_store_id))
    }

    #[test]
    fn test_generators() {
        let id = generate_store_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));

        let password = generate_password();
        assert_eq!(password.len(), 16);
        assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(generate_password(), password);
    }

    #[test]
    fn test_stage_names() {
        let names: Vec<_> = ProvisioningStage::PIPELINE.iter().map(|s| s.as_str()).collect();
        assert_eq!(names[0], "namespace");
        assert_eq!(names[3], "database-workload");
        assert_eq!(names[4], "database-ready");
        assert_eq!(names[10], "ingress");
    }

    #[test]
    fn test_domain_suffix_validation() {
        assert!(is_valid_domain_suffix("local"));
        assert!(is_valid_domain_suffix("shop.example.com"));
        assert!(!is_valid_domain_suffix("Shop.example.com"));
        assert!(!is_valid_domain_suffix("bad..suffix"));
        assert!(!is_valid_domain_suffix("-bad.com"));
        assert!(!is_valid_domain_suffix("with space"));
    }

    #[tokio::test]
    async fn test_create_within_quota_reaches_ready() {
        let f = fixture(2, 10).await;

        let store = f.orchestrator.create_store(request(1, 3)).await.unwrap();

        assert_eq!(store.status, StoreStatus::Ready);
        assert_eq!(store.storage_size_gi, 5);
        assert_eq!(store.owner, "acme");
        assert_eq!(store.namespace, format!("store-{}", store.id));
        assert_eq!(store.hostname, format!("store-{}.local", store.id));
        assert_eq!(store.admin_url, format!("http://{}/wp-admin", store.hostname));
        assert_eq!(store.admin_user, "admin");
        assert_eq!(store.admin_password.len(), 16);
        assert_eq!(store.name, store.namespace);

        assert!(f.cluster.has_namespace(&store.namespace));
        assert_eq!(f.cluster.object_count(&store.namespace), 9);
        assert!(f.cluster.has_object(&store.namespace, "Ingress", INGRESS_NAME));

        let record = f.directory.get_store(&store.id).await.unwrap().unwrap();
        assert_eq!(record.status, StoreStatus::Ready);
        assert_eq!(
            f.directory.owner_usage(1).await.unwrap(),
            OwnerUsage {
                store_count: 1,
                total_storage_gi: 5
            }
        );
        assert_eq!(f.orchestrator.metrics().provisions(OUTCOME_READY), 1);
    }

    #[tokio::test]
    async fn test_request_overrides_are_applied() {
        let f = fixture(2, 10).await;

        let store = f
            .orchestrator
            .create_store(CreateStoreRequest {
                owner_id: 1,
                name: Some("Corner Shop".into()),
                hostname_suffix: Some(".Shop.Example.com".into()),
                admin_password: Some("chosen-password".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(store.name, "Corner Shop");
        assert_eq!(store.hostname, format!("store-{}.shop.example.com", store.id));
        assert_eq!(store.admin_password, "chosen-password");
        assert_eq!(store.storage_size_gi, 4);
    }

    #[tokio::test]
    async fn test_quota_rejection_creates_nothing() {
        let f = fixture(2, 10).await;
        let first = f.orchestrator.create_store(request(1, 3)).await.unwrap();
        let calls_before = f.cluster.calls().len();

        let result = f.orchestrator.create_store(request(1, 6)).await;

        assert_matches!(
            result,
            Err(Error::QuotaExceeded(QuotaViolation::StorageQuotaExceeded {
                used: 5,
                requested: 8,
                max: 10
            }))
        );
        assert_eq!(f.cluster.calls().len(), calls_before);
        let stores = f.directory.list_stores_with_owners().await.unwrap();
        assert_eq!(stores.keys().collect::<Vec<_>>(), vec![&first.id]);
        assert_eq!(f.orchestrator.metrics().provisions(OUTCOME_REJECTED), 1);
    }

    #[tokio::test]
    async fn test_store_limit_counts_failed_stores() {
        let f = fixture(1, 50).await;
        f.cluster.fail_on("Ingress");
        assert_matches!(
            f.orchestrator.create_store(request(1, 1)).await,
            Err(Error::ProvisioningFailed { .. })
        );

        f.cluster.heal("Ingress");
        assert_matches!(
            f.orchestrator.create_store(request(1, 1)).await,
            Err(Error::QuotaExceeded(QuotaViolation::StoreLimitReached { current: 1, max: 1 }))
        );
    }

    #[tokio::test]
    async fn test_failed_stage_keeps_earlier_objects() {
        let f = fixture(2, 10).await;
        f.cluster.fail_on("StatefulSet");

        let err = f.orchestrator.create_store(request(1, 3)).await.unwrap_err();
        let store_id = assert_matches!(
            err,
            Error::ProvisioningFailed { store_id, stage, .. } if stage == "database-workload" => store_id
        );

        let ns = namespace_for(&store_id);
        assert!(f.cluster.has_namespace(&ns));
        assert!(f.cluster.has_object(&ns, "Secret", DATABASE_SECRET_NAME));
        assert!(f.cluster.has_object(&ns, "Service", DATABASE_SERVICE_NAME));
        assert!(!f.cluster.has_object(&ns, "ConfigMap", APP_CONFIG_NAME));
        assert!(!f.cluster.calls().iter().any(|c| c.starts_with("create ConfigMap")));

        let record = f.directory.get_store(&store_id).await.unwrap().unwrap();
        assert_eq!(record.status, StoreStatus::Failed);
        assert_eq!(f.orchestrator.metrics().pipeline_failures("database-workload"), 1);
        assert_eq!(f.orchestrator.metrics().provisions(OUTCOME_FAILED), 1);

        f.cluster.heal("StatefulSet");
        let retry = f.orchestrator.create_store(request(1, 3)).await.unwrap();
        assert_ne!(retry.id, store_id);
        assert_eq!(
            f.directory.get_store(&store_id).await.unwrap().unwrap().status,
            StoreStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_failed_database_aborts_before_application_tier() {
        let f = fixture(2, 10).await;
        f.cluster.set_pod_behaviour(PodBehaviour::Failed);

        let err = f.orchestrator.create_store(request(1, 3)).await.unwrap_err();
        assert_matches!(err, Error::ProvisioningFailed { ref stage, .. } if stage == "database-ready");
        assert!(!f.cluster.calls().iter().any(|c| c.starts_with("create ConfigMap")));
    }

    #[tokio::test]
    async fn test_database_timeout_fails_store() {
        let f = fixture(2, 10).await;
        f.cluster.set_pod_behaviour(PodBehaviour::Pending);

        let err = f.orchestrator.create_store(request(1, 3)).await.unwrap_err();
        let store_id = assert_matches!(
            err,
            Error::ProvisioningFailed { store_id, stage, reason }
                if stage == "database-ready" && reason.contains("provisioning") => store_id
        );
        assert_eq!(
            f.directory.get_store(&store_id).await.unwrap().unwrap().status,
            StoreStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_pipeline_rerun_is_idempotent() {
        let f = fixture(2, 10).await;
        let spec = crate::catalog::tests::sample_spec();

        f.orchestrator.run_pipeline(&spec).await.unwrap();
        let count = f.cluster.object_count(&spec.namespace());
        f.orchestrator.run_pipeline(&spec).await.unwrap();

        assert_eq!(f.cluster.object_count(&spec.namespace()), count);
    }

    #[tokio::test]
    async fn test_store_id_collision_regenerates() {
        let f = fixture(2, 10).await;
        f.cluster.insert_namespace("store-0000aaaa", BTreeMap::new());
        let orchestrator = f
            .orchestrator
            .with_id_generator(scripted_ids(&["0000aaaa", "0000aaaa", "0000bbbb"]));

        let store = orchestrator.create_store(request(1, 1)).await.unwrap();
        assert_eq!(store.id, "0000bbbb");
    }

    #[tokio::test]
    async fn test_store_id_exhaustion() {
        let f = fixture(2, 10).await;
        f.cluster.insert_namespace("store-0000aaaa", BTreeMap::new());
        let orchestrator = f
            .orchestrator
            .with_id_generator(Arc::new(|| "0000aaaa".to_string()));

        assert_matches!(
            orchestrator.create_store(request(1, 1)).await,
            Err(Error::IdSpaceExhausted { attempts: 5 })
        );
        assert!(f.directory.list_stores_with_owners().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_request_validation() {
        let f = fixture(2, 10).await;

        assert_matches!(
            f.orchestrator.create_store(request(1, 0)).await,
            Err(Error::Validation(_))
        );
        assert_matches!(
            f.orchestrator
                .create_store(CreateStoreRequest {
                    owner_id: 1,
                    hostname_suffix: Some("not a domain".into()),
                    ..Default::default()
                })
                .await,
            Err(Error::Validation(_))
        );
        assert_matches!(
            f.orchestrator.create_store(request(42, 1)).await,
            Err(Error::OwnerNotFound { owner_id: 42 })
        );
        assert!(f.cluster.calls().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_creates_respect_store_limit() {
        let f = fixture(2, 100).await;
        let orchestrator = Arc::new(f.orchestrator);

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let orchestrator = orchestrator.clone();
                tokio::spawn(async move { orchestrator.create_store(request(1, 1)).await })
            })
            .collect();

        let mut ready = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ready += 1,
                Err(e) => assert_matches!(e, Error::QuotaExceeded(_)),
            }
        }
        assert_eq!(ready, 2);
        assert_eq!(f.directory.owner_usage(1).await.unwrap().store_count, 2);
    }

    #[tokio::test]
    async fn test_list_joins_directory_and_live_namespaces() {
        let f = fixture(2, 10).await;
        let mine = f.orchestrator.create_store(request(1, 1)).await.unwrap();
        let theirs = f.orchestrator.create_store(request(2, 1)).await.unwrap();

        let store_labels: BTreeMap<String, String> = [("app", "store"), ("managed-by", "store-platform")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        f.cluster.insert_namespace("store-legacy01", store_labels);
        f.cluster.insert_namespace("kube-system", BTreeMap::new());

        let all = f.orchestrator.list_stores(None).await.unwrap();
        assert_eq!(all.len(), 3);
        let legacy = all.iter().find(|s| s.id == "legacy01").unwrap();
        assert_eq!(legacy.status, SummaryStatus::Live(Readiness::Provisioning));
        assert_eq!(legacy.owner, None);
        let recorded = all.iter().find(|s| s.id == mine.id).unwrap();
        assert_eq!(recorded.status, SummaryStatus::Recorded(StoreStatus::Ready));
        assert_eq!(recorded.owner.as_deref(), Some("acme"));
        assert_eq!(recorded.url, mine.url);

        let filtered = f.orchestrator.list_stores(Some(2)).await.unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, theirs.id);
        assert_eq!(filtered[0].storage_size_gi, Some(3));
    }

    #[tokio::test]
    async fn test_directory_status_wins_over_live_state() {
        let f = fixture(2, 10).await;
        let store = f.orchestrator.create_store(request(1, 1)).await.unwrap();
        f.cluster
            .set_namespace_pods(&store.namespace, crate::cluster::readiness::PodSnapshot::failed());

        let listed = f.orchestrator.list_stores(None).await.unwrap();
        assert_eq!(listed[0].status, SummaryStatus::Recorded(StoreStatus::Ready));
        assert_eq!(
            f.cluster.pod_readiness(&store.namespace, None).await,
            Readiness::Failed
        );
    }

    #[tokio::test]
    async fn test_list_surfaces_cluster_errors() {
        let f = fixture(2, 10).await;
        f.cluster.fail_queries(true);
        assert_matches!(f.orchestrator.list_stores(None).await, Err(Error::Cluster(_)));
    }

    #[tokio::test]
    async fn test_delete_releases_quota() {
        let f = fixture(1, 10).await;
        let store = f.orchestrator.create_store(request(1, 3)).await.unwrap();

        f.orchestrator.delete_store(&store.id, Some(1)).await.unwrap();

        assert!(!f.cluster.has_namespace(&store.namespace));
        assert!(f.directory.get_store(&store.id).await.unwrap().is_none());
        assert_eq!(f.directory.owner_usage(1).await.unwrap(), OwnerUsage::default());
        assert_eq!(f.orchestrator.metrics().deletions(OUTCOME_DELETED), 1);
        f.orchestrator.create_store(request(1, 3)).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_other_owners_store_is_unauthorized() {
        let f = fixture(2, 10).await;
        let store = f.orchestrator.create_store(request(1, 1)).await.unwrap();

        assert_matches!(
            f.orchestrator.delete_store(&store.id, Some(2)).await,
            Err(Error::Unauthorized { owner_id: 2, .. })
        );
        assert!(f.cluster.has_namespace(&store.namespace));
        assert_eq!(
            f.directory.get_store(&store.id).await.unwrap().unwrap().status,
            StoreStatus::Ready
        );
        assert!(!f.cluster.calls().iter().any(|c| c.starts_with("delete")));
    }

    #[tokio::test]
    async fn test_delete_unknown_store() {
        let f = fixture(2, 10).await;
        assert_matches!(
            f.orchestrator.delete_store("deadbeef", Some(1)).await,
            Err(Error::NotFound { .. })
        );
        assert_matches!(
            f.orchestrator.delete_store("deadbeef", None).await,
            Err(Error::NotFound { .. })
        );
        assert_matches!(
            f.orchestrator.delete_store("../etc", None).await,
            Err(Error::Validation(_))
        );
    }

    #[tokio::test]
    async fn test_delete_without_namespace_leaves_directory_untouched() {
        let f = fixture(2, 10).await;
        let store = f.orchestrator.create_store(request(1, 1)).await.unwrap();
        f.cluster.delete_namespace(&store.namespace).await.unwrap();

        assert_matches!(
            f.orchestrator.delete_store(&store.id, None).await,
            Err(Error::NotFound { .. })
        );
        assert_eq!(
            f.directory.get_store(&store.id).await.unwrap().unwrap().status,
            StoreStatus::Ready
        );
    }

    #[tokio::test]
    async fn test_incomplete_deletion_keeps_record() {
        let f = fixture(2, 10).await;
        let store = f.orchestrator.create_store(request(1, 1)).await.unwrap();
        f.cluster.fail_namespace_delete(true);

        assert_matches!(
            f.orchestrator.delete_store(&store.id, Some(1)).await,
            Err(Error::DeletionIncomplete { .. })
        );
        let record = f.directory.get_store(&store.id).await.unwrap().unwrap();
        assert_eq!(record.status, StoreStatus::Deleted);
        assert_eq!(f.orchestrator.metrics().deletions(OUTCOME_INCOMPLETE), 1);

        f.cluster.fail_namespace_delete(false);
        f.orchestrator.delete_store(&store.id, Some(1)).await.unwrap();
        assert!(f.directory.get_store(&store.id).await.unwrap().is_none());
    }

    /// Delegates to an in-memory directory but refuses the `ready` transition
    struct ReadyRefusingDirectory {
        inner: JsonStoreDirectory,
    }

    #[async_trait::async_trait]
    impl StoreDirectory for ReadyRefusingDirectory {
        async fn get_owner(&self, owner_id: OwnerId) -> Result<Option<Owner>> {
            self.inner.get_owner(owner_id).await
        }
        async fn owner_usage(&self, owner_id: OwnerId) -> Result<OwnerUsage> {
            self.inner.owner_usage(owner_id).await
        }
        async fn reserve_store(&self, store: NewStore) -> Result<crate::domain::ports::StoreRecord> {
            self.inner.reserve_store(store).await
        }
        async fn update_store_status(&self, store_id: &str, status: StoreStatus) -> Result<()> {
            if status == StoreStatus::Ready {
                return Err(Error::Persistence("disk full".into()));
            }
            self.inner.update_store_status(store_id, status).await
        }
        async fn deregister_store(&self, store_id: &str) -> Result<()> {
            self.inner.deregister_store(store_id).await
        }
        async fn get_store(&self, store_id: &str) -> Result<Option<crate::domain::ports::StoreRecord>> {
            self.inner.get_store(store_id).await
        }
        async fn list_stores_with_owners(
            &self,
        ) -> Result<BTreeMap<String, crate::domain::ports::StoreWithOwner>> {
            self.inner.list_stores_with_owners().await
        }
        async fn insert_owner(&self, owner: Owner) -> Result<()> {
            self.inner.insert_owner(owner).await
        }
        async fn list_owners(&self) -> Result<Vec<Owner>> {
            self.inner.list_owners().await
        }
    }

    #[tokio::test]
    async fn test_unrecorded_ready_status_names_the_store() {
        let directory = Arc::new(ReadyRefusingDirectory {
            inner: JsonStoreDirectory::in_memory(),
        });
        directory.insert_owner(owner(1, "acme", 2, 10)).await.unwrap();
        let orchestrator = Orchestrator::new(
            fast_config(),
            Arc::new(InMemoryCluster::new()),
            directory.clone(),
            ProvisioningMetrics::new().unwrap(),
        )
        .with_id_generator(scripted_ids(&["0000beef"]));

        let err = orchestrator.create_store(request(1, 3)).await.unwrap_err();
        assert_matches!(&err, Error::Persistence(msg) if msg.contains("0000beef"));

        let record = directory.get_store("0000beef").await.unwrap().unwrap();
        assert_eq!(record.status, StoreStatus::Provisioning);
        assert_eq!(orchestrator.metrics().provisions(OUTCOME_FAILED), 1);
    }

    #[tokio::test]
    async fn test_unmanaged_namespace_can_be_deleted_without_filter() {
        let f = fixture(2, 10).await;
        f.cluster.insert_namespace("store-legacy01", BTreeMap::new());

        f.orchestrator.delete_store("legacy01", None).await.unwrap();
        assert!(!f.cluster.has_namespace("store-legacy01"));
    }
}
