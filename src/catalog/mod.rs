//! Manifest Catalog
//!
//! Pure builders for the fixed per-store resource topology:
//! - Database tier: credential secret, headless service, stateful set
//! - Application tier: config, storage claim, bootstrap script, deployment, service
//! - Network exposure: ingress route
//!
//! Nothing in here talks to the cluster. Given the same [`StoreSpec`] and
//! [`CatalogConfig`] every builder returns the same object.

pub mod application;
pub mod database;
pub mod ingress;

pub use application::*;
pub use database::*;
pub use ingress::*;

use crate::error::Result;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{
    ConfigMap, Namespace, PersistentVolumeClaim, Secret, Service,
};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

// =============================================================================
// Naming Scheme
// =============================================================================

/// Prefix shared by every store namespace
pub const NAMESPACE_PREFIX: &str = "store-";

/// Label selector matching every store namespace
pub const STORE_NAMESPACE_SELECTOR: &str = "app=store,managed-by=store-platform";

/// Label carrying the store id on every object of the topology
pub const STORE_ID_LABEL: &str = "store-platform/store-id";

/// Storage reserved for the database tier, in Gi
pub const DATABASE_STORAGE_GI: u32 = 2;

/// Fallback catalogue forwarded to the bootstrap when the caller supplies none
pub const DEFAULT_SAMPLE_PRODUCTS: &str = "Sample Product 1|10.00|This is a sample product\n\
                                           Sample Product 2|20.00|Another sample product";

/// Namespace holding every resource of a store
pub fn namespace_for(store_id: &str) -> String {
    format!("{}{}", NAMESPACE_PREFIX, store_id)
}

/// Store id encoded in a store namespace name
pub fn store_id_from_namespace(namespace: &str) -> Option<&str> {
    namespace
        .strip_prefix(NAMESPACE_PREFIX)
        .filter(|id| !id.is_empty())
}

/// Public hostname of a store
pub fn hostname_for(store_id: &str, suffix: &str) -> String {
    format!("{}.{}", namespace_for(store_id), suffix.trim_start_matches('.'))
}

/// Labels applied to every object belonging to a store
pub fn store_labels(store_id: &str, component: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("app.kubernetes.io/part-of".to_string(), namespace_for(store_id));
    labels.insert("app.kubernetes.io/component".to_string(), component.to_string());
    labels.insert("app.kubernetes.io/managed-by".to_string(), "store-platform".to_string());
    labels.insert(STORE_ID_LABEL.to_string(), store_id.to_string());
    labels
}

/// Selector labels for a single workload
pub(crate) fn app_selector(app: &str) -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), app.to_string())])
}

pub(crate) fn object_meta(spec: &StoreSpec, name: &str, component: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(spec.namespace()),
        labels: Some(store_labels(&spec.store_id, component)),
        ..Default::default()
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Images and cluster-wide knobs used by the builders
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    /// Database image
    pub database_image: String,
    /// Serving application image
    pub application_image: String,
    /// Image running the bootstrap script
    pub bootstrap_image: String,
    /// Ingress class for the store route
    pub ingress_class: String,
    /// Database volume size in Gi (not caller-tunable)
    pub database_storage_gi: u32,
    /// Maximum upload size accepted by the ingress
    pub proxy_body_size: String,
    /// Storefront currency configured by the bootstrap
    pub store_currency: String,
    /// Storefront country configured by the bootstrap
    pub store_country: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            database_image: "mysql:8.0".to_string(),
            application_image: "wordpress:latest".to_string(),
            bootstrap_image: "wordpress:cli-php8.1".to_string(),
            ingress_class: "nginx".to_string(),
            database_storage_gi: DATABASE_STORAGE_GI,
            proxy_body_size: "50m".to_string(),
            store_currency: "INR".to_string(),
            store_country: "IN".to_string(),
        }
    }
}

// =============================================================================
// Store Spec
// =============================================================================

/// Credentials shared by the database secret and the application config
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCredentials {
    pub admin_user: String,
    pub admin_password: String,
    pub admin_email: String,
    pub root_password: String,
}

/// Everything the builders need to know about one store
#[derive(Debug, Clone)]
pub struct StoreSpec {
    pub store_id: String,
    /// Display name
    pub name: String,
    pub hostname: String,
    pub credentials: StoreCredentials,
    /// Newline-delimited `name|price|description` rows, forwarded verbatim
    pub sample_products: String,
    /// Application tier storage in Gi
    pub storage_size_gi: u32,
}

impl StoreSpec {
    pub fn namespace(&self) -> String {
        namespace_for(&self.store_id)
    }

    pub fn site_url(&self) -> String {
        format!("http://{}", self.hostname)
    }
}

// =============================================================================
// Topology
// =============================================================================

/// One object of the store topology
#[derive(Debug, Clone)]
pub enum StoreObject {
    Namespace(Namespace),
    Secret(Secret),
    Service(Service),
    StatefulSet(StatefulSet),
    ConfigMap(ConfigMap),
    PersistentVolumeClaim(PersistentVolumeClaim),
    Deployment(Deployment),
    Ingress(Ingress),
}

impl StoreObject {
    pub fn kind(&self) -> &'static str {
        match self {
            StoreObject::Namespace(_) => "Namespace",
            StoreObject::Secret(_) => "Secret",
            StoreObject::Service(_) => "Service",
            StoreObject::StatefulSet(_) => "StatefulSet",
            StoreObject::ConfigMap(_) => "ConfigMap",
            StoreObject::PersistentVolumeClaim(_) => "PersistentVolumeClaim",
            StoreObject::Deployment(_) => "Deployment",
            StoreObject::Ingress(_) => "Ingress",
        }
    }

    fn to_yaml(&self) -> Result<String> {
        let yaml = match self {
            StoreObject::Namespace(o) => serde_yaml::to_string(o)?,
            StoreObject::Secret(o) => serde_yaml::to_string(o)?,
            StoreObject::Service(o) => serde_yaml::to_string(o)?,
            StoreObject::StatefulSet(o) => serde_yaml::to_string(o)?,
            StoreObject::ConfigMap(o) => serde_yaml::to_string(o)?,
            StoreObject::PersistentVolumeClaim(o) => serde_yaml::to_string(o)?,
            StoreObject::Deployment(o) => serde_yaml::to_string(o)?,
            StoreObject::Ingress(o) => serde_yaml::to_string(o)?,
        };
        Ok(yaml)
    }
}

/// Every object of one store, built up front
#[derive(Debug, Clone)]
pub struct StoreTopology {
    pub namespace: Namespace,
    pub database_secret: Secret,
    pub database_service: Service,
    pub database_workload: StatefulSet,
    pub app_config: ConfigMap,
    pub app_storage: PersistentVolumeClaim,
    pub app_bootstrap: ConfigMap,
    pub app_deployment: Deployment,
    pub app_service: Service,
    pub ingress: Ingress,
}

impl StoreTopology {
    /// Build the full topology for a store
    pub fn build(spec: &StoreSpec, config: &CatalogConfig) -> Self {
        Self {
            namespace: store_namespace(spec),
            database_secret: database_secret(spec),
            database_service: database_service(spec),
            database_workload: database_stateful_set(spec, config),
            app_config: application_config(spec, config),
            app_storage: application_storage_claim(spec),
            app_bootstrap: bootstrap_script(spec),
            app_deployment: application_deployment(spec, config),
            app_service: application_service(spec),
            ingress: store_ingress(spec, config),
        }
    }

    /// Objects in the order they must be created
    pub fn objects(&self) -> Vec<StoreObject> {
        vec![
            StoreObject::Namespace(self.namespace.clone()),
            StoreObject::Secret(self.database_secret.clone()),
            StoreObject::Service(self.database_service.clone()),
            StoreObject::StatefulSet(self.database_workload.clone()),
            StoreObject::ConfigMap(self.app_config.clone()),
            StoreObject::PersistentVolumeClaim(self.app_storage.clone()),
            StoreObject::ConfigMap(self.app_bootstrap.clone()),
            StoreObject::Deployment(self.app_deployment.clone()),
            StoreObject::Service(self.app_service.clone()),
            StoreObject::Ingress(self.ingress.clone()),
        ]
    }

    /// Render the topology as a multi-document YAML stream
    pub fn render_yaml(&self) -> Result<String> {
        let docs = self
            .objects()
            .iter()
            .map(StoreObject::to_yaml)
            .collect::<Result<Vec<_>>>()?;
        Ok(docs.join("---\n"))
    }
}

/// The namespace isolating a store, labelled for discovery
pub fn store_namespace(spec: &StoreSpec) -> Namespace {
    let mut labels = store_labels(&spec.store_id, "namespace");
    labels.insert("app".to_string(), "store".to_string());
    labels.insert("managed-by".to_string(), "store-platform".to_string());

    Namespace {
        metadata: ObjectMeta {
            name: Some(spec.namespace()),
            labels: Some(labels),
            ..Default::default()
        },
        ..Default::default()
    }
}
