//! Kubernetes cluster provider
//!
//! Talks to the control plane through a `kube::Client` handed in by the
//! caller. Create calls map HTTP 409 to [`CreateOutcome::AlreadyExists`].

use crate::cluster::readiness::{derive_readiness, PodSnapshot};
use crate::domain::ports::{ClusterProvider, CreateOutcome, Readiness};
use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{
    ConfigMap, Namespace, PersistentVolumeClaim, Pod, Secret, Service,
};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use tracing::{info, warn};

/// Cluster provider backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using in-cluster config, falling back to the local kubeconfig
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self::new(client))
    }

    fn namespaced<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Create an object, treating "already exists" as success
async fn create_idempotent<K>(api: &Api<K>, object: &K) -> Result<CreateOutcome>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Serialize + Debug,
{
    let kind = K::kind(&());
    let name = object.meta().name.clone().unwrap_or_default();

    let outcome = create_outcome(api.create(&PostParams::default(), object).await)?;
    match outcome {
        CreateOutcome::Created => info!(kind = %kind, name = %name, "Created resource"),
        CreateOutcome::AlreadyExists => {
            warn!(kind = %kind, name = %name, "Resource already exists")
        }
    }
    Ok(outcome)
}

/// HTTP 409 from the API server means the object is already there
fn create_outcome<T>(result: std::result::Result<T, kube::Error>) -> Result<CreateOutcome> {
    match result {
        Ok(_) => Ok(CreateOutcome::Created),
        Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(CreateOutcome::AlreadyExists),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ClusterProvider for KubeCluster {
    async fn create_namespace(&self, namespace: &Namespace) -> Result<CreateOutcome> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        create_idempotent(&api, namespace).await
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.delete(name, &DeleteParams::default()).await?;
        info!(namespace = name, "Deleted namespace");
        Ok(())
    }

    async fn namespace_exists(&self, name: &str) -> Result<bool> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?.is_some())
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<CreateOutcome> {
        create_idempotent(&self.namespaced::<Secret>(namespace), secret).await
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<CreateOutcome> {
        create_idempotent(&self.namespaced::<Service>(namespace), service).await
    }

    async fn create_stateful_set(
        &self,
        namespace: &str,
        stateful_set: &StatefulSet,
    ) -> Result<CreateOutcome> {
        create_idempotent(&self.namespaced::<StatefulSet>(namespace), stateful_set).await
    }

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<CreateOutcome> {
        create_idempotent(&self.namespaced::<Deployment>(namespace), deployment).await
    }

    async fn create_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<CreateOutcome> {
        create_idempotent(&self.namespaced::<ConfigMap>(namespace), config_map).await
    }

    async fn create_persistent_volume_claim(
        &self,
        namespace: &str,
        claim: &PersistentVolumeClaim,
    ) -> Result<CreateOutcome> {
        create_idempotent(&self.namespaced::<PersistentVolumeClaim>(namespace), claim).await
    }

    async fn create_ingress(&self, namespace: &str, ingress: &Ingress) -> Result<CreateOutcome> {
        create_idempotent(&self.namespaced::<Ingress>(namespace), ingress).await
    }

    async fn list_namespaces(&self, label_selector: &str) -> Result<Vec<String>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default().labels(label_selector)).await?;
        Ok(list
            .items
            .into_iter()
            .filter_map(|ns| ns.metadata.name)
            .collect())
    }

    async fn pod_readiness(&self, namespace: &str, label_selector: Option<&str>) -> Readiness {
        let api = self.namespaced::<Pod>(namespace);
        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }

        match api.list(&params).await {
            Ok(pods) => {
                let snapshots: Vec<PodSnapshot> = pods.items.iter().map(PodSnapshot::from).collect();
                derive_readiness(&snapshots)
            }
            Err(e) => {
                warn!(namespace, error = %e, "Failed to list pods");
                Readiness::Unknown
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use assert_matches::assert_matches;
    use kube::error::ErrorResponse;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{} from api server", reason),
            reason: reason.to_string(),
            code,
        })
    }

    #[test]
    fn test_create_outcome_classification() {
        assert_matches!(create_outcome(Ok(())), Ok(CreateOutcome::Created));
        assert_matches!(
            create_outcome::<()>(Err(api_error(409, "AlreadyExists"))),
            Ok(CreateOutcome::AlreadyExists)
        );
        assert_matches!(
            create_outcome::<()>(Err(api_error(403, "Forbidden"))),
            Err(Error::Kube(kube::Error::Api(ae))) if ae.code == 403
        );
        assert_matches!(
            create_outcome::<()>(Err(api_error(422, "Invalid"))),
            Err(Error::Kube(_))
        );
    }
}
