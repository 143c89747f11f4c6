//! Database tier builders (MySQL)

use super::{app_selector, object_meta, CatalogConfig, StoreSpec};
use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, ExecAction, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PodSpec, PodTemplateSpec, Probe, Secret, SecretKeySelector,
    Service, ServicePort, ServiceSpec, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

pub const DATABASE_SECRET_NAME: &str = "mysql-secret";
pub const DATABASE_SERVICE_NAME: &str = "mysql";
pub const DATABASE_WORKLOAD_NAME: &str = "mysql";
pub const DATABASE_APP_LABEL: &str = "mysql";
pub const DATABASE_PORT: i32 = 3306;
pub const DATABASE_NAME: &str = "wordpress";
pub const DATABASE_USER: &str = "wordpress";

/// Secret keys
pub const KEY_ROOT_PASSWORD: &str = "mysql-root-password";
pub const KEY_DATABASE: &str = "mysql-database";
pub const KEY_USER: &str = "mysql-user";
pub const KEY_PASSWORD: &str = "mysql-password";

const VOLUME_NAME: &str = "mysql-storage";

/// Label selector matching the database pods
pub fn database_pod_selector() -> String {
    format!("app={}", DATABASE_APP_LABEL)
}

/// Environment variable sourced from the database secret
pub(crate) fn secret_env(name: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: Some(DATABASE_SECRET_NAME.to_string()),
                key: key.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Credential secret read by both tiers
pub fn database_secret(spec: &StoreSpec) -> Secret {
    let creds = &spec.credentials;
    let string_data = BTreeMap::from([
        (KEY_ROOT_PASSWORD.to_string(), creds.root_password.clone()),
        (KEY_DATABASE.to_string(), DATABASE_NAME.to_string()),
        (KEY_USER.to_string(), DATABASE_USER.to_string()),
        (KEY_PASSWORD.to_string(), creds.admin_password.clone()),
    ]);

    Secret {
        metadata: object_meta(spec, DATABASE_SECRET_NAME, "database"),
        type_: Some("Opaque".to_string()),
        string_data: Some(string_data),
        ..Default::default()
    }
}

/// Headless service giving the database pod a stable DNS name
pub fn database_service(spec: &StoreSpec) -> Service {
    let mut metadata = object_meta(spec, DATABASE_SERVICE_NAME, "database");
    if let Some(labels) = metadata.labels.as_mut() {
        labels.insert("app".to_string(), DATABASE_APP_LABEL.to_string());
    }

    Service {
        metadata,
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            selector: Some(app_selector(DATABASE_APP_LABEL)),
            ports: Some(vec![ServicePort {
                port: DATABASE_PORT,
                target_port: Some(IntOrString::Int(DATABASE_PORT)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Single-replica database with one persistent volume
pub fn database_stateful_set(spec: &StoreSpec, config: &CatalogConfig) -> StatefulSet {
    let container = Container {
        name: "mysql".to_string(),
        image: Some(config.database_image.clone()),
        ports: Some(vec![ContainerPort {
            name: Some("mysql".to_string()),
            container_port: DATABASE_PORT,
            ..Default::default()
        }]),
        env: Some(vec![
            secret_env("MYSQL_ROOT_PASSWORD", KEY_ROOT_PASSWORD),
            secret_env("MYSQL_DATABASE", KEY_DATABASE),
            secret_env("MYSQL_USER", KEY_USER),
            secret_env("MYSQL_PASSWORD", KEY_PASSWORD),
        ]),
        volume_mounts: Some(vec![VolumeMount {
            name: VOLUME_NAME.to_string(),
            mount_path: "/var/lib/mysql".to_string(),
            ..Default::default()
        }]),
        // Pod turns ready only once the server answers, which is what the
        // pipeline waits on before starting the application tier.
        readiness_probe: Some(Probe {
            exec: Some(ExecAction {
                command: Some(vec![
                    "sh".to_string(),
                    "-c".to_string(),
                    "mysqladmin ping -h 127.0.0.1 -p\"$MYSQL_ROOT_PASSWORD\"".to_string(),
                ]),
            }),
            initial_delay_seconds: Some(10),
            period_seconds: Some(5),
            ..Default::default()
        }),
        ..Default::default()
    };

    let volume_claim = PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(VOLUME_NAME.to_string()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(format!("{}Gi", config.database_storage_gi)),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    };

    StatefulSet {
        metadata: object_meta(spec, DATABASE_WORKLOAD_NAME, "database"),
        spec: Some(StatefulSetSpec {
            service_name: DATABASE_SERVICE_NAME.to_string(),
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(app_selector(DATABASE_APP_LABEL)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(app_selector(DATABASE_APP_LABEL)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    ..Default::default()
                }),
            },
            volume_claim_templates: Some(vec![volume_claim]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
