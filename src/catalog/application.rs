//! Application tier builders (WordPress + WooCommerce)

use super::database::{
    secret_env, DATABASE_PORT, DATABASE_SERVICE_NAME, KEY_DATABASE, KEY_PASSWORD, KEY_USER,
};
use super::{app_selector, object_meta, CatalogConfig, StoreSpec};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapEnvSource, ConfigMapVolumeSource, Container, ContainerPort, EnvFromSource,
    EnvVar, PersistentVolumeClaim, PersistentVolumeClaimSpec, PersistentVolumeClaimVolumeSource,
    PodSpec, PodTemplateSpec, Service, ServicePort, ServiceSpec, Volume, VolumeMount,
    VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

pub const APP_CONFIG_NAME: &str = "wordpress-config";
pub const APP_STORAGE_NAME: &str = "wordpress-pvc";
pub const APP_BOOTSTRAP_NAME: &str = "wp-setup-script";
pub const APP_DEPLOYMENT_NAME: &str = "wordpress";
pub const APP_SERVICE_NAME: &str = "wordpress";
pub const APP_LABEL: &str = "wordpress";
pub const APP_PORT: i32 = 80;

/// File name of the script inside the bootstrap config map
pub const BOOTSTRAP_SCRIPT_KEY: &str = "wp-setup.sh";

const BOOTSTRAP_SCRIPT: &str = include_str!("wp-setup.sh");

const STORAGE_VOLUME: &str = "wordpress-storage";
const SCRIPT_VOLUME: &str = "setup-script";

/// Environment consumed by the application and its bootstrap
pub fn application_config(spec: &StoreSpec, config: &CatalogConfig) -> ConfigMap {
    let creds = &spec.credentials;
    let data = BTreeMap::from([
        ("WP_ADMIN_USER".to_string(), creds.admin_user.clone()),
        ("WP_ADMIN_PASSWORD".to_string(), creds.admin_password.clone()),
        ("WP_ADMIN_EMAIL".to_string(), creds.admin_email.clone()),
        ("WP_SITE_TITLE".to_string(), spec.name.clone()),
        ("WP_SITE_URL".to_string(), spec.site_url()),
        ("WC_STORE_NAME".to_string(), spec.name.clone()),
        ("WC_STORE_CURRENCY".to_string(), config.store_currency.clone()),
        ("WC_STORE_COUNTRY".to_string(), config.store_country.clone()),
        ("SAMPLE_PRODUCTS".to_string(), spec.sample_products.clone()),
    ]);

    ConfigMap {
        metadata: object_meta(spec, APP_CONFIG_NAME, "application"),
        data: Some(data),
        ..Default::default()
    }
}

/// Persistent volume for the application document root
pub fn application_storage_claim(spec: &StoreSpec) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: object_meta(spec, APP_STORAGE_NAME, "application"),
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(format!("{}Gi", spec.storage_size_gi)),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Config map carrying the bootstrap shell script
pub fn bootstrap_script(spec: &StoreSpec) -> ConfigMap {
    ConfigMap {
        metadata: object_meta(spec, APP_BOOTSTRAP_NAME, "bootstrap"),
        data: Some(BTreeMap::from([(
            BOOTSTRAP_SCRIPT_KEY.to_string(),
            BOOTSTRAP_SCRIPT.to_string(),
        )])),
        ..Default::default()
    }
}

fn database_env() -> Vec<EnvVar> {
    vec![
        EnvVar {
            name: "WORDPRESS_DB_HOST".to_string(),
            value: Some(format!("{}:{}", DATABASE_SERVICE_NAME, DATABASE_PORT)),
            ..Default::default()
        },
        secret_env("WORDPRESS_DB_NAME", KEY_DATABASE),
        secret_env("WORDPRESS_DB_USER", KEY_USER),
        secret_env("WORDPRESS_DB_PASSWORD", KEY_PASSWORD),
    ]
}

fn config_env_from() -> Vec<EnvFromSource> {
    vec![EnvFromSource {
        config_map_ref: Some(ConfigMapEnvSource {
            name: Some(APP_CONFIG_NAME.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }]
}

fn mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        ..Default::default()
    }
}

/// Application deployment: the init container runs the bootstrap to
/// completion before the serving container starts.
pub fn application_deployment(spec: &StoreSpec, config: &CatalogConfig) -> Deployment {
    let init = Container {
        name: "wp-init".to_string(),
        image: Some(config.bootstrap_image.clone()),
        command: Some(vec![
            "/bin/bash".to_string(),
            "-c".to_string(),
            format!(
                "set -o pipefail\n\
                 mkdir -p /tmp/conf.d\n\
                 echo \"memory_limit = 512M\" > /tmp/conf.d/custom.ini\n\
                 export PHP_INI_SCAN_DIR=:$PHP_INI_SCAN_DIR:/tmp/conf.d\n\
                 /scripts/{} 2>&1 | {{ grep -v \"already loaded\" || true; }}",
                BOOTSTRAP_SCRIPT_KEY
            ),
        ]),
        env: Some(database_env()),
        env_from: Some(config_env_from()),
        volume_mounts: Some(vec![
            mount(STORAGE_VOLUME, "/var/www/html"),
            mount(SCRIPT_VOLUME, "/scripts"),
        ]),
        ..Default::default()
    };

    let server = Container {
        name: "wordpress".to_string(),
        image: Some(config.application_image.clone()),
        ports: Some(vec![ContainerPort {
            name: Some("http".to_string()),
            container_port: APP_PORT,
            ..Default::default()
        }]),
        env: Some(database_env()),
        env_from: Some(config_env_from()),
        volume_mounts: Some(vec![mount(STORAGE_VOLUME, "/var/www/html")]),
        ..Default::default()
    };

    let volumes = vec![
        Volume {
            name: STORAGE_VOLUME.to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: APP_STORAGE_NAME.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        },
        Volume {
            name: SCRIPT_VOLUME.to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: Some(APP_BOOTSTRAP_NAME.to_string()),
                default_mode: Some(0o755),
                ..Default::default()
            }),
            ..Default::default()
        },
    ];

    let mut metadata = object_meta(spec, APP_DEPLOYMENT_NAME, "application");
    if let Some(labels) = metadata.labels.as_mut() {
        labels.insert("app".to_string(), APP_LABEL.to_string());
    }

    Deployment {
        metadata,
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(app_selector(APP_LABEL)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(app_selector(APP_LABEL)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    init_containers: Some(vec![init]),
                    containers: vec![server],
                    volumes: Some(volumes),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Cluster-internal service in front of the application
pub fn application_service(spec: &StoreSpec) -> Service {
    let mut metadata = object_meta(spec, APP_SERVICE_NAME, "application");
    if let Some(labels) = metadata.labels.as_mut() {
        labels.insert("app".to_string(), APP_LABEL.to_string());
    }

    Service {
        metadata,
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(app_selector(APP_LABEL)),
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                port: APP_PORT,
                target_port: Some(IntOrString::Int(APP_PORT)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
