//! Ingress route binding the store hostname to the application service

use super::application::{APP_PORT, APP_SERVICE_NAME};
use super::{object_meta, CatalogConfig, StoreSpec};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use std::collections::BTreeMap;

pub const INGRESS_NAME: &str = "store-ingress";

pub fn store_ingress(spec: &StoreSpec, config: &CatalogConfig) -> Ingress {
    let mut metadata = object_meta(spec, INGRESS_NAME, "ingress");
    metadata.annotations = Some(BTreeMap::from([(
        "nginx.ingress.kubernetes.io/proxy-body-size".to_string(),
        config.proxy_body_size.clone(),
    )]));

    let path = HTTPIngressPath {
        path: Some("/".to_string()),
        path_type: "Prefix".to_string(),
        backend: IngressBackend {
            service: Some(IngressServiceBackend {
                name: APP_SERVICE_NAME.to_string(),
                port: Some(ServiceBackendPort {
                    number: Some(APP_PORT),
                    ..Default::default()
                }),
            }),
            ..Default::default()
        },
    };

    Ingress {
        metadata,
        spec: Some(IngressSpec {
            ingress_class_name: Some(config.ingress_class.clone()),
            rules: Some(vec![IngressRule {
                host: Some(spec.hostname.clone()),
                http: Some(HTTPIngressRuleValue { paths: vec![path] }),
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
