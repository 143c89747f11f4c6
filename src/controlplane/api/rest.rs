//! REST API Handlers
//!
//! Store endpoints over the orchestrator plus health, readiness and
//! metrics. The caller identity is taken from the `X-Owner-Id` header, set
//! by whatever authenticates requests in front of this service.

use crate::controlplane::orchestrator::{CreateStoreRequest, Orchestrator, StoreSummary};
use crate::domain::ports::OwnerId;
use crate::error::{Error, Result};
use axum::{
    body::Bytes,
    extract::{Json, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Header carrying the authenticated owner id
pub const OWNER_HEADER: &str = "x-owner-id";

// =============================================================================
// Request/Response Types
// =============================================================================

/// Store creation request body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateStoreBody {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub sample_products: Option<String>,
    #[serde(default, alias = "store_url")]
    pub hostname_suffix: Option<String>,
    #[serde(default)]
    pub admin_password: Option<String>,
    #[serde(default, alias = "storageSize")]
    pub storage_size_gi: Option<u32>,
}

impl CreateStoreBody {
    fn into_request(self, owner_id: OwnerId) -> CreateStoreRequest {
        CreateStoreRequest {
            owner_id,
            name: self.name,
            sample_products: self.sample_products,
            hostname_suffix: self.hostname_suffix,
            admin_password: self.admin_password,
            storage_size_gi: self.storage_size_gi,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreListResponse {
    pub stores: Vec<StoreSummary>,
}

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
}

/// HTTP status for an orchestrator error
pub fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::QuotaExceeded(_) | Error::Unauthorized { .. } => StatusCode::FORBIDDEN,
        Error::OwnerNotFound { .. } | Error::NotFound { .. } => StatusCode::NOT_FOUND,
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::StoreExists { .. } => StatusCode::CONFLICT,
        Error::IdSpaceExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: Error) -> Response {
    let status = status_for(&err);
    if status.is_server_error() {
        error!(error = %err, kind = err.kind(), "Request failed");
    }

    let (store_id, stage) = match &err {
        Error::ProvisioningFailed { store_id, stage, .. } => {
            (Some(store_id.clone()), Some(stage.clone()))
        }
        Error::DeletionIncomplete { store_id, .. }
        | Error::NotFound { store_id }
        | Error::Unauthorized { store_id, .. } => (Some(store_id.clone()), None),
        _ => (None, None),
    };

    (
        status,
        Json(ApiErrorResponse {
            error: err.kind().to_string(),
            message: err.to_string(),
            store_id,
            stage,
        }),
    )
        .into_response()
}

fn owner_from_headers(headers: &HeaderMap) -> Result<Option<OwnerId>> {
    let Some(value) = headers.get(OWNER_HEADER) else {
        return Ok(None);
    };
    value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<OwnerId>().ok())
        .map(Some)
        .ok_or_else(|| Error::Validation(format!("invalid {} header", OWNER_HEADER)))
}

/// An empty body asks for all defaults; anything else must be a valid object
fn parse_create_body(bytes: &[u8]) -> Result<CreateStoreBody> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(CreateStoreBody::default());
    }
    serde_json::from_slice(bytes)
        .map_err(|e| Error::Validation(format!("invalid request body: {}", e)))
}

// =============================================================================
// REST Router
// =============================================================================

/// REST API router builder
pub struct RestRouter {
    orchestrator: Arc<Orchestrator>,
}

impl RestRouter {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = AppState {
            orchestrator: self.orchestrator,
        };

        Router::new()
            .route("/api/stores", get(list_stores).post(create_store))
            .route("/api/stores/:id", delete(delete_store))
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .route("/metrics", get(metrics))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }
}

#[derive(Clone)]
struct AppState {
    orchestrator: Arc<Orchestrator>,
}

// =============================================================================
// Handlers
// =============================================================================

async fn list_stores(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let owner = match owner_from_headers(&headers) {
        Ok(owner) => owner,
        Err(e) => return error_response(e),
    };

    match state.orchestrator.list_stores(owner).await {
        Ok(stores) => (StatusCode::OK, Json(StoreListResponse { stores })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn create_store(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let owner_id = match owner_from_headers(&headers) {
        Ok(Some(owner_id)) => owner_id,
        Ok(None) => {
            return error_response(Error::Validation(format!(
                "missing {} header",
                OWNER_HEADER
            )))
        }
        Err(e) => return error_response(e),
    };

    let body = match parse_create_body(&body) {
        Ok(body) => body,
        Err(e) => return error_response(e),
    };
    info!(owner_id, "Store creation requested");

    match state
        .orchestrator
        .create_store(body.into_request(owner_id))
        .await
    {
        Ok(store) => (StatusCode::CREATED, Json(store)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn delete_store(
    State(state): State<AppState>,
    Path(store_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let owner = match owner_from_headers(&headers) {
        Ok(owner) => owner,
        Err(e) => return error_response(e),
    };

    match state.orchestrator.delete_store(&store_id, owner).await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({ "success": true, "id": store_id })),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "healthy" })))
}

/// Ready once the store directory answers
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.orchestrator.directory().list_owners().await {
        Ok(_) => (StatusCode::OK, "ready").into_response(),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}

async fn metrics(State(state): State<AppState>) -> Response {
    match state.orchestrator.metrics().encode() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::memory::InMemoryCluster;
    use crate::controlplane::metrics::ProvisioningMetrics;
    use crate::controlplane::orchestrator::OrchestratorConfig;
    use crate::directory::{seed_default_owners, JsonStoreDirectory};
    use crate::error::QuotaViolation;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    async fn router() -> Router {
        router_with_cluster().await.0
    }

    async fn router_with_cluster() -> (Router, Arc<InMemoryCluster>) {
        let directory = Arc::new(JsonStoreDirectory::in_memory());
        seed_default_owners(directory.as_ref(), "opaque").await.unwrap();
        let cluster = Arc::new(InMemoryCluster::new());
        let orchestrator = Orchestrator::new(
            OrchestratorConfig::default(),
            cluster.clone(),
            directory,
            ProvisioningMetrics::new().unwrap(),
        );
        (RestRouter::new(Arc::new(orchestrator)).build(), cluster)
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn create(owner: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::post("/api/stores").header("content-type", "application/json");
        if let Some(owner) = owner {
            builder = builder.header(OWNER_HEADER, owner);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&Error::QuotaExceeded(QuotaViolation::StoreLimitReached {
                current: 1,
                max: 1
            })),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_for(&Error::OwnerNotFound { owner_id: 3 }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&Error::Unauthorized {
                store_id: "x".into(),
                owner_id: 1
            }),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_for(&Error::ProvisioningFailed {
                store_id: "x".into(),
                stage: "ingress".into(),
                reason: "boom".into()
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(status_for(&Error::Cluster("down".into())), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_health() {
        let router = router().await;
        let (status, body) = send(&router, Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");

        let response = router
            .clone()
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_create_list_delete() {
        let router = router().await;

        let (status, created) = send(&router, create(Some("2"), r#"{"storage_size_gi": 3}"#)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["status"], "ready");
        assert_eq!(created["owner"], "demo_user");
        assert_eq!(created["storage_size_gi"], 5);
        let id = created["id"].as_str().unwrap().to_string();

        let list = Request::get("/api/stores")
            .header(OWNER_HEADER, "2")
            .body(Body::empty())
            .unwrap();
        let (status, listed) = send(&router, list).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed["stores"].as_array().unwrap().len(), 1);
        assert_eq!(listed["stores"][0]["id"], id.as_str());

        let forbidden = Request::delete(format!("/api/stores/{}", id))
            .header(OWNER_HEADER, "3")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&router, forbidden).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "unauthorized");

        let remove = Request::delete(format!("/api/stores/{}", id))
            .header(OWNER_HEADER, "2")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&router, remove).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let (status, _) = send(
            &router,
            Request::delete(format!("/api/stores/{}", id)).body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_quota_exceeded_is_forbidden() {
        let router = router().await;
        let (status, body) = send(&router, create(Some("2"), r#"{"storage_size_gi": 4}"#)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "quota_exceeded");
    }

    #[tokio::test]
    async fn test_create_requires_owner() {
        let router = router().await;
        let (status, body) = send(&router, create(None, "{}")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_request");

        let (status, _) = send(&router, create(Some("not-a-number"), "{}")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(&router, create(Some("99"), "{}")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "owner_not_found");
    }

    #[test]
    fn test_parse_create_body() {
        let body = parse_create_body(b"").unwrap();
        assert!(body.storage_size_gi.is_none());
        assert!(parse_create_body(b"  \n").is_ok());
        assert_eq!(
            parse_create_body(br#"{"storageSize": 4}"#).unwrap().storage_size_gi,
            Some(4)
        );
        assert!(matches!(
            parse_create_body(br#"{"storage_size_gi": -5}"#),
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_malformed_body_is_rejected_without_side_effects() {
        let (router, cluster) = router_with_cluster().await;

        for body in [r#"{"storage_size_gi": -5}"#, "not json at all", r#"{"name": 7}"#] {
            let (status, reply) = send(&router, create(Some("1"), body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "body {}", body);
            assert_eq!(reply["error"], "invalid_request");
        }
        assert!(cluster.calls().is_empty());

        let list = Request::get("/api/stores")
            .header(OWNER_HEADER, "1")
            .body(Body::empty())
            .unwrap();
        let (_, listed) = send(&router, list).await;
        assert!(listed["stores"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_body_uses_defaults() {
        let router = router().await;
        let request = Request::post("/api/stores")
            .header(OWNER_HEADER, "1")
            .body(Body::empty())
            .unwrap();
        let (status, created) = send(&router, request).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["storage_size_gi"], 4);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let router = router().await;
        send(&router, create(Some("1"), "{}")).await;

        let response = router
            .clone()
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("store_provisions_total{outcome=\"ready\"} 1"));
    }
}
