//! REST API Handlers
//!
//! JSON rendition of the volume provisioning calls: create, delete and
//! expand, plus liveness and readiness probes.

use axum::{
    extract::{rejection::JsonRejection, Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::constants::TOPOLOGY_KEY;
use crate::error::Error;
use crate::provisioning::{CreateVolumeRequest, ExpandVolumeRequest, VolumeProvisioner};

// =============================================================================
// Request/Response Types
// =============================================================================

/// Topology segments, e.g. the node a volume is reachable from
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topology {
    #[serde(default)]
    pub segments: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopologyRequirement {
    #[serde(default)]
    pub preferred: Vec<Topology>,
}

/// Create volume request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVolumeBody {
    pub name: String,
    pub capacity_bytes: u64,
    /// Parameters of the StorageClass the volume is provisioned from
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    #[serde(default)]
    pub accessibility_requirements: Option<TopologyRequirement>,
}

impl CreateVolumeBody {
    /// Node named by the first preferred topology, if any
    fn preferred_node(&self) -> Option<String> {
        self.accessibility_requirements
            .as_ref()
            .and_then(|r| r.preferred.first())
            .and_then(|t| t.segments.get(TOPOLOGY_KEY))
            .cloned()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVolumeResponse {
    pub volume_id: String,
    pub capacity_bytes: u64,
    pub volume_context: BTreeMap<String, String>,
    pub accessible_topology: Vec<Topology>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpandVolumeBody {
    pub capacity_bytes: u64,
    /// Raw block volume
    #[serde(default)]
    pub block: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpandVolumeResponse {
    pub capacity_bytes: u64,
    pub node_expansion_required: bool,
}

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
}

/// HTTP status and error code for a provisioning failure
pub fn error_status(err: &Error) -> (StatusCode, &'static str) {
    match err {
        Error::InvalidArgument(_) => (StatusCode::BAD_REQUEST, "invalid_argument"),
        Error::ResourceNotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
        Error::Conflict { .. } | Error::ResourceExists { .. } => (StatusCode::CONFLICT, "conflict"),
        Error::NoCandidate(_) => (StatusCode::UNPROCESSABLE_ENTITY, "no_candidate"),
        Error::InsufficientCapacity { .. } => {
            (StatusCode::INSUFFICIENT_STORAGE, "insufficient_capacity")
        }
        Error::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
        Error::Cancelled { .. } => (StatusCode::SERVICE_UNAVAILABLE, "cancelled"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
    }
}

fn error_response(err: &Error) -> Response {
    let (status, code) = error_status(err);
    if status.is_server_error() {
        error!("Request failed: {}", err);
    } else {
        warn!("Request rejected: {}", err);
    }
    (
        status,
        Json(ApiErrorResponse {
            error: code.into(),
            message: err.to_string(),
        }),
    )
        .into_response()
}

/// Unwrap a JSON body, answering undecodable ones as invalid arguments
fn json_body<T>(
    body: std::result::Result<Json<T>, JsonRejection>,
) -> std::result::Result<T, Response> {
    body.map(|Json(body)| body)
        .map_err(|rejection| error_response(&Error::InvalidArgument(rejection.body_text())))
}

// =============================================================================
// REST Router
// =============================================================================

/// REST API router builder
pub struct RestRouter {
    provisioner: Arc<VolumeProvisioner>,
    shutdown: CancellationToken,
}

impl RestRouter {
    /// `shutdown` cancels every in-flight convergence wait
    pub fn new(provisioner: Arc<VolumeProvisioner>, shutdown: CancellationToken) -> Self {
        Self {
            provisioner,
            shutdown,
        }
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = AppState {
            provisioner: self.provisioner,
            shutdown: self.shutdown,
        };

        Router::new()
            // Volume endpoints
            .route("/v1/volumes", post(create_volume))
            .route("/v1/volumes/:id", delete(delete_volume))
            .route("/v1/volumes/:id/expand", post(expand_volume))
            // Health endpoints
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
            .with_state(state)
    }
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    provisioner: Arc<VolumeProvisioner>,
    shutdown: CancellationToken,
}

// =============================================================================
// Handlers
// =============================================================================

async fn create_volume(
    State(state): State<AppState>,
    body: std::result::Result<Json<CreateVolumeBody>, JsonRejection>,
) -> Response {
    let body = match json_body(body) {
        Ok(body) => body,
        Err(response) => return response,
    };
    info!("CreateVolume {} ({} bytes)", body.name, body.capacity_bytes);

    let request = CreateVolumeRequest {
        name: body.name.clone(),
        capacity_bytes: body.capacity_bytes,
        preferred_node: body.preferred_node(),
        parameters: body.parameters,
    };

    let cancel = state.shutdown.child_token();
    match state.provisioner.create_volume(&request, &cancel).await {
        Ok(volume) => (
            StatusCode::CREATED,
            Json(CreateVolumeResponse {
                volume_id: volume.volume_id,
                capacity_bytes: volume.capacity_bytes,
                volume_context: volume.volume_context,
                accessible_topology: vec![Topology {
                    segments: volume.accessible_topology,
                }],
            }),
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}

async fn delete_volume(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    info!("DeleteVolume {}", id);
    match state.provisioner.delete_volume(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(&e),
    }
}

async fn expand_volume(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: std::result::Result<Json<ExpandVolumeBody>, JsonRejection>,
) -> Response {
    let body = match json_body(body) {
        Ok(body) => body,
        Err(response) => return response,
    };
    info!("ExpandVolume {} to {} bytes", id, body.capacity_bytes);

    let request = ExpandVolumeRequest {
        volume_id: id,
        capacity_bytes: body.capacity_bytes,
        block: body.block,
    };

    let cancel = state.shutdown.child_token();
    match state.provisioner.expand_volume(&request, &cancel).await {
        Ok(expanded) => (
            StatusCode::OK,
            Json(ExpandVolumeResponse {
                capacity_bytes: expanded.capacity_bytes,
                node_expansion_required: expanded.node_expansion_required,
            }),
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}

/// Health check
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness check; not ready once shutdown has begun
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    if state.shutdown.is_cancelled() {
        (StatusCode::SERVICE_UNAVAILABLE, "shutting down")
    } else {
        (StatusCode::OK, "ready")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{Convergence, InMemoryCluster};
    use crate::domain::ManualClock;
    use crate::metrics::Metrics;
    use crate::provisioning::params::tests::parameters;
    use crate::provisioning::placement::tests::capacity_group;
    use crate::provisioning::ProvisionerConfig;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    const GIB: u64 = 1024 * 1024 * 1024;

    fn router() -> (Router, Arc<InMemoryCluster>, CancellationToken) {
        let cluster = InMemoryCluster::new();
        cluster.insert_volume_group(capacity_group("vg-a", "node-a", "10Gi", "0", &[]));
        cluster.insert_volume_group(capacity_group("vg-b", "node-b", "60Gi", "10Gi", &[]));
        cluster.set_convergence(Some(Convergence {
            after_polls: 1,
            extent_bytes: 4 * 1024 * 1024,
        }));

        let provisioner = Arc::new(VolumeProvisioner::new(
            cluster.clone(),
            cluster.clone(),
            ManualClock::new(),
            Metrics::new().unwrap(),
            ProvisionerConfig::default(),
        ));
        let shutdown = CancellationToken::new();
        (
            RestRouter::new(provisioner, shutdown.clone()).build(),
            cluster,
            shutdown,
        )
    }

    fn create_request(capacity_bytes: u64) -> Request<Body> {
        let body = CreateVolumeBody {
            name: "pvc-1".into(),
            capacity_bytes,
            parameters: parameters("Thick", "Immediate", "- name: vg-a\n- name: vg-b\n"),
            accessibility_requirements: None,
        };
        Request::builder()
            .method("POST")
            .uri("/v1/volumes")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap()
    }

    async fn json<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_create_volume() {
        let (router, cluster, _) = router();

        let response = router.oneshot(create_request(20 * GIB)).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let created: CreateVolumeResponse = json(response).await;
        assert_eq!(created.volume_id, "pvc-1");
        assert_eq!(created.accessible_topology[0].segments[TOPOLOGY_KEY], "node-b");
        assert!(cluster.logical_volume("pvc-1").is_some());
    }

    #[tokio::test]
    async fn test_create_volume_insufficient_capacity() {
        let (router, _, _) = router();

        let response = router.oneshot(create_request(60 * GIB)).await.unwrap();
        assert_eq!(response.status(), StatusCode::INSUFFICIENT_STORAGE);
        let err: ApiErrorResponse = json(response).await;
        assert_eq!(err.error, "insufficient_capacity");
    }

    #[tokio::test]
    async fn test_create_volume_rejects_bad_parameters() {
        let (router, _, _) = router();
        let request = Request::builder()
            .method("POST")
            .uri("/v1/volumes")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"name":"pvc-1","capacityBytes":1024}"#))
            .unwrap();

        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let err: ApiErrorResponse = json(response).await;
        assert_eq!(err.message, "Invalid argument: Unsupported Storage Class type");
    }

    #[tokio::test]
    async fn test_malformed_bodies_are_invalid_arguments() {
        let (router, _, _) = router();

        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/volumes")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"name":"pvc-1""#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let err: ApiErrorResponse = json(response).await;
        assert_eq!(err.error, "invalid_argument");

        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/volumes/pvc-1/expand")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"capacityBytes":"lots"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let err: ApiErrorResponse = json(response).await;
        assert_eq!(err.error, "invalid_argument");
        assert!(err.message.starts_with("Invalid argument: "));
    }

    #[tokio::test]
    async fn test_delete_and_expand_missing_volume() {
        let (router, _, _) = router();

        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/v1/volumes/pvc-404")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/volumes/pvc-404/expand")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"capacityBytes":1073741824}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_readiness_follows_shutdown() {
        let (router, _, shutdown) = router();
        let ready = || Request::builder().uri("/ready").body(Body::empty()).unwrap();

        let response = router.clone().oneshot(ready()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        shutdown.cancel();
        let response = router.clone().oneshot(ready()).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let health = Request::builder().uri("/health").body(Body::empty()).unwrap();
        assert_eq!(router.oneshot(health).await.unwrap().status(), StatusCode::OK);
    }

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (Error::InvalidArgument("x".into()), StatusCode::BAD_REQUEST),
            (
                Error::ResourceNotFound {
                    kind: "LVMLogicalVolume".into(),
                    name: "x".into(),
                },
                StatusCode::NOT_FOUND,
            ),
            (Error::NoCandidate("x".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (
                Error::InsufficientCapacity {
                    requested: 2,
                    available: 1,
                },
                StatusCode::INSUFFICIENT_STORAGE,
            ),
            (
                Error::Timeout {
                    volume_name: "x".into(),
                    attempts: 3,
                },
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                Error::Cancelled {
                    volume_name: "x".into(),
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                Error::VolumeFailed {
                    volume_name: "x".into(),
                    reason: "y".into(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(error_status(&err).0, status, "{}", err);
        }
    }
}
