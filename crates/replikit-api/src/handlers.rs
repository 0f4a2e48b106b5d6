//! REST API handlers.
//!
//! Each handler reads/writes via the controller `Client` and returns JSON
//! responses.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{debug, warn};

use replikit_controller::ClientError;
use replikit_state::*;

use crate::ApiState;

/// Attempts made by `scale_fleet` before giving up on write conflicts.
const SCALE_ATTEMPTS: usize = 3;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

/// Map a client error onto an HTTP status.
fn client_error(e: ClientError) -> Response {
    let status = match &e {
        ClientError::State(StateError::NotFound(_)) => StatusCode::NOT_FOUND,
        ClientError::State(StateError::AlreadyExists(_) | StateError::Conflict { .. }) => {
            StatusCode::CONFLICT
        }
        ClientError::State(StateError::Invalid(_)) => StatusCode::BAD_REQUEST,
        ClientError::Denied { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        warn!(error = %e, "api request failed");
    }
    error_response(&e.to_string(), status).into_response()
}

// ── Fleets ─────────────────────────────────────────────────────

/// Fleet creation request body.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct CreateFleetRequest {
    pub name: String,
    pub desired_replicas: u32,
}

/// GET /api/v1/namespaces/{namespace}/fleets
pub async fn list_fleets(State(state): State<ApiState>, Path(namespace): Path<String>) -> Response {
    match state.client.list::<Fleet>(Some(&namespace)).await {
        Ok(fleets) => ApiResponse::ok(fleets).into_response(),
        Err(e) => client_error(e),
    }
}

/// GET /api/v1/namespaces/{namespace}/fleets/{name}
pub async fn get_fleet(
    State(state): State<ApiState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Response {
    match state.client.get::<Fleet>(&ObjectKey::new(namespace, name)).await {
        Ok(fleet) => ApiResponse::ok(fleet).into_response(),
        Err(e) => client_error(e),
    }
}

/// POST /api/v1/namespaces/{namespace}/fleets
pub async fn create_fleet(
    State(state): State<ApiState>,
    Path(namespace): Path<String>,
    Json(req): Json<CreateFleetRequest>,
) -> Response {
    let fleet = Fleet::new(namespace, req.name, req.desired_replicas);
    match state.client.create(&fleet).await {
        Ok(created) => {
            debug!(fleet = %created.key(), desired = created.spec.desired_replicas, "fleet created");
            (StatusCode::CREATED, ApiResponse::ok(created)).into_response()
        }
        Err(e) => client_error(e),
    }
}

/// DELETE /api/v1/namespaces/{namespace}/fleets/{name}
///
/// Replicas are removed by the fleet controller before the fleet disappears.
pub async fn delete_fleet(
    State(state): State<ApiState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Response {
    match state.client.delete::<Fleet>(&ObjectKey::new(namespace, name)).await {
        Ok(()) => ApiResponse::ok("deleted").into_response(),
        Err(e) => client_error(e),
    }
}

// ── Scaling ────────────────────────────────────────────────────

/// Scale request body.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct ScaleRequest {
    pub desired_replicas: u32,
}

/// POST /api/v1/namespaces/{namespace}/fleets/{name}/scale
pub async fn scale_fleet(
    State(state): State<ApiState>,
    Path((namespace, name)): Path<(String, String)>,
    Json(req): Json<ScaleRequest>,
) -> Response {
    let key = ObjectKey::new(namespace, name);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let mut fleet = match state.client.get::<Fleet>(&key).await {
            Ok(fleet) => fleet,
            Err(e) => return client_error(e),
        };
        if fleet.metadata.is_being_deleted() {
            return error_response("fleet is being deleted", StatusCode::CONFLICT).into_response();
        }
        fleet.spec.desired_replicas = req.desired_replicas;

        match state.client.patch(&fleet).await {
            Ok(scaled) => return ApiResponse::ok(scaled).into_response(),
            Err(e) if e.is_conflict() && attempt < SCALE_ATTEMPTS => {
                debug!(fleet = %key, attempt, "scale conflicted, retrying");
            }
            Err(e) => return client_error(e),
        }
    }
}

// ── Replicas ───────────────────────────────────────────────────

/// Replica creation request body. Without a name, one is generated as
/// `<fleet>-<suffix>`.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct CreateReplicaRequest {
    #[serde(default)]
    pub name: Option<String>,
    pub fleet: String,
}

/// Query parameters for listing replicas.
#[derive(Debug, Default, serde::Deserialize)]
pub struct ReplicaFilter {
    pub fleet: Option<String>,
}

/// GET /api/v1/namespaces/{namespace}/replicas
pub async fn list_replicas(
    State(state): State<ApiState>,
    Path(namespace): Path<String>,
    Query(filter): Query<ReplicaFilter>,
) -> Response {
    let result = match filter.fleet {
        Some(fleet) => state.client.list_replicas_for_fleet(&namespace, &fleet).await,
        None => state.client.list::<Replica>(Some(&namespace)).await,
    };
    match result {
        Ok(replicas) => ApiResponse::ok(replicas).into_response(),
        Err(e) => client_error(e),
    }
}

/// GET /api/v1/namespaces/{namespace}/replicas/{name}
pub async fn get_replica(
    State(state): State<ApiState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Response {
    match state.client.get::<Replica>(&ObjectKey::new(namespace, name)).await {
        Ok(replica) => ApiResponse::ok(replica).into_response(),
        Err(e) => client_error(e),
    }
}

/// POST /api/v1/namespaces/{namespace}/replicas
pub async fn create_replica(
    State(state): State<ApiState>,
    Path(namespace): Path<String>,
    Json(req): Json<CreateReplicaRequest>,
) -> Response {
    let replica = match req.name {
        Some(name) => Replica::new(namespace, name, req.fleet),
        None => Replica {
            metadata: ObjectMeta::generated(namespace, format!("{}-", req.fleet)),
            spec: ReplicaSpec { fleet: req.fleet },
        },
    };
    match state.client.create(&replica).await {
        Ok(created) => (StatusCode::CREATED, ApiResponse::ok(created)).into_response(),
        Err(e) => client_error(e),
    }
}

/// DELETE /api/v1/namespaces/{namespace}/replicas/{name}
pub async fn delete_replica(
    State(state): State<ApiState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Response {
    match state.client.delete::<Replica>(&ObjectKey::new(namespace, name)).await {
        Ok(()) => ApiResponse::ok("deleted").into_response(),
        Err(e) => client_error(e),
    }
}
