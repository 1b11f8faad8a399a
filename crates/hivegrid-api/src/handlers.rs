//! REST API handlers.
//!
//! Each handler delegates to the distributor or session map and wraps the
//! result in a consistent JSON envelope.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use tracing::debug;

use hivegrid_core::{GridError, NewSessionRequest, NodeId, NodeStatus, SessionId};

use crate::ApiState;

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

fn error_response(err: &GridError) -> impl IntoResponse {
    let status = match err {
        GridError::NoSuchSession(_) => StatusCode::NOT_FOUND,
        GridError::Config(_) => StatusCode::BAD_REQUEST,
        GridError::SessionNotCreated(_) | GridError::Storage(_) | GridError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(err.to_string()),
        }),
    )
}

/// POST /session
pub async fn new_session(
    State(state): State<ApiState>,
    Json(request): Json<NewSessionRequest>,
) -> impl IntoResponse {
    match state.distributor.new_session(&request).await {
        Ok(session) => (StatusCode::CREATED, ApiResponse::ok(session)).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

/// GET /session/{id}
pub async fn get_session(
    State(state): State<ApiState>,
    Path(id): Path<SessionId>,
) -> impl IntoResponse {
    match state.sessions.get(&id).await {
        Ok(session) => ApiResponse::ok(session).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

/// GET /status
pub async fn grid_status(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.distributor.status().await).into_response()
}

/// GET /readyz
pub async fn readyz(State(state): State<ApiState>) -> impl IntoResponse {
    if state.distributor.is_ready() {
        (StatusCode::OK, "ok").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

/// POST /node
pub async fn add_node(
    State(state): State<ApiState>,
    Json(status): Json<NodeStatus>,
) -> impl IntoResponse {
    let node_id = status.node_id;
    match state.distributor.add(status).await {
        Ok(()) => {
            debug!(%node_id, "node registered via api");
            (StatusCode::CREATED, ApiResponse::ok(node_id)).into_response()
        }
        Err(e) => error_response(&e).into_response(),
    }
}

/// DELETE /node/{id}
pub async fn remove_node(
    State(state): State<ApiState>,
    Path(id): Path<NodeId>,
) -> impl IntoResponse {
    if state.distributor.remove(id).await {
        ApiResponse::ok(id).into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::<()> {
                success: false,
                data: None,
                error: Some(format!("node {id} is not registered")),
            }),
        )
            .into_response()
    }
}
