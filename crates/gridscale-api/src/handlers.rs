//! RPC handlers.
//!
//! Each handler delegates to the `StateAuthority` and returns JSON.
//! Rejections map to HTTP statuses: version conflicts are 409,
//! malformed reports 400, store failures 500 — a failed call is always
//! observable to the caller.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;

use gridscale_authority::AuthorityError;
use gridscale_model::{GetClusterResourceStateRequest, ReportAutoscalingStateRequest};

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

fn status_for(err: &AuthorityError) -> StatusCode {
    match err {
        AuthorityError::StaleReport { .. } | AuthorityError::StaleSnapshot { .. } => {
            StatusCode::CONFLICT
        }
        AuthorityError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        AuthorityError::UnknownNode(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::BAD_REQUEST,
    }
}

/// POST /api/v1/cluster_resource_state
pub async fn get_cluster_resource_state(
    State(state): State<ApiState>,
    Json(req): Json<GetClusterResourceStateRequest>,
) -> impl IntoResponse {
    let snapshot = state.authority.get_cluster_resource_state(&req);
    ApiResponse::ok(snapshot).into_response()
}

/// POST /api/v1/autoscaling_state
pub async fn report_autoscaling_state(
    State(state): State<ApiState>,
    Json(req): Json<ReportAutoscalingStateRequest>,
) -> impl IntoResponse {
    match state.authority.report_autoscaling_state(req) {
        Ok(reply) => ApiResponse::ok(reply).into_response(),
        Err(e) => error_response(&e.to_string(), status_for(&e)).into_response(),
    }
}

/// GET /api/v1/instances — the instance view from the last accepted report.
pub async fn list_instances(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.authority.reported_instances()).into_response()
}
