//! gridscale-api — the HTTP/JSON surface of the synchronization
//! protocol.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/cluster_resource_state` | Full versioned snapshot |
//! | POST | `/api/v1/autoscaling_state` | Submit a reporter state report |
//! | GET | `/api/v1/instances` | Instance view from the last report |

pub mod handlers;

use axum::Router;
use axum::routing::{get, post};
use gridscale_authority::StateAuthority;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub authority: StateAuthority,
}

/// Build the protocol router.
pub fn build_router(authority: StateAuthority) -> Router {
    let api_state = ApiState { authority };

    let api_routes = Router::new()
        .route(
            "/cluster_resource_state",
            post(handlers::get_cluster_resource_state),
        )
        .route(
            "/autoscaling_state",
            post(handlers::report_autoscaling_state),
        )
        .route("/instances", get(handlers::list_instances))
        .with_state(api_state);

    Router::new().nest("/api/v1", api_routes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use tower::util::ServiceExt;

    use gridscale_model::{NodeState, NodeStatus, ResourceMap};
    use std::collections::HashMap;

    fn node(id: &str, cpu: f64) -> NodeState {
        NodeState {
            node_id: id.to_string(),
            instance_id: format!("i-{id}"),
            node_type: "standard".to_string(),
            total_resources: ResourceMap::from([("CPU".to_string(), cpu)]),
            available_resources: ResourceMap::from([("CPU".to_string(), cpu)]),
            labels: HashMap::new(),
            node_state_version: 0,
            status: NodeStatus::Alive,
        }
    }

    fn post_json(path: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn snapshot_endpoint_returns_versioned_state() {
        let authority = StateAuthority::new();
        authority.add_node(node("n1", 4.0)).unwrap();
        let app = build_router(authority);

        let response = app
            .oneshot(post_json(
                "/api/v1/cluster_resource_state",
                serde_json::json!({ "last_seen_cluster_resource_state_version": 0 }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["cluster_resource_state_version"], 1);
        assert_eq!(json["data"]["node_states"][0]["node_id"], "n1");
    }

    #[tokio::test]
    async fn report_endpoint_accepts_then_conflicts_on_stale() {
        let authority = StateAuthority::new();
        let app = build_router(authority.clone());

        let report = serde_json::json!({
            "last_seen_cluster_resource_state_version": 0,
            "autoscaler_state_version": 1,
            "instances": [{
                "instance_id": "i1",
                "node_type": "standard",
                "status": "running",
                "total_resources": { "CPU": 4.0 },
                "status_changed_at": 1000
            }]
        });

        let response = app
            .clone()
            .oneshot(post_json("/api/v1/autoscaling_state", report.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(authority.last_seen_autoscaler_state_version(), 1);

        // Same version again: version conflict.
        let response = app
            .oneshot(post_json("/api/v1/autoscaling_state", report))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let json = body_json(response).await;
        assert_eq!(json["success"], false);
        assert!(json["error"].as_str().unwrap().contains("stale"));
    }

    #[tokio::test]
    async fn malformed_report_is_bad_request() {
        let app = build_router(StateAuthority::new());

        let report = serde_json::json!({
            "last_seen_cluster_resource_state_version": 0,
            "autoscaler_state_version": 1,
            "instances": [
                {
                    "instance_id": "i1",
                    "node_type": "standard",
                    "status": "running",
                    "total_resources": {},
                    "status_changed_at": 0
                },
                {
                    "instance_id": "i1",
                    "node_type": "standard",
                    "status": "idle",
                    "total_resources": {},
                    "status_changed_at": 0
                }
            ]
        });

        let response = app
            .oneshot(post_json("/api/v1/autoscaling_state", report))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn instances_endpoint_reflects_last_report() {
        let authority = StateAuthority::new();
        let app = build_router(authority.clone());

        let report = serde_json::json!({
            "last_seen_cluster_resource_state_version": 0,
            "autoscaler_state_version": 1,
            "instances": [{
                "instance_id": "i1",
                "node_type": "standard",
                "status": "starting",
                "total_resources": { "CPU": 2.0 },
                "status_changed_at": 5
            }]
        });
        app.clone()
            .oneshot(post_json("/api/v1/autoscaling_state", report))
            .await
            .unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/instances")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["data"][0]["instance_id"], "i1");
        assert_eq!(json["data"][0]["status"], "starting");
    }
}
