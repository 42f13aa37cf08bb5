use axum::{Json, extract::State, response::IntoResponse};

use crate::AppState;
use crate::metrics;

/// Health check endpoint - returns relay status
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let metrics = state.metrics.snapshot();
    let cached_clusters = state.relay.cache().cached_clusters().await;

    let status = if state.sessions.is_closed() {
        "draining"
    } else {
        "healthy"
    };

    Json(metrics::HealthStatus {
        status: status.to_string(),
        active_sessions: metrics.sessions.active,
        cached_clusters,
        uptime_secs: metrics.uptime_secs,
    })
}

/// Metrics endpoint - returns session counters
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

/// Liveness probe - returns 200 if the server is running
pub async fn health_live_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "alive" }))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::build_router;
    use crate::handlers::test_support::{body_json, test_state};

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn health_reports_sessions_and_clusters() {
        let state = test_state();
        state.metrics.session_opened();

        let response = build_router(state).oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["active_sessions"], 1);
        assert_eq!(json["cached_clusters"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn health_reports_draining_after_shutdown() {
        let state = test_state();
        state.sessions.close();

        let response = build_router(state).oneshot(get("/health")).await.unwrap();
        assert_eq!(body_json(response).await["status"], "draining");
    }

    #[tokio::test]
    async fn liveness_probe() {
        let response = build_router(test_state())
            .oneshot(get("/health/live"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "alive");
    }

    #[tokio::test]
    async fn metrics_snapshot() {
        let state = test_state();
        state.metrics.session_opened();
        state.metrics.session_closed(&Ok(()));

        let response = build_router(state).oneshot(get("/metrics")).await.unwrap();
        let json = body_json(response).await;
        assert_eq!(json["sessions"]["opened"], 1);
        assert_eq!(json["sessions"]["completed"], 1);
        assert_eq!(json["sessions"]["active"], 0);
    }
}
