//! HTTP API endpoints and router assembly.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;
use crate::types::Username;
use crate::ws;

/// Response structure for the presence endpoint
#[derive(Debug, Clone, Serialize)]
pub struct PresenceResponse {
    pub clients: Vec<Username>,
    /// Open connections, including ones that have not set a username yet
    pub connections: usize,
}

/// Current presence.
///
/// GET /api/presence
pub async fn get_presence(State(state): State<AppState>) -> Json<PresenceResponse> {
    let snapshot = state.hub.snapshot().await;
    let connections = state.hub.connection_count().await;
    Json(PresenceResponse {
        clients: snapshot.clients,
        connections,
    })
}

/// GET /health
pub async fn health() -> &'static str {
    "ok"
}

/// Assemble all routes
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws/chat/", get(ws::ws_handler))
        .route("/api/presence", get(get_presence))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfig;
    use axum::{body::Body, http::Request, http::StatusCode};
    use tower::ServiceExt;

    async fn get_body(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let app = router(AppState::new(HubConfig::default()));
        let (status, body) = get_body(app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn test_presence_endpoint() {
        let state = AppState::new(HubConfig::default());
        let a = state.hub.connect().await.unwrap();
        state.hub.connect().await.unwrap();
        state
            .hub
            .on_username_set(&a.session.connection_id, "alice")
            .await
            .unwrap();

        let (status, body) = get_body(router(state), "/api/presence").await;
        assert_eq!(status, StatusCode::OK);

        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["clients"], serde_json::json!(["alice"]));
        assert_eq!(json["connections"], 2);
    }
}
