use axum::{
    extract::{ws::WebSocket, State, WebSocketUpgrade},
    response::IntoResponse,
};

use crate::session::SessionHandler;
use crate::state::AppState;
use crate::transport::split_websocket;

/// WebSocket upgrade handler for `/ws/chat/`
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    tracing::debug!("WebSocket connection request");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Bind an upgraded websocket to a session and run it to completion
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (sender, receiver) = split_websocket(socket);
    let handler = SessionHandler::new(state.hub.clone(), state.config.send_timeout);
    let connection_id = handler.connection_id().to_string();

    tracing::info!(connection_id = %connection_id, "WebSocket connected");
    handler.run(sender, receiver).await;
    tracing::info!(connection_id = %connection_id, "WebSocket connection closed");
}
