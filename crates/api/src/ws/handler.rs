use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;

use crate::state::AppState;
use crate::ws::session;

/// HTTP handler that upgrades the connection to a live-update session.
///
/// The transport rejects frames and messages above the configured size
/// before they reach the session's read pump.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let limit = state.hub.config().max_message_bytes;
    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| session::run(socket, state.hub))
}
