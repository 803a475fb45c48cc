use axum::{
    extract::{Query, State, WebSocketUpgrade},
    http::HeaderMap,
    response::Response,
};
use std::collections::HashMap;

use crate::AppState;
use crate::ws;

/// Handshake header carrying the client's self-asserted display name.
pub const DISPLAY_NAME_HEADER: &str = "x-display-name";

/// Share-service WebSocket endpoint. The display name rides in on the
/// `x-display-name` header, falling back to the `name` query parameter for
/// browser clients that cannot set handshake headers. A missing name is an
/// empty name: valid, and deduplicated like any other.
pub async fn websocket_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let raw_name = headers
        .get(DISPLAY_NAME_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| params.get("name").cloned())
        .unwrap_or_default();

    let registry = state.registry.clone();
    let metrics = state.metrics.clone();

    ws.max_message_size(state.config.max_message_bytes())
        .on_upgrade(move |socket| ws::handle_share_ws(socket, registry, metrics, raw_name))
}
