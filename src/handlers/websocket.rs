use axum::{
    extract::Path,
    extract::State,
    extract::ws::{WebSocket, WebSocketUpgrade},
    response::IntoResponse,
};
use uuid::Uuid;

use crate::{
    app_state::{AppState, SessionId},
    auth::Principal,
    handlers::Authenticated,
    protocol::WebSocketConnection,
    service::handle_terminal_connection,
};

/// `/ws`: the client picks a session with its first message
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Authenticated(principal): Authenticated,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, principal, None, state))
}

/// `/ws/:session_id`: attach to (resume) an existing session right away
pub async fn websocket_handler_with_id(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    Authenticated(principal): Authenticated,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, principal, Some(session_id), state))
}

async fn handle_socket(
    socket: WebSocket,
    principal: Principal,
    resume: Option<SessionId>,
    state: AppState,
) {
    let connection = WebSocketConnection::new(socket, Uuid::new_v4().to_string());
    handle_terminal_connection(connection, principal, resume, state).await;
}
