/// WebSocket connection implementation for TerminalConnection trait
use std::fmt::Debug;
use tracing::{debug, trace};

use axum::extract::ws::Message::{Binary, Close, Ping, Pong, Text};
use axum::extract::ws::WebSocket;

use crate::protocol::{
    ClientMessage, ConnectionError, ConnectionResult, ConnectionType, ServerMessage,
    TerminalConnection,
};

/// WebSocket connection implementation that implements TerminalConnection trait
pub struct WebSocketConnection {
    socket: WebSocket,
    id: String,
}

impl WebSocketConnection {
    pub fn new(socket: WebSocket, id: String) -> Self {
        Self { socket, id }
    }
}

impl Debug for WebSocketConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketConnection")
            .field("id", &self.id)
            .finish()
    }
}

#[async_trait::async_trait]
impl TerminalConnection for WebSocketConnection {
    async fn send(&mut self, message: ServerMessage) -> ConnectionResult<()> {
        let frame = match message {
            ServerMessage::Data(bytes) => {
                trace!("Sending {} bytes of output to {}", bytes.len(), self.id);
                Binary(bytes)
            }
            other => Text(
                other
                    .to_json()
                    .map_err(|e| ConnectionError::Serialization(e.to_string()))?,
            ),
        };

        self.socket
            .send(frame)
            .await
            .map_err(|_| ConnectionError::ConnectionClosed)
    }

    async fn receive(&mut self) -> Option<ConnectionResult<ClientMessage>> {
        loop {
            match self.socket.recv().await {
                Some(Ok(Text(text))) => {
                    trace!("WebSocket received text message: {:?}", text);
                    return Some(
                        ClientMessage::from_json(&text)
                            .map_err(|e| ConnectionError::Deserialization(e.to_string())),
                    );
                }
                Some(Ok(Binary(bin))) => {
                    trace!("WebSocket received binary message, length: {}", bin.len());
                    return Some(Ok(ClientMessage::Data(bin)));
                }
                // Pings are answered by axum itself
                Some(Ok(Ping(_))) | Some(Ok(Pong(_))) => continue,
                Some(Ok(Close(_))) => {
                    debug!("WebSocket {} received close frame", self.id);
                    return None;
                }
                Some(Err(e)) => {
                    debug!("WebSocket {} receive error: {}", self.id, e);
                    return Some(Err(ConnectionError::WebSocket(e.to_string())));
                }
                None => return None,
            }
        }
    }

    async fn close(&mut self) -> ConnectionResult<()> {
        // Fails when the peer is already gone
        self.socket
            .send(Close(None))
            .await
            .map_err(|_| ConnectionError::ConnectionClosed)
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn connection_type(&self) -> ConnectionType {
        ConnectionType::WebSocket
    }
}
