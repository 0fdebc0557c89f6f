/// In-process connection backed by a pair of bounded channels.
///
/// The server side implements `TerminalConnection`; the peer side plays the
/// client. Dropping the peer looks like an abrupt disconnect.
use std::fmt::Debug;

use tokio::sync::mpsc;

use crate::protocol::{
    ClientMessage, ConnectionError, ConnectionResult, ConnectionType, ServerMessage,
    TerminalConnection,
};

pub struct ChannelConnection {
    id: String,
    inbound: mpsc::Receiver<ClientMessage>,
    outbound: mpsc::Sender<ServerMessage>,
}

/// Client half of a channel connection
pub struct ChannelPeer {
    pub to_server: mpsc::Sender<ClientMessage>,
    pub from_server: mpsc::Receiver<ServerMessage>,
}

/// Create a connected pair; `capacity` bounds each direction
pub fn channel_connection(id: impl Into<String>, capacity: usize) -> (ChannelConnection, ChannelPeer) {
    let (to_server, inbound) = mpsc::channel(capacity.max(1));
    let (outbound, from_server) = mpsc::channel(capacity.max(1));
    (
        ChannelConnection {
            id: id.into(),
            inbound,
            outbound,
        },
        ChannelPeer {
            to_server,
            from_server,
        },
    )
}

impl Debug for ChannelConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelConnection")
            .field("id", &self.id)
            .finish()
    }
}

#[async_trait::async_trait]
impl TerminalConnection for ChannelConnection {
    async fn send(&mut self, message: ServerMessage) -> ConnectionResult<()> {
        self.outbound
            .send(message)
            .await
            .map_err(|_| ConnectionError::ConnectionClosed)
    }

    async fn receive(&mut self) -> Option<ConnectionResult<ClientMessage>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self) -> ConnectionResult<()> {
        self.inbound.close();
        Ok(())
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn connection_type(&self) -> ConnectionType {
        ConnectionType::Channel
    }
}
