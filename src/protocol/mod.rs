/// Protocol abstraction for rs_tty
mod channel_connection;
mod connection;
mod messages;
mod websocket_connection;

pub use channel_connection::{ChannelConnection, ChannelPeer, channel_connection};
pub use connection::{ConnectionError, ConnectionResult, ConnectionType, TerminalConnection};
pub use messages::{ClientMessage, ErrorCode, ServerMessage};
pub use websocket_connection::WebSocketConnection;
