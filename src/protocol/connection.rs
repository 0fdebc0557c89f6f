/// Terminal connection trait for abstracting different transport protocols
use std::fmt::Debug;

use thiserror::Error;

use super::{ClientMessage, ServerMessage};

/// 连接错误类型
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket 错误
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// 连接已关闭
    #[error("Connection closed")]
    ConnectionClosed,

    /// 消息序列化错误
    #[error("Message serialization error: {0}")]
    Serialization(String),

    /// 消息反序列化错误
    #[error("Message deserialization error: {0}")]
    Deserialization(String),
}

impl ConnectionError {
    /// Whether the error only means the peer went away
    pub fn is_closed(&self) -> bool {
        matches!(self, ConnectionError::ConnectionClosed)
    }
}

/// 连接结果类型
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Terminal connection trait that defines common capabilities for all transport protocols
#[async_trait::async_trait]
pub trait TerminalConnection: Send + Debug {
    /// Send a message. Waits while the transport's outbound buffer is full.
    async fn send(&mut self, message: ServerMessage) -> ConnectionResult<()>;

    /// Receive the next message.
    /// Returns None when the connection is closed. Must be cancel safe.
    async fn receive(&mut self) -> Option<ConnectionResult<ClientMessage>>;

    /// Close the connection
    async fn close(&mut self) -> ConnectionResult<()>;

    /// Get the connection ID
    fn id(&self) -> &str;

    /// Get the connection type
    fn connection_type(&self) -> ConnectionType;
}

/// Connection types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    /// WebSocket connection
    WebSocket,
    /// In-process channel pair
    Channel,
}
