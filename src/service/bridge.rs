/// Transport bridge: pumps bytes between one connection and one session's PTY
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::app_state::Session;
use crate::protocol::{ClientMessage, ConnectionError, ErrorCode, ServerMessage, TerminalConnection};
use crate::pty::{PtyError, PtyOutput};

/// After the shell exits, how long to wait for more output before giving up
/// on a terminal that a background job keeps open
const EXIT_DRAIN_IDLE: Duration = Duration::from_millis(200);

/// Why a bridge stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeEnd {
    /// Transport closed or failed; the session outlives it
    TransportClosed,
    /// Client asked for the session to be closed
    ClientDisconnected,
    /// Another connection attached to the session
    Replaced,
    /// The shell exited or its PTY stopped accepting input
    PtyExited,
    /// The session was destroyed elsewhere
    SessionDestroyed,
}

type PendingWrite = Pin<Box<dyn Future<Output = Result<(), PtyError>> + Send>>;

/// Pump input and output until one side goes away.
///
/// At most one PTY write is in flight; no further input is read until it
/// completes, while output keeps flowing. Output the bridge never takes stays
/// queued in the session for the next attachment. Every send to the client
/// gives way to replacement and destruction, so a stalled client never holds
/// the output past its attachment.
pub async fn run_bridge<C: TerminalConnection>(
    connection: &mut C,
    session: &Session,
    cancel: &CancellationToken,
) -> BridgeEnd {
    let conn_id = connection.id().to_string();
    let session_id = session.id();

    // A replaced bridge may still hold the output for a moment
    let mut output = tokio::select! {
        biased;
        _ = session.closed().cancelled() => return BridgeEnd::SessionDestroyed,
        _ = cancel.cancelled() => return BridgeEnd::Replaced,
        guard = session.lock_output() => guard,
    };
    debug!("Bridge {} <-> session {} running", conn_id, session_id);

    let mut pending: Option<PendingWrite> = None;

    loop {
        tokio::select! {
            biased;

            _ = session.closed().cancelled() => return BridgeEnd::SessionDestroyed,

            _ = cancel.cancelled() => {
                info!("Connection {} replaced on session {}", conn_id, session_id);
                return BridgeEnd::Replaced;
            }

            _ = session.pty().exited().cancelled() => {
                info!("Shell of session {} exited", session_id);
                return drain_after_exit(connection, &mut output, session, cancel).await;
            }

            result = drive(&mut pending), if pending.is_some() => {
                pending = None;
                if let Err(e) = result {
                    debug!("PTY write for session {} failed: {}", session_id, e);
                    return BridgeEnd::PtyExited;
                }
            }

            message = connection.receive(), if pending.is_none() => match message {
                Some(Ok(ClientMessage::Data(data))) => {
                    let pty = Arc::clone(session.pty());
                    pending = Some(Box::pin(async move { pty.write(&data).await }));
                }
                Some(Ok(ClientMessage::Resize { cols, rows })) => {
                    if cols == 0 || rows == 0 {
                        let reply = ServerMessage::error(ErrorCode::BadRequest, "terminal size must be non-zero");
                        if let Err(end) = deliver(connection, reply, session, cancel).await {
                            return end;
                        }
                    } else if let Err(e) = session.resize(cols, rows).await {
                        // A dead PTY also ends the output stream, handled below
                        warn!("Failed to resize session {}: {}", session_id, e);
                    }
                }
                Some(Ok(ClientMessage::Disconnect)) => {
                    info!("Connection {} asked to close session {}", conn_id, session_id);
                    return BridgeEnd::ClientDisconnected;
                }
                Some(Ok(ClientMessage::Create { .. } | ClientMessage::Attach { .. })) => {
                    let reply = ServerMessage::error(ErrorCode::BadRequest, "connection is already attached to a session");
                    if let Err(end) = deliver(connection, reply, session, cancel).await {
                        return end;
                    }
                }
                Some(Err(ConnectionError::Deserialization(e))) => {
                    debug!("Malformed message from {}: {}", conn_id, e);
                    let reply = ServerMessage::error(ErrorCode::BadRequest, format!("malformed message: {}", e));
                    if let Err(end) = deliver(connection, reply, session, cancel).await {
                        return end;
                    }
                }
                Some(Err(e)) => {
                    debug!("Transport error on {}: {}", conn_id, e);
                    return BridgeEnd::TransportClosed;
                }
                None => return BridgeEnd::TransportClosed,
            },

            chunk = output.read() => match chunk {
                Some(data) => {
                    if let Err(end) = deliver(connection, ServerMessage::Data(data), session, cancel).await {
                        return end;
                    }
                }
                None => {
                    info!("Output of session {} ended", session_id);
                    return BridgeEnd::PtyExited;
                }
            },
        }
    }
}

/// Send one message unless the session is destroyed or the connection is
/// replaced first.
async fn deliver<C: TerminalConnection>(
    connection: &mut C,
    message: ServerMessage,
    session: &Session,
    cancel: &CancellationToken,
) -> Result<(), BridgeEnd> {
    tokio::select! {
        biased;
        _ = session.closed().cancelled() => Err(BridgeEnd::SessionDestroyed),
        _ = cancel.cancelled() => Err(BridgeEnd::Replaced),
        result = connection.send(message) => result.map_err(|e| {
            debug!("Send to {} failed: {}", connection.id(), e);
            BridgeEnd::TransportClosed
        }),
    }
}

/// Forward what the shell printed before exiting. Stops at end of output or
/// once the terminal has been idle for `EXIT_DRAIN_IDLE`.
async fn drain_after_exit<C: TerminalConnection>(
    connection: &mut C,
    output: &mut PtyOutput,
    session: &Session,
    cancel: &CancellationToken,
) -> BridgeEnd {
    while let Ok(Some(data)) = timeout(EXIT_DRAIN_IDLE, output.read()).await {
        if let Err(end) = deliver(connection, ServerMessage::Data(data), session, cancel).await {
            return end;
        }
    }
    BridgeEnd::PtyExited
}

async fn drive(pending: &mut Option<PendingWrite>) -> Result<(), PtyError> {
    match pending {
        Some(write) => write.await,
        None => std::future::pending().await,
    }
}
