/// Connection handler: handshake, bridge and teardown for one terminal connection
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::app_state::{AppState, SessionId};
use crate::auth::Principal;
use crate::protocol::{
    ClientMessage, ConnectionError, ConnectionResult, ErrorCode, ServerMessage, TerminalConnection,
};
use crate::service::{Attached, BridgeEnd, ServiceError, run_bridge};

/// Bound on the `exit` message and close once the bridge has stopped
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle a terminal connection from handshake to close.
///
/// With `resume` set the connection attaches straight to that session;
/// otherwise the first message must be `create` or `attach`.
pub async fn handle_terminal_connection(
    mut connection: impl TerminalConnection,
    principal: Principal,
    resume: Option<SessionId>,
    state: AppState,
) {
    let conn_id = connection.id().to_string();
    info!(
        "New terminal connection: {} (Type: {:?}, user: {:?})",
        conn_id,
        connection.connection_type(),
        principal.username()
    );

    let attached = match resume {
        Some(id) => state
            .registry
            .attach(&id, &conn_id, &principal)
            .await
            .map(Some),
        None => handshake(&mut connection, &principal, &state).await,
    };

    let (session, cancel) = match attached {
        Ok(Some(attached)) => attached,
        Ok(None) => {
            debug!("Connection {} left before choosing a session", conn_id);
            close(&mut connection).await;
            return;
        }
        Err(e) => {
            warn!("Connection {} could not get a session: {}", conn_id, e);
            let _ = connection
                .send(ServerMessage::error(e.code(), e.to_string()))
                .await;
            close(&mut connection).await;
            return;
        }
    };
    let session_id = session.id().to_string();

    if let Err(e) = connection
        .send(ServerMessage::SessionId(session_id.clone()))
        .await
    {
        debug!("Connection {} went away before the session id: {}", conn_id, e);
        state.registry.detach(&session_id, &conn_id).await;
        return;
    }

    let end = run_bridge(&mut connection, &session, &cancel).await;
    drop(cancel);

    match end {
        BridgeEnd::TransportClosed => {
            state.registry.detach(&session_id, &conn_id).await;
        }
        BridgeEnd::ClientDisconnected | BridgeEnd::PtyExited => {
            state.registry.destroy(&session_id).await;
        }
        BridgeEnd::Replaced | BridgeEnd::SessionDestroyed => {}
    }

    // A replaced client may have stopped reading; don't wait on it forever
    let farewell = async {
        if matches!(
            end,
            BridgeEnd::ClientDisconnected | BridgeEnd::PtyExited | BridgeEnd::SessionDestroyed
        ) {
            let _ = connection
                .send(ServerMessage::Exit {
                    code: session.exit_code(),
                })
                .await;
        }
        close(&mut connection).await;
    };
    if timeout(TEARDOWN_TIMEOUT, farewell).await.is_err() {
        debug!("Connection {} did not take its close in time", conn_id);
    }

    info!(
        "Terminal connection {} finished ({:?}, session {})",
        conn_id, end, session_id
    );
}

/// Wait for the first `create` or `attach`. `Ok(None)` means the client left
/// or the handshake timed out.
async fn handshake<C: TerminalConnection>(
    connection: &mut C,
    principal: &Principal,
    state: &AppState,
) -> Result<Option<Attached>, ServiceError> {
    let conn_id = connection.id().to_string();
    let deadline = tokio::time::sleep(state.config.session.handshake_timeout());
    tokio::pin!(deadline);

    loop {
        let message = tokio::select! {
            _ = state.shutdown.cancelled() => return Ok(None),
            _ = &mut deadline => {
                info!("Connection {} did not pick a session in time", conn_id);
                return Ok(None);
            }
            message = connection.receive() => message,
        };

        match message {
            Some(Ok(ClientMessage::Create { cols, rows })) => {
                let (default_cols, default_rows) = state.default_size();
                let cols = cols.filter(|&c| c > 0).unwrap_or(default_cols);
                let rows = rows.filter(|&r| r > 0).unwrap_or(default_rows);
                let session = state
                    .registry
                    .create(principal.username(), cols, rows)
                    .await?;
                return state
                    .registry
                    .attach(session.id(), &conn_id, principal)
                    .await
                    .map(Some);
            }
            Some(Ok(ClientMessage::Attach { session_id })) => {
                return state
                    .registry
                    .attach(&session_id, &conn_id, principal)
                    .await
                    .map(Some);
            }
            Some(Ok(ClientMessage::Disconnect)) | None => return Ok(None),
            Some(Ok(other)) => {
                debug!("Connection {} sent {:?} before a session", conn_id, other);
                if reject(connection, "send create or attach first").await.is_err() {
                    return Ok(None);
                }
            }
            Some(Err(ConnectionError::Deserialization(e))) => {
                if reject(connection, &format!("malformed message: {}", e)).await.is_err() {
                    return Ok(None);
                }
            }
            Some(Err(e)) => {
                debug!("Transport error on {} during handshake: {}", conn_id, e);
                return Ok(None);
            }
        }
    }
}

async fn reject<C: TerminalConnection>(connection: &mut C, message: &str) -> ConnectionResult<()> {
    connection
        .send(ServerMessage::error(ErrorCode::BadRequest, message))
        .await
}

async fn close<C: TerminalConnection>(connection: &mut C) {
    if let Err(e) = connection.close().await {
        if !e.is_closed() {
            error!("Failed to close connection {}: {}", connection.id(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_state::SessionStatus;
    use crate::config::ServerConfig;
    use crate::protocol::{ChannelPeer, channel_connection};
    use crate::pty::MemoryPtyFactory;
    use std::sync::Arc;
    use tokio::task::JoinHandle;

    fn state(factory: &MemoryPtyFactory) -> AppState {
        AppState::with_pty_factory(ServerConfig::default(), Arc::new(factory.clone()))
    }

    fn connect(state: &AppState, conn_id: &str, resume: Option<&str>) -> (ChannelPeer, JoinHandle<()>) {
        let (conn, peer) = channel_connection(conn_id, 8);
        let handle = tokio::spawn(handle_terminal_connection(
            conn,
            Principal::Anonymous,
            resume.map(str::to_string),
            state.clone(),
        ));
        (peer, handle)
    }

    async fn expect_session_id(peer: &mut ChannelPeer) -> String {
        match peer.from_server.recv().await {
            Some(ServerMessage::SessionId(id)) => id,
            other => panic!("expected session id, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_create_then_detach_on_transport_close() {
        let factory = MemoryPtyFactory::new();
        let state = state(&factory);
        let (mut peer, handle) = connect(&state, "c1", None);

        peer.to_server
            .send(ClientMessage::Create { cols: Some(100), rows: None })
            .await
            .unwrap();
        let id = expect_session_id(&mut peer).await;

        peer.to_server.send(ClientMessage::Data(b"hi".to_vec())).await.unwrap();
        assert_eq!(peer.from_server.recv().await, Some(ServerMessage::Data(b"hi".to_vec())));

        drop(peer);
        handle.await.unwrap();

        let session = state.registry.get(&id).await.unwrap();
        assert_eq!(session.status(), SessionStatus::Detached);
        assert_eq!(session.size(), (100, 24));
    }

    #[tokio::test]
    async fn test_resume_by_id() {
        let factory = MemoryPtyFactory::new();
        let state = state(&factory);
        let session = state.registry.create(None, 80, 24).await.unwrap();

        let (mut peer, _handle) = connect(&state, "c1", Some(session.id()));
        assert_eq!(expect_session_id(&mut peer).await, session.id());
        assert_eq!(session.status(), SessionStatus::Attached);
    }

    #[tokio::test]
    async fn test_attach_unknown_session_reports_not_found() {
        let factory = MemoryPtyFactory::new();
        let state = state(&factory);
        let (mut peer, handle) = connect(&state, "c1", None);

        peer.to_server
            .send(ClientMessage::Attach { session_id: "nope".to_string() })
            .await
            .unwrap();
        match peer.from_server.recv().await {
            Some(ServerMessage::Error { code, .. }) => assert_eq!(code, ErrorCode::NotFound),
            other => panic!("unexpected {:?}", other),
        }
        handle.await.unwrap();
        assert_eq!(peer.from_server.recv().await, None);
    }

    #[tokio::test]
    async fn test_spawn_failure_reports_error() {
        let factory = MemoryPtyFactory::new();
        factory.set_fail_spawn(true);
        let state = state(&factory);
        let (mut peer, handle) = connect(&state, "c1", None);

        peer.to_server
            .send(ClientMessage::Create { cols: None, rows: None })
            .await
            .unwrap();
        match peer.from_server.recv().await {
            Some(ServerMessage::Error { code, .. }) => assert_eq!(code, ErrorCode::SpawnFailed),
            other => panic!("unexpected {:?}", other),
        }
        handle.await.unwrap();
        assert_eq!(state.registry.count().await, 0);
    }

    #[tokio::test]
    async fn test_input_before_handshake_is_rejected() {
        let factory = MemoryPtyFactory::new();
        let state = state(&factory);
        let (mut peer, _handle) = connect(&state, "c1", None);

        peer.to_server.send(ClientMessage::Data(b"x".to_vec())).await.unwrap();
        match peer.from_server.recv().await {
            Some(ServerMessage::Error { code, .. }) => assert_eq!(code, ErrorCode::BadRequest),
            other => panic!("unexpected {:?}", other),
        }

        peer.to_server
            .send(ClientMessage::Create { cols: None, rows: None })
            .await
            .unwrap();
        expect_session_id(&mut peer).await;
    }

    #[tokio::test]
    async fn test_disconnect_destroys_session() {
        let factory = MemoryPtyFactory::new();
        let state = state(&factory);
        let (mut peer, handle) = connect(&state, "c1", None);

        peer.to_server
            .send(ClientMessage::Create { cols: None, rows: None })
            .await
            .unwrap();
        expect_session_id(&mut peer).await;
        peer.to_server.send(ClientMessage::Disconnect).await.unwrap();

        assert_eq!(
            peer.from_server.recv().await,
            Some(ServerMessage::Exit { code: Some(129) })
        );
        handle.await.unwrap();
        assert_eq!(state.registry.count().await, 0);
    }

    #[tokio::test]
    async fn test_shell_exit_reports_code() {
        let factory = MemoryPtyFactory::new();
        let state = state(&factory);
        let (mut peer, handle) = connect(&state, "c1", None);

        peer.to_server
            .send(ClientMessage::Create { cols: None, rows: None })
            .await
            .unwrap();
        expect_session_id(&mut peer).await;
        factory.spawned()[0].exit(7);

        assert_eq!(
            peer.from_server.recv().await,
            Some(ServerMessage::Exit { code: Some(7) })
        );
        handle.await.unwrap();
        assert_eq!(state.registry.count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_timeout() {
        let factory = MemoryPtyFactory::new();
        let state = state(&factory);
        let (mut peer, handle) = connect(&state, "c1", None);

        handle.await.unwrap();
        assert_eq!(peer.from_server.recv().await, None);
        assert_eq!(state.registry.count().await, 0);
    }
}
