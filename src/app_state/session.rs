/// Terminal session implementation
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::pty::{AsyncPty, PtyError, PtyHandle, PtyOutput};

/// Opaque session identifier handed to clients for resumption
pub type SessionId = String;

/// Terminal session state
///
/// `Created -> Attached <-> Detached -> Destroyed`, and `Attached -> Destroyed`
/// on explicit close or shell exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Session has been created but no connection has attached yet
    Created,
    /// A connection is bridged to the PTY
    Attached,
    /// No connection; the grace timer is running
    Detached,
    /// PTY terminated, entry removed from the registry
    Destroyed,
}

/// Serializable snapshot of a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub owner: Option<String>,
    pub status: SessionStatus,
    pub cols: u16,
    pub rows: u16,
    pub pid: Option<u32>,
    pub alive: bool,
    pub created_at: u64,
}

/// The connection currently bridged to a session
#[derive(Debug, Clone)]
struct Attachment {
    connection_id: String,
    cancel: CancellationToken,
}

#[derive(Debug)]
struct SessionState {
    status: SessionStatus,
    attachment: Option<Attachment>,
    /// Start of the current unattached stretch (creation or last detach)
    unattached_since: Option<Instant>,
    cols: u16,
    rows: u16,
}

/// Terminal session: one PTY plus at most one attached connection
pub struct Session {
    id: SessionId,
    owner: Option<String>,
    created_at: u64,
    pty: Arc<dyn AsyncPty>,
    output: tokio::sync::Mutex<PtyOutput>,
    state: Mutex<SessionState>,
    closed: CancellationToken,
}

impl Session {
    /// Wrap a freshly spawned PTY
    pub fn new(id: SessionId, owner: Option<String>, handle: PtyHandle, cols: u16, rows: u16) -> Self {
        let created_at = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        Self {
            id,
            owner,
            created_at,
            pty: handle.process,
            output: tokio::sync::Mutex::new(handle.output),
            state: Mutex::new(SessionState {
                status: SessionStatus::Created,
                attachment: None,
                unattached_since: Some(Instant::now()),
                cols,
                rows,
            }),
            closed: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    pub fn pty(&self) -> &Arc<dyn AsyncPty> {
        &self.pty
    }

    pub fn status(&self) -> SessionStatus {
        self.state().status
    }

    pub fn size(&self) -> (u16, u16) {
        let state = self.state();
        (state.cols, state.rows)
    }

    /// Exit code of the shell, once it has been reaped
    pub fn exit_code(&self) -> Option<u32> {
        self.pty.exit_code()
    }

    /// Cancelled when the session is destroyed
    pub fn closed(&self) -> &CancellationToken {
        &self.closed
    }

    pub fn info(&self) -> SessionInfo {
        let state = self.state();
        SessionInfo {
            id: self.id.clone(),
            owner: self.owner.clone(),
            status: state.status,
            cols: state.cols,
            rows: state.rows,
            pid: self.pty.pid(),
            alive: self.pty.is_alive(),
            created_at: self.created_at,
        }
    }

    /// Write input to the shell
    pub async fn write(&self, data: &[u8]) -> Result<(), PtyError> {
        self.pty.write(data).await
    }

    /// Resize the PTY and record the new size
    pub async fn resize(&self, cols: u16, rows: u16) -> Result<(), PtyError> {
        self.pty.resize(cols, rows).await?;
        let mut state = self.state();
        state.cols = cols;
        state.rows = rows;
        Ok(())
    }

    /// Exclusive access to the output stream. Held by the bridge for as long
    /// as it is attached; chunks not taken stay queued for the next attach.
    pub async fn lock_output(&self) -> tokio::sync::MutexGuard<'_, PtyOutput> {
        self.output.lock().await
    }

    /// Make `connection_id` the attached connection, cancelling the one it replaces.
    /// Returns the token that cancels this attachment, or None once destroyed.
    pub(crate) fn attach(&self, connection_id: &str) -> Option<CancellationToken> {
        let mut state = self.state();
        if state.status == SessionStatus::Destroyed {
            return None;
        }

        if let Some(previous) = state.attachment.take() {
            previous.cancel.cancel();
        }
        let cancel = self.closed.child_token();
        state.attachment = Some(Attachment {
            connection_id: connection_id.to_string(),
            cancel: cancel.clone(),
        });
        state.status = SessionStatus::Attached;
        state.unattached_since = None;
        Some(cancel)
    }

    /// Detach `connection_id` if it is still the attached connection
    pub(crate) fn detach(&self, connection_id: &str) -> bool {
        let mut state = self.state();
        let current = state
            .attachment
            .as_ref()
            .is_some_and(|a| a.connection_id == connection_id);
        if !current || state.status != SessionStatus::Attached {
            return false;
        }

        state.attachment = None;
        state.status = SessionStatus::Detached;
        state.unattached_since = Some(Instant::now());
        true
    }

    /// Flip to Destroyed; true only for the first caller
    pub(crate) fn mark_destroyed(&self) -> bool {
        let mut state = self.state();
        if state.status == SessionStatus::Destroyed {
            return false;
        }
        state.status = SessionStatus::Destroyed;
        state.attachment = None;
        state.unattached_since = None;
        drop(state);
        self.closed.cancel();
        true
    }

    /// Unattached for at least `grace`, or unattached with a dead shell
    pub(crate) fn is_expired(&self, now: Instant, grace: Duration) -> bool {
        let state = self.state();
        match state.unattached_since {
            Some(since) => {
                !self.pty.is_alive() || now.saturating_duration_since(since) >= grace
            }
            None => false,
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("status", &self.status())
            .finish()
    }
}
