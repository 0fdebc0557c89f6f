/// Error types for the service layer
use thiserror::Error;

use crate::protocol::ErrorCode;
use crate::pty::PtyError;

/// Service layer error type
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Unknown, destroyed, expired or foreign session id
    #[error("Session not found: {0}")]
    NotFound(String),

    /// The shell could not be started; fatal to this session only
    #[error("Failed to start shell: {0}")]
    SpawnFailed(String),

    /// Global or per-user session limit reached
    #[error("Session limit reached: {0}")]
    SessionLimit(String),

    /// PTY error
    #[error("PTY error: {0}")]
    Pty(PtyError),
}

impl From<PtyError> for ServiceError {
    fn from(error: PtyError) -> Self {
        match error {
            PtyError::SpawnFailed(reason) => ServiceError::SpawnFailed(reason),
            other => ServiceError::Pty(other),
        }
    }
}

impl ServiceError {
    /// Code reported to clients
    pub fn code(&self) -> ErrorCode {
        match self {
            ServiceError::NotFound(_) => ErrorCode::NotFound,
            ServiceError::SpawnFailed(_) => ErrorCode::SpawnFailed,
            ServiceError::SessionLimit(_) => ErrorCode::SessionLimit,
            ServiceError::Pty(_) => ErrorCode::Internal,
        }
    }
}
