/// Data Transfer Objects (DTOs) for REST API endpoints
use serde::{Deserialize, Serialize};

use crate::protocol::ErrorCode;

/// Request DTO for creating a new terminal session
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct CreateSessionRequest {
    /// Optional terminal columns
    pub cols: Option<u16>,

    /// Optional terminal rows
    pub rows: Option<u16>,
}

/// Request DTO for resizing a terminal session
#[derive(Debug, Deserialize, Serialize)]
pub struct ResizeTerminalRequest {
    pub cols: u16,
    pub rows: u16,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct LoginResponse {
    pub username: String,
    pub token: String,
    /// Unix seconds
    pub expires_at: u64,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub sessions: usize,
    pub auth_enabled: bool,
    pub backend: String,
}

/// Response DTO for terminal resize operation
#[derive(Debug, Deserialize, Serialize)]
pub struct TerminalResizeResponse {
    pub session_id: String,
    pub cols: u16,
    pub rows: u16,
    pub success: bool,
}

/// Response DTO for terminal termination operation
#[derive(Debug, Deserialize, Serialize)]
pub struct TerminalTerminateResponse {
    pub session_id: String,
    pub success: bool,
    pub reason: String,
}

/// Generic error response
#[derive(Debug, Deserialize, Serialize)]
pub struct ErrorResponse {
    /// Stable error code, same values as the WebSocket `error` message
    pub error: ErrorCode,
    pub message: String,
}
