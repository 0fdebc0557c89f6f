/// REST API handlers for terminal session management
use axum::{
    extract::{Json, Path, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use tracing::{info, warn};

use crate::{
    api::{
        ApiError,
        dto::{
            CreateSessionRequest, HealthResponse, LoginRequest, LoginResponse,
            ResizeTerminalRequest, TerminalResizeResponse, TerminalTerminateResponse,
        },
    },
    app_state::{AppState, SessionInfo},
    handlers::Authenticated,
};

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        sessions: state.registry.count().await,
        auth_enabled: !state.auth.is_open(),
        backend: state.registry.pty_manager().backend().to_string(),
    })
}

/// Exchange a username and password for a token, returned in the body and as a cookie
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    let issued = state.auth.authenticate(&req.username, &req.password)?;
    info!("Issued token for user {}", req.username);

    let cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Strict; Max-Age={}",
        state.auth.cookie_name(),
        issued.token,
        state.auth.token_ttl_secs()
    );
    let body = Json(LoginResponse {
        username: req.username,
        token: issued.token,
        expires_at: issued.expires_at,
    });

    let mut response = (StatusCode::OK, body).into_response();
    match HeaderValue::from_str(&cookie) {
        Ok(value) => {
            response.headers_mut().insert(header::SET_COOKIE, value);
        }
        Err(e) => warn!("Token cookie not set: {}", e),
    }
    Ok(response)
}

/// Create a new terminal session
pub async fn create_session(
    Authenticated(principal): Authenticated,
    State(state): State<AppState>,
    body: Option<Json<CreateSessionRequest>>,
) -> Result<(StatusCode, Json<SessionInfo>), ApiError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let (default_cols, default_rows) = state.default_size();
    let cols = req.cols.unwrap_or(default_cols);
    let rows = req.rows.unwrap_or(default_rows);
    if cols == 0 || rows == 0 {
        return Err(ApiError::bad_request("terminal size must be non-zero"));
    }

    let session = state
        .registry
        .create(principal.username(), cols, rows)
        .await?;
    info!("Created session {} over REST", session.id());
    Ok((StatusCode::CREATED, Json(session.info())))
}

/// Get the sessions visible to the caller
pub async fn get_all_sessions(
    Authenticated(principal): Authenticated,
    State(state): State<AppState>,
) -> Json<Vec<SessionInfo>> {
    Json(state.registry.list_for(&principal).await)
}

/// Get a specific terminal session by ID
pub async fn get_session(
    Authenticated(principal): Authenticated,
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionInfo>, ApiError> {
    let session = state.registry.get_for(&session_id, &principal).await?;
    Ok(Json(session.info()))
}

/// Resize a terminal session
pub async fn resize_session(
    Authenticated(principal): Authenticated,
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<ResizeTerminalRequest>,
) -> Result<Json<TerminalResizeResponse>, ApiError> {
    if req.cols == 0 || req.rows == 0 {
        return Err(ApiError::bad_request("terminal size must be non-zero"));
    }

    let session = state.registry.get_for(&session_id, &principal).await?;
    session
        .resize(req.cols, req.rows)
        .await
        .map_err(crate::service::ServiceError::from)?;
    info!(
        "Resized session {} to {}x{}",
        session_id, req.cols, req.rows
    );

    Ok(Json(TerminalResizeResponse {
        session_id,
        cols: req.cols,
        rows: req.rows,
        success: true,
    }))
}

/// Terminate a terminal session
pub async fn terminate_session(
    Authenticated(principal): Authenticated,
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<TerminalTerminateResponse>, ApiError> {
    state.registry.get_for(&session_id, &principal).await?;
    let success = state.registry.destroy(&session_id).await;

    Ok(Json(TerminalTerminateResponse {
        session_id,
        success,
        reason: "Session terminated by API request".to_string(),
    }))
}
