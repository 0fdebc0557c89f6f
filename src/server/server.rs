/// Server implementation for rs_tty
use axum::{
    Router,
    http::Method,
    routing::{get, post},
};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::{error, info, warn};

use crate::{app_state::AppState, config::ServerConfig, handlers};

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    BindFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Io(#[from] std::io::Error),
}

/// Build the application router with routes
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    let router = Router::new()
        // WebSocket endpoints: handshake by first message, or resume by id
        .route("/ws", get(handlers::websocket::websocket_handler))
        .route(
            "/ws/:session_id",
            get(handlers::websocket::websocket_handler_with_id),
        )
        .nest("/api", api_routes());

    let router = match &state.config.static_dir {
        Some(dir) => {
            info!("Serving static files from {}", dir.display());
            router.fallback_service(ServeDir::new(dir))
        }
        None => router.route("/", get(|| async { "rs_tty" })),
    };

    router.layer(cors).with_state(state)
}

/// Build API routes for session management
fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(handlers::rest::health_check))
        .route("/login", post(handlers::rest::login))
        .route(
            "/sessions",
            get(handlers::rest::get_all_sessions).post(handlers::rest::create_session),
        )
        .route(
            "/sessions/:session_id",
            get(handlers::rest::get_session).delete(handlers::rest::terminate_session),
        )
        .route(
            "/sessions/:session_id/resize",
            post(handlers::rest::resize_session),
        )
}

/// Bind the configured listen address
pub async fn bind(config: &ServerConfig) -> Result<TcpListener, ServerError> {
    let addr = if config.host.contains(':') && !config.host.starts_with('[') {
        format!("[{}]:{}", config.host, config.port)
    } else {
        format!("{}:{}", config.host, config.port)
    };

    TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::BindFailed { addr, source })
}

/// Serve on `listener` until `state.shutdown` is cancelled, then destroy
/// every session within the configured shutdown timeout
pub async fn serve(listener: TcpListener, state: AppState) -> Result<(), ServerError> {
    let local_addr = listener.local_addr()?;
    info!("Server running on http://{}", local_addr);
    info!("WebSocket endpoint available at ws://{}/ws", local_addr);

    let sweeper = state.registry.start_sweeper(
        state.config.session.sweep_interval(),
        state.shutdown.clone(),
    );

    let shutdown = state.shutdown.clone();
    let registry = state.registry.clone();
    let timeout = state.config.shutdown_timeout();
    let graceful_shutdown = async move {
        shutdown.cancelled().await;
        info!("Shutting down, closing all sessions...");
        match tokio::time::timeout(timeout, registry.shutdown_all()).await {
            Ok(count) => info!("Closed {} session(s)", count),
            Err(_) => warn!("Sessions still closing after {:?}, giving up", timeout),
        }
    };

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(graceful_shutdown)
        .await?;

    if let Err(e) = sweeper.await {
        warn!("Session sweeper ended abnormally: {}", e);
    }
    info!("Server shutdown complete");
    Ok(())
}

/// Run the HTTP server with graceful shutdown on SIGINT/SIGTERM
pub async fn run_server_with_graceful_shutdown(state: AppState) -> Result<(), ServerError> {
    let listener = bind(&state.config).await?;

    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.cancel();
    });

    serve(listener, state).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C signal, initiating graceful shutdown..."),
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received SIGTERM signal, initiating graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
