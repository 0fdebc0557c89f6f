/// Application state shared by every handler
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::auth::AuthGate;
use crate::config::ServerConfig;
use crate::pty::{self, PtyFactory};
use crate::service::{PtyManager, SessionPolicy, SessionRegistry};

/// Application state containing shared data across handlers
#[derive(Clone)]
pub struct AppState {
    /// Live sessions by id
    pub registry: Arc<SessionRegistry>,
    pub auth: Arc<AuthGate>,
    /// Application configuration
    pub config: Arc<ServerConfig>,
    /// Cancelled when the server starts shutting down
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Create the state with the platform PTY backend
    pub fn new(config: ServerConfig) -> Self {
        Self::with_pty_factory(config, pty::default_factory())
    }

    /// Create the state with an explicit PTY backend
    pub fn with_pty_factory(config: ServerConfig, factory: Arc<dyn PtyFactory>) -> Self {
        let pty_manager = PtyManager::new(
            factory,
            config.shell.clone(),
            config.session.output_buffer_chunks,
        );
        let registry = SessionRegistry::new(pty_manager, SessionPolicy::from(&config.session));
        let auth = AuthGate::from_config(&config);

        Self {
            registry: Arc::new(registry),
            auth: Arc::new(auth),
            config: Arc::new(config),
            shutdown: CancellationToken::new(),
        }
    }

    /// Size used when a client does not send one
    pub fn default_size(&self) -> (u16, u16) {
        (
            self.config.session.default_cols,
            self.config.session.default_rows,
        )
    }
}
