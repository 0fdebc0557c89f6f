/// Configuration data structures for rs_tty
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration, loaded once at startup and never mutated afterwards
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the HTTP/WebSocket listener to
    pub host: String,

    /// TCP port to bind
    pub port: u16,

    /// Shell spawned for every new session
    pub shell: ShellConfig,

    /// Username -> secret. Empty means authentication is disabled (open access).
    pub users: HashMap<String, String>,

    /// Session lifecycle and limits
    pub session: SessionConfig,

    /// Token issuing
    pub auth: AuthConfig,

    /// Directory with the browser terminal UI, served as the router fallback
    pub static_dir: Option<PathBuf>,

    /// How long shutdown waits for sessions to be torn down
    pub shutdown_timeout_secs: u64,

    /// Logging output
    pub log: LogConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            shell: ShellConfig::default(),
            users: HashMap::new(),
            session: SessionConfig::default(),
            auth: AuthConfig::default(),
            static_dir: None,
            shutdown_timeout_secs: 10,
            log: LogConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Whether any credentials are configured
    pub fn auth_enabled(&self) -> bool {
        !self.users.is_empty()
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Shell configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ShellConfig {
    /// Interpreter to execute, a path or a name resolved on PATH
    pub command: String,

    /// Extra arguments passed to the shell
    pub args: Vec<String>,

    /// Working directory (defaults to the server's cwd)
    pub working_directory: Option<PathBuf>,

    /// Extra environment variables
    pub environment: HashMap<String, String>,

    /// Value exported as TERM
    pub term: String,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            command: "bash".to_string(),
            args: Vec::new(),
            working_directory: None,
            environment: HashMap::new(),
            term: "xterm-256color".to_string(),
        }
    }
}

/// Session lifecycle configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct SessionConfig {
    /// How long a detached session waits for reattachment
    pub grace_period_secs: u64,

    /// How often the background sweep runs
    pub sweep_interval_secs: u64,

    /// How long a fresh connection may take to send `create` or `attach`
    pub handshake_timeout_secs: u64,

    pub default_cols: u16,
    pub default_rows: u16,

    /// Maximum number of live sessions
    pub limit_global: usize,

    /// Maximum number of live sessions per authenticated user
    pub limit_per_user: usize,

    /// Capacity (in chunks) of the PTY output queue of each session
    pub output_buffer_chunks: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: 60,
            sweep_interval_secs: 5,
            handshake_timeout_secs: 30,
            default_cols: 80,
            default_rows: 24,
            limit_global: 10_000,
            limit_per_user: 1_000,
            output_buffer_chunks: 64,
        }
    }
}

impl SessionConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

/// Token configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC key for tokens. A random key is generated when unset, which
    /// invalidates outstanding tokens on restart.
    pub token_secret: Option<String>,

    /// Token lifetime in seconds
    pub token_ttl_secs: u64,

    /// Cookie carrying the token
    pub cookie_name: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_secret: None,
            token_ttl_secs: 24 * 60 * 60,
            cookie_name: "tty_token".to_string(),
        }
    }
}

/// Log output format
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive, overridden by RUST_LOG
    pub level: String,

    pub format: LogFormat,

    /// When set, logs are also written to a daily rolling file in this directory
    pub directory: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            directory: None,
        }
    }
}
