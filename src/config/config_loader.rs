/// Configuration file loader for rs_tty
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::{ConfigError, ServerConfig};

/// Environment variable naming the configuration file
pub const CONFIG_PATH_ENV: &str = "TTY_CONFIG";

/// Configuration loader responsible for loading, overriding and validating configuration
pub struct ConfigLoader;

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self
    }

    /// Load the configuration the way the binary does: `.env`, the file named by
    /// `TTY_CONFIG` (or `./config.toml` when present), then environment overrides.
    pub fn load_from_env(&self) -> Result<ServerConfig, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!("Loaded environment from {:?}", path);
        }

        let explicit = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
        let mut config = self.load_config(explicit.as_deref())?;
        apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
        validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a file, falling back to defaults when no file is used.
    ///
    /// An explicitly given path must exist; the default path is optional.
    pub fn load_config(&self, config_path: Option<&Path>) -> Result<ServerConfig, ConfigError> {
        match config_path {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::FileNotFound(path.display().to_string()));
                }
                self.load_config_from_file(path)
            }
            None => match default_config_path() {
                Some(path) if path.exists() => {
                    info!("Using default configuration file path: {:?}", path);
                    self.load_config_from_file(&path)
                }
                _ => {
                    info!("No configuration file found, using built-in defaults");
                    Ok(ServerConfig::default())
                }
            },
        }
    }

    /// Load configuration from a specific file path
    fn load_config_from_file(&self, path: &Path) -> Result<ServerConfig, ConfigError> {
        info!("Loading configuration from file: {:?}", path);
        let contents = fs::read_to_string(path)?;
        self.parse_config(&contents)
    }

    /// Parse configuration from string content
    pub fn parse_config(&self, content: &str) -> Result<ServerConfig, ConfigError> {
        let config = toml::from_str::<ServerConfig>(content)?;
        info!("Configuration parsed successfully");
        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Default configuration path
pub fn default_config_path() -> Option<PathBuf> {
    std::env::current_dir().ok().map(|dir| dir.join("config.toml"))
}

/// Apply environment overrides on top of file/default values.
///
/// `TTYUSER`/`TTYPASSWORD` only take effect as a pair.
pub fn apply_env_overrides<F>(config: &mut ServerConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = lookup("TTY_HOST") {
        config.host = host;
    }

    for key in ["TTYPORT", "PORT"] {
        if let Some(value) = lookup(key) {
            config.port = value
                .trim()
                .parse()
                .map_err(|e| ConfigError::invalid(key, format!("{value:?}: {e}")))?;
            break;
        }
    }

    if let Some(shell) = lookup("TTYSHELL") {
        config.shell.command = shell;
    }

    if let (Some(user), Some(password)) = (lookup("TTYUSER"), lookup("TTYPASSWORD")) {
        if !user.is_empty() && !password.is_empty() {
            config.users.insert(user, password);
        }
    }

    if let Some(value) = lookup("TTY_GRACE_PERIOD_SECS") {
        config.session.grace_period_secs = value
            .trim()
            .parse()
            .map_err(|e| ConfigError::invalid("TTY_GRACE_PERIOD_SECS", format!("{value:?}: {e}")))?;
    }

    if let Some(secret) = lookup("TTY_TOKEN_SECRET") {
        config.auth.token_secret = Some(secret);
    }

    if let Some(dir) = lookup("TTY_STATIC_DIR") {
        config.static_dir = Some(PathBuf::from(dir));
    }

    Ok(())
}

/// Reject configurations the server cannot start with
pub fn validate(config: &ServerConfig) -> Result<(), ConfigError> {
    if config.shell.command.trim().is_empty() {
        return Err(ConfigError::invalid("shell.command", "must not be empty"));
    }
    if which::which(&config.shell.command).is_err() {
        return Err(ConfigError::ShellNotFound(config.shell.command.clone()));
    }

    let session = &config.session;
    if session.grace_period_secs == 0 {
        return Err(ConfigError::invalid("session.grace_period_secs", "must be positive"));
    }
    if session.sweep_interval_secs == 0 {
        return Err(ConfigError::invalid("session.sweep_interval_secs", "must be positive"));
    }
    if session.limit_global == 0 || session.limit_per_user == 0 {
        return Err(ConfigError::invalid("session.limit_*", "limits must be positive"));
    }
    if session.output_buffer_chunks == 0 {
        return Err(ConfigError::invalid("session.output_buffer_chunks", "must be positive"));
    }
    if session.default_cols == 0 || session.default_rows == 0 {
        return Err(ConfigError::invalid("session.default_*", "terminal size must be positive"));
    }

    if config.auth.token_ttl_secs == 0 {
        return Err(ConfigError::invalid("auth.token_ttl_secs", "must be positive"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_file_is_empty() {
        let config = ConfigLoader::new().parse_config("").unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.shell.command, "bash");
        assert!(config.users.is_empty());
        assert!(!config.auth_enabled());
        assert_eq!(config.session.grace_period_secs, 60);
    }

    #[test]
    fn test_parse_full_file() {
        let content = r#"
            port = 9000
            static_dir = "/srv/tty"

            [shell]
            command = "/bin/sh"
            args = ["-l"]

            [users]
            alice = "s3cret"

            [session]
            grace_period_secs = 5
            limit_per_user = 2

            [log]
            format = "json"
        "#;
        let config = ConfigLoader::new().parse_config(content).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.shell.command, "/bin/sh");
        assert_eq!(config.shell.args, vec!["-l".to_string()]);
        assert_eq!(config.users.get("alice").map(String::as_str), Some("s3cret"));
        assert_eq!(config.session.grace_period_secs, 5);
        assert_eq!(config.session.limit_per_user, 2);
        assert_eq!(config.session.default_cols, 80);
        assert_eq!(config.log.format, crate::config::LogFormat::Json);
        assert!(config.auth_enabled());
    }

    #[test]
    fn test_parse_error_is_reported() {
        let result = ConfigLoader::new().parse_config("port = \"not a number\"");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = 7000").unwrap();
        let config = ConfigLoader::new().load_config(Some(file.path())).unwrap();
        assert_eq!(config.port, 7000);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = ConfigLoader::new().load_config(Some(&dir.path().join("missing.toml")));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_env_credentials_require_both_values() {
        let mut config = ServerConfig::default();
        apply_env_overrides(&mut config, env(&[("TTYUSER", "alice")])).unwrap();
        assert!(config.users.is_empty());

        apply_env_overrides(
            &mut config,
            env(&[("TTYUSER", "alice"), ("TTYPASSWORD", "s3cret")]),
        )
        .unwrap();
        assert_eq!(config.users.get("alice").map(String::as_str), Some("s3cret"));
    }

    #[test]
    fn test_ttyport_wins_over_port() {
        let mut config = ServerConfig::default();
        apply_env_overrides(&mut config, env(&[("TTYPORT", "9000"), ("PORT", "9100")])).unwrap();
        assert_eq!(config.port, 9000);

        let mut config = ServerConfig::default();
        apply_env_overrides(&mut config, env(&[("PORT", "9100")])).unwrap();
        assert_eq!(config.port, 9100);
    }

    #[test]
    fn test_invalid_port_is_rejected() {
        let mut config = ServerConfig::default();
        let result = apply_env_overrides(&mut config, env(&[("PORT", "http")]));
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_validate_rejects_unknown_shell() {
        let mut config = ServerConfig::default();
        config.shell.command = "/nonexistent/definitely-not-a-shell".to_string();
        assert!(matches!(validate(&config), Err(ConfigError::ShellNotFound(_))));
    }

    #[test]
    fn test_validate_rejects_zero_grace_period() {
        let mut config = ServerConfig::default();
        config.shell.command = "/bin/sh".to_string();
        config.session.grace_period_secs = 0;
        assert!(matches!(validate(&config), Err(ConfigError::InvalidValue { .. })));

        config.session.grace_period_secs = 60;
        assert!(validate(&config).is_ok());
    }
}
