/// Configuration module for rs_tty
mod config;
mod config_loader;
mod error;
mod logging;

pub use config::*;
pub use config_loader::{
    CONFIG_PATH_ENV, ConfigLoader, apply_env_overrides, default_config_path, validate,
};
pub use error::ConfigError;
pub use logging::init_logging;
