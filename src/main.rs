/// Main entry point for rs_tty
use std::process::ExitCode;

use anyhow::Context;
use tracing::{error, info};

use rs_tty::app_state::AppState;
use rs_tty::config::{ConfigLoader, ServerConfig, init_logging};
use rs_tty::server::run_server_with_graceful_shutdown;

#[tokio::main]
async fn main() -> ExitCode {
    // Logging is configured by the file, so nothing is logged before this
    let config = match ConfigLoader::new().load_from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let _log_guard = init_logging(&config.log);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: ServerConfig) -> anyhow::Result<()> {
    info!(
        "Starting rs_tty {} (shell {:?}, grace period {}s)",
        env!("CARGO_PKG_VERSION"),
        config.shell.command,
        config.session.grace_period_secs
    );

    let state = AppState::new(config);
    run_server_with_graceful_shutdown(state)
        .await
        .context("terminal server stopped with an error")
}
