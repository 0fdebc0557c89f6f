/// PTY manager for spawning and reaping PTY instances
use std::sync::Arc;

use tracing::{error, info};

use crate::config::ShellConfig;
use crate::pty::{AsyncPty, PtyConfig, PtyError, PtyFactory, PtyHandle};

/// PTY manager responsible for turning the shell configuration into PTY processes
pub struct PtyManager {
    factory: Arc<dyn PtyFactory>,
    shell: ShellConfig,
    output_capacity: usize,
}

impl PtyManager {
    /// Create a new PTY manager
    pub fn new(factory: Arc<dyn PtyFactory>, shell: ShellConfig, output_capacity: usize) -> Self {
        info!(
            "PTY manager using backend {} with shell {:?}",
            factory.name(),
            shell.command
        );
        Self {
            factory,
            shell,
            output_capacity,
        }
    }

    /// Build the spawn configuration for a terminal of the given size
    pub fn pty_config(&self, cols: u16, rows: u16) -> PtyConfig {
        let mut env = vec![
            ("TERM".to_string(), self.shell.term.clone()),
            ("COLORTERM".to_string(), "truecolor".to_string()),
        ];
        for (key, value) in &self.shell.environment {
            match env.iter().position(|(k, _)| k == key) {
                Some(index) => env[index] = (key.clone(), value.clone()),
                None => env.push((key.clone(), value.clone())),
            }
        }

        PtyConfig {
            command: self.shell.command.clone(),
            args: self.shell.args.clone(),
            cols,
            rows,
            env,
            cwd: self.shell.working_directory.clone(),
            output_capacity: self.output_capacity,
        }
    }

    /// Spawn the configured shell on a new PTY
    pub async fn spawn(&self, cols: u16, rows: u16) -> Result<PtyHandle, PtyError> {
        match self.factory.create(&self.pty_config(cols, rows)).await {
            Ok(handle) => {
                info!(
                    "Created new PTY instance (pid {:?}, {}x{})",
                    handle.process.pid(),
                    cols,
                    rows
                );
                Ok(handle)
            }
            Err(e) => {
                error!("Failed to create PTY: {}", e);
                Err(e)
            }
        }
    }

    /// Terminate and reap a PTY. Failures are logged, never propagated.
    pub async fn terminate(&self, pty: &Arc<dyn AsyncPty>) {
        match pty.terminate().await {
            Ok(()) => info!(
                "PTY {:?} terminated (exit code {:?})",
                pty.pid(),
                pty.exit_code()
            ),
            Err(e) => error!("Failed to terminate PTY {:?}: {}", pty.pid(), e),
        }
    }

    pub fn backend(&self) -> &'static str {
        self.factory.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pty::MemoryPtyFactory;
    use std::collections::HashMap;

    #[test]
    fn test_pty_config_merges_environment() {
        let shell = ShellConfig {
            command: "/bin/sh".to_string(),
            environment: HashMap::from([
                ("TERM".to_string(), "vt100".to_string()),
                ("LANG".to_string(), "C.UTF-8".to_string()),
            ]),
            ..ShellConfig::default()
        };
        let manager = PtyManager::new(Arc::new(MemoryPtyFactory::new()), shell, 8);
        let config = manager.pty_config(100, 30);

        assert_eq!(config.command, "/bin/sh");
        assert_eq!((config.cols, config.rows), (100, 30));
        assert_eq!(config.output_capacity, 8);
        let term: Vec<_> = config.env.iter().filter(|(k, _)| k == "TERM").collect();
        assert_eq!(term, vec![&("TERM".to_string(), "vt100".to_string())]);
        assert!(config.env.contains(&("LANG".to_string(), "C.UTF-8".to_string())));
    }
}
