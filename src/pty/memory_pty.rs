/// In-memory loopback PTY
///
/// Every byte written is echoed back on the output stream, and all input is
/// recorded. Used to drive sessions without OS processes.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::pty::pty_trait::{AsyncPty, PtyConfig, PtyError, PtyFactory, PtyHandle, PtyOutput};

pub struct MemoryPty {
    output_tx: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    input: Mutex<Vec<u8>>,
    size: Mutex<(u16, u16)>,
    alive: AtomicBool,
    exit_code: Mutex<Option<u32>>,
    exited: CancellationToken,
}

impl MemoryPty {
    pub fn new(config: &PtyConfig) -> (Self, PtyOutput) {
        let (tx, rx) = mpsc::channel(config.output_capacity.max(1));
        let pty = Self {
            output_tx: Mutex::new(Some(tx)),
            input: Mutex::new(Vec::new()),
            size: Mutex::new((config.cols, config.rows)),
            alive: AtomicBool::new(true),
            exit_code: Mutex::new(None),
            exited: CancellationToken::new(),
        };
        (pty, PtyOutput::new(rx))
    }

    /// Everything written so far, in write order
    pub fn input(&self) -> Vec<u8> {
        self.input.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Emit bytes as if the shell printed them
    pub async fn emit(&self, data: &[u8]) -> Result<(), PtyError> {
        let tx = self.sender()?;
        tx.send(data.to_vec()).await.map_err(|_| PtyError::Closed)
    }

    /// Behave like a shell exiting on its own: output ends after what is buffered
    pub fn exit(&self, code: u32) {
        if self.record_exit(code) {
            self.output_tx
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
        }
    }

    /// Behave like a shell that exited while a background job still holds
    /// the terminal: the process is gone but output stays open
    pub fn exit_keeping_output(&self, code: u32) {
        self.record_exit(code);
    }

    fn record_exit(&self, code: u32) -> bool {
        if !self.alive.swap(false, Ordering::SeqCst) {
            return false;
        }
        *self.exit_code.lock().unwrap_or_else(PoisonError::into_inner) = Some(code);
        self.exited.cancel();
        debug!("MemoryPty: exited with code {}", code);
        true
    }

    fn sender(&self) -> Result<mpsc::Sender<Vec<u8>>, PtyError> {
        self.output_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(PtyError::Closed)
    }
}

#[async_trait]
impl AsyncPty for MemoryPty {
    async fn write(&self, data: &[u8]) -> Result<(), PtyError> {
        let tx = self.sender()?;
        self.input
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(data);
        // Waits while the output queue is full, like a tty whose reader stalled
        tx.send(data.to_vec()).await.map_err(|_| PtyError::Closed)
    }

    async fn resize(&self, cols: u16, rows: u16) -> Result<(), PtyError> {
        if !self.is_alive() {
            return Err(PtyError::InvalidHandle);
        }
        *self.size.lock().unwrap_or_else(PoisonError::into_inner) = (cols, rows);
        Ok(())
    }

    fn size(&self) -> (u16, u16) {
        *self.size.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pid(&self) -> Option<u32> {
        None
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn exit_code(&self) -> Option<u32> {
        *self.exit_code.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn exited(&self) -> &CancellationToken {
        &self.exited
    }

    async fn terminate(&self) -> Result<(), PtyError> {
        // SIGHUP convention
        self.exit(129);
        // Closes the output even when the process had already exited
        self.output_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }
}

/// Factory for loopback PTYs. Keeps a handle on every PTY it created.
#[derive(Default, Clone)]
pub struct MemoryPtyFactory {
    spawned: Arc<Mutex<Vec<Arc<MemoryPty>>>>,
    fail_spawn: Arc<AtomicBool>,
}

impl MemoryPtyFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `create` calls fail with `SpawnFailed`
    pub fn set_fail_spawn(&self, fail: bool) {
        self.fail_spawn.store(fail, Ordering::SeqCst);
    }

    /// PTYs created so far, oldest first
    pub fn spawned(&self) -> Vec<Arc<MemoryPty>> {
        self.spawned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl PtyFactory for MemoryPtyFactory {
    async fn create(&self, config: &PtyConfig) -> Result<PtyHandle, PtyError> {
        if self.fail_spawn.load(Ordering::SeqCst) {
            return Err(PtyError::SpawnFailed(format!(
                "cannot exec {}",
                config.command
            )));
        }

        info!("MemoryPty: creating loopback PTY {}x{}", config.cols, config.rows);
        let (pty, output) = MemoryPty::new(config);
        let pty = Arc::new(pty);
        self.spawned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&pty));
        Ok(PtyHandle {
            process: pty,
            output,
        })
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
