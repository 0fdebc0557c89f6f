use crate::pty::pty_trait::{AsyncPty, PtyConfig, PtyError, PtyFactory, PtyHandle, PtyOutput};
use async_trait::async_trait;
use portable_pty::{
    Child, ChildKiller, CommandBuilder, MasterPty, PtyPair, PtySize, native_pty_system,
};
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::spawn_blocking;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Bytes requested per read from the PTY master
const READ_BUFFER_SIZE: usize = 4096;

/// How long `terminate` waits for the child to go after signalling it
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// 基于 portable-pty 库的 PTY 实现
///
/// Output is pumped by a dedicated reader thread into a bounded channel, so a
/// consumer that stops reading eventually stalls the shell instead of growing
/// a buffer. Writes run on the blocking pool one at a time, in call order.
/// A waiter thread owns the child and reaps it as soon as it exits, which may
/// be long before the output ends if a background job keeps the slave open.
pub struct PortablePty {
    master: Mutex<Box<dyn MasterPty + Send>>,
    writer: Arc<Mutex<Option<Box<dyn Write + Send>>>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    pid: Option<u32>,
    size: Mutex<(u16, u16)>,
    terminated: AtomicBool,
    exit_code: Arc<Mutex<Option<u32>>>,
    exited: CancellationToken,
}

impl PortablePty {
    /// Open a PTY pair and exec the configured command on its slave side.
    ///
    /// Blocking; call from the blocking pool.
    pub fn spawn(config: &PtyConfig) -> Result<(Self, PtyOutput), PtyError> {
        info!(
            "PortablePty: Creating PTY with command: {:?}, args: {:?}",
            config.command, config.args
        );

        let pty_system = native_pty_system();
        let PtyPair { master, slave } = pty_system
            .openpty(PtySize {
                rows: config.rows,
                cols: config.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::SpawnFailed(format!("openpty: {e}")))?;

        let mut cmd = CommandBuilder::new(&config.command);
        cmd.args(&config.args);
        for (key, value) in &config.env {
            cmd.env(key, value);
        }
        if let Some(cwd) = &config.cwd {
            cmd.cwd(cwd);
        }

        let child = slave
            .spawn_command(cmd)
            .map_err(|e| PtyError::SpawnFailed(e.to_string()))?;
        // Our copy of the slave must be closed, otherwise reads never see EOF
        drop(slave);

        let pid = child.process_id();
        let killer = child.clone_killer();
        let reader = master
            .try_clone_reader()
            .map_err(|e| PtyError::SpawnFailed(format!("clone reader: {e}")))?;
        let writer = master
            .take_writer()
            .map_err(|e| PtyError::SpawnFailed(format!("take writer: {e}")))?;

        let (data_tx, data_rx) = mpsc::channel(config.output_capacity.max(1));
        spawn_reader(reader, data_tx)?;

        let exit_code = Arc::new(Mutex::new(None));
        let exited = CancellationToken::new();
        spawn_waiter(child, Arc::clone(&exit_code), exited.clone())?;

        info!("PortablePty: spawned process {:?}", pid);

        let pty = Self {
            master: Mutex::new(master),
            writer: Arc::new(Mutex::new(Some(writer))),
            killer: Mutex::new(killer),
            pid,
            size: Mutex::new((config.cols, config.rows)),
            terminated: AtomicBool::new(false),
            exit_code,
            exited,
        };
        Ok((pty, PtyOutput::new(data_rx)))
    }
}

/// Reap the child, record its exit code and cancel `exited`.
fn spawn_waiter(
    mut child: Box<dyn Child + Send + Sync>,
    exit_code: Arc<Mutex<Option<u32>>>,
    exited: CancellationToken,
) -> Result<(), PtyError> {
    std::thread::Builder::new()
        .name("pty-waiter".to_string())
        .spawn(move || {
            match child.wait() {
                Ok(status) => {
                    debug!("PTY child exited with code {}", status.exit_code());
                    *exit_code.lock().unwrap_or_else(PoisonError::into_inner) =
                        Some(status.exit_code());
                }
                Err(e) => debug!("PTY child wait failed: {}", e),
            }
            exited.cancel();
        })?;
    Ok(())
}

/// Pump the PTY master into `data_tx` until EOF or until the receiver is gone.
fn spawn_reader(
    mut reader: Box<dyn Read + Send>,
    data_tx: mpsc::Sender<Vec<u8>>,
) -> Result<(), PtyError> {
    std::thread::Builder::new()
        .name("pty-reader".to_string())
        .spawn(move || {
            let mut buffer = vec![0u8; READ_BUFFER_SIZE];
            loop {
                match reader.read(&mut buffer) {
                    Ok(0) => {
                        debug!("PTY EOF reached, stopping background reader");
                        break;
                    }
                    Ok(n) => {
                        trace!("PTY background reader: read {} bytes", n);
                        if data_tx.blocking_send(buffer[..n].to_vec()).is_err() {
                            debug!("PTY background reader: receiver dropped, stopping");
                            break;
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => {
                        // Linux reports EIO once the slave side is gone
                        debug!("PTY background reader finished: {}", e);
                        break;
                    }
                }
            }
        })?;
    Ok(())
}

#[async_trait]
impl AsyncPty for PortablePty {
    async fn write(&self, data: &[u8]) -> Result<(), PtyError> {
        if self.terminated.load(Ordering::SeqCst) {
            return Err(PtyError::Closed);
        }

        let writer = Arc::clone(&self.writer);
        let data = data.to_vec();
        spawn_blocking(move || {
            let mut guard = writer.lock().unwrap_or_else(PoisonError::into_inner);
            let writer = guard.as_mut().ok_or(PtyError::Closed)?;
            writer.write_all(&data)?;
            writer.flush()?;
            Ok(())
        })
        .await?
    }

    async fn resize(&self, cols: u16, rows: u16) -> Result<(), PtyError> {
        if self.terminated.load(Ordering::SeqCst) {
            return Err(PtyError::InvalidHandle);
        }

        debug!("PortablePty: Resizing PTY to {}x{}", cols, rows);
        let master = self.master.lock().unwrap_or_else(PoisonError::into_inner);
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::ResizeFailed(e.to_string()))?;

        *self.size.lock().unwrap_or_else(PoisonError::into_inner) = (cols, rows);
        Ok(())
    }

    fn size(&self) -> (u16, u16) {
        let master = self.master.lock().unwrap_or_else(PoisonError::into_inner);
        match master.get_size() {
            Ok(size) => (size.cols, size.rows),
            Err(_) => *self.size.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn is_alive(&self) -> bool {
        !self.exited.is_cancelled() && !self.terminated.load(Ordering::SeqCst)
    }

    fn exit_code(&self) -> Option<u32> {
        *self.exit_code.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn exited(&self) -> &CancellationToken {
        &self.exited
    }

    async fn terminate(&self) -> Result<(), PtyError> {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        info!("PortablePty: terminating process {:?}", self.pid);
        if !self.exited.is_cancelled() {
            let kill = self
                .killer
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .kill();
            if let Err(e) = kill {
                debug!("PortablePty: kill failed, process likely gone: {}", e);
            }
        }
        if timeout(REAP_TIMEOUT, self.exited.cancelled()).await.is_err() {
            warn!("PortablePty: process {:?} ignored the hangup signal", self.pid);
        }

        // Killing the child unblocks any pending write before this lock is taken
        let writer = Arc::clone(&self.writer);
        spawn_blocking(move || {
            writer.lock().unwrap_or_else(PoisonError::into_inner).take();
        })
        .await?;

        info!(
            "PortablePty: process {:?} reaped with code {:?}",
            self.pid,
            self.exit_code()
        );
        Ok(())
    }
}

impl Drop for PortablePty {
    fn drop(&mut self) {
        if !self.exited.is_cancelled() {
            let mut killer = self.killer.lock().unwrap_or_else(PoisonError::into_inner);
            if let Err(e) = killer.kill() {
                debug!("PortablePty: kill on drop failed: {}", e);
            }
        }
    }
}

// ================ 工厂实现 ================

/// 基于 portable-pty 的 PTY 工厂
#[derive(Debug, Default, Clone, Copy)]
pub struct PortablePtyFactory;

#[async_trait]
impl PtyFactory for PortablePtyFactory {
    async fn create(&self, config: &PtyConfig) -> Result<PtyHandle, PtyError> {
        // openpty/exec 是阻塞操作
        let config = config.clone();
        let (pty, output) = spawn_blocking(move || PortablePty::spawn(&config)).await??;
        Ok(PtyHandle {
            process: Arc::new(pty),
            output,
        })
    }

    fn name(&self) -> &'static str {
        "portable-pty"
    }
}
