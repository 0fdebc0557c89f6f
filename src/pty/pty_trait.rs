use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

// ================ 配置与错误类型 ================

#[derive(Debug, Clone)]
pub struct PtyConfig {
    pub command: String,
    pub args: Vec<String>,
    pub cols: u16,
    pub rows: u16,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
    /// Capacity of the output queue, in chunks. A full queue stalls the reader.
    pub output_capacity: usize,
}

#[derive(Debug, Error)]
pub enum PtyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Process spawn failed: {0}")]
    SpawnFailed(String),
    #[error("PTY handle is no longer valid")]
    InvalidHandle,
    #[error("PTY input is closed")]
    Closed,
    #[error("Resize failed: {0}")]
    ResizeFailed(String),
    #[error("Background task error: {0}")]
    BackgroundTask(String),
}

impl From<tokio::task::JoinError> for PtyError {
    fn from(error: tokio::task::JoinError) -> Self {
        PtyError::BackgroundTask(error.to_string())
    }
}

// ================ 输出流 ================

/// Output side of a PTY: a finite sequence of byte chunks in the order the
/// shell produced them. Ends once the process has exited and everything
/// buffered has been read.
#[derive(Debug)]
pub struct PtyOutput {
    rx: mpsc::Receiver<Vec<u8>>,
}

impl PtyOutput {
    pub fn new(rx: mpsc::Receiver<Vec<u8>>) -> Self {
        Self { rx }
    }

    /// Next chunk, or `None` at end of stream. Cancel safe.
    pub async fn read(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }
}

// ================ 核心Trait定义 ================

/// Control and input side of a spawned PTY process
#[async_trait]
pub trait AsyncPty: Send + Sync {
    /// Write input bytes, waiting while the terminal's input buffer is full
    async fn write(&self, data: &[u8]) -> Result<(), PtyError>;

    /// Change the window size
    async fn resize(&self, cols: u16, rows: u16) -> Result<(), PtyError>;

    /// Window size as reported by the terminal
    fn size(&self) -> (u16, u16);

    /// Process ID, if available
    fn pid(&self) -> Option<u32>;

    /// Whether the process is still running
    fn is_alive(&self) -> bool;

    /// Exit code once the process has been reaped
    fn exit_code(&self) -> Option<u32>;

    /// Cancelled once the process has exited, whether or not its output has
    /// ended. Another process may still hold the terminal open.
    fn exited(&self) -> &CancellationToken;

    /// Signal and reap the process. Calling it again is a no-op.
    async fn terminate(&self) -> Result<(), PtyError>;
}

/// A freshly spawned PTY: the process half and its output stream
pub struct PtyHandle {
    pub process: Arc<dyn AsyncPty>,
    pub output: PtyOutput,
}

/// PTY工厂Trait
#[async_trait]
pub trait PtyFactory: Send + Sync {
    /// 创建新的PTY实例
    async fn create(&self, config: &PtyConfig) -> Result<PtyHandle, PtyError>;

    /// 工厂名称
    fn name(&self) -> &'static str;
}
