/// PTY (Pseudo Terminal) handling for rs_tty
/// This module provides a trait abstraction for PTY backends
/// with a focus on pure async operations
mod memory_pty;
mod portable_pty_impl;
mod pty_trait;

// Export all public types and traits
pub use memory_pty::{MemoryPty, MemoryPtyFactory};
pub use portable_pty_impl::{PortablePty, PortablePtyFactory};
pub use pty_trait::*;

use std::sync::Arc;

/// The PTY backend used by the server binary
pub fn default_factory() -> Arc<dyn PtyFactory> {
    Arc::new(PortablePtyFactory)
}
