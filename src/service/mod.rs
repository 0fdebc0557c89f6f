/// Service layer for terminal session management
///
/// The registry owns sessions and their lifecycle, the bridge pumps bytes for
/// one attachment, and the connection handler ties a transport to both.
mod bridge;
mod connection_handler;
mod error;
mod pty_manager;
mod session_registry;

pub use bridge::{BridgeEnd, run_bridge};
pub use connection_handler::handle_terminal_connection;
pub use error::ServiceError;
pub use pty_manager::PtyManager;
pub use session_registry::{Attached, SessionPolicy, SessionRegistry};
