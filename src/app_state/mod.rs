/// Application state management for rs_tty
mod app_state;
mod session;

pub use app_state::AppState;
pub use session::{Session, SessionId, SessionInfo, SessionStatus};
