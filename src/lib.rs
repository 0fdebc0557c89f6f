//! rs_tty: terminals in the browser over WebSocket.
//!
//! Each session owns a shell on a pseudo-terminal. Connections attach to a
//! session, and a session survives a dropped connection for a grace period so
//! the client can resume it.

pub mod api;
pub mod app_state;
pub mod auth;
pub mod config;
pub mod handlers;
pub mod protocol;
pub mod pty;
pub mod server;
pub mod service;
