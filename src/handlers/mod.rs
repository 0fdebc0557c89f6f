/// HTTP and WebSocket handlers
mod auth;
pub mod rest;
pub mod websocket;

pub use auth::Authenticated;
