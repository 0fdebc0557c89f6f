/// Server management for rs_tty
mod server;

pub use server::{ServerError, bind, build_router, run_server_with_graceful_shutdown, serve};
