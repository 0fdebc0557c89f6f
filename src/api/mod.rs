/// REST API types
pub mod dto;
mod error;

pub use error::{ApiError, BASIC_CHALLENGE};
