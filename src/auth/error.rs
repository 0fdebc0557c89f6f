/// Error types for authentication
use thiserror::Error;

/// Authentication error type
///
/// Every variant is reported to clients identically, so callers can not tell
/// an unknown user from a wrong secret.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Username/secret pair is not in the credential store
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Credentials are required but none were presented
    #[error("Credentials required")]
    MissingCredentials,

    /// Token is malformed or its signature does not match
    #[error("Invalid token")]
    InvalidToken,

    /// Token signature is valid but it has expired
    #[error("Token expired")]
    TokenExpired,
}
