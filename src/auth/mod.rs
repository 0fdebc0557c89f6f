/// Authentication for rs_tty: credential store, token signing and the gate
/// every connection passes before it can reach a session
mod credentials;
mod error;
mod gate;
mod token;

pub use credentials::CredentialStore;
pub use error::AuthError;
pub use gate::{AuthGate, PresentedCredentials, Principal};
pub use token::{IssuedToken, TokenSigner};
