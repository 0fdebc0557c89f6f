/// Auth Gate: decides whether a connection may reach the session registry
use tracing::{debug, info, warn};

use super::{AuthError, CredentialStore, IssuedToken, TokenSigner};
use crate::config::ServerConfig;

/// Identity a request was authorised as
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// Open access mode, no credentials configured
    Anonymous,
    /// Authenticated user
    User(String),
}

impl Principal {
    pub fn username(&self) -> Option<&str> {
        match self {
            Principal::Anonymous => None,
            Principal::User(name) => Some(name),
        }
    }

    /// Whether this principal may use a session owned by `owner`
    pub fn can_access(&self, owner: Option<&str>) -> bool {
        match (owner, self) {
            (None, _) => true,
            (Some(owner), Principal::User(name)) => owner == name,
            (Some(_), Principal::Anonymous) => false,
        }
    }
}

/// Credentials extracted from a request, in whatever form the client sent them
#[derive(Debug, Default, Clone)]
pub struct PresentedCredentials {
    pub token: Option<String>,
    pub basic: Option<(String, String)>,
}

#[derive(Debug)]
pub struct AuthGate {
    credentials: CredentialStore,
    signer: TokenSigner,
    cookie_name: String,
}

impl AuthGate {
    pub fn new(credentials: CredentialStore, signer: TokenSigner, cookie_name: String) -> Self {
        if credentials.is_empty() {
            warn!("No users configured: authentication is DISABLED, anyone can open a shell");
        } else {
            info!("Authentication enabled for {} user(s)", credentials.len());
        }
        Self {
            credentials,
            signer,
            cookie_name,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        let ttl = std::time::Duration::from_secs(config.auth.token_ttl_secs);
        let signer = match &config.auth.token_secret {
            Some(secret) => TokenSigner::new(secret.as_bytes().to_vec(), ttl),
            None => TokenSigner::random(ttl),
        };
        Self::new(
            CredentialStore::new(config.users.clone()),
            signer,
            config.auth.cookie_name.clone(),
        )
    }

    /// Open access: the credential store is empty.
    ///
    /// This is an explicit, opt-in insecure mode, kept because an empty user
    /// list is how the server is configured to run without login.
    pub fn is_open(&self) -> bool {
        self.credentials.is_empty()
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    pub fn token_ttl_secs(&self) -> u64 {
        self.signer.ttl().as_secs()
    }

    /// Check a username/secret pair and issue a token for it.
    /// Always succeeds in open mode.
    pub fn authenticate(&self, username: &str, secret: &str) -> Result<IssuedToken, AuthError> {
        if self.is_open() {
            return Ok(self.signer.issue(username));
        }
        if self.credentials.verify(username, secret) {
            debug!("User {} authenticated", username);
            Ok(self.signer.issue(username))
        } else {
            info!("Rejected login attempt for user {:?}", username);
            Err(AuthError::InvalidCredentials)
        }
    }

    /// Resolve a previously issued token
    pub fn verify_token(&self, token: &str) -> Result<Principal, AuthError> {
        let username = self.signer.verify(token)?;
        Ok(Principal::User(username))
    }

    /// Authorise a request: token first, then basic credentials
    pub fn authorize(&self, presented: &PresentedCredentials) -> Result<Principal, AuthError> {
        if self.is_open() {
            return Ok(Principal::Anonymous);
        }

        if let Some(token) = &presented.token {
            match self.verify_token(token) {
                Ok(principal) => return Ok(principal),
                Err(e) if presented.basic.is_none() => return Err(e),
                Err(e) => debug!("Token rejected ({}), trying basic credentials", e),
            }
        }

        match &presented.basic {
            Some((username, secret)) => self
                .authenticate(username, secret)
                .map(|_| Principal::User(username.clone())),
            None => Err(AuthError::MissingCredentials),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    fn gate(users: &[(&str, &str)]) -> AuthGate {
        let users: HashMap<String, String> = users
            .iter()
            .map(|(u, s)| (u.to_string(), s.to_string()))
            .collect();
        AuthGate::new(
            CredentialStore::new(users),
            TokenSigner::new(b"k".to_vec(), Duration::from_secs(60)),
            "tty_token".to_string(),
        )
    }

    #[test]
    fn test_open_mode_always_succeeds() {
        let gate = gate(&[]);
        assert!(gate.is_open());
        assert!(gate.authenticate("anyone", "anything").is_ok());
        assert!(gate.authenticate("", "").is_ok());
        assert_eq!(
            gate.authorize(&PresentedCredentials::default()),
            Ok(Principal::Anonymous)
        );
    }

    #[test]
    fn test_wrong_secret_and_unknown_user_look_the_same() {
        let gate = gate(&[("alice", "s3cret")]);
        let wrong = gate.authenticate("alice", "wrong").unwrap_err();
        let unknown = gate.authenticate("mallory", "s3cret").unwrap_err();
        assert_eq!(wrong, AuthError::InvalidCredentials);
        assert_eq!(wrong.to_string(), unknown.to_string());
    }

    #[test]
    fn test_token_from_authenticate_is_accepted() {
        let gate = gate(&[("alice", "s3cret")]);
        let issued = gate.authenticate("alice", "s3cret").unwrap();
        assert_eq!(
            gate.verify_token(&issued.token),
            Ok(Principal::User("alice".to_string()))
        );

        let presented = PresentedCredentials {
            token: Some(issued.token),
            basic: None,
        };
        assert_eq!(
            gate.authorize(&presented),
            Ok(Principal::User("alice".to_string()))
        );
    }

    #[test]
    fn test_authorize_requires_credentials() {
        let gate = gate(&[("alice", "s3cret")]);
        assert_eq!(
            gate.authorize(&PresentedCredentials::default()),
            Err(AuthError::MissingCredentials)
        );

        let bad_token = PresentedCredentials {
            token: Some("nope".to_string()),
            basic: None,
        };
        assert_eq!(gate.authorize(&bad_token), Err(AuthError::InvalidToken));
    }

    #[test]
    fn test_authorize_falls_back_to_basic() {
        let gate = gate(&[("alice", "s3cret")]);
        let presented = PresentedCredentials {
            token: Some("stale".to_string()),
            basic: Some(("alice".to_string(), "s3cret".to_string())),
        };
        assert_eq!(
            gate.authorize(&presented),
            Ok(Principal::User("alice".to_string()))
        );

        let presented = PresentedCredentials {
            token: None,
            basic: Some(("alice".to_string(), "wrong".to_string())),
        };
        assert_eq!(
            gate.authorize(&presented),
            Err(AuthError::InvalidCredentials)
        );
    }

    #[test]
    fn test_session_access_rules() {
        let alice = Principal::User("alice".to_string());
        assert!(alice.can_access(None));
        assert!(alice.can_access(Some("alice")));
        assert!(!alice.can_access(Some("bob")));
        assert!(!Principal::Anonymous.can_access(Some("alice")));
        assert!(Principal::Anonymous.can_access(None));
    }
}
