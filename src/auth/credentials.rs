/// Immutable username -> secret store
use std::collections::HashMap;
use std::fmt;

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compared against when the username is unknown, so both failure paths do the same work
const DUMMY_SECRET: &str = "rs_tty-unknown-user";

/// Credentials loaded once at startup. Read-only for the process lifetime.
pub struct CredentialStore {
    users: HashMap<String, String>,
    compare_key: [u8; 32],
}

impl CredentialStore {
    pub fn new(users: HashMap<String, String>) -> Self {
        let mut compare_key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut compare_key);
        Self { users, compare_key }
    }

    /// No credentials configured: authentication is disabled
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Whether `(username, secret)` is exactly a configured pair
    pub fn verify(&self, username: &str, secret: &str) -> bool {
        match self.users.get(username) {
            Some(stored) => self.secrets_match(secret, stored),
            None => {
                self.secrets_match(secret, DUMMY_SECRET);
                false
            }
        }
    }

    /// Constant-time comparison of fixed-length keyed digests
    fn secrets_match(&self, provided: &str, stored: &str) -> bool {
        let expected = self.digest(stored).finalize().into_bytes();
        self.digest(provided).verify_slice(&expected).is_ok()
    }

    fn digest(&self, secret: &str) -> HmacSha256 {
        let mut mac = HmacSha256::new_from_slice(&self.compare_key)
            .expect("HMAC accepts keys of any length");
        mac.update(secret.as_bytes());
        mac
    }
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.users.keys().collect();
        names.sort();
        f.debug_struct("CredentialStore")
            .field("users", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> CredentialStore {
        CredentialStore::new(HashMap::from([("alice".to_string(), "s3cret".to_string())]))
    }

    #[test]
    fn test_exact_pair_only() {
        let store = store();
        assert!(store.verify("alice", "s3cret"));
        assert!(!store.verify("alice", "wrong"));
        assert!(!store.verify("alice", "s3cret "));
        assert!(!store.verify("bob", "s3cret"));
        assert!(!store.verify("", ""));
    }

    #[test]
    fn test_debug_hides_secrets() {
        let rendered = format!("{:?}", store());
        assert!(rendered.contains("alice"));
        assert!(!rendered.contains("s3cret"));
    }
}
