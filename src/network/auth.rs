//! Credential Authentication
//!
//! Verifies username/password pairs against SHA-256 digests loaded from a
//! JSON accounts file. The lobby only sees the [`Authenticator`] trait, so a
//! different backend can be injected without touching the dispatcher.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::lobby::session::Username;
use crate::network::protocol::Password;

/// Domain separator mixed into every password digest.
const DIGEST_DOMAIN: &[u8] = b"duel-lobby-credential:";

/// Name of the account available when no accounts file is configured.
pub const DEMO_USERNAME: &str = "marie";

/// Password of the demo account.
pub const DEMO_PASSWORD: &str = "marie";

/// Checks a login attempt.
pub trait Authenticator {
    /// Whether `password` is correct for `username`.
    fn verify(&self, username: &Username, password: &Password) -> bool;
}

/// Authentication configuration.
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    /// JSON accounts file. If None, only the demo account exists.
    pub accounts_file: Option<PathBuf>,
}

impl AuthConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            accounts_file: std::env::var_os("LOBBY_ACCOUNTS_FILE").map(PathBuf::from),
        }
    }

    /// Check if an accounts file is configured.
    pub fn is_configured(&self) -> bool {
        self.accounts_file.is_some()
    }
}

/// Credential store errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Accounts file could not be read.
    #[error("failed to read accounts file {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// Accounts file is not valid JSON of the expected shape.
    #[error("invalid accounts file: {0}")]
    Parse(#[from] serde_json::Error),
    /// A username does not fit the wire field.
    #[error("invalid username {0:?}")]
    InvalidUsername(String),
    /// A digest is not 32 hex-encoded bytes.
    #[error("invalid password digest for {0}")]
    InvalidDigest(String),
    /// The same username appears twice.
    #[error("duplicate account {0}")]
    DuplicateAccount(String),
}

/// On-disk accounts file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountsFile {
    /// Registered accounts.
    pub accounts: Vec<AccountEntry>,
}

/// One registered account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountEntry {
    /// Login name.
    pub username: String,
    /// Hex SHA-256 of the domain-separated password, see [`password_digest`].
    pub password_sha256: String,
}

/// Digest stored for a password.
pub fn password_digest(password: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(DIGEST_DOMAIN);
    hasher.update(password);
    let hash = hasher.finalize();

    let mut digest = [0u8; 32];
    digest.copy_from_slice(&hash);
    digest
}

/// In-memory username -> digest map.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    digests: BTreeMap<Username, [u8; 32]>,
}

impl CredentialStore {
    /// Empty store; every login fails.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store holding only the demo account.
    pub fn demo() -> Self {
        let mut store = Self::new();
        if let Some(name) = Username::new(DEMO_USERNAME) {
            store.insert(name, DEMO_PASSWORD.as_bytes());
        }
        store
    }

    /// Build the store described by `config`.
    pub fn from_config(config: &AuthConfig) -> Result<Self, AuthError> {
        match &config.accounts_file {
            Some(path) => Self::load(path),
            None => Ok(Self::demo()),
        }
    }

    /// Load an accounts file.
    pub fn load(path: &Path) -> Result<Self, AuthError> {
        let text = std::fs::read_to_string(path).map_err(|source| AuthError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: AccountsFile = serde_json::from_str(&text)?;
        Self::from_accounts(&file)
    }

    /// Build from parsed accounts.
    pub fn from_accounts(file: &AccountsFile) -> Result<Self, AuthError> {
        let mut digests = BTreeMap::new();
        for entry in &file.accounts {
            let name = Username::new(&entry.username)
                .ok_or_else(|| AuthError::InvalidUsername(entry.username.clone()))?;
            let digest: [u8; 32] = hex::decode(&entry.password_sha256)
                .ok()
                .and_then(|bytes| bytes.try_into().ok())
                .ok_or_else(|| AuthError::InvalidDigest(entry.username.clone()))?;
            if digests.insert(name, digest).is_some() {
                return Err(AuthError::DuplicateAccount(entry.username.clone()));
            }
        }
        Ok(Self { digests })
    }

    /// Add or replace an account.
    pub fn insert(&mut self, username: Username, password: &[u8]) {
        self.digests.insert(username, password_digest(password));
    }

    /// Number of accounts.
    pub fn len(&self) -> usize {
        self.digests.len()
    }

    /// Whether the store has no accounts.
    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }
}

impl Authenticator for CredentialStore {
    fn verify(&self, username: &Username, password: &Password) -> bool {
        let Some(expected) = self.digests.get(username) else {
            return false;
        };
        let actual = password_digest(password.as_bytes());
        // Constant-time compare
        expected
            .iter()
            .zip(actual.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn name(s: &str) -> Username {
        Username::new(s).unwrap()
    }

    fn password(s: &str) -> Password {
        Password::new(s.as_bytes()).unwrap()
    }

    fn entry(username: &str, pass: &str) -> AccountEntry {
        AccountEntry {
            username: username.into(),
            password_sha256: hex::encode(password_digest(pass.as_bytes())),
        }
    }

    #[test]
    fn test_demo_account() {
        let store = CredentialStore::demo();
        assert!(store.verify(&name(DEMO_USERNAME), &password(DEMO_PASSWORD)));
        assert!(!store.verify(&name(DEMO_USERNAME), &password("wrong")));
        assert!(!store.verify(&name("mallory"), &password(DEMO_PASSWORD)));
    }

    #[test]
    fn test_from_accounts() {
        let file = AccountsFile {
            accounts: vec![entry("alice", "a-pass"), entry("bob", "b-pass")],
        };
        let store = CredentialStore::from_accounts(&file).unwrap();

        assert_eq!(store.len(), 2);
        assert!(store.verify(&name("alice"), &password("a-pass")));
        assert!(!store.verify(&name("alice"), &password("b-pass")));
        assert!(store.verify(&name("bob"), &password("b-pass")));
    }

    #[test]
    fn test_rejects_bad_entries() {
        let bad_digest = AccountsFile {
            accounts: vec![AccountEntry {
                username: "alice".into(),
                password_sha256: "not-hex".into(),
            }],
        };
        assert!(matches!(
            CredentialStore::from_accounts(&bad_digest),
            Err(AuthError::InvalidDigest(_))
        ));

        let long_name = AccountsFile {
            accounts: vec![entry("a-name-longer-than-16", "x")],
        };
        assert!(matches!(
            CredentialStore::from_accounts(&long_name),
            Err(AuthError::InvalidUsername(_))
        ));

        let multiline_name = AccountsFile {
            accounts: vec![entry("eve\n9:alice", "x")],
        };
        assert!(matches!(
            CredentialStore::from_accounts(&multiline_name),
            Err(AuthError::InvalidUsername(_))
        ));

        let duplicate = AccountsFile {
            accounts: vec![entry("alice", "x"), entry("alice", "y")],
        };
        assert!(matches!(
            CredentialStore::from_accounts(&duplicate),
            Err(AuthError::DuplicateAccount(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let file = AccountsFile {
            accounts: vec![entry("carol", "c-pass")],
        };
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(serde_json::to_string(&file).unwrap().as_bytes()).unwrap();

        let config = AuthConfig {
            accounts_file: Some(tmp.path().to_path_buf()),
        };
        let store = CredentialStore::from_config(&config).unwrap();
        assert!(store.verify(&name("carol"), &password("c-pass")));
        assert!(!store.verify(&name(DEMO_USERNAME), &password(DEMO_PASSWORD)));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let config = AuthConfig {
            accounts_file: Some(PathBuf::from("/nonexistent/accounts.json")),
        };
        assert!(matches!(CredentialStore::from_config(&config), Err(AuthError::Io { .. })));
    }

    #[test]
    fn test_unconfigured_falls_back_to_demo() {
        let config = AuthConfig::default();
        assert!(!config.is_configured());
        let store = CredentialStore::from_config(&config).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_digest_is_domain_separated() {
        let plain = Sha256::digest(b"secret");
        assert_ne!(&password_digest(b"secret")[..], &plain[..]);
    }
}
