//! Login credentials for the portal.
//!
//! Secrets are pulled through a [`CredentialStore`] so the binary can read
//! them from the environment while tests hand them in directly.
//!
//! | key           | environment variable |
//! |---------------|----------------------|
//! | `email`       | `EMAIL`              |
//! | `password`    | `PASSWORD`           |
//! | `totp_secret` | `TOTP_SECRET`        |

mod env;

pub use env::{EnvCredentialStore, StaticCredentialStore};

use anyhow::{Context, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

/// A key-value store for credentials.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Retrieve a credential by key.
    ///
    /// Returns `Ok(None)` if the key doesn't exist.
    /// Returns `Err` if there was an error accessing the backend.
    async fn get(&self, key: &str) -> Result<Option<SecretString>>;
}

/// Email/password plus the optional TOTP seed.
///
/// Loaded once per process and never mutated afterwards.
#[derive(Clone)]
pub struct Credentials {
    email: String,
    password: SecretString,
    totp_seed: Option<SecretString>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("totp_seed", &self.totp_seed.is_some())
            .finish_non_exhaustive()
    }
}

impl Credentials {
    pub fn new(
        email: impl Into<String>,
        password: SecretString,
        totp_seed: Option<SecretString>,
    ) -> Self {
        Self {
            email: email.into(),
            password,
            totp_seed: totp_seed.and_then(|seed| normalize_seed(seed.expose_secret())),
        }
    }

    /// Read `email`, `password` and the optional `totp_secret` from a store.
    pub async fn load(store: &dyn CredentialStore) -> Result<Self> {
        let email = store
            .get("email")
            .await?
            .context("Missing credential: email")?;
        let password = store
            .get("password")
            .await?
            .context("Missing credential: password")?;
        let totp_seed = store.get("totp_secret").await?;

        Ok(Self::new(email.expose_secret(), password, totp_seed))
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn password(&self) -> &SecretString {
        &self.password
    }

    /// Seed with all whitespace removed; `None` when unset or blank.
    pub fn totp_seed(&self) -> Option<&SecretString> {
        self.totp_seed.as_ref()
    }
}

/// Authenticator apps display seeds in space-separated groups.
fn normalize_seed(raw: &str) -> Option<SecretString> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        None
    } else {
        Some(SecretString::from(compact))
    }
}
