//! Environment-variable and in-memory credential backends.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use secrecy::SecretString;

use super::CredentialStore;

/// Reads credentials from environment variables.
///
/// Logical keys map to variable names; unmapped keys are upper-cased
/// (`totp_secret` → `TOTP_SECRET`). Empty variables count as unset.
#[derive(Debug, Clone, Default)]
pub struct EnvCredentialStore {
    vars: HashMap<String, String>,
}

impl EnvCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the variable read for a logical key.
    pub fn with_var(mut self, key: impl Into<String>, var: impl Into<String>) -> Self {
        self.vars.insert(key.into(), var.into());
        self
    }

    fn var_name(&self, key: &str) -> String {
        self.vars
            .get(key)
            .cloned()
            .unwrap_or_else(|| key.to_uppercase())
    }
}

#[async_trait]
impl CredentialStore for EnvCredentialStore {
    async fn get(&self, key: &str) -> Result<Option<SecretString>> {
        match std::env::var(self.var_name(key)) {
            Ok(value) if !value.is_empty() => Ok(Some(SecretString::from(value))),
            Ok(_) | Err(std::env::VarError::NotPresent) => Ok(None),
            Err(err) => Err(anyhow::anyhow!(
                "Credential {key} is not valid unicode: {err}"
            )),
        }
    }
}

/// Fixed in-memory credentials.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialStore {
    values: HashMap<String, String>,
}

impl StaticCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

#[async_trait]
impl CredentialStore for StaticCredentialStore {
    async fn get(&self, key: &str) -> Result<Option<SecretString>> {
        Ok(self.values.get(key).cloned().map(SecretString::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn var_name_defaults_to_uppercase_key() {
        let store = EnvCredentialStore::new().with_var("email", "MF_EMAIL");
        assert_eq!(store.var_name("email"), "MF_EMAIL");
        assert_eq!(store.var_name("totp_secret"), "TOTP_SECRET");
    }

    #[tokio::test]
    async fn missing_variable_is_none() -> Result<()> {
        let store = EnvCredentialStore::new()
            .with_var("email", "MONEYDIGEST_TEST_SURELY_UNSET_VARIABLE");
        assert!(store.get("email").await?.is_none());
        Ok(())
    }
}
