//! Credential storage for the OAuth refresh token.
//!
//! The crate only ever stores one secret: the refresh token, under
//! [`SERVICE_NAME`]/[`REFRESH_TOKEN_ACCOUNT`]. Backends implement [`SecretStore`];
//! [`KeyringStore`] uses the OS credential store and [`MemoryStore`] keeps secrets
//! for the lifetime of the process.

use crate::error::{Error, Result};
use async_trait::async_trait;
use secrecy::SecretString;
use std::collections::HashMap;
use std::sync::Mutex;

/// Service name the refresh token is filed under.
pub const SERVICE_NAME: &str = "otp-watch";

/// Account name of the refresh token entry.
pub const REFRESH_TOKEN_ACCOUNT: &str = "gmail-refresh-token";

/// Opaque get/set/delete of named secrets.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Returns the secret, or `None` if no entry exists.
    async fn get(&self, service: &str, account: &str) -> Result<Option<SecretString>>;

    /// Creates or replaces the secret.
    async fn set(&self, service: &str, account: &str, secret: &str) -> Result<()>;

    /// Deletes the secret. Deleting a missing entry succeeds.
    async fn delete(&self, service: &str, account: &str) -> Result<()>;
}

/// Process-local secret store.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<(String, String), String>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with a refresh token, as if a previous run had authorized.
    #[must_use]
    pub fn with_refresh_token(token: &str) -> Self {
        let store = Self::new();
        store.insert(SERVICE_NAME, REFRESH_TOKEN_ACCOUNT, token);
        store
    }

    fn insert(&self, service: &str, account: &str, secret: &str) {
        self.lock().insert(key(service, account), secret.to_string());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(String, String), String>> {
        // A panic while holding this lock cannot leave the map half-written
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("entries", &self.lock().len())
            .finish()
    }
}

fn key(service: &str, account: &str) -> (String, String) {
    (service.to_string(), account.to_string())
}

#[async_trait]
impl SecretStore for MemoryStore {
    async fn get(&self, service: &str, account: &str) -> Result<Option<SecretString>> {
        Ok(self
            .lock()
            .get(&key(service, account))
            .map(|secret| SecretString::from(secret.clone())))
    }

    async fn set(&self, service: &str, account: &str, secret: &str) -> Result<()> {
        self.insert(service, account, secret);
        Ok(())
    }

    async fn delete(&self, service: &str, account: &str) -> Result<()> {
        self.lock().remove(&key(service, account));
        Ok(())
    }
}

/// OS credential store (macOS Keychain, Windows Credential Manager, Secret Service).
///
/// Keychain calls block, so each runs on the blocking thread pool.
#[cfg(feature = "keychain")]
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyringStore;

#[cfg(feature = "keychain")]
impl KeyringStore {
    /// Creates a keyring-backed store.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    async fn run<T, F>(service: &str, account: &str, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(keyring::Entry) -> std::result::Result<T, keyring::Error> + Send + 'static,
    {
        let service = service.to_string();
        let account = account.to_string();
        tokio::task::spawn_blocking(move || {
            let entry = keyring::Entry::new(&service, &account).map_err(keyring_error)?;
            op(entry).map_err(keyring_error)
        })
        .await
        .map_err(|e| Error::SecretStore {
            message: format!("keychain task failed: {e}"),
        })?
    }
}

#[cfg(feature = "keychain")]
fn keyring_error(e: keyring::Error) -> Error {
    Error::SecretStore {
        message: e.to_string(),
    }
}

#[cfg(feature = "keychain")]
#[async_trait]
impl SecretStore for KeyringStore {
    async fn get(&self, service: &str, account: &str) -> Result<Option<SecretString>> {
        Self::run(service, account, |entry| match entry.get_password() {
            Ok(secret) => Ok(Some(SecretString::from(secret))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e),
        })
        .await
    }

    async fn set(&self, service: &str, account: &str, secret: &str) -> Result<()> {
        let secret = secret.to_string();
        Self::run(service, account, move |entry| entry.set_password(&secret)).await
    }

    async fn delete(&self, service: &str, account: &str) -> Result<()> {
        Self::run(service, account, |entry| match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.get("svc", "acct").await.unwrap().is_none());

        store.set("svc", "acct", "secret-1").await.unwrap();
        let value = store.get("svc", "acct").await.unwrap().unwrap();
        assert_eq!(value.expose_secret(), "secret-1");

        store.set("svc", "acct", "secret-2").await.unwrap();
        let value = store.get("svc", "acct").await.unwrap().unwrap();
        assert_eq!(value.expose_secret(), "secret-2");
    }

    #[tokio::test]
    async fn test_memory_store_delete_is_idempotent() {
        let store = MemoryStore::with_refresh_token("rt");
        store
            .delete(SERVICE_NAME, REFRESH_TOKEN_ACCOUNT)
            .await
            .unwrap();
        store
            .delete(SERVICE_NAME, REFRESH_TOKEN_ACCOUNT)
            .await
            .unwrap();
        assert!(store
            .get(SERVICE_NAME, REFRESH_TOKEN_ACCOUNT)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_memory_store_keys_are_separate() {
        let store = MemoryStore::new();
        store.set("svc", "a", "1").await.unwrap();
        store.set("other", "a", "2").await.unwrap();
        assert_eq!(
            store.get("svc", "a").await.unwrap().unwrap().expose_secret(),
            "1"
        );
        assert_eq!(
            store.get("other", "a").await.unwrap().unwrap().expose_secret(),
            "2"
        );
    }
}
