use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Storage key for the short-lived bearer token.
pub const ACCESS_TOKEN_KEY: &str = "accessToken";

/// Storage key for the long-lived refresh token.
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt credential file: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Credential store lock poisoned")]
    Poisoned,
}

/// String key/value storage for credentials.
///
/// Every backend is last-write-wins; there is no transaction spanning keys.
pub trait CredentialStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove one key. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Access and refresh tokens as returned by the login endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct TokenPair {
    #[serde(rename = "access")]
    pub access_token: String,
    #[serde(rename = "refresh")]
    pub refresh_token: String,
}

/// Typed view over a [`CredentialStore`] holding the two token keys.
#[derive(Clone)]
pub struct Credentials {
    store: Arc<dyn CredentialStore>,
}

impl Credentials {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    pub fn access_token(&self) -> Result<Option<String>, StoreError> {
        self.store.get(ACCESS_TOKEN_KEY)
    }

    pub fn refresh_token(&self) -> Result<Option<String>, StoreError> {
        self.store.get(REFRESH_TOKEN_KEY)
    }

    /// Replace the stored pair. Nothing from the previous pair survives.
    pub fn replace(&self, pair: &TokenPair) -> Result<(), StoreError> {
        self.store.set(ACCESS_TOKEN_KEY, &pair.access_token)?;
        self.store.set(REFRESH_TOKEN_KEY, &pair.refresh_token)?;
        Ok(())
    }

    /// Store a refreshed access token. The refresh token is only replaced
    /// when the server rotated it.
    pub fn update_access(&self, access: &str, refresh: Option<&str>) -> Result<(), StoreError> {
        self.store.set(ACCESS_TOKEN_KEY, access)?;
        if let Some(refresh) = refresh {
            self.store.set(REFRESH_TOKEN_KEY, refresh)?;
        }
        Ok(())
    }

    /// Remove both tokens.
    pub fn clear(&self) -> Result<(), StoreError> {
        let access = self.store.remove(ACCESS_TOKEN_KEY);
        let refresh = self.store.remove(REFRESH_TOKEN_KEY);
        access.and(refresh)
    }

    pub fn has_session(&self) -> bool {
        matches!(self.access_token(), Ok(Some(_)))
    }
}

/// Process-local store; contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let values = self.values.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut values = self.values.lock().map_err(|_| StoreError::Poisoned)?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut values = self.values.lock().map_err(|_| StoreError::Poisoned)?;
        values.remove(key);
        Ok(())
    }
}
