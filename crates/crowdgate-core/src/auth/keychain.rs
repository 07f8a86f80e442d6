use keyring::Entry;
use tracing::debug;

use super::store::{CredentialStore, StoreError};

/// Default keychain service name.
pub const SERVICE_NAME: &str = "crowdgate";

/// Stores each token as its own OS keychain entry under one service name.
pub struct KeychainStore {
    service: String,
}

impl KeychainStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry, StoreError> {
        Ok(Entry::new(&self.service, key)?)
    }
}

impl Default for KeychainStore {
    fn default() -> Self {
        Self::new(SERVICE_NAME)
    }
}

impl CredentialStore for KeychainStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entry(key)?.set_password(value)?;
        debug!(service = %self.service, key, "Stored credential in keychain");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::store::ACCESS_TOKEN_KEY;

    #[test]
    fn test_round_trip_through_os_keychain() {
        let store = KeychainStore::new(format!("crowdgate-test-{}", std::process::id()));
        if let Err(e) = store.set(ACCESS_TOKEN_KEY, "T1") {
            eprintln!("Skipping keychain test, no keychain available: {e}");
            return;
        }

        assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("T1"));

        store.remove(ACCESS_TOKEN_KEY).unwrap();
        assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap(), None);
        // Removing twice is not an error
        store.remove(ACCESS_TOKEN_KEY).unwrap();
    }
}
