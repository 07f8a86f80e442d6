use std::collections::BTreeMap;
use std::fs::{DirBuilder, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

use super::store::{CredentialStore, StoreError};

/// Credentials file name in the data directory
const CREDENTIALS_FILE: &str = "credentials.json";

/// Application name used for the data directory path
const APP_NAME: &str = "crowdgate";

/// Persists tokens as a small JSON object on disk so they survive restarts.
///
/// The whole file is rewritten on every change and deleted once it holds no
/// keys. On Unix the file is readable by its owner only, and a directory
/// created for it gets mode 0700.
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// `<data dir>/crowdgate/credentials.json`, if the platform has a data dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|dir| dir.join(APP_NAME).join(CREDENTIALS_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>, StoreError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = std::fs::read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&contents)?)
    }

    fn save(&self, values: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if values.is_empty() {
            if self.path.exists() {
                std::fs::remove_file(&self.path)?;
                debug!(path = %self.path.display(), "Removed empty credentials file");
            }
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            private_dir_builder().create(parent)?;
        }
        let contents = serde_json::to_string_pretty(values)?;
        let mut file = private_open_options().open(&self.path)?;
        // The mode above only applies when the file is first created
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
        }
        file.write_all(contents.as_bytes())?;
        Ok(())
    }
}

fn private_dir_builder() -> DirBuilder {
    let mut builder = DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder
}

fn private_open_options() -> OpenOptions {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options
}

impl CredentialStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        let mut values = self.load()?;
        values.insert(key.to_string(), value.to_string());
        self.save(&values)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        let mut values = self.load()?;
        if values.remove(key).is_some() {
            self.save(&values)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::store::{ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("crowdgate-test-{}-{}", std::process::id(), name))
            .join(CREDENTIALS_FILE)
    }

    #[test]
    fn test_values_survive_reopen() {
        let path = scratch_path("reopen");
        let store = FileStore::new(&path);
        store.set(ACCESS_TOKEN_KEY, "T1").unwrap();
        store.set(REFRESH_TOKEN_KEY, "R1").unwrap();

        let reopened = FileStore::new(&path);
        assert_eq!(reopened.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("T1"));
        assert_eq!(reopened.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("R1"));

        reopened.remove(ACCESS_TOKEN_KEY).unwrap();
        reopened.remove(REFRESH_TOKEN_KEY).unwrap();
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_is_private_to_owner() {
        use std::os::unix::fs::PermissionsExt;

        let path = scratch_path("private");
        let store = FileStore::new(&path);
        store.set(ACCESS_TOKEN_KEY, "T1").unwrap();

        let file_mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = std::fs::metadata(path.parent().unwrap()).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode & 0o077, 0);

        // A file left readable by an older version is tightened on rewrite
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        store.set(REFRESH_TOKEN_KEY, "R1").unwrap();
        let file_mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);

        store.remove(ACCESS_TOKEN_KEY).unwrap();
        store.remove(REFRESH_TOKEN_KEY).unwrap();
    }

    #[test]
    fn test_missing_file_reads_as_empty() {
        let store = FileStore::new(scratch_path("missing"));
        assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap(), None);
        store.remove(ACCESS_TOKEN_KEY).unwrap();
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let path = scratch_path("corrupt");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{not json").unwrap();

        let store = FileStore::new(&path);
        assert!(matches!(store.get(ACCESS_TOKEN_KEY), Err(StoreError::Corrupt(_))));
        std::fs::remove_file(&path).unwrap();
    }
}
