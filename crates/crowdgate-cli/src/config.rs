//! CLI configuration management.
//!
//! This module handles loading and saving the CLI configuration, which
//! holds the gateway settings and the credential backend choice.
//!
//! Configuration is stored at `~/.config/crowdgate/config.json`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::ValueEnum;
use crowdgate_core::auth::{CredentialStore, FileStore, KeychainStore};
use crowdgate_core::GatewayConfig;
use serde::{Deserialize, Serialize};

/// Application name used for config directory paths
const APP_NAME: &str = "crowdgate";

/// Config file name
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    File,
    Keyring,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(flatten)]
    pub gateway: GatewayConfig,
    pub store: StoreBackend,
    /// Overrides the default credentials file location
    pub credentials_file: Option<PathBuf>,
    /// Overrides the default keychain service name
    pub keychain_service: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Open the configured credential backend.
    pub fn credential_store(&self) -> Result<Arc<dyn CredentialStore>> {
        Ok(match self.store {
            StoreBackend::File => {
                let path = match &self.credentials_file {
                    Some(path) => path.clone(),
                    None => FileStore::default_path()
                        .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?,
                };
                Arc::new(FileStore::new(path))
            }
            StoreBackend::Keyring => match &self.keychain_service {
                Some(service) => Arc::new(KeychainStore::new(service.clone())),
                None => Arc::new(KeychainStore::default()),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flattened_gateway_settings() {
        let config: Config = serde_json::from_str(
            r#"{"base_url": "https://fund.example/api/accounts/", "store": "keyring", "refresh_ahead_secs": 30}"#,
        )
        .unwrap();
        assert_eq!(config.gateway.base_url, "https://fund.example/api/accounts/");
        assert_eq!(config.gateway.refresh_ahead_secs, Some(30));
        assert_eq!(config.gateway.login_route, "/login");
        assert_eq!(config.store, StoreBackend::Keyring);
    }

    #[test]
    fn test_empty_config_defaults_to_file_store() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.store, StoreBackend::File);
        assert_eq!(config.gateway, GatewayConfig::default());
    }
}
