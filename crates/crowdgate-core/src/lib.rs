//! Client library for the crowdfunding accounts API.
//!
//! [`api::ApiClient`] attaches the stored access token to every request and
//! recovers from an expired token with a single refresh-and-replay cycle.
//! [`accounts::AccountsApi`] wraps the account endpoints (login, social
//! login, registration, profile, password management) on top of it.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use crowdgate_core::accounts::{AccountsApi, LoginRequest};
//! use crowdgate_core::api::ApiClient;
//! use crowdgate_core::auth::MemoryStore;
//! use crowdgate_core::config::GatewayConfig;
//!
//! # async fn run() -> crowdgate_core::api::Result<()> {
//! let client = ApiClient::new(GatewayConfig::default(), Arc::new(MemoryStore::new()))?;
//! let accounts = AccountsApi::new(client.clone());
//! accounts
//!     .login(&LoginRequest {
//!         email: "a@b.com".into(),
//!         password: "x".into(),
//!     })
//!     .await?;
//! let me: serde_json::Value = client.get_json("me/").await?;
//! # let _ = me;
//! # Ok(())
//! # }
//! ```

pub mod accounts;
pub mod api;
pub mod auth;
pub mod config;

pub use accounts::AccountsApi;
pub use api::{ApiClient, GatewayError};
pub use auth::{CredentialStore, Identity, IdentityEvent, IdentityEvents};
pub use config::GatewayConfig;
