//! Authentication state: stored credentials, decoded identity, and the
//! notifications emitted when either changes.
//!
//! This module provides:
//! - `CredentialStore`: get/set/remove capability with memory, file and
//!   OS keychain backends
//! - `Credentials`: typed access to the access/refresh token pair
//! - `Identity`: claims decoded from the access token payload
//! - `IdentityEvents`: listeners notified on login, refresh, logout and
//!   session expiry
//! - `Navigator`: hook used to send the user to the login route

pub mod events;
pub mod file;
pub mod identity;
pub mod keychain;
pub mod navigator;
pub mod store;

pub use events::{IdentityEvent, IdentityEvents, ListenerId};
pub use file::FileStore;
pub use identity::Identity;
pub use keychain::KeychainStore;
pub use navigator::{LogNavigator, Navigator};
pub use store::{
    CredentialStore, Credentials, MemoryStore, StoreError, TokenPair, ACCESS_TOKEN_KEY,
    REFRESH_TOKEN_KEY,
};
