//! Gateway configuration.
//!
//! Every field has a default, so an empty JSON object is a valid config.

use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::api::GatewayError;

/// Accounts API root used when nothing else is configured.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api/accounts/";

/// Route the application is sent to once a session cannot be recovered.
pub const DEFAULT_LOGIN_ROUTE: &str = "/login";

/// Maximum number of retries for rate-limited (429) requests.
const DEFAULT_MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 1000;

/// Largest whole-second span a `chrono::Duration` holds.
const MAX_WINDOW_SECS: i64 = i64::MAX / 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub base_url: String,
    /// Whole-request timeout. `None` leaves the transport default in place.
    pub request_timeout_secs: Option<u64>,
    pub login_route: String,
    /// Refresh before sending when the access token expires within this
    /// many seconds. `None` disables proactive refresh.
    pub refresh_ahead_secs: Option<i64>,
    pub max_rate_limit_retries: u32,
    pub initial_backoff_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: None,
            login_route: DEFAULT_LOGIN_ROUTE.to_string(),
            refresh_ahead_secs: None,
            max_rate_limit_retries: DEFAULT_MAX_RATE_LIMIT_RETRIES,
            initial_backoff_ms: DEFAULT_INITIAL_BACKOFF_MS,
        }
    }
}

impl GatewayConfig {
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Parse `base_url`, adding the trailing slash relative joins rely on.
    pub fn base(&self) -> Result<Url, GatewayError> {
        let mut raw = self.base_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let url = Url::parse(&raw)
            .map_err(|e| GatewayError::Config(format!("invalid base URL {:?}: {}", self.base_url, e)))?;
        if url.cannot_be_a_base() {
            return Err(GatewayError::Config(format!(
                "base URL {:?} cannot have paths joined onto it",
                self.base_url
            )));
        }
        Ok(url)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    /// Proactive refresh window. Values beyond what `chrono` can represent
    /// are clamped to the largest window.
    pub fn refresh_ahead(&self) -> Option<chrono::Duration> {
        self.refresh_ahead_secs.map(|secs| {
            let secs = secs.clamp(-MAX_WINDOW_SECS, MAX_WINDOW_SECS);
            chrono::Duration::try_seconds(secs).unwrap_or(chrono::Duration::zero())
        })
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }
}
