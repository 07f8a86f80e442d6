//! Authenticated request gateway for the crowdfunding REST API.
//!
//! Every call made through [`ApiClient::dispatch`] carries the stored access
//! token. A 401 triggers one refresh exchange and one replay of the original
//! request; when that is impossible the stored credentials are wiped, a
//! `SessionExpired` event is emitted and the navigator is sent to the login
//! route.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Method, Response, StatusCode, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::auth::{
    Credentials, CredentialStore, Identity, IdentityEvent, IdentityEvents, LogNavigator, Navigator,
};
use crate::config::GatewayConfig;

use super::error::{GatewayError, Result};
use super::request::{MultipartField, PendingRequest};

/// Refresh endpoint, relative to the base URL
pub const TOKEN_REFRESH_PATH: &str = "token/refresh/";

/// Doubles the rate-limit wait, saturating instead of overflowing.
fn next_backoff(current: Duration) -> Duration {
    current.saturating_mul(2)
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh: &'a str,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access: String,
    /// Present only when the server rotates refresh tokens
    #[serde(default)]
    refresh: Option<String>,
}

/// Outcome of the most recent refresh exchange, guarded by the refresh lock.
#[derive(Default)]
struct RefreshState {
    last_failed: bool,
}

struct Inner {
    client: Client,
    base: Url,
    config: GatewayConfig,
    credentials: Credentials,
    events: IdentityEvents,
    navigator: Arc<dyn Navigator>,
    /// Serializes refresh exchanges so concurrent 401s share one exchange
    refresh_lock: Mutex<RefreshState>,
    /// Bumped after every finished exchange, successful or not
    refresh_generation: AtomicU64,
}

/// Gateway client. Clone is cheap - state lives behind one `Arc` and
/// reqwest::Client shares its connection pool.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<Inner>,
}

pub struct ApiClientBuilder {
    config: GatewayConfig,
    store: Arc<dyn CredentialStore>,
    events: IdentityEvents,
    navigator: Arc<dyn Navigator>,
    client: Option<Client>,
}

impl ApiClientBuilder {
    /// Share an event bus with the rest of the application.
    pub fn events(mut self, events: IdentityEvents) -> Self {
        self.events = events;
        self
    }

    pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = navigator;
        self
    }

    /// Use a preconfigured transport instead of building one from the config.
    pub fn http_client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    pub fn build(self) -> Result<ApiClient> {
        let base = self.config.base()?;
        let client = match self.client {
            Some(client) => client,
            None => {
                let mut builder = Client::builder();
                if let Some(timeout) = self.config.request_timeout() {
                    builder = builder.timeout(timeout);
                }
                builder
                    .build()
                    .map_err(|e| GatewayError::Config(format!("failed to build HTTP client: {e}")))?
            }
        };

        Ok(ApiClient {
            inner: Arc::new(Inner {
                client,
                base,
                config: self.config,
                credentials: Credentials::new(self.store),
                events: self.events,
                navigator: self.navigator,
                refresh_lock: Mutex::new(RefreshState::default()),
                refresh_generation: AtomicU64::new(0),
            }),
        })
    }
}

impl ApiClient {
    /// Create a client with a private event bus and a logging navigator.
    pub fn new(config: GatewayConfig, store: Arc<dyn CredentialStore>) -> Result<Self> {
        Self::builder(config, store).build()
    }

    pub fn builder(config: GatewayConfig, store: Arc<dyn CredentialStore>) -> ApiClientBuilder {
        ApiClientBuilder {
            config,
            store,
            events: IdentityEvents::new(),
            navigator: Arc::new(LogNavigator),
            client: None,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    pub fn credentials(&self) -> &Credentials {
        &self.inner.credentials
    }

    pub fn events(&self) -> &IdentityEvents {
        &self.inner.events
    }

    /// Resolve a path against the base URL.
    pub fn url(&self, path: &str) -> Result<Url> {
        PendingRequest::get(path).url(&self.inner.base)
    }

    /// Claims of the stored access token.
    ///
    /// Returns `None` when no token is stored or it cannot be decoded; the
    /// latter is logged.
    pub fn current_identity(&self) -> Option<Identity> {
        let token = match self.inner.credentials.access_token() {
            Ok(Some(token)) => token,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "Failed to read access token");
                return None;
            }
        };
        match Identity::from_token(&token) {
            Ok(identity) => Some(identity),
            Err(e) => {
                warn!(error = %e, "Error decoding access token");
                None
            }
        }
    }

    // ===== Gateway =====

    /// Send a request with the stored bearer token, recovering once from an
    /// expired access token.
    ///
    /// Any status other than 401 is returned unchanged. A 401 on a request
    /// that was already replayed becomes [`GatewayError::Unauthorized`]; an
    /// unrecoverable 401 becomes [`GatewayError::SessionExpired`].
    pub async fn dispatch(&self, mut request: PendingRequest) -> Result<Response> {
        if !request.retried && self.refresh_ahead_if_needed().await? {
            request.retried = true;
        }

        // Read the generation before the token so a refresh finishing in
        // between is noticed.
        let generation = self.refresh_generation();
        let token = self.inner.credentials.access_token()?;
        let response = self.send(&request, token.as_deref()).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        if request.retried {
            debug!(method = %request.method, path = %request.path, "Unauthorized after refresh, giving up");
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::from_status(StatusCode::UNAUTHORIZED, &body));
        }

        request.retried = true;
        debug!(method = %request.method, path = %request.path, "Unauthorized, refreshing access token");
        self.refresh_after_rejection(token.as_deref(), generation).await?;

        let token = self.inner.credentials.access_token()?;
        let response = self.send(&request, token.as_deref()).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            debug!(method = %request.method, path = %request.path, "Replay rejected");
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::from_status(StatusCode::UNAUTHORIZED, &body));
        }
        Ok(response)
    }

    async fn send(&self, request: &PendingRequest, token: Option<&str>) -> Result<Response> {
        request
            .build(&self.inner.client, &self.inner.base, token)?
            .send()
            .await
            .map_err(GatewayError::from_transport)
    }

    /// Refresh before sending when the access token is about to expire.
    /// Returns true if an exchange took place.
    async fn refresh_ahead_if_needed(&self) -> Result<bool> {
        let Some(window) = self.inner.config.refresh_ahead() else {
            return Ok(false);
        };
        let generation = self.refresh_generation();
        let Some(token) = self.inner.credentials.access_token()? else {
            return Ok(false);
        };
        if self.inner.credentials.refresh_token()?.is_none() {
            return Ok(false);
        }
        let expiring = Identity::from_token(&token)
            .map(|identity| identity.expires_within(window))
            .unwrap_or(false);
        if !expiring {
            return Ok(false);
        }

        debug!("Access token expires soon, refreshing ahead of request");
        self.refresh_after_rejection(Some(&token), generation).await?;
        Ok(true)
    }

    fn refresh_generation(&self) -> u64 {
        self.inner.refresh_generation.load(Ordering::SeqCst)
    }

    /// Obtain a new access token after `rejected` was refused.
    ///
    /// `seen` is the refresh generation read before `rejected` was sent.
    /// Only one exchange runs at a time. A caller that waited for the lock
    /// while another caller's exchange finished shares its outcome: the new
    /// token on success, or `SessionExpired` on failure without expiring the
    /// session a second time.
    async fn refresh_after_rejection(&self, rejected: Option<&str>, seen: u64) -> Result<()> {
        let mut state = self.inner.refresh_lock.lock().await;

        if self.refresh_generation() != seen {
            if state.last_failed {
                debug!("Concurrent refresh failed, session already expired");
                return Err(GatewayError::SessionExpired);
            }
            debug!("Access token already refreshed by a concurrent request");
            return Ok(());
        }
        if let Some(current) = self.inner.credentials.access_token()? {
            if Some(current.as_str()) != rejected {
                debug!("Access token replaced while the request was in flight");
                return Ok(());
            }
        }

        let outcome = self.exchange_refresh_token().await;
        if let Err(e) = &outcome {
            warn!(error = %e, "Token refresh failed");
            self.expire_session();
        }
        // Published only once the store reflects the outcome
        state.last_failed = outcome.is_err();
        self.inner.refresh_generation.fetch_add(1, Ordering::SeqCst);

        outcome.map_err(|_| GatewayError::SessionExpired)
    }

    /// Trade the stored refresh token for a new access token over the plain
    /// transport. Never retried.
    async fn exchange_refresh_token(&self) -> Result<()> {
        let refresh = self
            .inner
            .credentials
            .refresh_token()?
            .ok_or(GatewayError::SessionExpired)?;

        let tokens: RefreshResponse = self
            .post_plain(TOKEN_REFRESH_PATH, &RefreshRequest { refresh: &refresh })
            .await?;

        self.inner
            .credentials
            .update_access(&tokens.access, tokens.refresh.as_deref())?;
        info!(rotated = tokens.refresh.is_some(), "Access token refreshed");

        self.inner
            .events
            .emit(IdentityEvent::Refreshed(Identity::from_token(&tokens.access).ok()));
        Ok(())
    }

    /// Irrecoverable path: wipe credentials, notify, go to the login route.
    fn expire_session(&self) {
        if let Err(e) = self.inner.credentials.clear() {
            warn!(error = %e, "Failed to clear credentials");
        }
        warn!("Session expired, returning to login");
        self.inner.events.emit(IdentityEvent::SessionExpired);
        self.inner.navigator.navigate(&self.inner.config.login_route);
    }

    // ===== Response handling =====

    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit
    /// (should retry), or Err for other errors.
    async fn check_response_for_retry(response: Response) -> Result<Option<Response>> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status() == StatusCode::TOO_MANY_REQUESTS {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(GatewayError::from_status(status, &body))
        }
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: Response) -> Result<Response> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(GatewayError::from_status(status, &body))
        }
    }

    async fn parse_json<T: DeserializeOwned>(response: Response) -> Result<T> {
        let url = response.url().clone();
        let text = response.text().await.map_err(GatewayError::from_transport)?;
        // Endpoints answering 204 still parse into unit-like targets
        let text = if text.trim().is_empty() { "null" } else { text.as_str() };
        serde_json::from_str(text).map_err(|e| {
            GatewayError::InvalidResponse(format!("failed to parse JSON response from {url}: {e}"))
        })
    }

    // ===== Typed helpers =====

    /// Dispatch with rate-limit backoff and map error statuses.
    pub async fn execute(&self, request: PendingRequest) -> Result<Response> {
        let mut retries = 0;
        let mut backoff = self.inner.config.initial_backoff();

        loop {
            let response = self.dispatch(request.clone()).await?;
            match Self::check_response_for_retry(response).await? {
                Some(response) => return Ok(response),
                None => {
                    retries += 1;
                    if retries > self.inner.config.max_rate_limit_retries {
                        return Err(GatewayError::RateLimited);
                    }
                    warn!(
                        path = %request.path,
                        retry = retries,
                        backoff_ms = backoff.as_millis() as u64,
                        "Rate limited, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = next_backoff(backoff);
                }
            }
        }
    }

    pub async fn execute_json<T: DeserializeOwned>(&self, request: PendingRequest) -> Result<T> {
        let response = self.execute(request).await?;
        Self::parse_json(response).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.execute_json(PendingRequest::get(path)).await
    }

    pub async fn send_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.execute_json(PendingRequest::new(method, path).json(body)?)
            .await
    }

    pub async fn send_multipart<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        fields: Vec<MultipartField>,
    ) -> Result<T> {
        self.execute_json(PendingRequest::new(method, path).multipart(fields))
            .await
    }

    /// DELETE, optionally with a JSON body. The response body is ignored.
    pub async fn delete<B: Serialize + ?Sized>(&self, path: &str, body: Option<&B>) -> Result<()> {
        let mut request = PendingRequest::delete(path);
        if let Some(body) = body {
            request = request.json(body)?;
        }
        self.execute(request).await?;
        Ok(())
    }

    // ===== Plain transport =====

    /// Send without credentials and without refresh handling. Used by the
    /// login, registration and refresh endpoints.
    pub async fn send_plain(&self, request: PendingRequest) -> Result<Response> {
        let response = self.send(&request, None).await?;
        Self::check_response(response).await
    }

    pub async fn send_plain_json<T: DeserializeOwned>(&self, request: PendingRequest) -> Result<T> {
        let response = self.send_plain(request).await?;
        Self::parse_json(response).await
    }

    pub async fn post_plain<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.send_plain_json(PendingRequest::post(path).json(body)?)
            .await
    }

    /// Emit an identity event on this client's bus.
    pub(crate) fn notify(&self, event: IdentityEvent) {
        self.inner.events.emit(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::identity::encode_test_token;
    use crate::auth::{MemoryStore, TokenPair};
    use serde_json::json;

    fn client() -> ApiClient {
        ApiClient::new(GatewayConfig::default(), Arc::new(MemoryStore::new())).unwrap()
    }

    #[test]
    fn test_refresh_response_without_rotation() {
        let parsed: RefreshResponse = serde_json::from_str(r#"{"access": "T2"}"#).unwrap();
        assert_eq!(parsed.access, "T2");
        assert_eq!(parsed.refresh, None);
    }

    #[test]
    fn test_current_identity_absent_and_malformed() {
        let client = client();
        assert_eq!(client.current_identity(), None);

        client
            .credentials()
            .replace(&TokenPair {
                access_token: "not-a-token".into(),
                refresh_token: "R1".into(),
            })
            .unwrap();
        assert_eq!(client.current_identity(), None);
    }

    #[test]
    fn test_current_identity_reflects_stored_token() {
        let client = client();
        let token = encode_test_token(&json!({"user_id": 7, "email": "a@b.com"}));
        client.credentials().update_access(&token, None).unwrap();

        let identity = client.current_identity().unwrap();
        assert_eq!(identity.user_id, Some(json!(7)));
        assert_eq!(identity.email.as_deref(), Some("a@b.com"));
    }

    #[test]
    fn test_backoff_doubles_and_saturates() {
        assert_eq!(next_backoff(Duration::from_millis(250)), Duration::from_millis(500));
        assert_eq!(next_backoff(Duration::MAX), Duration::MAX);
        assert_eq!(next_backoff(Duration::from_secs(u64::MAX / 2 + 1)), Duration::MAX);
    }

    #[test]
    fn test_url_resolution() {
        let client = client();
        assert_eq!(
            client.url(TOKEN_REFRESH_PATH).unwrap().as_str(),
            "http://localhost:8000/api/accounts/token/refresh/"
        );
    }
}
