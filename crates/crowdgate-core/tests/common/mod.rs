#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use crowdgate_core::auth::{CredentialStore, IdentityEvent, MemoryStore, Navigator, TokenPair};
use crowdgate_core::{AccountsApi, ApiClient, GatewayConfig};
use wiremock::MockServer;

/// Mount point of the accounts API on the mock server.
pub const ACCOUNTS: &str = "/api/accounts";

#[derive(Default)]
pub struct RecordingNavigator {
    pub routes: Mutex<Vec<String>>,
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, route: &str) {
        self.routes.lock().unwrap().push(route.to_string());
    }
}

pub struct TestGateway {
    pub server: MockServer,
    pub client: ApiClient,
    pub accounts: AccountsApi,
    pub store: Arc<MemoryStore>,
    pub navigator: Arc<RecordingNavigator>,
    pub events: Arc<Mutex<Vec<IdentityEvent>>>,
}

impl TestGateway {
    pub fn access_token(&self) -> Option<String> {
        self.client.credentials().access_token().unwrap()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.client.credentials().refresh_token().unwrap()
    }

    pub fn seed(&self, access: &str, refresh: Option<&str>) {
        self.store.set("accessToken", access).unwrap();
        if let Some(refresh) = refresh {
            self.store.set("refreshToken", refresh).unwrap();
        }
    }

    pub fn seed_pair(&self, pair: &TokenPair) {
        self.client.credentials().replace(pair).unwrap();
    }

    pub fn events(&self) -> Vec<IdentityEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn routes(&self) -> Vec<String> {
        self.navigator.routes.lock().unwrap().clone()
    }
}

pub async fn spawn_gateway() -> TestGateway {
    spawn_gateway_with(|_| {}).await
}

pub async fn spawn_gateway_with(configure: impl FnOnce(&mut GatewayConfig)) -> TestGateway {
    let server = MockServer::start().await;
    let mut config = GatewayConfig::with_base_url(format!("{}{}/", server.uri(), ACCOUNTS));
    config.initial_backoff_ms = 1;
    configure(&mut config);

    let store = Arc::new(MemoryStore::new());
    let navigator = Arc::new(RecordingNavigator::default());
    let client = ApiClient::builder(config, store.clone())
        .navigator(navigator.clone())
        .build()
        .expect("Failed to build gateway");

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    client
        .events()
        .on_identity_changed(move |event| sink.lock().unwrap().push(event.clone()));

    TestGateway {
        server,
        accounts: AccountsApi::new(client.clone()),
        client,
        store,
        navigator,
        events,
    }
}

/// Unsigned token with the given claims in its payload segment.
pub fn jwt(claims: serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.signature")
}

pub fn endpoint(path: &str) -> String {
    format!("{ACCOUNTS}/{path}")
}
