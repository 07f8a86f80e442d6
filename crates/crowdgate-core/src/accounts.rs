//! Accounts endpoints: login, registration, profile and password management.
//!
//! Login-type calls go over the plain transport and, on success, replace the
//! stored credential pair. Calls that act on the signed-in user go through
//! the gateway.

use std::fmt;

use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::api::{ApiClient, GatewayError, MultipartField, PendingRequest, Result};
use crate::auth::{Identity, IdentityEvent, TokenPair};

const LOGIN_PATH: &str = "login/";
const REGISTER_PATH: &str = "register/";
const PROFILE_PATH: &str = "me/";
const PASSWORD_RESET_REQUEST_PATH: &str = "password/reset/request/";
const PASSWORD_RESET_CONFIRM_PATH: &str = "password/reset/confirm/";
const CHECK_EMAIL_PATH: &str = "check-email/";
const CHANGE_PASSWORD_PATH: &str = "change-password/";
const ACTIVATE_PATH: &str = "activate/";

/// `activate/{uid}/{token}/`, each value percent-encoded as a single segment.
fn activation_path(uid: &str, token: &str) -> Result<String> {
    let mut scratch = Url::parse("http://segments.invalid/")
        .map_err(|e| GatewayError::Config(e.to_string()))?;
    scratch
        .path_segments_mut()
        .map_err(|()| GatewayError::Config("cannot encode activation path".into()))?
        .clear()
        .push(uid)
        .push(token)
        .push("");
    Ok(format!("{ACTIVATE_PATH}{}", scratch.path().trim_start_matches('/')))
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocialProvider {
    Facebook,
    Google,
}

impl SocialProvider {
    fn path(self) -> &'static str {
        match self {
            SocialProvider::Facebook => "login/facebook/",
            SocialProvider::Google => "login/google/",
        }
    }

    /// Google hands the client an ID token rather than an OAuth access token.
    fn token_type(self) -> Option<&'static str> {
        match self {
            SocialProvider::Facebook => None,
            SocialProvider::Google => Some("id_token"),
        }
    }
}

impl fmt::Display for SocialProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocialProvider::Facebook => f.write_str("facebook"),
            SocialProvider::Google => f.write_str("google"),
        }
    }
}

impl std::str::FromStr for SocialProvider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "facebook" => Ok(SocialProvider::Facebook),
            "google" => Ok(SocialProvider::Google),
            other => Err(format!("unknown social provider: {other}")),
        }
    }
}

#[derive(Debug, Serialize)]
struct SocialLoginRequest<'a> {
    access_token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    token_type: Option<&'a str>,
}

/// An image sent as a multipart file part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub file_name: String,
    pub mime: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    pub mobile_phone: String,
    pub profile_picture: Option<Upload>,
}

impl RegisterRequest {
    fn into_fields(self) -> Vec<MultipartField> {
        let mut fields = vec![
            MultipartField::text("first_name", self.first_name),
            MultipartField::text("last_name", self.last_name),
            MultipartField::text("email", self.email),
            MultipartField::text("password", self.password),
            MultipartField::text("confirm_password", self.confirm_password),
            MultipartField::text("mobile_phone", self.mobile_phone),
        ];
        if let Some(upload) = self.profile_picture {
            fields.push(MultipartField::file(
                "profile_picture",
                upload.file_name,
                upload.mime,
                upload.bytes,
            ));
        }
        fields
    }
}

/// Partial profile update; unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub username: Option<String>,
    pub mobile_phone: Option<String>,
    pub birthdate: Option<String>,
    pub country: Option<String>,
    pub profile_picture: Option<Upload>,
}

impl ProfileUpdate {
    fn into_fields(self) -> Vec<MultipartField> {
        let mut fields = Vec::new();
        let texts = [
            ("username", self.username),
            ("mobile_phone", self.mobile_phone),
            ("birthdate", self.birthdate),
            ("country", self.country),
        ];
        for (name, value) in texts {
            if let Some(value) = value {
                fields.push(MultipartField::text(name, value));
            }
        }
        if let Some(upload) = self.profile_picture {
            fields.push(MultipartField::file(
                "profile_picture",
                upload.file_name,
                upload.mime,
                upload.bytes,
            ));
        }
        fields
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Profile {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub mobile_phone: Option<String>,
    #[serde(default)]
    pub birthdate: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub profile_picture: Option<String>,
}

/// `{"message": "..."}` acknowledgement returned by most account actions.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Acknowledgement {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmailCheck {
    exists: bool,
}

/// Account operations on top of an [`ApiClient`].
#[derive(Clone)]
pub struct AccountsApi {
    client: ApiClient,
}

impl AccountsApi {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    /// Exchange email and password for a credential pair.
    ///
    /// Stored credentials are only touched on success; a rejected login
    /// surfaces the server's validation or authentication message.
    pub async fn login(&self, credentials: &LoginRequest) -> Result<TokenPair> {
        let pair: TokenPair = self.client.post_plain(LOGIN_PATH, credentials).await?;
        self.store_pair(&pair)?;
        info!("Logged in");
        Ok(pair)
    }

    pub async fn social_login(&self, provider: SocialProvider, token: &str) -> Result<TokenPair> {
        let body = SocialLoginRequest {
            access_token: token,
            token_type: provider.token_type(),
        };
        let pair: TokenPair = self.client.post_plain(provider.path(), &body).await?;
        self.store_pair(&pair)?;
        info!(%provider, "Logged in with social provider");
        Ok(pair)
    }

    fn store_pair(&self, pair: &TokenPair) -> Result<()> {
        self.client.credentials().replace(pair)?;
        self.client
            .notify(IdentityEvent::LoggedIn(Identity::from_token(&pair.access_token).ok()));
        Ok(())
    }

    /// Clear stored tokens. Navigation is left to the caller.
    pub fn logout(&self) -> Result<()> {
        self.client.credentials().clear()?;
        info!("Logged out");
        self.client.notify(IdentityEvent::LoggedOut);
        Ok(())
    }

    pub fn current_identity(&self) -> Option<Identity> {
        self.client.current_identity()
    }

    /// Create an inactive account; the server mails an activation link.
    pub async fn register(&self, request: RegisterRequest) -> Result<Acknowledgement> {
        self.client
            .send_plain_json(PendingRequest::post(REGISTER_PATH).multipart(request.into_fields()))
            .await
    }

    pub async fn activate(&self, uid: &str, token: &str) -> Result<Acknowledgement> {
        self.client
            .get_json(&activation_path(uid, token)?)
            .await
    }

    pub async fn profile(&self) -> Result<Profile> {
        self.client.get_json(PROFILE_PATH).await
    }

    pub async fn update_profile(&self, update: ProfileUpdate) -> Result<Profile> {
        self.client
            .send_multipart(Method::PATCH, PROFILE_PATH, update.into_fields())
            .await
    }

    /// Delete the signed-in account after password confirmation, then drop
    /// the stored credentials.
    pub async fn delete_account(&self, password: &str) -> Result<()> {
        self.client
            .delete(PROFILE_PATH, Some(&serde_json::json!({ "password": password })))
            .await?;
        if let Err(e) = self.client.credentials().clear() {
            warn!(error = %e, "Account deleted but credentials could not be cleared");
        }
        info!("Account deleted");
        self.client.notify(IdentityEvent::LoggedOut);
        Ok(())
    }

    pub async fn request_password_reset(&self, email: &str) -> Result<Acknowledgement> {
        self.client
            .post_plain(PASSWORD_RESET_REQUEST_PATH, &serde_json::json!({ "email": email }))
            .await
    }

    pub async fn confirm_password_reset(
        &self,
        uid: &str,
        token: &str,
        new_password: &str,
    ) -> Result<Acknowledgement> {
        let body = serde_json::json!({
            "uid": uid,
            "token": token,
            "new_password": new_password,
        });
        self.client
            .post_plain(PASSWORD_RESET_CONFIRM_PATH, &body)
            .await
    }

    /// Whether an account already uses this email address.
    pub async fn check_email(&self, email: &str) -> Result<bool> {
        let check: EmailCheck = self
            .client
            .post_plain(CHECK_EMAIL_PATH, &serde_json::json!({ "email": email }))
            .await?;
        Ok(check.exists)
    }

    pub async fn change_password(&self, old_password: &str, new_password: &str) -> Result<Acknowledgement> {
        let body = serde_json::json!({
            "old_password": old_password,
            "new_password": new_password,
        });
        self.client
            .send_json(Method::POST, CHANGE_PASSWORD_PATH, &body)
            .await
    }
}
