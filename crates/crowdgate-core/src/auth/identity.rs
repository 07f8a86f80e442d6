//! Read-only view of the claims carried in an access token.
//!
//! The payload is decoded without verifying the signature; the server is the
//! only party that decides whether a token is valid. Claims are recomputed on
//! every read and never cached.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::api::GatewayError;

/// Claims decoded from an access token payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Identity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    /// Expiry (Unix seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    /// Issued at (Unix seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    /// Claims not listed above, kept as-is.
    #[serde(flatten)]
    #[cfg_attr(feature = "ts", ts(skip))]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Identity {
    /// Decode the middle segment of a `header.payload.signature` token.
    pub fn from_token(token: &str) -> Result<Self, GatewayError> {
        let mut segments = token.split('.');
        let payload = match (segments.next(), segments.next(), segments.next(), segments.next()) {
            (Some(_), Some(payload), Some(_), None) if !payload.is_empty() => payload,
            _ => {
                return Err(GatewayError::Decode(
                    "expected three dot-separated segments".to_string(),
                ))
            }
        };

        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| GatewayError::Decode(format!("payload is not base64url: {e}")))?;

        serde_json::from_slice(&bytes)
            .map_err(|e| GatewayError::Decode(format!("payload is not a claim object: {e}")))
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|exp| Utc.timestamp_opt(exp, 0).single())
    }

    pub fn is_expired(&self) -> bool {
        self.expires_within(Duration::zero())
    }

    /// True when the token has an expiry and it falls before `now + window`.
    /// A window reaching past the representable range covers every expiry.
    pub fn expires_within(&self, window: Duration) -> bool {
        let Some(expiry) = self.expires_at() else {
            return false;
        };
        match Utc::now().checked_add_signed(window) {
            Some(deadline) => expiry <= deadline,
            None => window > Duration::zero(),
        }
    }

    /// Look up any claim by name, including the well-known ones.
    pub fn claim(&self, name: &str) -> Option<serde_json::Value> {
        match name {
            "user_id" => self.user_id.clone(),
            "email" => self.email.clone().map(Into::into),
            "username" => self.username.clone().map(Into::into),
            "token_type" => self.token_type.clone().map(Into::into),
            "exp" => self.exp.map(Into::into),
            "iat" => self.iat.map(Into::into),
            "jti" => self.jti.clone().map(Into::into),
            other => self.extra.get(other).cloned(),
        }
    }
}

#[cfg(test)]
pub(crate) fn encode_test_token(claims: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.signature")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_simplejwt_access_token() {
        let token = encode_test_token(&json!({
            "token_type": "access",
            "exp": 4102444800i64,
            "iat": 1700000000,
            "jti": "abc123",
            "user_id": 42,
            "is_staff": false
        }));

        let identity = Identity::from_token(&token).unwrap();
        assert_eq!(identity.user_id, Some(json!(42)));
        assert_eq!(identity.token_type.as_deref(), Some("access"));
        assert_eq!(identity.jti.as_deref(), Some("abc123"));
        assert_eq!(identity.claim("is_staff"), Some(json!(false)));
        assert_eq!(identity.claim("exp"), Some(json!(4102444800i64)));
        assert!(!identity.is_expired());
    }

    #[test]
    fn test_padded_payload_is_accepted() {
        let payload = URL_SAFE_NO_PAD.encode(r#"{"email":"a@b.com"}"#);
        let token = format!("h.{payload}==.s");
        let identity = Identity::from_token(&token).unwrap();
        assert_eq!(identity.email.as_deref(), Some("a@b.com"));
    }

    #[test]
    fn test_expiry_checks() {
        let past = Utc::now().timestamp() - 60;
        let soon = Utc::now().timestamp() + 30;
        let expired = Identity::from_token(&encode_test_token(&json!({"exp": past}))).unwrap();
        assert!(expired.is_expired());

        let expiring = Identity::from_token(&encode_test_token(&json!({"exp": soon}))).unwrap();
        assert!(!expiring.is_expired());
        assert!(expiring.expires_within(Duration::seconds(120)));
        assert!(!expiring.expires_within(Duration::seconds(5)));

        let no_exp = Identity::from_token(&encode_test_token(&json!({"user_id": 1}))).unwrap();
        assert!(!no_exp.is_expired());
        assert_eq!(no_exp.expires_at(), None);
    }

    #[test]
    fn test_window_past_the_calendar_does_not_overflow() {
        let in_an_hour = Utc::now().timestamp() + 3600;
        let identity = Identity::from_token(&encode_test_token(&json!({"exp": in_an_hour}))).unwrap();
        let widest = Duration::seconds(i64::MAX / 1000);

        assert!(identity.expires_within(widest));
        assert!(!identity.expires_within(-widest));
    }

    #[test]
    fn test_malformed_tokens_are_decode_errors() {
        for token in ["", "abc", "a.b", "a..c", "a.b.c.d", "h.!!!.s"] {
            assert!(
                matches!(Identity::from_token(token), Err(GatewayError::Decode(_))),
                "token {token:?} should not decode"
            );
        }

        let not_json = format!("h.{}.s", URL_SAFE_NO_PAD.encode("not json"));
        assert!(matches!(Identity::from_token(&not_json), Err(GatewayError::Decode(_))));

        let not_object = format!("h.{}.s", URL_SAFE_NO_PAD.encode("[1,2,3]"));
        assert!(matches!(Identity::from_token(&not_object), Err(GatewayError::Decode(_))));
    }
}
