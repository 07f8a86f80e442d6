use std::collections::BTreeMap;
use std::fmt;

use reqwest::StatusCode;
use thiserror::Error;

use crate::auth::StoreError;

/// Key used for messages that do not belong to a single form field.
pub const NON_FIELD_ERRORS: &str = "non_field_errors";

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Field name to messages, as returned by a 400 response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors(pub BTreeMap<String, Vec<String>>);

impl FieldErrors {
    /// Parse a 400 response body.
    ///
    /// Objects map each key to its string or list of strings. A bare list or
    /// string lands under `non_field_errors`; anything that is not JSON is
    /// kept verbatim under `detail`.
    pub fn from_body(body: &str) -> Self {
        let mut fields = BTreeMap::new();
        match serde_json::from_str::<serde_json::Value>(body) {
            Ok(serde_json::Value::Object(map)) => {
                for (field, value) in map {
                    fields.insert(field, Self::messages(value));
                }
            }
            Ok(value @ (serde_json::Value::Array(_) | serde_json::Value::String(_))) => {
                fields.insert(NON_FIELD_ERRORS.to_string(), Self::messages(value));
            }
            _ => {
                let trimmed = body.trim();
                let message = if trimmed.is_empty() {
                    "Invalid request data".to_string()
                } else {
                    truncate_body(trimmed)
                };
                fields.insert("detail".to_string(), vec![message]);
            }
        }
        Self(fields)
    }

    fn messages(value: serde_json::Value) -> Vec<String> {
        match value {
            serde_json::Value::String(s) => vec![s],
            serde_json::Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                })
                .collect(),
            other => vec![other.to_string()],
        }
    }

    /// Messages for one field, if the server reported any.
    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.0 {
            if !first {
                f.write_str("; ")?;
            }
            first = false;
            write!(f, "{}: {}", field, messages.join(" "))?;
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Validation failed: {0}")]
    Validation(FieldErrors),

    #[error("Authentication failed: {0}")]
    Unauthorized(String),

    #[error("Session expired - please log in again")]
    SessionExpired,

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error ({status}): {body}")]
    Server { status: StatusCode, body: String },

    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),

    #[error("Malformed access token: {0}")]
    Decode(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Credential storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Truncate a response body to avoid logging excessive data
fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        body.to_string()
    } else {
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }
}

/// Pull a human readable message out of `{"error": ...}` / `{"detail": ...}`
/// bodies, falling back to the truncated body.
fn server_message(body: &str, fallback: &str) -> String {
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["error", "detail", "message"] {
            if let Some(serde_json::Value::String(message)) = map.get(key) {
                return message.clone();
            }
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        truncate_body(trimmed)
    }
}

impl GatewayError {
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        match status.as_u16() {
            400 => GatewayError::Validation(FieldErrors::from_body(body)),
            401 => GatewayError::Unauthorized(server_message(body, "Authentication failed")),
            403 => GatewayError::PermissionDenied(server_message(body, "Permission denied")),
            404 => GatewayError::NotFound(server_message(body, "Resource not found")),
            429 => GatewayError::RateLimited,
            500..=599 => GatewayError::Server {
                status,
                body: truncate_body(body),
            },
            _ => GatewayError::InvalidResponse(format!("Status {}: {}", status, truncate_body(body))),
        }
    }

    /// Classify a transport error. Body decoding failures mean a response
    /// arrived, so only the rest count as network failures.
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_decode() {
            GatewayError::InvalidResponse(err.to_string())
        } else if err.is_builder() {
            GatewayError::Config(err.to_string())
        } else {
            GatewayError::Network(err)
        }
    }

    /// Field errors carried by a validation failure.
    pub fn field_errors(&self) -> Option<&FieldErrors> {
        match self {
            GatewayError::Validation(fields) => Some(fields),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_errors_from_object() {
        let body = r#"{"email": ["This field is required."], "password": "Too short"}"#;
        let fields = FieldErrors::from_body(body);
        assert_eq!(fields.get("email"), Some(&["This field is required.".to_string()][..]));
        assert_eq!(fields.get("password"), Some(&["Too short".to_string()][..]));
        assert_eq!(
            fields.to_string(),
            "email: This field is required.; password: Too short"
        );
    }

    #[test]
    fn test_field_errors_from_list_and_plain_text() {
        let fields = FieldErrors::from_body(r#"["Passwords don't match"]"#);
        assert_eq!(
            fields.get(NON_FIELD_ERRORS),
            Some(&["Passwords don't match".to_string()][..])
        );

        let fields = FieldErrors::from_body("<html>bad</html>");
        assert_eq!(fields.get("detail"), Some(&["<html>bad</html>".to_string()][..]));

        let fields = FieldErrors::from_body("");
        assert_eq!(fields.get("detail"), Some(&["Invalid request data".to_string()][..]));
    }

    #[test]
    fn test_from_status_mapping() {
        assert!(matches!(
            GatewayError::from_status(StatusCode::BAD_REQUEST, r#"{"error": "Account is not activated yet!"}"#),
            GatewayError::Validation(_)
        ));
        match GatewayError::from_status(StatusCode::UNAUTHORIZED, r#"{"error": "Invalid email or password"}"#) {
            GatewayError::Unauthorized(message) => assert_eq!(message, "Invalid email or password"),
            other => panic!("unexpected error: {other:?}"),
        }
        match GatewayError::from_status(StatusCode::FORBIDDEN, r#"{"detail": "Not yours"}"#) {
            GatewayError::PermissionDenied(message) => assert_eq!(message, "Not yours"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(matches!(
            GatewayError::from_status(StatusCode::NOT_FOUND, ""),
            GatewayError::NotFound(_)
        ));
        assert!(matches!(
            GatewayError::from_status(StatusCode::TOO_MANY_REQUESTS, ""),
            GatewayError::RateLimited
        ));
        assert!(matches!(
            GatewayError::from_status(StatusCode::BAD_GATEWAY, "upstream down"),
            GatewayError::Server { .. }
        ));
        assert!(matches!(
            GatewayError::from_status(StatusCode::IM_A_TEAPOT, ""),
            GatewayError::InvalidResponse(_)
        ));
    }

    #[test]
    fn test_truncate_body() {
        let long = "x".repeat(MAX_ERROR_BODY_LENGTH + 10);
        let truncated = truncate_body(&long);
        assert!(truncated.starts_with(&"x".repeat(MAX_ERROR_BODY_LENGTH)));
        assert!(truncated.ends_with("(truncated, 510 total bytes)"));
        assert_eq!(truncate_body("short"), "short");
    }
}
