//! Owned description of an outbound call.
//!
//! A `PendingRequest` can be turned into a transport request any number of
//! times, which is what lets the gateway replay a call after refreshing the
//! access token.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Url};
use serde::Serialize;

use super::error::{GatewayError, Result};

/// One field of a multipart body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartValue {
    Text(String),
    File {
        file_name: String,
        mime: Option<String>,
        bytes: Vec<u8>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartField {
    pub name: String,
    pub value: PartValue,
}

impl MultipartField {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: PartValue::Text(value.into()),
        }
    }

    pub fn file(
        name: impl Into<String>,
        file_name: impl Into<String>,
        mime: Option<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            name: name.into(),
            value: PartValue::File {
                file_name: file_name.into(),
                mime,
                bytes,
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
    Multipart(Vec<MultipartField>),
}

impl RequestBody {
    fn multipart_form(fields: &[MultipartField]) -> Result<Form> {
        let mut form = Form::new();
        for field in fields {
            form = match &field.value {
                PartValue::Text(value) => form.text(field.name.clone(), value.clone()),
                PartValue::File {
                    file_name,
                    mime,
                    bytes,
                } => {
                    let mut part = Part::bytes(bytes.clone()).file_name(file_name.clone());
                    if let Some(mime) = mime {
                        part = part
                            .mime_str(mime)
                            .map_err(|e| GatewayError::Config(format!("invalid MIME type {mime:?}: {e}")))?;
                    }
                    form.part(field.name.clone(), part)
                }
            };
        }
        Ok(form)
    }
}

/// Method, target, headers and body of a call, plus the one-shot retry flag.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRequest {
    pub method: Method,
    /// Path relative to the gateway base URL, or an absolute URL.
    pub path: String,
    pub headers: HeaderMap,
    pub body: RequestBody,
    pub(crate) retried: bool,
}

impl PendingRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self> {
        let value = serde_json::to_value(body)
            .map_err(|e| GatewayError::Config(format!("request body is not serializable: {e}")))?;
        self.body = RequestBody::Json(value);
        Ok(self)
    }

    pub fn form(mut self, fields: Vec<(String, String)>) -> Self {
        self.body = RequestBody::Form(fields);
        self
    }

    pub fn multipart(mut self, fields: Vec<MultipartField>) -> Self {
        self.body = RequestBody::Multipart(fields);
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Whether this call already went through its refresh-and-retry cycle.
    pub fn is_retried(&self) -> bool {
        self.retried
    }

    pub(crate) fn url(&self, base: &Url) -> Result<Url> {
        base.join(self.path.trim_start_matches('/'))
            .map_err(|e| GatewayError::Config(format!("invalid request path {:?}: {}", self.path, e)))
    }

    /// Build a fresh transport request. A bearer token, if given, replaces
    /// any caller-supplied authorization header.
    pub(crate) fn build(&self, client: &Client, base: &Url, token: Option<&str>) -> Result<RequestBuilder> {
        let mut headers = self.headers.clone();
        if token.is_some() {
            headers.remove(AUTHORIZATION);
        }
        let mut builder = client
            .request(self.method.clone(), self.url(base)?)
            .headers(headers);

        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }

        builder = match &self.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Form(fields) => builder.form(fields),
            RequestBody::Multipart(fields) => builder.multipart(RequestBody::multipart_form(fields)?),
        };
        Ok(builder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_is_relative_to_base() {
        let base = Url::parse("http://localhost:8000/api/accounts/").unwrap();
        let request = PendingRequest::get("/me/");
        assert_eq!(
            request.url(&base).unwrap().as_str(),
            "http://localhost:8000/api/accounts/me/"
        );

        let absolute = PendingRequest::get("http://other.example/api/projects/");
        assert_eq!(
            absolute.url(&base).unwrap().as_str(),
            "http://other.example/api/projects/"
        );
    }

    #[test]
    fn test_bearer_header_overrides_caller_header() {
        let base = Url::parse("http://localhost:8000/api/accounts/").unwrap();
        let request = PendingRequest::get("me/").header(
            reqwest::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer stale"),
        );

        let built = request
            .build(&Client::new(), &base, Some("fresh"))
            .unwrap()
            .build()
            .unwrap();
        let values: Vec<_> = built.headers().get_all(reqwest::header::AUTHORIZATION).iter().collect();
        assert_eq!(values, vec![&HeaderValue::from_static("Bearer fresh")]);
    }

    #[test]
    fn test_clone_keeps_body_and_retry_flag() {
        let mut request = PendingRequest::patch("me/").multipart(vec![
            MultipartField::text("username", "ada"),
            MultipartField::file("profile_picture", "me.png", Some("image/png".into()), vec![1, 2, 3]),
        ]);
        request.retried = true;

        let replay = request.clone();
        assert_eq!(replay, request);
        assert!(replay.is_retried());
    }

    #[test]
    fn test_invalid_mime_is_rejected() {
        let base = Url::parse("http://localhost:8000/api/accounts/").unwrap();
        let request = PendingRequest::post("register/").multipart(vec![MultipartField::file(
            "profile_picture",
            "me.png",
            Some("not a mime".into()),
            vec![],
        )]);
        assert!(matches!(
            request.build(&Client::new(), &base, None),
            Err(GatewayError::Config(_))
        ));
    }
}
