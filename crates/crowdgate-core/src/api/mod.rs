//! REST API gateway for the crowdfunding accounts service.
//!
//! This module provides the `ApiClient` for sending requests with the
//! stored bearer token, refreshing it once when the server rejects it.
//!
//! The API uses JWT bearer token authentication obtained through the
//! accounts login endpoints.

pub mod client;
pub mod error;
pub mod request;

pub use client::{ApiClient, ApiClientBuilder, TOKEN_REFRESH_PATH};
pub use error::{FieldErrors, GatewayError, Result, NON_FIELD_ERRORS};
pub use request::{MultipartField, PartValue, PendingRequest, RequestBody};
