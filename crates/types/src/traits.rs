//! Async traits shared across all bcconnect crates.
//!
//! Every external collaborator is defined here so that higher layers depend
//! only on `bcconnect-types`, not on each other or on a concrete backend.

use crate::ApiError;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Query parameters received on the OAuth redirect (`code`, `state`, `error`…).
pub type CallbackParams = HashMap<String, String>;

/// Secure string storage scoped to one service identifier.
///
/// Implementations are expected to be safe for concurrent use. Missing keys
/// are `Ok(None)`, never an error.
#[async_trait]
pub trait SecureStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    /// Deleting an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Produces a currently valid bearer token for outbound requests.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String>;
}

/// Runs the interactive part of the authorization-code grant.
///
/// Given the fully built authorize URL, drives the user through sign-in and
/// returns the query parameters of the redirect back to the app.
#[async_trait]
pub trait AuthorizationCodeSource: Send + Sync {
    async fn authorize(&self, authorize_url: &str) -> Result<CallbackParams>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// A transport-level request. Headers are sent in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// A `POST` with an `application/x-www-form-urlencoded` body.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidConfiguration`] if the pairs cannot be encoded.
    pub fn post_form(url: impl Into<String>, form: &[(&str, &str)]) -> Result<Self> {
        let body = serde_urlencoded::to_string(form)
            .map_err(|e| ApiError::InvalidConfiguration(format!("cannot encode form: {e}")))?;
        Ok(Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: vec![(
                "Content-Type".to_string(),
                "application/x-www-form-urlencoded".to_string(),
            )],
            body: Some(Bytes::from(body)),
        })
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Look up the first header with `name` (case-insensitive).
    #[must_use]
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Status and body of a response. A non-2xx status is still a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Bytes,
}

impl HttpResponse {
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends HTTP requests. Only a missing response is an error
/// ([`ApiError::Transport`]); every status code comes back as `Ok`.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}
