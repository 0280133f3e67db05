//! Unified error type for the bcconnect workspace.

use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Structured error detail returned by Business Central or the Entra token
/// endpoint, decoded on a best-effort basis.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceError {
    pub code: Option<String>,
    pub message: Option<String>,
}

impl ServiceError {
    /// Build a detail with only a message.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: Some(message.into()),
        }
    }

    /// Decode an error body.
    ///
    /// Understands the OData shape `{"error":{"code":..,"message":..}}` and the
    /// OAuth shape `{"error":"invalid_grant","error_description":..}`. Any
    /// other non-empty body becomes the message verbatim.
    #[must_use]
    pub fn from_body(body: &[u8]) -> Self {
        let Ok(json) = serde_json::from_slice::<Value>(body) else {
            let text = String::from_utf8_lossy(body).trim().to_string();
            return Self {
                code: None,
                message: (!text.is_empty()).then_some(text),
            };
        };

        let str_field = |v: &Value, key: &str| v.get(key).and_then(Value::as_str).map(String::from);

        match json.get("error") {
            Some(inner @ Value::Object(_)) => Self {
                code: str_field(inner, "code"),
                message: str_field(inner, "message"),
            },
            Some(Value::String(code)) => Self {
                code: Some(code.clone()),
                message: str_field(&json, "error_description"),
            },
            _ => Self {
                code: None,
                message: str_field(&json, "message"),
            },
        }
    }

    /// `true` when neither a code nor a message could be recovered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.code.is_none() && self.message.is_none()
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.code, &self.message) {
            (Some(code), Some(msg)) => write!(f, "{code}: {msg}"),
            (Some(code), None) => f.write_str(code),
            (None, Some(msg)) => f.write_str(msg),
            (None, None) => f.write_str("no details"),
        }
    }
}

/// Every failure surfaced to callers of the token store or the REST client.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// Missing or malformed settings; the user has to fix the configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The token is missing, expired or revoked, or sign-in failed.
    #[error("unauthenticated{}: {detail}", .status.map(|s| format!(" (status {s})")).unwrap_or_default())]
    Unauthenticated {
        status: Option<u16>,
        detail: ServiceError,
    },

    /// The server answered with a non-success status.
    #[error("http status {status}: {detail}")]
    HttpStatus { status: u16, detail: ServiceError },

    /// The response body did not match the expected schema.
    #[error("decode failure: {0}")]
    DecodeFailure(String),

    /// No response was received (connection failure, timeout).
    #[error("transport error: {0}")]
    Transport(String),

    /// The secure credential store failed.
    #[error("storage error: {0}")]
    Storage(String),
}

// ── Feature-gated From impls ──────────────────────────────────────────────────

#[cfg(feature = "reqwest")]
impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Transport(format!("request timed out: {e}"))
        } else {
            Self::Transport(e.to_string())
        }
    }
}

#[cfg(feature = "sqlx")]
impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        Self::DecodeFailure(e.to_string())
    }
}

impl ApiError {
    /// Shorthand for an [`ApiError::Unauthenticated`] without a status code.
    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::Unauthenticated {
            status: None,
            detail: ServiceError::message(message),
        }
    }

    /// Returns `true` if the error is likely transient and worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::HttpStatus { status, .. } => {
                matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
            }
            Self::Transport(_) => true,
            _ => false,
        }
    }
}
