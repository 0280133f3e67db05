//! OAuth token representation and expiry logic.

use serde::{Deserialize, Serialize};

/// An access token with optional refresh capability and its expiry instant.
///
/// `expires_at` is seconds since the Unix epoch. A token without an expiry is
/// not representable: the Entra token endpoint always returns `expires_in`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub expires_at: u64,
}

impl Token {
    /// Create a token that expires `expires_in_secs` seconds after `now`.
    pub fn new(access_token: impl Into<String>, now: u64, expires_in_secs: u64) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: now.saturating_add(expires_in_secs),
        }
    }

    /// Attach a refresh token.
    #[must_use]
    pub fn with_refresh(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    /// `true` while `expires_at` lies strictly after `now`.
    #[must_use]
    pub fn is_fresh_at(&self, now: u64) -> bool {
        self.expires_at > now
    }

    /// Determine the token state at `now`.
    #[must_use]
    pub fn state_at(&self, now: u64) -> TokenState {
        if self.is_fresh_at(now) {
            TokenState::Fresh
        } else if self.refresh_token.is_some() {
            TokenState::Stale
        } else {
            TokenState::Invalid
        }
    }
}

/// Describes the usability state of a [`Token`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Fresh,
    /// Expired but a refresh token is available for renewal.
    Stale,
    /// Expired with no refresh token; only a new sign-in helps.
    Invalid,
}
