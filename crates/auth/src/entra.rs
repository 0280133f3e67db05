//! Azure Entra ID (v2.0 endpoint) authorization-code flow.
//!
//! Builds the authorize URL, the token-endpoint form bodies for both grants,
//! and parses the token response into a [`Token`].

use bcconnect_types::{ApiError, CallbackParams, ServiceError, TenantContext, Token, traits::Result};
use serde::Deserialize;
use url::Url;

pub use bcconnect_types::DEFAULT_AUTH_BASE;

/// Everything needed to talk to one tenant's OAuth endpoints.
#[derive(Debug, Clone)]
pub struct EntraEndpoints {
    authorize_url: Url,
    token_url: String,
    client_id: String,
    client_secret: Option<String>,
    redirect_uri: String,
    scope: String,
}

impl EntraEndpoints {
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidConfiguration`] if the tenant context is
    /// incomplete or the authority host is not a valid URL.
    pub fn new(auth_base: &str, tenant: &TenantContext, scope: impl Into<String>) -> Result<Self> {
        tenant.validate()?;
        let base = auth_base.trim_end_matches('/');
        let authorize = format!("{base}/{}/oauth2/v2.0/authorize", tenant.tenant_id);
        let authorize_url = Url::parse(&authorize).map_err(|e| {
            ApiError::InvalidConfiguration(format!("invalid authorize url {authorize}: {e}"))
        })?;
        Ok(Self {
            authorize_url,
            token_url: format!("{base}/{}/oauth2/v2.0/token", tenant.tenant_id),
            client_id: tenant.client_id.clone(),
            client_secret: tenant.client_secret.clone(),
            redirect_uri: tenant.redirect_uri.clone(),
            scope: scope.into(),
        })
    }

    #[must_use]
    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    /// Authorize URL with PKCE (S256) and an anti-CSRF `state`.
    #[must_use]
    pub fn authorize_url(&self, state: &str, code_challenge: &str) -> String {
        let mut url = self.authorize_url.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("response_mode", "query")
            .append_pair("scope", &self.scope)
            .append_pair("state", state)
            .append_pair("code_challenge", code_challenge)
            .append_pair("code_challenge_method", "S256");
        url.into()
    }

    /// Form body for `grant_type=authorization_code`.
    #[must_use]
    pub fn authorization_code_form(&self, code: &str, code_verifier: &str) -> Vec<(&'static str, String)> {
        let mut form = vec![
            ("grant_type", "authorization_code".to_string()),
            ("code", code.to_string()),
            ("redirect_uri", self.redirect_uri.clone()),
            ("client_id", self.client_id.clone()),
            ("scope", self.scope.clone()),
            ("code_verifier", code_verifier.to_string()),
        ];
        self.push_secret(&mut form);
        form
    }

    /// Form body for `grant_type=refresh_token`.
    #[must_use]
    pub fn refresh_form(&self, refresh_token: &str) -> Vec<(&'static str, String)> {
        let mut form = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.to_string()),
            ("redirect_uri", self.redirect_uri.clone()),
            ("client_id", self.client_id.clone()),
            ("scope", self.scope.clone()),
        ];
        self.push_secret(&mut form);
        form
    }

    fn push_secret(&self, form: &mut Vec<(&'static str, String)>) {
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret.clone()));
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    expires_in: u64,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Parse a successful token-endpoint body into a [`Token`] expiring relative to `now`.
///
/// # Errors
///
/// Returns [`ApiError::DecodeFailure`] if a required field is missing or mistyped.
pub fn parse_token_response(body: &[u8], now: u64) -> Result<Token> {
    let resp: TokenResponse = serde_json::from_slice(body)
        .map_err(|e| ApiError::DecodeFailure(format!("token response: {e}")))?;
    if let Some(kind) = resp.token_type.as_deref()
        && !kind.eq_ignore_ascii_case("bearer")
    {
        tracing::warn!(token_type = kind, "unexpected token type");
    }
    let token = Token::new(resp.access_token, now, resp.expires_in);
    Ok(match resp.refresh_token {
        Some(refresh) if !refresh.is_empty() => token.with_refresh(refresh),
        _ => token,
    })
}

/// Extract the authorization code from redirect parameters.
///
/// # Errors
///
/// Returns [`ApiError::Unauthenticated`] if the provider reported an error,
/// the `state` does not match, or no `code` is present.
pub fn code_from_callback(params: &CallbackParams, expected_state: &str) -> Result<String> {
    if let Some(error) = params.get("error") {
        return Err(ApiError::Unauthenticated {
            status: None,
            detail: ServiceError {
                code: Some(error.clone()),
                message: params.get("error_description").cloned(),
            },
        });
    }
    if params.get("state").map(String::as_str) != Some(expected_state) {
        return Err(ApiError::unauthenticated(
            "state mismatch in sign-in redirect, possible CSRF attempt",
        ));
    }
    params
        .get("code")
        .filter(|c| !c.is_empty())
        .cloned()
        .ok_or_else(|| ApiError::unauthenticated("missing code parameter in sign-in redirect"))
}
