//! Tenant, environment and app-registration settings.

use crate::ApiError;
use serde::{Deserialize, Serialize};

/// Default Entra ID authority host.
pub const DEFAULT_AUTH_BASE: &str = "https://login.microsoftonline.com";
/// Default Business Central API root, before the tenant segment.
pub const DEFAULT_API_BASE: &str = "https://api.businesscentral.dynamics.com/v2.0";

fn default_redirect_uri() -> String {
    "http://localhost:54321/callback".to_string()
}

/// Which directory, Business Central environment and company to talk to, and
/// as which app registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantContext {
    /// Entra ID directory (GUID or verified domain).
    #[serde(default)]
    pub tenant_id: String,
    /// Business Central environment name, e.g. `Production` or `Sandbox`.
    #[serde(default)]
    pub environment: String,
    #[serde(default)]
    pub company_id: Option<String>,
    #[serde(default)]
    pub company_name: Option<String>,
    /// Application (client) id of the app registration.
    #[serde(default)]
    pub client_id: String,
    /// Only needed for confidential-client registrations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
}

impl Default for TenantContext {
    fn default() -> Self {
        Self {
            tenant_id: String::new(),
            environment: String::new(),
            company_id: None,
            company_name: None,
            client_id: String::new(),
            client_secret: None,
            redirect_uri: default_redirect_uri(),
        }
    }
}

impl TenantContext {
    /// Check every field that ends up in a URL.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidConfiguration`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ApiError> {
        check_segment("tenant_id", &self.tenant_id)?;
        check_segment("environment", &self.environment)?;
        check_segment("client_id", &self.client_id)?;
        if let Some(company) = &self.company_id {
            check_segment("company_id", company)?;
        }
        if self.redirect_uri.trim().is_empty() {
            return Err(ApiError::InvalidConfiguration(
                "redirect_uri is empty".into(),
            ));
        }
        Ok(())
    }
}

fn check_segment(field: &str, value: &str) -> Result<(), ApiError> {
    if value.is_empty() {
        return Err(ApiError::InvalidConfiguration(format!("{field} is empty")));
    }
    if value
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || matches!(c, '/' | '\\' | '?' | '#' | '%'))
    {
        return Err(ApiError::InvalidConfiguration(format!(
            "{field} contains characters not allowed in a URL path segment: {value:?}"
        )));
    }
    Ok(())
}
