use bcconnect_types::{DEFAULT_API_BASE, DEFAULT_AUTH_BASE, TenantContext};
use figment::{
    Figment,
    providers::{Env, Format as _, Serialized, Yaml},
};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Prefix for environment overrides, e.g. `BCCONNECT_TENANT__TENANT_ID`.
pub const ENV_PREFIX: &str = "BCCONNECT_";

fn default_auth_base() -> String {
    DEFAULT_AUTH_BASE.to_string()
}
fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}
fn default_scopes() -> Vec<String> {
    vec![
        "https://api.businesscentral.dynamics.com/.default".to_string(),
        "offline_access".to_string(),
    ]
}
fn default_timeout() -> u64 {
    30
}
fn default_service() -> String {
    "bcconnect".to_string()
}
fn default_level() -> String {
    "info".to_string()
}

/// Where credentials are persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Service identifier all secrets are keyed under.
    #[serde(default = "default_service")]
    pub service: String,
    /// `SQLite` database path (defaults to `~/.bcconnect/secrets.db`).
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            service: default_service(),
            path: None,
        }
    }
}

impl StoreConfig {
    /// The configured database path, or the default under `$HOME`.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".bcconnect").join("secrets.db")
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging settings; `RUST_LOG` still wins when set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tenant: TenantContext,
    /// Entra ID authority host.
    #[serde(default = "default_auth_base")]
    pub auth_base: String,
    /// Business Central API root, before the tenant segment.
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tenant: TenantContext::default(),
            auth_base: default_auth_base(),
            api_base: default_api_base(),
            scopes: default_scopes(),
            request_timeout_secs: default_timeout(),
            store: StoreConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Config {
    /// Parses configuration from a YAML string, merged with defaults.
    ///
    /// # Errors
    ///
    /// Returns a [`figment::Error`] if the YAML is invalid or extraction fails.
    #[allow(clippy::result_large_err)]
    pub fn from_yaml(yaml: &str) -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Yaml::string(yaml))
            .extract()
    }

    /// Loads configuration from a file path, merged with defaults.
    ///
    /// # Errors
    ///
    /// Returns a [`figment::Error`] if the file cannot be read or parsed.
    #[allow(clippy::result_large_err)]
    pub fn from_file(path: &std::path::Path) -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path))
            .extract()
    }

    /// Defaults, then the optional YAML file, then `BCCONNECT_*` variables.
    ///
    /// Nested keys use a double underscore: `BCCONNECT_TENANT__ENVIRONMENT`.
    ///
    /// # Errors
    ///
    /// Returns a [`figment::Error`] if any layer cannot be parsed.
    #[allow(clippy::result_large_err)]
    pub fn load(path: Option<&std::path::Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config: Self = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        tracing::debug!(
            tenant = %config.tenant.tenant_id,
            environment = %config.tenant.environment,
            "configuration loaded"
        );
        Ok(config)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Space-separated scope string as sent to the authorize and token endpoints.
    #[must_use]
    pub fn scope(&self) -> String {
        self.scopes.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_YAML: &str = r#"
tenant:
  tenant_id: "contoso.onmicrosoft.com"
  environment: "Sandbox"
  company_id: "a1b2c3"
  company_name: "CRONUS USA, Inc."
  client_id: "11111111-2222-3333-4444-555555555555"
request_timeout_secs: 10
log:
  level: debug
  format: json
"#;

    #[test]
    fn test_default_config() {
        let c = Config::default();
        assert_eq!(c.auth_base, "https://login.microsoftonline.com");
        assert_eq!(c.api_base, "https://api.businesscentral.dynamics.com/v2.0");
        assert_eq!(c.request_timeout(), Duration::from_secs(30));
        assert_eq!(
            c.scope(),
            "https://api.businesscentral.dynamics.com/.default offline_access"
        );
        assert_eq!(c.auth_base, DEFAULT_AUTH_BASE);
        assert_eq!(c.api_base, DEFAULT_API_BASE);
        assert_eq!(c.store.service, "bcconnect");
        assert_eq!(c.log.format, LogFormat::Text);
    }

    #[test]
    fn test_from_yaml_tenant() {
        let c = Config::from_yaml(SAMPLE_YAML).unwrap();
        assert_eq!(c.tenant.tenant_id, "contoso.onmicrosoft.com");
        assert_eq!(c.tenant.environment, "Sandbox");
        assert_eq!(c.tenant.company_id.as_deref(), Some("a1b2c3"));
        assert_eq!(c.tenant.redirect_uri, "http://localhost:54321/callback");
        assert!(c.tenant.validate().is_ok());
    }

    #[test]
    fn test_from_yaml_defaults_applied() {
        let c = Config::from_yaml(SAMPLE_YAML).unwrap();
        assert_eq!(c.request_timeout_secs, 10);
        assert_eq!(c.log.level, "debug");
        assert_eq!(c.log.format, LogFormat::Json);
        assert_eq!(c.auth_base, "https://login.microsoftonline.com"); // default preserved
        assert_eq!(c.scopes.len(), 2);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bcconnect.yaml");
        std::fs::write(&path, SAMPLE_YAML).unwrap();
        let c = Config::from_file(&path).unwrap();
        assert_eq!(c.tenant.environment, "Sandbox");
    }

    #[test]
    fn test_env_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("bcconnect.yaml", SAMPLE_YAML)?;
            jail.set_env("BCCONNECT_TENANT__ENVIRONMENT", "Production");
            jail.set_env("BCCONNECT_REQUEST_TIMEOUT_SECS", "45");
            let c = Config::load(Some(std::path::Path::new("bcconnect.yaml")))?;
            assert_eq!(c.tenant.environment, "Production");
            assert_eq!(c.tenant.tenant_id, "contoso.onmicrosoft.com");
            assert_eq!(c.request_timeout_secs, 45);
            Ok(())
        });
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        figment::Jail::expect_with(|_jail| {
            let c = Config::load(None)?;
            assert_eq!(c, Config::default());
            Ok(())
        });
    }

    #[test]
    fn test_store_database_path_override() {
        let s = StoreConfig {
            path: Some(PathBuf::from("/tmp/x.db")),
            ..StoreConfig::default()
        };
        assert_eq!(s.database_path(), PathBuf::from("/tmp/x.db"));
        assert!(
            StoreConfig::default()
                .database_path()
                .ends_with(".bcconnect/secrets.db")
        );
    }
}
