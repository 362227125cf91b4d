use serde::{Deserialize, Serialize};

use crate::request::DEFAULT_MSG_TTL;

/// Default platform URL.
pub const DEFAULT_PLATFORM_URL: &str = "https://platform.healthvault-ppe.com/platform/wildcat.ashx";
/// Default shell URL.
pub const DEFAULT_SHELL_URL: &str = "https://account.healthvault-ppe.com";
pub const DEFAULT_LANGUAGE: &str = "en";
pub const DEFAULT_COUNTRY: &str = "US";
pub const DEFAULT_SETTINGS_NAME: &str = "HealthVaultSettings";
pub const DEFAULT_INSTANCE_NAME: &str = "hvmobile";
/// Value of the `<version>` header element.
pub const DEFAULT_PLATFORM_VERSION: &str =
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("could not read configuration: {0}")]
    Json(String),
    #[error("{0} must not be empty")]
    Missing(&'static str),
    #[error("msg_ttl must be a positive number of seconds")]
    InvalidTtl,
}

/// How a [HealthVaultService](crate::service::HealthVaultService) reaches the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub health_service_url: String,
    pub shell_url: String,
    /// Master application id from the application configuration center.
    pub master_app_id: String,
    pub language: String,
    pub country: String,
    /// Lifetime stamped on every request, in seconds.
    pub msg_ttl: u32,
    /// Device name shown to the user in the shell.
    pub instance_name: String,
    pub platform_version: String,
    /// Name the session snapshot is stored under.
    pub settings_name: String,
    /// Trace full request and response bodies.
    pub log_wire: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            health_service_url: DEFAULT_PLATFORM_URL.to_string(),
            shell_url: DEFAULT_SHELL_URL.to_string(),
            master_app_id: String::new(),
            language: DEFAULT_LANGUAGE.to_string(),
            country: DEFAULT_COUNTRY.to_string(),
            msg_ttl: DEFAULT_MSG_TTL,
            instance_name: DEFAULT_INSTANCE_NAME.to_string(),
            platform_version: DEFAULT_PLATFORM_VERSION.to_string(),
            settings_name: DEFAULT_SETTINGS_NAME.to_string(),
            log_wire: false,
        }
    }
}

impl ServiceConfig {
    /// Default URLs with the given master application id.
    pub fn new(master_app_id: impl Into<String>) -> Self {
        Self {
            master_app_id: master_app_id.into(),
            ..Default::default()
        }
    }

    pub fn with_urls(mut self, health_service_url: impl Into<String>, shell_url: impl Into<String>) -> Self {
        self.health_service_url = health_service_url.into();
        self.shell_url = shell_url.into();
        self
    }

    /// Reads a configuration from JSON; absent fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let config: Self = serde_json::from_str(json).map_err(|e| Error::Json(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.master_app_id.trim().is_empty() {
            return Err(Error::Missing("master_app_id"));
        }
        if self.health_service_url.trim().is_empty() {
            return Err(Error::Missing("health_service_url"));
        }
        if self.shell_url.trim().is_empty() {
            return Err(Error::Missing("shell_url"));
        }
        if self.settings_name.trim().is_empty() {
            return Err(Error::Missing("settings_name"));
        }
        if self.msg_ttl == 0 {
            return Err(Error::InvalidTtl);
        }
        Ok(())
    }
}
