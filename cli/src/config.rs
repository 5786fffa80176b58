use anyhow::{Context, Result};
use config::{Config, Environment, File};
use iothub_client::auth::{ConnectionCredentials, ConnectionCredentialsBuilder, RefreshSettings};
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Configuration file read from the working directory when `--config` is not
/// given.
pub const DEFAULT_CONFIG_FILE: &str = "iothub-sas.toml";

/// Prefix of environment variables overriding file values, for example
/// `IOTHUB__HUB__DEVICE_ID`.
pub const ENV_PREFIX: &str = "IOTHUB";

const DEFAULT_CHECK_INTERVAL_SECS: u64 = 30;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    hub: HubConfig,
    #[serde(default)]
    token: RefreshSettings,
    #[serde(default)]
    logging: LoggingConfig,
    refresh_check_interval_secs: Option<u64>,
}

impl AppConfig {
    pub fn hub(&self) -> &HubConfig {
        &self.hub
    }

    pub fn token(&self) -> RefreshSettings {
        self.token
    }

    pub fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    pub fn refresh_check_interval(&self) -> Duration {
        Duration::from_secs(
            self.refresh_check_interval_secs
                .unwrap_or(DEFAULT_CHECK_INTERVAL_SECS)
                .max(1),
        )
    }

    /// Builds credentials from the `[hub]` section, using `settings` for
    /// token timing.
    pub fn credentials(&self, settings: RefreshSettings) -> Result<ConnectionCredentials> {
        let hub = self.hub();
        let host_name = hub.host_name.as_deref().context(
            "hub.host_name is not configured (set it in the config file or IOTHUB__HUB__HOST_NAME)",
        )?;

        let mut builder = ConnectionCredentialsBuilder::new(host_name).refresh_settings(settings);
        builder.gateway_host_name = hub.gateway_host_name.clone();
        builder.device_id = hub.device_id.clone();
        builder.module_id = hub.module_id.clone();
        builder.shared_access_key_name = hub.shared_access_key_name.clone();
        builder.shared_access_key = hub.shared_access_key.clone();
        builder.shared_access_signature = hub.shared_access_signature.clone();

        builder
            .build()
            .context("Invalid credentials in the [hub] configuration")
    }
}

/// Identity and credential of the device or module to authenticate.
#[derive(Clone, Default, Deserialize)]
pub struct HubConfig {
    host_name: Option<String>,
    gateway_host_name: Option<String>,
    device_id: Option<String>,
    module_id: Option<String>,
    shared_access_key_name: Option<String>,
    shared_access_key: Option<String>,
    shared_access_signature: Option<String>,
}

impl fmt::Debug for HubConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redacted = |value: &Option<String>| value.as_ref().map(|_| "****");
        f.debug_struct("HubConfig")
            .field("host_name", &self.host_name)
            .field("gateway_host_name", &self.gateway_host_name)
            .field("device_id", &self.device_id)
            .field("module_id", &self.module_id)
            .field("shared_access_key_name", &self.shared_access_key_name)
            .field("shared_access_key", &redacted(&self.shared_access_key))
            .field(
                "shared_access_signature",
                &redacted(&self.shared_access_signature),
            )
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    level: Option<String>,
    file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Some("info".to_string()),
            file: None,
        }
    }
}

impl LoggingConfig {
    pub fn level(&self) -> &str {
        self.level.as_deref().unwrap_or("info")
    }

    pub fn file(&self) -> Option<&str> {
        self.file.as_deref()
    }
}

/// Loads `.env`, then the configuration file, then `IOTHUB__*` environment
/// overrides.
///
/// The default file is optional; an explicitly requested one must exist.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    dotenv::dotenv().ok();

    let file_source = match path {
        Some(path) => File::from(path).required(true),
        None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
    };
    let env_source = Environment::with_prefix(ENV_PREFIX).separator("__");

    let config = Config::builder()
        .add_source(file_source)
        .add_source(env_source) // environment entries still override file values when present
        .build()
        .context("Configuration loading failed, check the config file and environment variables")?;

    let app_config: AppConfig = config
        .try_deserialize()
        .context("Failed to deserialize config")?;
    app_config
        .token
        .validate()
        .context("Invalid [token] configuration")?;
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;
    use iothub_client::auth::AuthType;

    fn parse(toml: &str) -> AppConfig {
        Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .expect("config builds")
            .try_deserialize()
            .expect("config deserializes")
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse("");
        assert_eq!(config.token(), RefreshSettings::default());
        assert_eq!(config.logging().level(), "info");
        assert_eq!(config.refresh_check_interval(), Duration::from_secs(30));
        assert!(config.credentials(RefreshSettings::default()).is_err());
    }

    #[test]
    fn test_full_config_builds_key_credentials() {
        let config = parse(
            r#"
            refresh_check_interval_secs = 10

            [hub]
            host_name = "contoso.azure-devices.net"
            device_id = "thermostat"
            shared_access_key = "dGhpcyBpcyBub3QgYSByZWFsIGtleQ=="

            [token]
            suggested_time_to_live_secs = 600
            time_buffer_percentage = 25

            [logging]
            level = "debug"
            "#,
        );

        assert_eq!(config.token().suggested_time_to_live_secs, 600);
        assert_eq!(config.logging().level(), "debug");
        assert_eq!(config.refresh_check_interval(), Duration::from_secs(10));

        let credentials = config.credentials(config.token()).expect("valid credentials");
        assert_eq!(credentials.auth_type(), AuthType::SharedKey);
        assert_eq!(credentials.device_id(), "thermostat");
    }

    #[test]
    fn test_debug_redacts_hub_secrets() {
        let config = parse(
            r#"
            [hub]
            shared_access_key = "dGhpcyBpcyBub3QgYSByZWFsIGtleQ=="
            "#,
        );
        assert!(!format!("{:?}", config.hub()).contains("dGhpcyBpcyBub3Qg"));
    }
}
