use crate::config::AppConfig;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use iothub_client::common::AuthError;
use iothub_client::auth::{
    RefreshSettings, SharedAccessKey, SharedAccessSignature, TokenRefreshService,
};
use std::fmt;
use std::sync::Arc;

/// Prints a freshly generated token for the configured identity.
pub async fn generate(config: &AppConfig, ttl_secs: Option<i64>) -> Result<()> {
    let settings = match ttl_secs {
        Some(ttl_secs) => RefreshSettings {
            suggested_time_to_live_secs: ttl_secs,
            ..config.token()
        },
        None => config.token(),
    };
    settings.validate().context("Invalid --ttl-secs")?;

    let credentials = config.credentials(settings)?;
    let token = credentials
        .get_token()
        .await
        .context("Failed to generate a token")?;

    if let Some(expires_on) = credentials.expires_on() {
        log::info!(
            "Token for '{}' expires at {expires_on}",
            credentials.audience()
        );
    }
    println!("{token}");
    Ok(())
}

/// Summary of a SAS token for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenReport {
    pub audience: String,
    pub key_name: Option<String>,
    pub expires_on: DateTime<Utc>,
    pub remaining: Option<Duration>,
    pub signature_valid: Option<bool>,
}

impl TokenReport {
    /// Parses `raw` without rejecting expired tokens, since inspecting them
    /// is the point.
    pub fn new(raw: &str, key: Option<&SharedAccessKey>, now: DateTime<Utc>) -> Result<Self> {
        let sas = SharedAccessSignature::parse_at(raw, DateTime::<Utc>::MIN_UTC)
            .context("Not a valid shared access signature")?;
        let remaining = sas.expires_on() - now;

        Ok(Self {
            audience: sas.audience().to_string(),
            key_name: sas.key_name().map(str::to_string),
            expires_on: sas.expires_on(),
            remaining: (remaining > Duration::zero()).then_some(remaining),
            signature_valid: key.map(|key| sas.verify(key).is_ok()),
        })
    }
}

impl fmt::Display for TokenReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "audience:   {}", self.audience)?;
        writeln!(
            f,
            "key name:   {}",
            self.key_name.as_deref().unwrap_or("(device key)")
        )?;
        writeln!(f, "expires on: {}", self.expires_on)?;
        match self.remaining {
            Some(remaining) => writeln!(f, "remaining:  {}s", remaining.num_seconds())?,
            None => writeln!(f, "remaining:  expired")?,
        }
        match self.signature_valid {
            Some(true) => write!(f, "signature:  valid"),
            Some(false) => write!(f, "signature:  does not match key"),
            None => write!(f, "signature:  not verified"),
        }
    }
}

pub fn inspect(token: &str, key: Option<&str>) -> Result<()> {
    let key = key
        .map(SharedAccessKey::new)
        .transpose()
        .context("Invalid --key")?;
    let report = TokenReport::new(token, key.as_ref(), Utc::now())?;
    println!("{report}");
    Ok(())
}

/// Keeps the configured credentials fresh until Ctrl-C.
pub async fn watch(config: &AppConfig, interval_secs: Option<u64>) -> Result<()> {
    let credentials = Arc::new(config.credentials(config.token())?);
    let check_interval = interval_secs
        .map(|secs| std::time::Duration::from_secs(secs.max(1)))
        .unwrap_or_else(|| config.refresh_check_interval());

    let first = credentials
        .get_token()
        .await
        .context("Failed to obtain the initial token")?;
    log::debug!("Initial token obtained ({} bytes)", first.len());
    if let Some(refreshes_on) = credentials.refreshes_on() {
        log::info!("Watching '{}', next renewal due at {refreshes_on}", credentials.audience());
    }

    let audience = credentials.audience();
    let service = Arc::new(
        TokenRefreshService::new(credentials)
            .with_check_interval(check_interval)
            .with_refresh_callback(Arc::new(move |expires_on: DateTime<Utc>| {
                log::info!("Renewed token for '{audience}', now valid until {expires_on}");
            }))
            .with_failure_callback(Arc::new(|error: AuthError| {
                log::warn!("Token renewal failed, retrying on the next check: {error}");
            })),
    );
    let handle = service.clone().start();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    log::info!("Stopping token refresh");
    service.shutdown();
    handle.await.context("Token refresh service panicked")?;
    Ok(())
}
