use super::connection_credentials::ConnectionCredentials;
use crate::common::AuthError;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

/// How often the service checks whether the token is due by default.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Callback for handling refresh failures
pub type RefreshFailureCallback = Arc<dyn Fn(AuthError) + Send + Sync>;

/// Callback receiving the expiry of every renewed token
pub type RefreshSuccessCallback = Arc<dyn Fn(DateTime<Utc>) + Send + Sync>;

/// Service that periodically checks a credential and renews its token once
/// it is expiring, so long-lived connections always find a fresh one.
pub struct TokenRefreshService {
    credentials: Arc<ConnectionCredentials>,
    check_interval: Duration,
    shutdown_signal: CancellationToken,
    refresh_callback: Option<RefreshSuccessCallback>,
    failure_callback: Option<RefreshFailureCallback>,
}

impl TokenRefreshService {
    /// Create a new token refresh service
    pub fn new(credentials: Arc<ConnectionCredentials>) -> Self {
        Self {
            credentials,
            check_interval: DEFAULT_CHECK_INTERVAL,
            shutdown_signal: CancellationToken::new(),
            refresh_callback: None,
            failure_callback: None,
        }
    }

    pub fn with_check_interval(mut self, check_interval: Duration) -> Self {
        self.check_interval = check_interval;
        self
    }

    /// Set a callback to be invoked after every successful renewal
    pub fn with_refresh_callback(mut self, callback: RefreshSuccessCallback) -> Self {
        self.refresh_callback = Some(callback);
        self
    }

    /// Set a callback to be invoked when token refresh fails
    pub fn with_failure_callback(mut self, callback: RefreshFailureCallback) -> Self {
        self.failure_callback = Some(callback);
        self
    }

    pub fn credentials(&self) -> &Arc<ConnectionCredentials> {
        &self.credentials
    }

    /// Start the background refresh service
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Signal the service to shutdown, abandoning any renewal in flight
    pub fn shutdown(&self) {
        self.shutdown_signal.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_signal.is_cancelled()
    }

    /// Run the refresh service loop
    async fn run(&self) {
        if !self.credentials.can_renew() {
            log::info!(
                "{:?} credentials for '{}' cannot be renewed, nothing to refresh",
                self.credentials.auth_type(),
                self.credentials.device_id()
            );
            return;
        }

        let mut check_interval = interval(self.check_interval);
        check_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        check_interval.tick().await; // Skip the first immediate tick

        log::info!(
            "Token refresh service started for '{}', checking every {:?}",
            self.credentials.device_id(),
            self.check_interval
        );

        loop {
            tokio::select! {
                _ = self.shutdown_signal.cancelled() => break,
                _ = check_interval.tick() => {}
            }

            match self.refresh_if_needed().await {
                Ok(_) => {}
                Err(AuthError::Cancelled) => break,
                Err(e) => {
                    log::error!(
                        "Failed to refresh token for '{}': {e}",
                        self.credentials.device_id()
                    );
                    if let Some(callback) = &self.failure_callback {
                        callback(e);
                    }
                }
            }
        }

        log::info!("Token refresh service shutting down");
    }

    /// Renews the token if it is expiring. Returns whether a renewal
    /// happened.
    async fn refresh_if_needed(&self) -> Result<bool, AuthError> {
        log::debug!("Checking token for refresh...");
        if !self.credentials.is_expiring() {
            return Ok(false);
        }

        log::info!(
            "Token for '{}' needs refresh, attempting refresh...",
            self.credentials.device_id()
        );
        let (_, expires_on) = self.credentials.fetch(&self.shutdown_signal).await?;
        log::info!(
            "Successfully refreshed token for '{}', valid until {expires_on}",
            self.credentials.device_id()
        );

        if let Some(callback) = &self.refresh_callback {
            callback(expires_on);
        }
        Ok(true)
    }
}
