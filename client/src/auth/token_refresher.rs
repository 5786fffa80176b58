use super::clock::{Clock, SystemClock};
use super::connection_credentials::ConnectionCredentialsBuilder;
use super::shared_access_signature::SharedAccessSignature;
use super::token_source::{TokenRequest, TokenSource};
use super::types::{AuthType, RefreshSettings};
use crate::common::AuthError;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Cached token and its timing, guarded by a synchronous lock so the fast
/// path never suspends.
#[derive(Clone)]
struct TokenState {
    token: Option<String>,
    expires_on: DateTime<Utc>,
    refreshes_on: DateTime<Utc>,
}

impl TokenState {
    /// State before the first fetch: already past expiry so the first call
    /// regenerates.
    fn unfetched(now: DateTime<Utc>, settings: &RefreshSettings) -> Self {
        let expires_on = now
            .checked_sub_signed(settings.suggested_time_to_live())
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self {
            token: None,
            expires_on,
            refreshes_on: refresh_time(expires_on, settings),
        }
    }

    fn fetched(token: String, expires_on: DateTime<Utc>, settings: &RefreshSettings) -> Self {
        Self {
            token: Some(token),
            expires_on,
            refreshes_on: refresh_time(expires_on, settings),
        }
    }
}

fn refresh_time(expires_on: DateTime<Utc>, settings: &RefreshSettings) -> DateTime<Utc> {
    expires_on
        .checked_sub_signed(settings.refresh_margin())
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn validate_identity(name: &'static str, value: &str) -> Result<(), AuthError> {
    if value.trim().is_empty() {
        return Err(AuthError::invalid_argument(
            name,
            "cannot be empty or whitespace",
        ));
    }
    Ok(())
}

/// Caches a SAS token for one device or module identity and renews it ahead
/// of expiry.
///
/// The refresher hands out the cached token until its refresh time, then
/// asks its [`TokenSource`] for a new one. Renewal is single-flight: while
/// one caller regenerates, every other caller waits for that result instead
/// of starting its own. The expiry recorded is always the one embedded in
/// the returned token, whatever lifetime was requested.
///
/// ```text
///  Unfetched ──get_token──▶ Valid ──now ≥ refreshes_on──▶ Expiring ──now ≥ expires_on──▶ Expired
///                             ▲                               │                             │
///                             └────────── get_token ──────────┴──────────── get_token ──────┘
/// ```
///
/// # Examples
///
/// ```no_run
/// use client::auth::{RefreshSettings, SasTokenGenerator, SharedAccessKey, TokenRefresher, TokenSource};
///
/// # async fn example() -> Result<(), client::common::AuthError> {
/// let key = SharedAccessKey::new("dGhpcyBpcyBub3QgYSByZWFsIGtleQ==")?;
/// let refresher = TokenRefresher::new(
///     "thermostat",
///     None,
///     TokenSource::SharedKey(SasTokenGenerator::new(None, key)),
///     RefreshSettings::default(),
/// )?;
///
/// let token = refresher.get_token("contoso.azure-devices.net").await?;
/// println!("renew after {}", refresher.refreshes_on());
/// # Ok(())
/// # }
/// ```
pub struct TokenRefresher {
    device_id: String,
    module_id: Option<String>,
    source: TokenSource,
    settings: RefreshSettings,
    clock: Arc<dyn Clock>,
    state: RwLock<TokenState>,
    refresh_lock: Mutex<()>,
}

impl TokenRefresher {
    /// Creates a refresher that has not fetched a token yet.
    ///
    /// # Errors
    ///
    /// - [`AuthError::OutOfRange`] if `settings` fail validation
    /// - [`AuthError::InvalidArgument`] if `device_id` is blank, or
    ///   `module_id` is supplied but blank
    pub fn new(
        device_id: &str,
        module_id: Option<&str>,
        source: TokenSource,
        settings: RefreshSettings,
    ) -> Result<Self, AuthError> {
        settings.validate()?;
        validate_identity("device_id", device_id)?;
        if let Some(module_id) = module_id {
            validate_identity("module_id", module_id)?;
        }

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let state = TokenState::unfetched(clock.now(), &settings);
        Ok(Self {
            device_id: device_id.to_string(),
            module_id: module_id.map(str::to_string),
            source,
            settings,
            clock,
            state: RwLock::new(state),
            refresh_lock: Mutex::new(()),
        })
    }

    /// Creates a refresher around a pre-supplied token.
    ///
    /// The token is parsed immediately and becomes the cached token. It
    /// cannot be renewed, so the buffer is dropped and the refresher reports
    /// itself as expiring only once the embedded expiry passes.
    ///
    /// # Errors
    ///
    /// Besides the errors of [`new`](Self::new), returns
    /// [`AuthError::MalformedToken`] or [`AuthError::TokenExpired`] if the
    /// token cannot be used.
    pub fn from_token(
        device_id: &str,
        module_id: Option<&str>,
        token: &str,
        settings: RefreshSettings,
    ) -> Result<Self, AuthError> {
        let settings = RefreshSettings {
            time_buffer_percentage: 0,
            ..settings
        };
        let mut refresher = Self::new(
            device_id,
            module_id,
            TokenSource::Token(token.to_string()),
            settings,
        )?;
        let signature = SharedAccessSignature::parse_at(token, refresher.clock.now())?;
        *refresher.state.get_mut() =
            TokenState::fetched(token.to_string(), signature.expires_on(), &settings);
        Ok(refresher)
    }

    /// Replaces the clock used for every expiry decision.
    ///
    /// An unfetched refresher is re-seeded from the new clock so its first
    /// call still regenerates; a cached token keeps its recorded times.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        let state = self.state.get_mut();
        if state.token.is_none() {
            *state = TokenState::unfetched(clock.now(), &self.settings);
        }
        self.clock = clock;
        self
    }

    /// Returns a token for `hub`, regenerating it first if it is due.
    pub async fn get_token(&self, hub: &str) -> Result<String, AuthError> {
        self.get_token_with_cancellation(hub, &CancellationToken::new())
            .await
    }

    /// Like [`get_token`](Self::get_token), giving up with
    /// [`AuthError::Cancelled`] once `cancel` fires. Cancellation is honoured
    /// both while waiting for another caller's regeneration and during this
    /// caller's own.
    pub async fn get_token_with_cancellation(
        &self,
        hub: &str,
        cancel: &CancellationToken,
    ) -> Result<String, AuthError> {
        self.fetch(hub, cancel).await.map(|(token, _)| token)
    }

    /// Returns the current token together with the expiry it was recorded
    /// with, read under one lock.
    pub(crate) async fn fetch(
        &self,
        hub: &str,
        cancel: &CancellationToken,
    ) -> Result<(String, DateTime<Utc>), AuthError> {
        if let Some(cached) = self.cached_token() {
            return Ok(cached);
        }

        let _guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AuthError::Cancelled),
            guard = self.refresh_lock.lock() => guard,
        };

        // Another caller may have finished regenerating while we waited.
        if let Some(cached) = self.cached_token() {
            return Ok(cached);
        }

        let request = TokenRequest {
            hub: hub.to_string(),
            device_id: self.device_id.clone(),
            module_id: self.module_id.clone(),
            suggested_time_to_live: self.settings.suggested_time_to_live(),
        };
        log::debug!(
            "Regenerating {:?} token for '{}'",
            self.source.auth_type(),
            request.audience()
        );

        let created = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                log::debug!("Token regeneration for '{}' was cancelled", self.identity());
                return Err(AuthError::Cancelled);
            }
            result = self.source.create_token(&request, self.clock.now()) => result,
        };
        let token = created.inspect_err(|e| {
            log::warn!("Failed to create token for '{}': {e}", self.identity());
        })?;

        let expires_on = SharedAccessSignature::parse_at(&token, self.clock.now())
            .inspect_err(|e| {
                log::warn!("Token created for '{}' is unusable: {e}", self.identity());
            })?
            .expires_on();

        let state = TokenState::fetched(token.clone(), expires_on, &self.settings);
        log::debug!(
            "Token for '{}' expires at {expires_on}, refresh due at {}",
            self.identity(),
            state.refreshes_on
        );
        *self.state.write() = state;

        Ok((token, expires_on))
    }

    fn cached_token(&self) -> Option<(String, DateTime<Utc>)> {
        let now = self.clock.now();
        let state = self.state.read();
        match &state.token {
            Some(token) if now < state.refreshes_on => Some((token.clone(), state.expires_on)),
            _ => None,
        }
    }

    /// Copies the identity and any cached token into `builder`, clearing key
    /// and certificate material so the builder describes a token credential.
    pub fn populate(&self, builder: &mut ConnectionCredentialsBuilder) {
        builder.device_id = Some(self.device_id.clone());
        builder.module_id = self.module_id.clone();
        if let Some(token) = self.state.read().token.clone() {
            builder.shared_access_signature = Some(token);
        }
        builder.shared_access_key = None;
        builder.shared_access_key_name = None;
        builder.x509_certificate = None;
    }

    pub fn expires_on(&self) -> DateTime<Utc> {
        self.state.read().expires_on
    }

    pub fn refreshes_on(&self) -> DateTime<Utc> {
        self.state.read().refreshes_on
    }

    /// Whether the next [`get_token`](Self::get_token) will regenerate.
    pub fn is_expiring(&self) -> bool {
        self.clock.now() >= self.refreshes_on()
    }

    /// The cached token, if one has been fetched.
    pub fn current_token(&self) -> Option<String> {
        self.state.read().token.clone()
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn module_id(&self) -> Option<&str> {
        self.module_id.as_deref()
    }

    pub fn suggested_time_to_live(&self) -> Duration {
        self.settings.suggested_time_to_live()
    }

    pub fn time_buffer_percentage(&self) -> i32 {
        self.settings.time_buffer_percentage
    }

    pub fn settings(&self) -> RefreshSettings {
        self.settings
    }

    pub fn token_source(&self) -> &TokenSource {
        &self.source
    }

    pub fn auth_type(&self) -> AuthType {
        self.source.auth_type()
    }

    fn identity(&self) -> String {
        match &self.module_id {
            Some(module_id) => format!("{}/{module_id}", self.device_id),
            None => self.device_id.clone(),
        }
    }
}

impl fmt::Debug for TokenRefresher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("TokenRefresher")
            .field("device_id", &self.device_id)
            .field("module_id", &self.module_id)
            .field("source", &self.source)
            .field("settings", &self.settings)
            .field("has_token", &state.token.is_some())
            .field("expires_on", &state.expires_on)
            .field("refreshes_on", &state.refreshes_on)
            .finish()
    }
}
