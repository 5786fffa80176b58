use crate::common::AuthError;
use crate::utils::{EnvUtils, EnvVarError};
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Default suggested token lifetime (one hour).
pub const DEFAULT_TIME_TO_LIVE_SECS: i64 = 3600;

/// Default share of the lifetime reserved for proactive renewal.
pub const DEFAULT_TIME_BUFFER_PERCENTAGE: i32 = 15;

/// Environment variable overriding [`RefreshSettings::suggested_time_to_live_secs`].
pub const TIME_TO_LIVE_ENV_VAR: &str = "IOTHUB_SAS_TTL_SECS";

/// Environment variable overriding [`RefreshSettings::time_buffer_percentage`].
pub const TIME_BUFFER_PERCENTAGE_ENV_VAR: &str = "IOTHUB_SAS_BUFFER_PERCENTAGE";

/// Authentication method reported by a credential.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    /// Tokens signed locally with the device or module's own symmetric key
    SharedKey,
    /// A pre-supplied SAS token that cannot be renewed by the client
    Token,
    /// Tokens for a leaf identity signed with a parent (edge) key
    OnBehalfOf,
    /// Tokens issued by an external collaborator (HSM, edge workload API)
    Delegated,
    /// X.509 certificate authentication, no tokens involved
    Certificate,
}

/// Token lifetime and renewal timing for a refreshing credential.
///
/// The suggested time-to-live is what the client asks for; the issuer of the
/// token has the final say and the refresher always trusts the expiry inside
/// the token it gets back. The buffer percentage decides how far ahead of
/// that expiry renewal starts:
///
/// ```text
/// refreshes_on = expires_on - suggested_time_to_live * time_buffer_percentage / 100
/// ```
///
/// A buffer of `0` renews only once the token has expired; `100` renews as
/// soon as a token has been issued.
///
/// # Configuration
///
/// Settings deserialize from any serde format with missing fields falling
/// back to the defaults, and can be read from the process environment with
/// [`RefreshSettings::from_env`]:
///
/// ```toml
/// [token]
/// suggested_time_to_live_secs = 3600
/// time_buffer_percentage = 15
/// ```
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RefreshSettings {
    /// Requested token lifetime in seconds, must be positive
    pub suggested_time_to_live_secs: i64,
    /// Renewal buffer as a percentage of the lifetime, within `[0, 100]`
    pub time_buffer_percentage: i32,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            suggested_time_to_live_secs: DEFAULT_TIME_TO_LIVE_SECS,
            time_buffer_percentage: DEFAULT_TIME_BUFFER_PERCENTAGE,
        }
    }
}

impl RefreshSettings {
    /// Creates settings from a lifetime and a buffer percentage.
    ///
    /// Token expiries are whole seconds, so a positive lifetime with a
    /// fractional part is rounded up: 500ms becomes 1s and 1500ms becomes 2s.
    /// Nothing is validated until [`validate`](Self::validate) or a
    /// credential is constructed with them.
    pub fn new(suggested_time_to_live: Duration, time_buffer_percentage: i32) -> Self {
        let whole = suggested_time_to_live.num_seconds();
        let has_fraction = Duration::try_seconds(whole)
            .is_some_and(|truncated| suggested_time_to_live > truncated);
        Self {
            suggested_time_to_live_secs: if has_fraction {
                whole.saturating_add(1)
            } else {
                whole
            },
            time_buffer_percentage,
        }
    }

    /// Checks the settings against their allowed ranges.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::OutOfRange`] if the buffer percentage is outside
    /// `[0, 100]` or the time-to-live is not a positive, representable number
    /// of seconds.
    pub fn validate(&self) -> Result<(), AuthError> {
        if !(0..=100).contains(&self.time_buffer_percentage) {
            return Err(AuthError::out_of_range(
                "time_buffer_percentage",
                format!(
                    "{} is not within [0, 100]",
                    self.time_buffer_percentage
                ),
            ));
        }
        if self.suggested_time_to_live_secs <= 0 {
            return Err(AuthError::out_of_range(
                "suggested_time_to_live",
                format!(
                    "{}s must be greater than zero",
                    self.suggested_time_to_live_secs
                ),
            ));
        }
        if Duration::try_seconds(self.suggested_time_to_live_secs).is_none() {
            return Err(AuthError::out_of_range(
                "suggested_time_to_live",
                format!("{}s is too large", self.suggested_time_to_live_secs),
            ));
        }
        Ok(())
    }

    pub fn suggested_time_to_live(&self) -> Duration {
        Duration::try_seconds(self.suggested_time_to_live_secs).unwrap_or(Duration::MAX)
    }

    /// How long before a token's expiry renewal is due.
    pub fn refresh_margin(&self) -> Duration {
        let millis = self
            .suggested_time_to_live_secs
            .saturating_mul(10)
            .saturating_mul(i64::from(self.time_buffer_percentage));
        Duration::try_milliseconds(millis).unwrap_or(Duration::MAX)
    }

    /// Reads settings from [`TIME_TO_LIVE_ENV_VAR`] and
    /// [`TIME_BUFFER_PERCENTAGE_ENV_VAR`], using defaults for unset variables.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidArgument`] if a variable is set to
    /// something that is not an integer, and [`AuthError::OutOfRange`] if the
    /// resulting settings fail [`validate`](Self::validate).
    pub fn from_env() -> Result<Self, AuthError> {
        let defaults = Self::default();
        let settings = Self {
            suggested_time_to_live_secs: EnvUtils::get_parsed_var(TIME_TO_LIVE_ENV_VAR)
                .map_err(|e| env_error("suggested_time_to_live", e))?
                .unwrap_or(defaults.suggested_time_to_live_secs),
            time_buffer_percentage: EnvUtils::get_parsed_var(TIME_BUFFER_PERCENTAGE_ENV_VAR)
                .map_err(|e| env_error("time_buffer_percentage", e))?
                .unwrap_or(defaults.time_buffer_percentage),
        };
        settings.validate()?;
        Ok(settings)
    }
}

fn env_error(name: &'static str, error: EnvVarError) -> AuthError {
    AuthError::invalid_argument(name, error.to_string())
}
