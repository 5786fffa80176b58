//! Environment variable access for refresh configuration.
//!
//! Values are trimmed and must be non-empty; numeric settings are parsed
//! through [`EnvUtils::get_parsed_var`] so a typo in a deployment manifest
//! fails loudly instead of silently falling back to a default.

use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur when reading an environment variable.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvVarError {
    /// Environment variable is not set
    #[error("Environment variable '{name}' not found")]
    NotFound { name: String },

    /// Environment variable contains invalid UTF-8 characters
    #[error("Environment variable '{name}' contains invalid UTF-8 characters")]
    InvalidUtf8 { name: String },

    /// Environment variable is set but contains only whitespace or is empty
    #[error("Environment variable '{name}' is empty")]
    Empty { name: String },

    /// Environment variable is set but cannot be parsed into the expected type
    #[error("Environment variable '{name}' has invalid value '{value}': {reason}")]
    Invalid {
        name: String,
        value: String,
        reason: String,
    },
}

/// Validated access to environment variables.
///
/// # Examples
///
/// ```no_run
/// use client::utils::EnvUtils;
///
/// let ttl: Option<i64> = EnvUtils::get_parsed_var("IOTHUB_SAS_TTL_SECS")?;
/// let ttl = ttl.unwrap_or(3600);
/// ```
pub struct EnvUtils;

impl EnvUtils {
    /// Gets an environment variable, trimmed and validated as non-empty.
    ///
    /// # Errors
    ///
    /// Returns [`EnvVarError`] if the variable is missing, empty or contains
    /// invalid UTF-8.
    pub fn get_validated_var(name: &str) -> Result<String, EnvVarError> {
        match std::env::var(name) {
            Ok(value) => {
                let trimmed = value.trim();
                if trimmed.is_empty() {
                    Err(EnvVarError::Empty {
                        name: name.to_string(),
                    })
                } else {
                    Ok(trimmed.to_string())
                }
            }
            Err(std::env::VarError::NotPresent) => Err(EnvVarError::NotFound {
                name: name.to_string(),
            }),
            Err(std::env::VarError::NotUnicode(_)) => Err(EnvVarError::InvalidUtf8 {
                name: name.to_string(),
            }),
        }
    }

    /// Gets an optional environment variable and parses it.
    ///
    /// Unset or empty variables yield `Ok(None)`. A value that is present but
    /// fails to parse is an error.
    ///
    /// # Errors
    ///
    /// Returns [`EnvVarError::Invalid`] when the value cannot be parsed as `T`
    /// and [`EnvVarError::InvalidUtf8`] when it is not valid UTF-8.
    pub fn get_parsed_var<T>(name: &str) -> Result<Option<T>, EnvVarError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let value = match Self::get_validated_var(name) {
            Ok(value) => value,
            Err(EnvVarError::NotFound { .. }) | Err(EnvVarError::Empty { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };

        value
            .parse::<T>()
            .map(Some)
            .map_err(|e| EnvVarError::Invalid {
                name: name.to_string(),
                value,
                reason: e.to_string(),
            })
    }
}
