use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors raised by the authentication core.
///
/// Every variant describes a local failure: bad input at construction time,
/// a malformed or expired token, or a failed token-creation call. None of
/// them are retried by the core itself; callers decide whether to abort,
/// regenerate or fall back.
///
/// # Error Categories
///
/// ## Construction errors (fail fast, before any token is requested)
/// - [`InvalidArgument`](AuthError::InvalidArgument) - empty or whitespace identity, bad key
/// - [`OutOfRange`](AuthError::OutOfRange) - buffer percentage or time-to-live out of range
/// - [`InvalidOperation`](AuthError::InvalidOperation) - conflicting or missing credentials
///
/// ## Token errors (surface through the call that requested the token)
/// - [`MalformedToken`](AuthError::MalformedToken) - the SAS string cannot be parsed
/// - [`TokenExpired`](AuthError::TokenExpired) - the SAS string parsed but is already expired
/// - [`TokenCreation`](AuthError::TokenCreation) - signing or external issuance failed
/// - [`Cancelled`](AuthError::Cancelled) - the caller gave up while a token was being produced
///
/// # Examples
///
/// ```no_run
/// use client::auth::SharedAccessSignature;
/// use client::common::AuthError;
///
/// match SharedAccessSignature::parse(raw_token) {
///     Ok(sas) => println!("valid until {}", sas.expires_on()),
///     Err(AuthError::TokenExpired { expired_on }) => {
///         println!("token expired on {expired_on}, ask the issuer for a new one");
///     }
///     Err(AuthError::MalformedToken(reason)) => eprintln!("not a SAS token: {reason}"),
///     Err(other) => eprintln!("{other}"),
/// }
/// ```
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid argument '{name}': {reason}")]
    InvalidArgument { name: &'static str, reason: String },

    #[error("Argument '{name}' is out of range: {reason}")]
    OutOfRange { name: &'static str, reason: String },

    #[error("Malformed shared access signature: {0}")]
    MalformedToken(String),

    #[error("Shared access signature expired on {expired_on}")]
    TokenExpired { expired_on: DateTime<Utc> },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Token creation failed: {0}")]
    TokenCreation(String),

    #[error("Token request was cancelled")]
    Cancelled,
}

impl AuthError {
    pub(crate) fn invalid_argument(name: &'static str, reason: impl Into<String>) -> Self {
        AuthError::InvalidArgument {
            name,
            reason: reason.into(),
        }
    }

    pub(crate) fn out_of_range(name: &'static str, reason: impl Into<String>) -> Self {
        AuthError::OutOfRange {
            name,
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        AuthError::MalformedToken(reason.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_context() {
        let err = AuthError::invalid_argument("device_id", "cannot be empty");
        assert_eq!(
            err.to_string(),
            "Invalid argument 'device_id': cannot be empty"
        );

        let err = AuthError::out_of_range("time_buffer_percentage", "101 is not within [0, 100]");
        assert!(err.to_string().contains("time_buffer_percentage"));
        assert!(err.to_string().contains("101"));

        let err = AuthError::malformed("missing field 'se'");
        assert!(err.to_string().starts_with("Malformed shared access signature"));
    }
}
