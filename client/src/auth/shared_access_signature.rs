//! Shared Access Signature (SAS) token codec.
//!
//! A SAS token is a single line of ASCII:
//!
//! ```text
//! SharedAccessSignature sr=<audience>&sig=<signature>&se=<expiry>[&skn=<key name>]
//! ```
//!
//! where every value is percent-encoded, `se` is an integer number of seconds
//! since the Unix epoch and field order is not significant. This module parses
//! tokens into [`SharedAccessSignature`] and assembles them with
//! [`SharedAccessSignatureBuilder`].

use super::sas_token_generator::{SharedAccessKey, compute_signature, verify_signature};
use crate::common::AuthError;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::fmt;

/// Keyword every SAS token starts with.
pub const SHARED_ACCESS_SIGNATURE: &str = "SharedAccessSignature";

const AUDIENCE_FIELD: &str = "sr";
const SIGNATURE_FIELD: &str = "sig";
const EXPIRY_FIELD: &str = "se";
const KEY_NAME_FIELD: &str = "skn";

/// Returns the token expiry for a token issued at `start` and valid for
/// `time_to_live`, as whole seconds since the Unix epoch (rounded down).
pub fn build_expires_on(time_to_live: Duration, start: DateTime<Utc>) -> String {
    let expiry = start
        .checked_add_signed(time_to_live)
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    expiry.timestamp().to_string()
}

/// Returns the decoded resource path a device or module token is scoped to:
/// `{hub}/devices/{device_id}[/modules/{module_id}]`.
///
/// Identity segments are percent-encoded so that ids containing `/` or other
/// reserved characters cannot change the shape of the path. The module
/// segment is only appended when `module_id` is non-empty.
pub fn resource_uri(hub: &str, device_id: &str, module_id: Option<&str>) -> String {
    match module_id.filter(|m| !m.is_empty()) {
        Some(module_id) => format!(
            "{hub}/devices/{}/modules/{}",
            urlencoding::encode(device_id),
            urlencoding::encode(module_id)
        ),
        None => format!("{hub}/devices/{}", urlencoding::encode(device_id)),
    }
}

/// Returns the percent-encoded audience for a device or module token, as it
/// appears on the wire and in the string that gets signed.
pub fn build_audience(hub: &str, device_id: &str, module_id: Option<&str>) -> String {
    urlencoding::encode(&resource_uri(hub, device_id, module_id)).into_owned()
}

/// A parsed SAS token.
///
/// Instances only come out of [`SharedAccessSignature::parse`] and are
/// immutable. The audience and signature are stored decoded.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedAccessSignature {
    key_name: Option<String>,
    audience: String,
    signature: String,
    expiry: String,
    expires_on: DateTime<Utc>,
}

impl SharedAccessSignature {
    /// Parses a SAS token against the current system time.
    ///
    /// # Errors
    ///
    /// - [`AuthError::MalformedToken`] if the keyword is missing or corrupted,
    ///   a required field (`sr`, `sig`, `se`) is missing, empty, duplicated or
    ///   cannot be decoded, or `se` is not an integer timestamp.
    /// - [`AuthError::TokenExpired`] if the token parsed but its expiry has
    ///   already passed.
    pub fn parse(raw: &str) -> Result<Self, AuthError> {
        Self::parse_at(raw, Utc::now())
    }

    /// Parses a SAS token, checking expiry against `now`.
    pub fn parse_at(raw: &str, now: DateTime<Utc>) -> Result<Self, AuthError> {
        let sas = Self::parse_fields(raw)?;
        if sas.is_expired_at(now) {
            return Err(AuthError::TokenExpired {
                expired_on: sas.expires_on,
            });
        }
        Ok(sas)
    }

    fn parse_fields(raw: &str) -> Result<Self, AuthError> {
        let raw = raw.trim();
        let (keyword, fields) = raw
            .split_once(char::is_whitespace)
            .ok_or_else(|| AuthError::malformed("expected keyword followed by fields"))?;

        if keyword != SHARED_ACCESS_SIGNATURE {
            return Err(AuthError::malformed(format!(
                "expected keyword '{SHARED_ACCESS_SIGNATURE}'"
            )));
        }
        if fields.is_empty() || fields.contains(char::is_whitespace) {
            return Err(AuthError::malformed(
                "expected a single whitespace between keyword and fields",
            ));
        }

        let mut values: HashMap<&str, String> = HashMap::new();
        for field in fields.split('&').filter(|f| !f.is_empty()) {
            let (name, value) = field
                .split_once('=')
                .ok_or_else(|| AuthError::malformed(format!("field '{field}' has no value")))?;
            let decoded = urlencoding::decode(value).map_err(|e| {
                AuthError::malformed(format!("field '{name}' cannot be decoded: {e}"))
            })?;
            if values.insert(name, decoded.into_owned()).is_some() {
                return Err(AuthError::malformed(format!("duplicate field '{name}'")));
            }
        }

        let mut required = |name: &str| -> Result<String, AuthError> {
            values
                .remove(name)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| AuthError::malformed(format!("missing field '{name}'")))
        };

        let audience = required(AUDIENCE_FIELD)?;
        let signature = required(SIGNATURE_FIELD)?;
        let expiry = required(EXPIRY_FIELD)?;

        let seconds: i64 = expiry.parse().map_err(|_| {
            AuthError::malformed(format!("field '{EXPIRY_FIELD}' is not an integer: '{expiry}'"))
        })?;
        let expires_on = DateTime::from_timestamp(seconds, 0).ok_or_else(|| {
            AuthError::malformed(format!("field '{EXPIRY_FIELD}' is out of range: {seconds}"))
        })?;

        let key_name = values.remove(KEY_NAME_FIELD).filter(|k| !k.is_empty());

        Ok(Self {
            key_name,
            audience,
            signature,
            expiry,
            expires_on,
        })
    }

    pub fn key_name(&self) -> Option<&str> {
        self.key_name.as_deref()
    }

    /// The decoded resource path the token is scoped to.
    pub fn audience(&self) -> &str {
        &self.audience
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn expires_on(&self) -> DateTime<Utc> {
        self.expires_on
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_on <= now
    }

    /// Recomputes the HMAC-SHA256 signature with `key` and checks it against
    /// the one carried by the token.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidOperation`] when the signature does not
    /// match and [`AuthError::InvalidArgument`] when the token signature is
    /// not valid base64.
    pub fn verify(&self, key: &SharedAccessKey) -> Result<(), AuthError> {
        let string_to_sign = format!(
            "{}\n{}",
            urlencoding::encode(&self.audience),
            self.expiry
        );
        verify_signature(key, &string_to_sign, &self.signature)
    }
}

impl fmt::Debug for SharedAccessSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedAccessSignature")
            .field("key_name", &self.key_name)
            .field("audience", &self.audience)
            .field("signature", &"****")
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

/// Assembles SAS token strings.
///
/// The builder does not sign on its own: either supply a finished signature
/// with [`signature`](Self::signature) or let [`sign_with`](Self::sign_with)
/// compute one from a key. The expiry is taken from
/// [`expiry`](Self::expiry) when given, otherwise computed from the
/// time-to-live and the start instant passed to [`build`](Self::build).
///
/// # Examples
///
/// ```no_run
/// use chrono::{Duration, Utc};
/// use client::auth::{SharedAccessKey, SharedAccessSignatureBuilder};
///
/// let key = SharedAccessKey::new("dGhpcyBpcyBub3QgYSByZWFsIGtleQ==")?;
/// let now = Utc::now();
/// let token = SharedAccessSignatureBuilder::for_device("myhub.azure-devices.net", "thermostat", None)
///     .time_to_live(Duration::hours(1))
///     .sign_with(&key, now)?
///     .build(now)?;
/// ```
#[derive(Clone, Default)]
pub struct SharedAccessSignatureBuilder {
    audience: String,
    key_name: Option<String>,
    signature: Option<String>,
    time_to_live: Option<Duration>,
    expiry: Option<String>,
}

impl SharedAccessSignatureBuilder {
    /// Starts a token for the given decoded audience.
    pub fn new(audience: impl Into<String>) -> Self {
        Self {
            audience: audience.into(),
            ..Self::default()
        }
    }

    /// Starts a token scoped to a device, or to a module when `module_id` is
    /// non-empty.
    pub fn for_device(hub: &str, device_id: &str, module_id: Option<&str>) -> Self {
        Self::new(resource_uri(hub, device_id, module_id))
    }

    pub fn key_name(mut self, key_name: impl Into<String>) -> Self {
        let key_name = key_name.into();
        self.key_name = (!key_name.is_empty()).then_some(key_name);
        self
    }

    pub fn signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    pub fn time_to_live(mut self, time_to_live: Duration) -> Self {
        self.time_to_live = Some(time_to_live);
        self
    }

    /// Sets the expiry verbatim (seconds since the Unix epoch), overriding
    /// the time-to-live.
    pub fn expiry(mut self, expiry: impl Into<String>) -> Self {
        self.expiry = Some(expiry.into());
        self
    }

    pub fn audience(&self) -> &str {
        &self.audience
    }

    fn resolve_expiry(&self, start: DateTime<Utc>) -> Result<String, AuthError> {
        match (&self.expiry, self.time_to_live) {
            (Some(expiry), _) => Ok(expiry.clone()),
            (None, Some(ttl)) => Ok(build_expires_on(ttl, start)),
            (None, None) => Err(AuthError::invalid_argument(
                "time_to_live",
                "either a time-to-live or an explicit expiry is required",
            )),
        }
    }

    /// Pins the expiry and computes the HMAC-SHA256 signature over
    /// `{encoded audience}\n{expiry}` with `key`.
    pub fn sign_with(mut self, key: &SharedAccessKey, start: DateTime<Utc>) -> Result<Self, AuthError> {
        let expiry = self.resolve_expiry(start)?;
        let string_to_sign = format!("{}\n{}", urlencoding::encode(&self.audience), expiry);
        self.signature = Some(compute_signature(key, &string_to_sign)?);
        self.expiry = Some(expiry);
        Ok(self)
    }

    /// Renders the token.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidArgument`] when the audience or signature
    /// is missing, or when neither an expiry nor a time-to-live was given.
    pub fn build(&self, start: DateTime<Utc>) -> Result<String, AuthError> {
        if self.audience.trim().is_empty() {
            return Err(AuthError::invalid_argument("audience", "cannot be empty"));
        }
        let signature = self
            .signature
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AuthError::invalid_argument("signature", "cannot be empty"))?;
        let expiry = self.resolve_expiry(start)?;

        let mut token = format!(
            "{SHARED_ACCESS_SIGNATURE} {AUDIENCE_FIELD}={}&{SIGNATURE_FIELD}={}&{EXPIRY_FIELD}={}",
            urlencoding::encode(&self.audience),
            urlencoding::encode(signature),
            urlencoding::encode(&expiry)
        );
        if let Some(key_name) = &self.key_name {
            token.push_str(&format!("&{KEY_NAME_FIELD}={}", urlencoding::encode(key_name)));
        }
        Ok(token)
    }
}

impl fmt::Debug for SharedAccessSignatureBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedAccessSignatureBuilder")
            .field("audience", &self.audience)
            .field("key_name", &self.key_name)
            .field("signature", &self.signature.as_ref().map(|_| "****"))
            .field("time_to_live", &self.time_to_live)
            .field("expiry", &self.expiry)
            .finish()
    }
}
