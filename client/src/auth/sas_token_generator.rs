use super::shared_access_signature::SharedAccessSignatureBuilder;
use crate::common::AuthError;
use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use rand::{CryptoRng, RngCore};
use sha2::Sha256;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

type HmacSha256 = Hmac<Sha256>;

/// Default length in bytes of keys produced by [`SharedAccessKey::generate`].
pub const DEFAULT_KEY_LENGTH: usize = 32;

/// A base64-encoded symmetric key used to sign SAS tokens.
///
/// The key is checked for valid base64 at construction, wiped from memory on
/// drop and never printed by `Debug`.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedAccessKey {
    encoded: String,
}

impl SharedAccessKey {
    /// Wraps a base64-encoded key.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidArgument`] if the key is empty or is not
    /// valid base64.
    pub fn new(encoded: impl Into<String>) -> Result<Self, AuthError> {
        let key = Self {
            encoded: encoded.into(),
        };
        if key.encoded.trim().is_empty() {
            return Err(AuthError::invalid_argument(
                "shared_access_key",
                "cannot be empty",
            ));
        }
        key.decoded()?;
        Ok(key)
    }

    /// Generates a fresh random key of `length` bytes from `rng`.
    ///
    /// The random source is passed in explicitly so callers decide between
    /// an OS-backed generator and a seeded one in tests.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R, length: usize) -> Self {
        let mut bytes = Zeroizing::new(vec![0u8; length.max(1)]);
        rng.fill_bytes(&mut bytes);
        Self {
            encoded: general_purpose::STANDARD.encode(bytes.as_slice()),
        }
    }

    /// Returns the base64 form of the key.
    pub fn expose(&self) -> &str {
        &self.encoded
    }

    fn decoded(&self) -> Result<Zeroizing<Vec<u8>>, AuthError> {
        general_purpose::STANDARD
            .decode(self.encoded.trim())
            .map(Zeroizing::new)
            .map_err(|e| {
                AuthError::invalid_argument(
                    "shared_access_key",
                    format!("failed to decode key: {e}"),
                )
            })
    }

    fn mac(&self) -> Result<HmacSha256, AuthError> {
        let key_bytes = self.decoded()?;
        HmacSha256::new_from_slice(&key_bytes)
            .map_err(|e| AuthError::TokenCreation(format!("failed to create HMAC: {e}")))
    }
}

impl fmt::Debug for SharedAccessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedAccessKey(****)")
    }
}

/// Computes the base64 HMAC-SHA256 of `string_to_sign` under `key`.
pub(crate) fn compute_signature(
    key: &SharedAccessKey,
    string_to_sign: &str,
) -> Result<String, AuthError> {
    let mut mac = key.mac()?;
    mac.update(string_to_sign.as_bytes());
    Ok(general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

/// Checks `signature` against the HMAC-SHA256 of `string_to_sign` in
/// constant time.
pub(crate) fn verify_signature(
    key: &SharedAccessKey,
    string_to_sign: &str,
    signature: &str,
) -> Result<(), AuthError> {
    let expected = general_purpose::STANDARD.decode(signature).map_err(|e| {
        AuthError::invalid_argument("signature", format!("not valid base64: {e}"))
    })?;
    let mut mac = key.mac()?;
    mac.update(string_to_sign.as_bytes());
    mac.verify_slice(&expected).map_err(|_| {
        AuthError::InvalidOperation("signature does not match the supplied key".to_string())
    })
}

/// Generator for IoT Hub Shared Access Signature (SAS) tokens.
///
/// Creates time-limited tokens by signing `{encoded audience}\n{expiry}` with
/// HMAC-SHA256 under a shared access key. Signing is purely local: no network
/// round-trip is involved, so a token can be produced whenever the refresher
/// asks for one.
///
/// # Security Notes
///
/// - Keys are base64 decoded only for the duration of a signing call
/// - The decoded key bytes are zeroized once the MAC is computed
/// - Audiences and signatures are percent-encoded on the wire
///
/// # Examples
///
/// ```no_run
/// use chrono::{Duration, Utc};
/// use client::auth::{SasTokenGenerator, SharedAccessKey};
///
/// let key = SharedAccessKey::new("dGhpcyBpcyBub3QgYSByZWFsIGtleQ==")?;
/// let generator = SasTokenGenerator::new(None, key);
/// let token = generator.generate(
///     "contoso.azure-devices.net/devices/thermostat",
///     Duration::hours(1),
///     Utc::now(),
/// )?;
/// ```
#[derive(Clone, Debug)]
pub struct SasTokenGenerator {
    key_name: Option<String>,
    key: SharedAccessKey,
}

impl SasTokenGenerator {
    /// Creates a generator signing with `key`. A non-empty `key_name` is
    /// written into the token as `skn`, which tells the hub to look the key
    /// up in its shared access policies instead of the device registry.
    pub fn new(key_name: Option<String>, key: SharedAccessKey) -> Self {
        Self {
            key_name: key_name.filter(|name| !name.trim().is_empty()),
            key,
        }
    }

    pub fn key_name(&self) -> Option<&str> {
        self.key_name.as_deref()
    }

    pub fn key(&self) -> &SharedAccessKey {
        &self.key
    }

    /// Generates a token for the decoded `audience`, valid for `time_to_live`
    /// from `now`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::TokenCreation`] if the HMAC cannot be created and
    /// [`AuthError::InvalidArgument`] if the audience is empty.
    pub fn generate(
        &self,
        audience: &str,
        time_to_live: Duration,
        now: DateTime<Utc>,
    ) -> Result<String, AuthError> {
        let mut builder = SharedAccessSignatureBuilder::new(audience).time_to_live(time_to_live);
        if let Some(key_name) = &self.key_name {
            builder = builder.key_name(key_name.clone());
        }
        builder.sign_with(&self.key, now)?.build(now)
    }
}
