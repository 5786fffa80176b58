use super::sas_token_generator::{SasTokenGenerator, SharedAccessKey};
use super::token_refresher::TokenRefresher;
use super::token_source::{TokenIssuer, TokenSource};
use super::types::{AuthType, RefreshSettings};
use crate::common::AuthError;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fmt::Write as _;
use std::sync::Arc;

/// A DER-encoded X.509 client certificate.
///
/// Certificate authentication happens in the TLS handshake, so the
/// credential never produces a token. Only the certificate bytes are held;
/// the private key stays with whatever TLS stack the transport uses.
#[derive(Clone, PartialEq, Eq)]
pub struct X509Credential {
    der: Vec<u8>,
}

impl X509Credential {
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidArgument`] if `der` is empty.
    pub fn from_der(der: impl Into<Vec<u8>>) -> Result<Self, AuthError> {
        let der = der.into();
        if der.is_empty() {
            return Err(AuthError::invalid_argument(
                "x509_certificate",
                "certificate bytes cannot be empty",
            ));
        }
        Ok(Self { der })
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Upper-case hex SHA-256 of the DER bytes, the form the hub registry
    /// uses for self-signed certificate thumbprints.
    pub fn thumbprint(&self) -> String {
        Sha256::digest(&self.der)
            .iter()
            .fold(String::with_capacity(64), |mut hex, byte| {
                let _ = write!(hex, "{byte:02X}");
                hex
            })
    }
}

impl fmt::Debug for X509Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("X509Credential")
            .field("thumbprint", &self.thumbprint())
            .finish()
    }
}

/// How a device or module proves its identity to the hub.
///
/// Every token-producing method shares one [`TokenRefresher`] and differs
/// only in its [`TokenSource`]. Certificates sit beside them as a separate
/// variant, which keeps "certificate plus key" or "certificate plus token"
/// impossible to construct.
#[derive(Clone, Debug)]
pub enum AuthenticationMethod {
    TokenRefresh(Arc<TokenRefresher>),
    X509 {
        device_id: String,
        module_id: Option<String>,
        certificate: X509Credential,
    },
}

fn require_non_empty(name: &str, value: &str) -> Result<(), AuthError> {
    if value.is_empty() {
        return Err(AuthError::InvalidOperation(format!("{name} cannot be empty")));
    }
    Ok(())
}

fn require_identity(device_id: &str, module_id: Option<&str>) -> Result<(), AuthError> {
    require_non_empty("device id", device_id)?;
    if let Some(module_id) = module_id {
        require_non_empty("module id", module_id)?;
    }
    Ok(())
}

impl AuthenticationMethod {
    /// Signs tokens locally with the identity's own key.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidOperation`] for an empty device or module id
    /// - [`AuthError::InvalidArgument`] for a blank id or a key that is not
    ///   valid base64
    /// - [`AuthError::OutOfRange`] for invalid `settings`
    pub fn shared_key(
        device_id: &str,
        module_id: Option<&str>,
        key_name: Option<&str>,
        key: &str,
        settings: RefreshSettings,
    ) -> Result<Self, AuthError> {
        require_identity(device_id, module_id)?;
        let generator =
            SasTokenGenerator::new(key_name.map(str::to_string), SharedAccessKey::new(key)?);
        TokenRefresher::new(
            device_id,
            module_id,
            TokenSource::SharedKey(generator),
            settings,
        )
        .map(Self::from)
    }

    /// Uses a pre-supplied SAS token until it expires.
    ///
    /// The token is parsed here, so format problems and already-expired
    /// tokens are reported before any token is requested.
    pub fn token(
        device_id: &str,
        module_id: Option<&str>,
        token: &str,
        settings: RefreshSettings,
    ) -> Result<Self, AuthError> {
        require_identity(device_id, module_id)?;
        require_non_empty("shared access signature", token)?;
        TokenRefresher::from_token(device_id, module_id, token, settings).map(Self::from)
    }

    /// Signs tokens for a leaf identity with a parent (edge) identity's key.
    ///
    /// The token audience is the leaf's; the parent only lends its key.
    pub fn on_behalf_of(
        parent_device_id: &str,
        parent_module_id: Option<&str>,
        device_id: &str,
        module_id: Option<&str>,
        parent_key_name: Option<&str>,
        parent_key: &str,
        settings: RefreshSettings,
    ) -> Result<Self, AuthError> {
        require_identity(parent_device_id, parent_module_id)?;
        require_identity(device_id, module_id)?;
        let generator = SasTokenGenerator::new(
            parent_key_name.map(str::to_string),
            SharedAccessKey::new(parent_key)?,
        );
        TokenRefresher::new(
            device_id,
            module_id,
            TokenSource::OnBehalfOf {
                parent_device_id: parent_device_id.to_string(),
                parent_module_id: parent_module_id.map(str::to_string),
                generator,
            },
            settings,
        )
        .map(Self::from)
    }

    /// Obtains tokens from an external issuer.
    pub fn delegated(
        device_id: &str,
        module_id: Option<&str>,
        issuer: Arc<dyn TokenIssuer>,
        settings: RefreshSettings,
    ) -> Result<Self, AuthError> {
        require_identity(device_id, module_id)?;
        TokenRefresher::new(
            device_id,
            module_id,
            TokenSource::Delegated(issuer),
            settings,
        )
        .map(Self::from)
    }

    /// Authenticates with an X.509 certificate.
    pub fn certificate(
        device_id: &str,
        module_id: Option<&str>,
        certificate: X509Credential,
    ) -> Result<Self, AuthError> {
        require_identity(device_id, module_id)?;
        if device_id.trim().is_empty() {
            return Err(AuthError::invalid_argument(
                "device_id",
                "cannot be empty or whitespace",
            ));
        }
        if module_id.is_some_and(|module_id| module_id.trim().is_empty()) {
            return Err(AuthError::invalid_argument(
                "module_id",
                "cannot be empty or whitespace",
            ));
        }
        Ok(Self::X509 {
            device_id: device_id.to_string(),
            module_id: module_id.map(str::to_string),
            certificate,
        })
    }

    pub fn device_id(&self) -> &str {
        match self {
            Self::TokenRefresh(refresher) => refresher.device_id(),
            Self::X509 { device_id, .. } => device_id,
        }
    }

    pub fn module_id(&self) -> Option<&str> {
        match self {
            Self::TokenRefresh(refresher) => refresher.module_id(),
            Self::X509 { module_id, .. } => module_id.as_deref(),
        }
    }

    pub fn auth_type(&self) -> AuthType {
        match self {
            Self::TokenRefresh(refresher) => refresher.auth_type(),
            Self::X509 { .. } => AuthType::Certificate,
        }
    }

    pub fn refresher(&self) -> Option<&Arc<TokenRefresher>> {
        match self {
            Self::TokenRefresh(refresher) => Some(refresher),
            Self::X509 { .. } => None,
        }
    }

    pub fn certificate_credential(&self) -> Option<&X509Credential> {
        match self {
            Self::X509 { certificate, .. } => Some(certificate),
            Self::TokenRefresh(_) => None,
        }
    }
}

impl From<TokenRefresher> for AuthenticationMethod {
    fn from(refresher: TokenRefresher) -> Self {
        Self::TokenRefresh(Arc::new(refresher))
    }
}

impl From<Arc<TokenRefresher>> for AuthenticationMethod {
    fn from(refresher: Arc<TokenRefresher>) -> Self {
        Self::TokenRefresh(refresher)
    }
}
