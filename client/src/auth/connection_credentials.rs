use super::authentication_method::{AuthenticationMethod, X509Credential};
use super::sas_token_generator::SharedAccessKey;
use super::token_refresher::TokenRefresher;
use super::token_source::TokenSource;
use super::types::{AuthType, RefreshSettings};
use crate::common::AuthError;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything a transport needs to authenticate one device or module
/// against one hub.
///
/// Credentials are immutable once built. Exactly one of the shared access
/// key, shared access signature and certificate accessors reports a value,
/// depending on the [`AuthenticationMethod`]. Delegated issuance counts as a
/// signature credential: it always holds the most recently issued token, so
/// it is built with [`with_initial_token`](Self::with_initial_token).
///
/// # Examples
///
/// ```no_run
/// use client::auth::ConnectionCredentialsBuilder;
///
/// # async fn example() -> Result<(), client::common::AuthError> {
/// let credentials = ConnectionCredentialsBuilder::new("contoso.azure-devices.net")
///     .device_id("thermostat")
///     .shared_access_key("dGhpcyBpcyBub3QgYSByZWFsIGtleQ==")
///     .build()?;
///
/// let header = credentials.authorization_header().await?;
/// # Ok(())
/// # }
/// ```
fn validate_host_name(host_name: &str) -> Result<(), AuthError> {
    if host_name.trim().is_empty() {
        return Err(AuthError::invalid_argument(
            "host_name",
            "cannot be empty or whitespace",
        ));
    }
    Ok(())
}

#[derive(Clone, Debug)]
pub struct ConnectionCredentials {
    host_name: String,
    gateway_host_name: Option<String>,
    method: AuthenticationMethod,
}

impl ConnectionCredentials {
    /// # Errors
    ///
    /// - [`AuthError::InvalidArgument`] if `host_name` is blank
    /// - [`AuthError::InvalidOperation`] for a delegated method that has not
    ///   been issued a token yet
    pub fn new(host_name: &str, method: AuthenticationMethod) -> Result<Self, AuthError> {
        validate_host_name(host_name)?;
        if let Some(refresher) = method.refresher() {
            if matches!(refresher.token_source(), TokenSource::Delegated(_))
                && refresher.current_token().is_none()
            {
                return Err(AuthError::InvalidOperation(
                    "delegated credentials need an issued token, build them with with_initial_token"
                        .to_string(),
                ));
            }
        }
        Ok(Self {
            host_name: host_name.to_string(),
            gateway_host_name: None,
            method,
        })
    }

    /// Builds credentials after obtaining the first token for `host_name`.
    ///
    /// Required for delegated issuance; other token methods are simply
    /// warmed up, and certificates are taken as they are.
    ///
    /// # Errors
    ///
    /// Besides the errors of [`new`](Self::new), whatever the first token
    /// request reports.
    pub async fn with_initial_token(
        host_name: &str,
        method: AuthenticationMethod,
    ) -> Result<Self, AuthError> {
        validate_host_name(host_name)?;
        if let Some(refresher) = method.refresher() {
            refresher.get_token(host_name).await?;
        }
        Self::new(host_name, method)
    }

    /// Routes connections through a gateway (for example an edge device)
    /// while tokens stay scoped to the hub.
    pub fn with_gateway_host_name(mut self, gateway_host_name: impl Into<String>) -> Self {
        let gateway_host_name = gateway_host_name.into();
        self.gateway_host_name = Some(gateway_host_name).filter(|host| !host.trim().is_empty());
        self
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    pub fn gateway_host_name(&self) -> Option<&str> {
        self.gateway_host_name.as_deref()
    }

    /// The host a transport should actually connect to.
    pub fn effective_host_name(&self) -> &str {
        self.gateway_host_name().unwrap_or(&self.host_name)
    }

    pub fn device_id(&self) -> &str {
        self.method.device_id()
    }

    pub fn module_id(&self) -> Option<&str> {
        self.method.module_id()
    }

    pub fn authentication_method(&self) -> &AuthenticationMethod {
        &self.method
    }

    pub fn auth_type(&self) -> AuthType {
        self.method.auth_type()
    }

    fn token_source(&self) -> Option<&TokenSource> {
        self.method.refresher().map(|refresher| refresher.token_source())
    }

    /// The signing key of a key-based credential.
    pub fn shared_access_key(&self) -> Option<&SharedAccessKey> {
        self.token_source().and_then(TokenSource::shared_access_key)
    }

    pub fn shared_access_key_name(&self) -> Option<&str> {
        self.token_source()
            .and_then(TokenSource::shared_access_key_name)
    }

    /// The token of a signature-based credential: the pre-supplied token, or
    /// for delegated issuance the most recently issued one.
    pub fn shared_access_signature(&self) -> Option<String> {
        let refresher = self.method.refresher()?;
        let source = refresher.token_source();
        match source {
            TokenSource::Delegated(_) => refresher.current_token(),
            _ => source.fixed_token().map(str::to_string),
        }
    }

    /// Whether new tokens can be obtained once the current one runs out.
    /// False for pre-supplied tokens and certificates.
    pub fn can_renew(&self) -> bool {
        self.token_source().is_some_and(TokenSource::can_renew)
    }

    pub fn using_x509_cert(&self) -> bool {
        matches!(self.method, AuthenticationMethod::X509 { .. })
    }

    pub fn x509_certificate(&self) -> Option<&X509Credential> {
        self.method.certificate_credential()
    }

    /// The decoded resource path tokens for this identity are scoped to.
    pub fn audience(&self) -> String {
        super::shared_access_signature::resource_uri(
            &self.host_name,
            self.device_id(),
            self.module_id(),
        )
    }

    /// Returns a current token for the hub.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidOperation`] for certificate credentials,
    /// otherwise whatever the refresher reports.
    pub async fn get_token(&self) -> Result<String, AuthError> {
        self.get_token_with_cancellation(&CancellationToken::new())
            .await
    }

    pub async fn get_token_with_cancellation(
        &self,
        cancel: &CancellationToken,
    ) -> Result<String, AuthError> {
        self.fetch(cancel).await.map(|(token, _)| token)
    }

    pub(crate) async fn fetch(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(String, DateTime<Utc>), AuthError> {
        self.require_refresher()?.fetch(&self.host_name, cancel).await
    }

    /// Value for an HTTP `Authorization` header. SAS tokens are sent as-is,
    /// without a scheme prefix.
    pub async fn authorization_header(&self) -> Result<String, AuthError> {
        self.get_token().await
    }

    pub fn expires_on(&self) -> Option<DateTime<Utc>> {
        self.method.refresher().map(|refresher| refresher.expires_on())
    }

    pub fn refreshes_on(&self) -> Option<DateTime<Utc>> {
        self.method
            .refresher()
            .map(|refresher| refresher.refreshes_on())
    }

    /// Certificate credentials never expire from the client's point of view.
    pub fn is_expiring(&self) -> bool {
        self.method
            .refresher()
            .is_some_and(|refresher| refresher.is_expiring())
    }

    /// Writes host, identity and credential fields into `builder`.
    pub fn populate(&self, builder: &mut ConnectionCredentialsBuilder) {
        builder.host_name = Some(self.host_name.clone());
        builder.gateway_host_name = self.gateway_host_name.clone();
        match &self.method {
            AuthenticationMethod::TokenRefresh(refresher) => {
                builder.x509_certificate = None;
                builder.refresh_settings = refresher.settings();
                refresher.populate(builder);
            }
            AuthenticationMethod::X509 {
                device_id,
                module_id,
                certificate,
            } => {
                builder.device_id = Some(device_id.clone());
                builder.module_id = module_id.clone();
                builder.shared_access_key = None;
                builder.shared_access_key_name = None;
                builder.shared_access_signature = None;
                builder.x509_certificate = Some(certificate.clone());
            }
        }
    }

    fn require_refresher(&self) -> Result<&Arc<TokenRefresher>, AuthError> {
        self.method.refresher().ok_or_else(|| {
            AuthError::InvalidOperation(
                "certificate credentials do not produce tokens".to_string(),
            )
        })
    }
}

/// Mutable bag of credential fields, validated into
/// [`ConnectionCredentials`] by [`build`](Self::build).
///
/// Fields are public so that credentials and refreshers can
/// [`populate`](ConnectionCredentials::populate) them in place.
#[derive(Clone, Default)]
pub struct ConnectionCredentialsBuilder {
    pub host_name: Option<String>,
    pub gateway_host_name: Option<String>,
    pub device_id: Option<String>,
    pub module_id: Option<String>,
    pub shared_access_key_name: Option<String>,
    pub shared_access_key: Option<String>,
    pub shared_access_signature: Option<String>,
    pub x509_certificate: Option<X509Credential>,
    pub refresh_settings: RefreshSettings,
}

impl ConnectionCredentialsBuilder {
    pub fn new(host_name: impl Into<String>) -> Self {
        Self {
            host_name: Some(host_name.into()),
            ..Self::default()
        }
    }

    pub fn gateway_host_name(mut self, gateway_host_name: impl Into<String>) -> Self {
        self.gateway_host_name = Some(gateway_host_name.into());
        self
    }

    pub fn device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn module_id(mut self, module_id: impl Into<String>) -> Self {
        self.module_id = Some(module_id.into());
        self
    }

    pub fn shared_access_key_name(mut self, key_name: impl Into<String>) -> Self {
        self.shared_access_key_name = Some(key_name.into());
        self
    }

    pub fn shared_access_key(mut self, key: impl Into<String>) -> Self {
        self.shared_access_key = Some(key.into());
        self
    }

    pub fn shared_access_signature(mut self, signature: impl Into<String>) -> Self {
        self.shared_access_signature = Some(signature.into());
        self
    }

    pub fn x509_certificate(mut self, certificate: X509Credential) -> Self {
        self.x509_certificate = Some(certificate);
        self
    }

    pub fn refresh_settings(mut self, settings: RefreshSettings) -> Self {
        self.refresh_settings = settings;
        self
    }

    /// Validates the fields and builds the credentials.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidArgument`] if the host name is missing or blank
    /// - [`AuthError::InvalidOperation`] if the device id is missing, if none
    ///   or more than one of key, signature and certificate is set, or if a
    ///   key name is set without a key
    /// - any error from the chosen [`AuthenticationMethod`] constructor
    pub fn build(&self) -> Result<ConnectionCredentials, AuthError> {
        let host_name = self.host_name.as_deref().unwrap_or_default();
        let device_id = self.device_id.as_deref().ok_or_else(|| {
            AuthError::InvalidOperation("a device id is required".to_string())
        })?;
        let module_id = self.module_id.as_deref();

        let configured = [
            self.shared_access_key.is_some(),
            self.shared_access_signature.is_some(),
            self.x509_certificate.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count();
        if configured > 1 {
            return Err(AuthError::InvalidOperation(
                "shared access key, shared access signature and X.509 certificate are mutually exclusive"
                    .to_string(),
            ));
        }
        if self.shared_access_key_name.is_some() && self.shared_access_key.is_none() {
            return Err(AuthError::InvalidOperation(
                "a shared access key name requires a shared access key".to_string(),
            ));
        }

        let method = if let Some(key) = &self.shared_access_key {
            AuthenticationMethod::shared_key(
                device_id,
                module_id,
                self.shared_access_key_name.as_deref(),
                key,
                self.refresh_settings,
            )?
        } else if let Some(signature) = &self.shared_access_signature {
            AuthenticationMethod::token(device_id, module_id, signature, self.refresh_settings)?
        } else if let Some(certificate) = &self.x509_certificate {
            AuthenticationMethod::certificate(device_id, module_id, certificate.clone())?
        } else {
            return Err(AuthError::InvalidOperation(
                "one of shared access key, shared access signature or X.509 certificate is required"
                    .to_string(),
            ));
        };

        let credentials = ConnectionCredentials::new(host_name, method)?;
        Ok(match &self.gateway_host_name {
            Some(gateway) => credentials.with_gateway_host_name(gateway.clone()),
            None => credentials,
        })
    }
}

impl fmt::Debug for ConnectionCredentialsBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redacted = |value: &Option<String>| value.as_ref().map(|_| "****");
        f.debug_struct("ConnectionCredentialsBuilder")
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
            .field("x509_certificate", &self.x509_certificate)
            .field("refresh_settings", &self.refresh_settings)
            .finish()
    }
}
