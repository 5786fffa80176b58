use super::connection_credentials::ConnectionCredentials;
use crate::common::AuthError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Token type announced in the AMQP `put-token` request for SAS tokens.
pub const CBS_SAS_TOKEN_TYPE: &str = "servicebus.windows.net:sastoken";

/// Token handed to the AMQP claims-based-security handshake.
#[derive(Clone, PartialEq, Eq)]
pub struct CbsToken {
    /// The SAS token string
    pub token_value: String,
    /// The CBS token type, always [`CBS_SAS_TOKEN_TYPE`] for SAS tokens
    pub token_type: String,
    /// When the hub will stop accepting the token
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for CbsToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CbsToken")
            .field("token_value", &"****")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Trait for providers that hand tokens to an AMQP CBS link.
///
/// The AMQP transport calls this whenever it opens a link or its previous
/// token is about to run out.
///
/// # Examples
///
/// ```no_run
/// use client::auth::{CbsTokenProvider, ConnectionCredentialsBuilder, IotHubCbsTokenProvider};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), client::common::AuthError> {
/// let credentials = ConnectionCredentialsBuilder::new("contoso.azure-devices.net")
///     .device_id("thermostat")
///     .shared_access_key("dGhpcyBpcyBub3QgYSByZWFsIGtleQ==")
///     .build()?;
/// let provider = IotHubCbsTokenProvider::new(Arc::new(credentials));
///
/// let token = provider
///     .get_token(
///         "amqps://contoso.azure-devices.net",
///         "contoso.azure-devices.net/devices/thermostat",
///         &[],
///     )
///     .await?;
/// println!("{} until {}", token.token_type, token.expires_at);
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait CbsTokenProvider: Send + Sync {
    /// Returns a token authorising `applies_to` on the connection to
    /// `namespace_address`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] if no token can be produced.
    async fn get_token(
        &self,
        namespace_address: &str,
        applies_to: &str,
        required_claims: &[String],
    ) -> Result<CbsToken, AuthError>;
}

/// [`CbsTokenProvider`] backed by [`ConnectionCredentials`].
///
/// The token is always scoped to the credentials' own identity; the
/// `applies_to` the transport asks for is only logged.
#[derive(Clone, Debug)]
pub struct IotHubCbsTokenProvider {
    credentials: Arc<ConnectionCredentials>,
}

impl IotHubCbsTokenProvider {
    pub fn new(credentials: Arc<ConnectionCredentials>) -> Self {
        Self { credentials }
    }

    pub fn credentials(&self) -> &Arc<ConnectionCredentials> {
        &self.credentials
    }
}

#[async_trait]
impl CbsTokenProvider for IotHubCbsTokenProvider {
    async fn get_token(
        &self,
        namespace_address: &str,
        applies_to: &str,
        required_claims: &[String],
    ) -> Result<CbsToken, AuthError> {
        log::debug!(
            "CBS token requested for '{applies_to}' on '{namespace_address}' with claims {required_claims:?}"
        );

        let (token_value, expires_at) = self.credentials.fetch(&CancellationToken::new()).await?;
        Ok(CbsToken {
            token_value,
            token_type: CBS_SAS_TOKEN_TYPE.to_string(),
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::authentication_method::X509Credential;
    use crate::auth::connection_credentials::ConnectionCredentialsBuilder;
    use crate::auth::shared_access_signature::SharedAccessSignature;
    use claims::assert_matches;

    const HUB: &str = "contoso.azure-devices.net";

    #[tokio::test]
    async fn test_sas_credentials_yield_cbs_token() {
        let credentials = ConnectionCredentialsBuilder::new(HUB)
            .device_id("d")
            .shared_access_key("dGhpcyBpcyBub3QgYSByZWFsIGtleQ==")
            .build()
            .expect("valid");
        let provider = IotHubCbsTokenProvider::new(Arc::new(credentials));

        let token = provider
            .get_token("amqps://contoso.azure-devices.net", "ignored", &[])
            .await
            .expect("token");

        assert_eq!(token.token_type, CBS_SAS_TOKEN_TYPE);
        let sas = SharedAccessSignature::parse(&token.token_value).expect("parses");
        assert_eq!(sas.expires_on(), token.expires_at);
        assert_eq!(Some(token.expires_at), provider.credentials().expires_on());
        assert!(!format!("{token:?}").contains(&token.token_value));
    }

    #[tokio::test]
    async fn test_certificate_credentials_have_no_cbs_token() {
        let credentials = ConnectionCredentialsBuilder::new(HUB)
            .device_id("d")
            .x509_certificate(X509Credential::from_der(vec![0x30, 0x82]).expect("non-empty"))
            .build()
            .expect("valid");
        let provider = IotHubCbsTokenProvider::new(Arc::new(credentials));

        assert_matches!(
            provider.get_token("amqps://hub", "hub", &[]).await,
            Err(AuthError::InvalidOperation(_))
        );
    }
}
