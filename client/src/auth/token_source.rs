use super::sas_token_generator::{SasTokenGenerator, SharedAccessKey};
use super::shared_access_signature::resource_uri;
use super::types::AuthType;
use crate::common::AuthError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::fmt;
use std::sync::Arc;

/// Parameters of a single token-creation call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenRequest {
    /// Host name of the hub the token is for
    pub hub: String,
    pub device_id: String,
    pub module_id: Option<String>,
    /// Lifetime the refresher would like; the issuer may choose another
    pub suggested_time_to_live: Duration,
}

impl TokenRequest {
    /// The decoded resource path for the requested identity.
    pub fn audience(&self) -> String {
        resource_uri(&self.hub, &self.device_id, self.module_id.as_deref())
    }
}

/// An external token issuer such as an edge workload API or an HSM-backed
/// signing service.
///
/// Implementations may perform network I/O. They must return a complete SAS
/// token string; the refresher reads the real expiry back out of it.
///
/// # Examples
///
/// ```no_run
/// use async_trait::async_trait;
/// use client::auth::{TokenIssuer, TokenRequest};
/// use client::common::AuthError;
///
/// struct WorkloadApiIssuer {
///     endpoint: String,
/// }
///
/// #[async_trait]
/// impl TokenIssuer for WorkloadApiIssuer {
///     async fn issue_token(&self, request: &TokenRequest) -> Result<String, AuthError> {
///         // Ask the workload API to sign request.audience() for the
///         // requested lifetime and return the SAS string it produced.
///         todo!()
///     }
/// }
/// ```
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn issue_token(&self, request: &TokenRequest) -> Result<String, AuthError>;
}

/// How a refreshing credential produces its tokens.
///
/// Each variant carries exactly the material its strategy needs, so a token
/// credential can never also hold a key and vice versa.
#[derive(Clone)]
pub enum TokenSource {
    /// Sign locally with the identity's own key
    SharedKey(SasTokenGenerator),
    /// Hand out a pre-supplied token verbatim; it cannot be renewed
    Token(String),
    /// Sign a token scoped to the leaf identity with a parent's key
    OnBehalfOf {
        parent_device_id: String,
        parent_module_id: Option<String>,
        generator: SasTokenGenerator,
    },
    /// Ask an external issuer
    Delegated(Arc<dyn TokenIssuer>),
}

impl TokenSource {
    /// Produces a new token string for `request`.
    ///
    /// Local signing uses `now` as the issuance instant; delegated issuers
    /// use their own notion of time.
    pub async fn create_token(
        &self,
        request: &TokenRequest,
        now: DateTime<Utc>,
    ) -> Result<String, AuthError> {
        match self {
            TokenSource::SharedKey(generator) | TokenSource::OnBehalfOf { generator, .. } => {
                generator.generate(&request.audience(), request.suggested_time_to_live, now)
            }
            TokenSource::Token(token) => Ok(token.clone()),
            TokenSource::Delegated(issuer) => issuer.issue_token(request).await,
        }
    }

    pub fn auth_type(&self) -> AuthType {
        match self {
            TokenSource::SharedKey(_) => AuthType::SharedKey,
            TokenSource::Token(_) => AuthType::Token,
            TokenSource::OnBehalfOf { .. } => AuthType::OnBehalfOf,
            TokenSource::Delegated(_) => AuthType::Delegated,
        }
    }

    pub fn shared_access_key(&self) -> Option<&SharedAccessKey> {
        match self {
            TokenSource::SharedKey(generator) | TokenSource::OnBehalfOf { generator, .. } => {
                Some(generator.key())
            }
            _ => None,
        }
    }

    pub fn shared_access_key_name(&self) -> Option<&str> {
        match self {
            TokenSource::SharedKey(generator) | TokenSource::OnBehalfOf { generator, .. } => {
                generator.key_name()
            }
            _ => None,
        }
    }

    /// The pre-supplied token of a [`TokenSource::Token`] source.
    pub fn fixed_token(&self) -> Option<&str> {
        match self {
            TokenSource::Token(token) => Some(token),
            _ => None,
        }
    }

    /// Whether new tokens can be produced once the current one runs out.
    pub fn can_renew(&self) -> bool {
        !matches!(self, TokenSource::Token(_))
    }
}

impl fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenSource::SharedKey(generator) => {
                f.debug_tuple("SharedKey").field(generator).finish()
            }
            TokenSource::Token(_) => write!(f, "Token(****)"),
            TokenSource::OnBehalfOf {
                parent_device_id,
                parent_module_id,
                generator,
            } => f
                .debug_struct("OnBehalfOf")
                .field("parent_device_id", parent_device_id)
                .field("parent_module_id", parent_module_id)
                .field("generator", generator)
                .finish(),
            TokenSource::Delegated(_) => write!(f, "Delegated(..)"),
        }
    }
}
