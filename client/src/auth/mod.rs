pub mod authentication_method;
pub mod cbs_token_provider;
pub mod clock;
pub mod connection_credentials;
pub mod sas_token_generator;
pub mod shared_access_signature;
pub mod token_refresh_service;
pub mod token_refresher;
pub mod token_source;
pub mod types;

pub use authentication_method::{AuthenticationMethod, X509Credential};
pub use cbs_token_provider::{CBS_SAS_TOKEN_TYPE, CbsToken, CbsTokenProvider, IotHubCbsTokenProvider};
pub use clock::{Clock, ManualClock, SystemClock};
pub use connection_credentials::{ConnectionCredentials, ConnectionCredentialsBuilder};
pub use sas_token_generator::{SasTokenGenerator, SharedAccessKey};
pub use shared_access_signature::{
    SharedAccessSignature, SharedAccessSignatureBuilder, build_audience, build_expires_on,
    resource_uri,
};
pub use token_refresh_service::{
    RefreshFailureCallback, RefreshSuccessCallback, TokenRefreshService,
};
pub use token_refresher::TokenRefresher;
pub use token_source::{TokenIssuer, TokenRequest, TokenSource};
pub use types::{AuthType, RefreshSettings};
