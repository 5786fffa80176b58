use chrono::{Duration, Utc};
use async_trait::async_trait;
use client::auth::{
    AuthType, AuthenticationMethod, CbsTokenProvider, ConnectionCredentials,
    ConnectionCredentialsBuilder, IotHubCbsTokenProvider, RefreshSettings, SasTokenGenerator,
    SharedAccessKey, SharedAccessSignature, TokenIssuer, TokenRequest, X509Credential,
};
use client::common::AuthError;
use std::sync::Arc;

const HUB: &str = "contoso.azure-devices.net";
const DEVICE_KEY: &str = "ZGV2aWNlLWtleS1mb3ItaW50ZWdyYXRpb24tdGVzdHM=";
const EDGE_KEY: &str = "ZWRnZS1rZXktZm9yLWludGVncmF0aW9uLXRlc3Rz";

// Helper module for credential construction
mod credential_helpers {
    use super::*;

    pub fn device_token(lifetime: Duration) -> String {
        SasTokenGenerator::new(None, SharedAccessKey::new(DEVICE_KEY).expect("valid key"))
            .generate(&format!("{HUB}/devices/thermostat"), lifetime, Utc::now())
            .expect("token")
    }

    pub fn certificate() -> X509Credential {
        X509Credential::from_der(vec![0x30, 0x82, 0x01, 0x0a]).expect("non-empty")
    }

    /// Issuer standing in for an edge workload API, signing with the
    /// device key.
    pub struct WorkloadIssuer;

    #[async_trait]
    impl TokenIssuer for WorkloadIssuer {
        async fn issue_token(&self, request: &TokenRequest) -> Result<String, AuthError> {
            SasTokenGenerator::new(None, SharedAccessKey::new(DEVICE_KEY)?).generate(
                &request.audience(),
                request.suggested_time_to_live,
                Utc::now(),
            )
        }
    }

    pub fn delegated_method() -> AuthenticationMethod {
        AuthenticationMethod::delegated(
            "thermostat",
            None,
            Arc::new(WorkloadIssuer),
            RefreshSettings::default(),
        )
        .expect("valid")
    }
}

use credential_helpers::*;

mod method_exclusivity {
    use super::*;

    #[test]
    fn test_every_combination_of_two_methods_is_rejected() {
        let token = device_token(Duration::hours(1));
        let combinations = [
            ConnectionCredentialsBuilder::new(HUB)
                .device_id("thermostat")
                .shared_access_key(DEVICE_KEY)
                .shared_access_signature(token.clone()),
            ConnectionCredentialsBuilder::new(HUB)
                .device_id("thermostat")
                .shared_access_key(DEVICE_KEY)
                .x509_certificate(certificate()),
            ConnectionCredentialsBuilder::new(HUB)
                .device_id("thermostat")
                .shared_access_signature(token)
                .x509_certificate(certificate()),
        ];

        for builder in combinations {
            assert!(
                matches!(builder.build(), Err(AuthError::InvalidOperation(_))),
                "builder should be rejected: {builder:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_exactly_one_accessor_reports_a_value() {
        let keyed = ConnectionCredentialsBuilder::new(HUB)
            .device_id("thermostat")
            .shared_access_key(DEVICE_KEY)
            .build()
            .expect("valid");
        let tokened = ConnectionCredentialsBuilder::new(HUB)
            .device_id("thermostat")
            .shared_access_signature(device_token(Duration::hours(1)))
            .build()
            .expect("valid");
        let certified = ConnectionCredentialsBuilder::new(HUB)
            .device_id("thermostat")
            .x509_certificate(certificate())
            .build()
            .expect("valid");

        let delegated = ConnectionCredentials::with_initial_token(HUB, delegated_method())
            .await
            .expect("valid");

        for credentials in [&keyed, &tokened, &certified, &delegated] {
            let reported = [
                credentials.shared_access_key().is_some(),
                credentials.shared_access_signature().is_some(),
                credentials.using_x509_cert(),
            ];
            assert_eq!(
                reported.iter().filter(|set| **set).count(),
                1,
                "{:?}",
                credentials.auth_type()
            );
        }
    }
}

mod delegated_credentials {
    use super::*;

    #[test]
    fn test_unissued_delegated_credentials_are_rejected() {
        assert!(matches!(
            ConnectionCredentials::new(HUB, delegated_method()),
            Err(AuthError::InvalidOperation(_))
        ));
    }

    #[tokio::test]
    async fn test_delegated_credentials_report_the_latest_signature() {
        let credentials = ConnectionCredentials::with_initial_token(HUB, delegated_method())
            .await
            .expect("valid");

        let signature = credentials.shared_access_signature().expect("issued token");
        assert_eq!(credentials.auth_type(), AuthType::Delegated);
        assert!(credentials.shared_access_key().is_none());
        assert!(!credentials.using_x509_cert());
        assert!(credentials.can_renew());
        assert_eq!(credentials.get_token().await, Ok(signature.clone()));

        let sas = SharedAccessSignature::parse(&signature).expect("parses");
        assert_eq!(sas.audience(), credentials.audience());
    }
}

mod token_credentials {
    use super::*;

    #[tokio::test]
    async fn test_supplied_token_is_returned_verbatim() {
        let token = device_token(Duration::minutes(30));
        let credentials = ConnectionCredentialsBuilder::new(HUB)
            .device_id("thermostat")
            .shared_access_signature(token.clone())
            .build()
            .expect("valid");

        assert_eq!(credentials.auth_type(), AuthType::Token);
        assert_eq!(credentials.get_token().await, Ok(token.clone()));
        assert_eq!(credentials.authorization_header().await, Ok(token.clone()));
        assert_eq!(credentials.refreshes_on(), credentials.expires_on());
        assert!(!credentials.is_expiring());
    }

    #[test]
    fn test_expired_or_malformed_supplied_token_fails_at_build() {
        let expired = ConnectionCredentialsBuilder::new(HUB)
            .device_id("thermostat")
            .shared_access_signature("SharedAccessSignature sr=hub&sig=c2ln&se=1000")
            .build();
        assert!(matches!(expired, Err(AuthError::TokenExpired { .. })));

        let malformed = ConnectionCredentialsBuilder::new(HUB)
            .device_id("thermostat")
            .shared_access_signature("SharedAccessSignature sr=hub&sig=c2ln")
            .build();
        assert!(matches!(malformed, Err(AuthError::MalformedToken(_))));
    }
}

mod key_credentials {
    use super::*;

    #[tokio::test]
    async fn test_key_credentials_sign_for_their_module() {
        let credentials = ConnectionCredentialsBuilder::new(HUB)
            .gateway_host_name("edge-gateway.local")
            .device_id("thermostat")
            .module_id("telemetry")
            .shared_access_key_name("moduleKey")
            .shared_access_key(DEVICE_KEY)
            .refresh_settings(RefreshSettings::new(Duration::minutes(20), 25))
            .build()
            .expect("valid");

        let token = credentials.get_token().await.expect("token");
        let sas = SharedAccessSignature::parse(&token).expect("parses");

        assert_eq!(sas.audience(), credentials.audience());
        assert_eq!(sas.key_name(), Some("moduleKey"));
        assert!(sas.verify(&SharedAccessKey::new(DEVICE_KEY).expect("key")).is_ok());
        assert_eq!(credentials.effective_host_name(), "edge-gateway.local");
        assert_eq!(credentials.expires_on(), Some(sas.expires_on()));
        assert_eq!(
            credentials.refreshes_on(),
            Some(sas.expires_on() - Duration::minutes(5))
        );
    }

    #[tokio::test]
    async fn test_on_behalf_of_credentials_through_cbs() {
        let method = AuthenticationMethod::on_behalf_of(
            "edge-device",
            Some("$edgeHub"),
            "leaf-sensor",
            None,
            None,
            EDGE_KEY,
            RefreshSettings::default(),
        )
        .expect("valid");
        let credentials = Arc::new(
            ConnectionCredentials::new(HUB, method)
                .expect("valid host")
                .with_gateway_host_name("edge-device.local"),
        );
        let provider = IotHubCbsTokenProvider::new(credentials.clone());

        let cbs = provider
            .get_token("amqps://edge-device.local", HUB, &["Send".to_string()])
            .await
            .expect("cbs token");
        let sas = SharedAccessSignature::parse(&cbs.token_value).expect("parses");

        assert_eq!(sas.audience(), format!("{HUB}/devices/leaf-sensor"));
        assert!(sas.verify(&SharedAccessKey::new(EDGE_KEY).expect("key")).is_ok());
        assert!(sas.verify(&SharedAccessKey::new(DEVICE_KEY).expect("key")).is_err());
        assert_eq!(credentials.auth_type(), AuthType::OnBehalfOf);
    }
}
