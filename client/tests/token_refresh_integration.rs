use async_trait::async_trait;
use chrono::Duration;
use client::auth::{
    AuthenticationMethod, Clock, ConnectionCredentials, ManualClock, RefreshSettings,
    SasTokenGenerator, SharedAccessKey, SharedAccessSignature, TokenIssuer, TokenRefreshService,
    TokenRefresher, TokenRequest, TokenSource,
};
use client::common::AuthError;
use parking_lot::Mutex;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

const HUB: &str = "contoso.azure-devices.net";

// Helper module for token refresh testing
mod token_refresh_helpers {
    use super::*;

    /// Issuer signing with a fixed key that can be told to hand out a
    /// different lifetime than the one requested.
    pub struct OverridingIssuer {
        pub generator: SasTokenGenerator,
        pub clock: Arc<ManualClock>,
        pub lifetime_override: Mutex<Option<Duration>>,
        pub requests: Mutex<Vec<TokenRequest>>,
        pub issued: AtomicU32,
    }

    impl OverridingIssuer {
        pub fn new(clock: Arc<ManualClock>) -> Self {
            Self {
                generator: SasTokenGenerator::new(
                    Some("edgeWorkload".to_string()),
                    SharedAccessKey::generate(&mut StdRng::seed_from_u64(21), 32),
                ),
                clock,
                lifetime_override: Mutex::new(None),
                requests: Mutex::new(Vec::new()),
                issued: AtomicU32::new(0),
            }
        }

        pub fn issued(&self) -> u32 {
            self.issued.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenIssuer for OverridingIssuer {
        async fn issue_token(&self, request: &TokenRequest) -> Result<String, AuthError> {
            self.issued.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().push(request.clone());
            let lifetime = self
                .lifetime_override
                .lock()
                .unwrap_or(request.suggested_time_to_live);
            self.generator
                .generate(&request.audience(), lifetime, self.clock.now())
        }
    }

    pub fn delegated_refresher(
        issuer: Arc<OverridingIssuer>,
        clock: Arc<ManualClock>,
        settings: RefreshSettings,
    ) -> TokenRefresher {
        TokenRefresher::new("thermostat", Some("telemetry"), TokenSource::Delegated(issuer), settings)
            .expect("valid refresher")
            .with_clock(clock)
    }
}

use token_refresh_helpers::*;

mod token_lifecycle {
    use super::*;

    #[tokio::test]
    async fn test_issuer_lifetime_is_authoritative() {
        let clock = Arc::new(ManualClock::starting_now());
        let issuer = Arc::new(OverridingIssuer::new(clock.clone()));
        let refresher = delegated_refresher(
            issuer.clone(),
            clock.clone(),
            RefreshSettings::new(Duration::hours(1), 20),
        );
        let start = clock.now();

        refresher.get_token(HUB).await.expect("first token");
        assert_eq!(refresher.expires_on(), start + Duration::hours(1));

        *issuer.lifetime_override.lock() = Some(Duration::minutes(10));
        clock.advance(Duration::minutes(48));
        assert!(refresher.is_expiring());

        let token = refresher.get_token(HUB).await.expect("second token");
        let now = clock.now();
        assert_eq!(refresher.expires_on(), now + Duration::minutes(10));
        assert_eq!(
            SharedAccessSignature::parse_at(&token, now)
                .expect("parses")
                .expires_on(),
            refresher.expires_on()
        );
        // 20% of the requested hour still applies, so the short-lived token
        // is already due for renewal.
        assert_eq!(
            refresher.refreshes_on(),
            refresher.expires_on() - Duration::minutes(12)
        );
        assert!(refresher.is_expiring());
        assert_eq!(issuer.issued(), 2);
    }

    #[tokio::test]
    async fn test_requests_carry_identity_and_hub() {
        let clock = Arc::new(ManualClock::starting_now());
        let issuer = Arc::new(OverridingIssuer::new(clock.clone()));
        let refresher = delegated_refresher(issuer.clone(), clock, RefreshSettings::default());

        refresher.get_token(HUB).await.expect("token");

        let requests = issuer.requests.lock();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].hub, HUB);
        assert_eq!(requests[0].device_id, "thermostat");
        assert_eq!(requests[0].module_id.as_deref(), Some("telemetry"));
        assert_eq!(requests[0].suggested_time_to_live, Duration::hours(1));
        assert_eq!(
            requests[0].audience(),
            format!("{HUB}/devices/thermostat/modules/telemetry")
        );
    }

    #[tokio::test]
    async fn test_sequential_calls_reuse_token_until_refresh_time() {
        let clock = Arc::new(ManualClock::starting_now());
        let issuer = Arc::new(OverridingIssuer::new(clock.clone()));
        let refresher = delegated_refresher(
            issuer.clone(),
            clock.clone(),
            RefreshSettings::new(Duration::minutes(10), 50),
        );

        let first = refresher.get_token(HUB).await.expect("token");
        clock.advance(Duration::minutes(4));
        let second = refresher.get_token(HUB).await.expect("token");
        assert_eq!(first, second);
        assert_eq!(issuer.issued(), 1);

        clock.advance(Duration::minutes(1));
        let third = refresher.get_token(HUB).await.expect("token");
        assert_ne!(first, third);
        assert_eq!(issuer.issued(), 2);
    }
}

mod concurrent_callers {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_many_callers_after_expiry_share_one_renewal() {
        let clock = Arc::new(ManualClock::starting_now());
        let issuer = Arc::new(OverridingIssuer::new(clock.clone()));
        let refresher = Arc::new(delegated_refresher(
            issuer.clone(),
            clock.clone(),
            RefreshSettings::new(Duration::minutes(5), 10),
        ));

        refresher.get_token(HUB).await.expect("first token");
        clock.advance(Duration::minutes(6));

        let callers = (0..16).map(|_| {
            let refresher = refresher.clone();
            tokio::spawn(async move { refresher.get_token(HUB).await })
        });
        let tokens: Vec<String> = futures::future::join_all(callers)
            .await
            .into_iter()
            .map(|joined| joined.expect("task completes").expect("token"))
            .collect();

        assert_eq!(issuer.issued(), 2);
        assert!(tokens.iter().all(|token| token == &tokens[0]));
    }
}

mod background_refresh {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_service_keeps_credentials_fresh() {
        let clock = Arc::new(ManualClock::starting_now());
        let issuer = Arc::new(OverridingIssuer::new(clock.clone()));
        let refresher = delegated_refresher(
            issuer.clone(),
            clock.clone(),
            RefreshSettings::new(Duration::minutes(10), 50),
        );
        let credentials = Arc::new(
            ConnectionCredentials::with_initial_token(HUB, AuthenticationMethod::from(refresher))
                .await
                .expect("first token"),
        );
        assert_eq!(issuer.issued(), 1);
        let service = Arc::new(
            TokenRefreshService::new(credentials.clone())
                .with_check_interval(std::time::Duration::from_secs(60)),
        );
        let handle = service.clone().start();

        // Offset from the check ticks so each check sees a settled clock.
        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        for _ in 0..6 {
            clock.advance(Duration::minutes(1));
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        }
        // Renewed once, on the first check past the buffer.
        assert_eq!(issuer.issued(), 2);

        let before = issuer.issued();
        credentials.get_token().await.expect("token");
        assert_eq!(issuer.issued(), before);

        service.shutdown();
        handle.await.expect("service task completes");
    }
}
