//! Cached, single-flight credential broker.

use super::credential::Credential;
use crate::errors::RecordflowError;
use crate::store::TokenIssuer;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Settings for a [`CredentialBroker`].
#[derive(Clone, Default)]
pub struct BrokerSettings {
    /// Application id.
    pub app_id: String,
    /// Application secret. `None` or empty means unconfigured.
    pub app_secret: Option<String>,
    /// Validity assumed when the issuer reports none.
    pub default_validity: Duration,
    /// Margin before expiry at which the credential is refreshed.
    pub refresh_buffer: Duration,
}

impl std::fmt::Debug for BrokerSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerSettings")
            .field("app_id", &self.app_id)
            .field("app_secret", &self.app_secret.as_ref().map(|_| "<redacted>"))
            .field("default_validity", &self.default_validity)
            .field("refresh_buffer", &self.refresh_buffer)
            .finish()
    }
}

/// Obtains and caches the bearer credential for the data store.
///
/// The cache sits behind an async mutex that is held across the refresh
/// exchange, so concurrent callers wait for one refresh instead of issuing
/// their own.
pub struct CredentialBroker {
    issuer: Arc<dyn TokenIssuer>,
    settings: BrokerSettings,
    cache: Mutex<Option<Credential>>,
    refreshes: AtomicUsize,
}

impl CredentialBroker {
    /// Creates a broker. No token is requested until the first `acquire`.
    #[must_use]
    pub fn new(issuer: Arc<dyn TokenIssuer>, settings: BrokerSettings) -> Self {
        Self {
            issuer,
            settings,
            cache: Mutex::new(None),
            refreshes: AtomicUsize::new(0),
        }
    }

    /// Returns a usable credential, refreshing it if needed.
    ///
    /// # Errors
    ///
    /// `Configuration` if no secret is configured, `Upstream` if the auth
    /// endpoint rejects the exchange.
    pub async fn acquire(&self) -> Result<Credential, RecordflowError> {
        let mut cache = self.cache.lock().await;
        if let Some(ref credential) = *cache {
            if credential.is_usable() {
                return Ok(credential.clone());
            }
            debug!("Cached credential is inside its refresh window");
        }

        let credential = self.refresh().await?;
        *cache = Some(credential.clone());
        Ok(credential)
    }

    /// Drops the cached credential; the next `acquire` refreshes.
    pub async fn invalidate(&self) {
        *self.cache.lock().await = None;
    }

    /// Drops the cached credential only if it is still `stale_token`.
    ///
    /// Workers that saw an auth failure with the same token race here; only
    /// the first one clears the cache, the rest reuse the refreshed token.
    pub async fn invalidate_token(&self, stale_token: &str) -> bool {
        let mut cache = self.cache.lock().await;
        match *cache {
            Some(ref credential) if credential.token() == stale_token => {
                *cache = None;
                true
            }
            _ => false,
        }
    }

    /// Number of refresh exchanges performed so far.
    #[must_use]
    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    async fn refresh(&self) -> Result<Credential, RecordflowError> {
        let secret = self
            .settings
            .app_secret
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| {
                RecordflowError::configuration("store app secret is not configured")
            })?;

        let issued = self
            .issuer
            .issue_token(&self.settings.app_id, secret)
            .await
            .map_err(RecordflowError::Upstream)?;
        let count = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;

        let validity = if issued.expires_in.is_zero() {
            self.settings.default_validity
        } else {
            issued.expires_in
        };
        info!(
            refresh = count,
            validity_secs = validity.as_secs(),
            "Store credential refreshed"
        );

        Ok(Credential::new(
            issued.token,
            Instant::now(),
            validity,
            self.settings.refresh_buffer,
        ))
    }
}

impl std::fmt::Debug for CredentialBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialBroker")
            .field("settings", &self.settings)
            .field("refreshes", &self.refresh_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StoreError;
    use crate::testing::CountingTokenIssuer;

    fn settings() -> BrokerSettings {
        BrokerSettings {
            app_id: "cli_app".into(),
            app_secret: Some("shh".into()),
            default_validity: Duration::from_secs(7200),
            refresh_buffer: Duration::from_secs(300),
        }
    }

    #[tokio::test]
    async fn test_two_acquires_within_validity_refresh_once() {
        let issuer = Arc::new(CountingTokenIssuer::new());
        let broker = CredentialBroker::new(issuer.clone(), settings());

        let first = broker.acquire().await.unwrap();
        let second = broker.acquire().await.unwrap();

        assert_eq!(first.token(), second.token());
        assert_eq!(broker.refresh_count(), 1);
        assert_eq!(issuer.issued(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refresh() {
        let issuer = Arc::new(CountingTokenIssuer::new());
        let broker = CredentialBroker::new(issuer, settings());

        let first = broker.acquire().await.unwrap();
        broker.invalidate().await;
        let second = broker.acquire().await.unwrap();

        assert_ne!(first.token(), second.token());
        assert_eq!(broker.refresh_count(), 2);
    }

    #[tokio::test]
    async fn test_expired_credential_is_replaced() {
        // Validity shorter than the buffer: never usable, so every acquire refreshes.
        let issuer = Arc::new(CountingTokenIssuer::new().with_validity(Duration::from_secs(60)));
        let broker = CredentialBroker::new(issuer, settings());

        broker.acquire().await.unwrap();
        broker.acquire().await.unwrap();
        assert_eq!(broker.refresh_count(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_token_only_clears_matching() {
        let issuer = Arc::new(CountingTokenIssuer::new());
        let broker = CredentialBroker::new(issuer, settings());

        let cred = broker.acquire().await.unwrap();
        assert!(!broker.invalidate_token("someone-else").await);
        assert!(broker.invalidate_token(cred.token()).await);
        assert!(!broker.invalidate_token(cred.token()).await);
    }

    #[tokio::test]
    async fn test_missing_secret_is_configuration_error() {
        let issuer = Arc::new(CountingTokenIssuer::new());
        let mut settings = settings();
        settings.app_secret = Some("  ".into());
        let broker = CredentialBroker::new(issuer.clone(), settings);

        let err = broker.acquire().await.unwrap_err();
        assert!(matches!(err, RecordflowError::Configuration(_)));
        assert_eq!(issuer.issued(), 0);
    }

    #[tokio::test]
    async fn test_issuer_failure_is_upstream() {
        let issuer = Arc::new(CountingTokenIssuer::failing(StoreError::api(10003, "invalid param")));
        let broker = CredentialBroker::new(issuer, settings());

        let err = broker.acquire().await.unwrap_err();
        assert!(matches!(err, RecordflowError::Upstream(_)));
        assert_eq!(broker.refresh_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_acquire_is_single_flight() {
        let issuer = Arc::new(CountingTokenIssuer::new().with_latency(Duration::from_millis(20)));
        let broker = Arc::new(CredentialBroker::new(issuer.clone(), settings()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let broker = broker.clone();
                tokio::spawn(async move { broker.acquire().await.map(|c| c.token().to_string()) })
            })
            .collect();
        let mut tokens = Vec::new();
        for handle in handles {
            tokens.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(issuer.issued(), 1);
        assert!(tokens.iter().all(|t| t == &tokens[0]));
    }
}
