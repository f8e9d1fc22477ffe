//! Token lifecycle management
//!
//! `TokenManager` owns the `CredentialStore` writes: the initial
//! client-credentials grant, every refresh, and the final revocation.
//! Refresh is interval-driven rather than expiry-driven so that clock skew
//! between this host and the gateway never matters; the interval is
//! validated against the token lifetime at startup.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::credentials::{Credential, CredentialStore};
use crate::error::{Error, Result};
use crate::token::{AuthApi, Grant};

/// Outcome bookkeeping for the periodic refresh.
///
/// Failures are counted but never escalated; the status endpoint reports
/// them alongside actual token validity.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RefreshHealth {
    pub refreshes_succeeded: u64,
    pub consecutive_failures: u32,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

pub struct TokenManager {
    api: Arc<dyn AuthApi>,
    store: Arc<CredentialStore>,
    health: Mutex<RefreshHealth>,
}

impl TokenManager {
    pub fn new(api: Arc<dyn AuthApi>, store: Arc<CredentialStore>) -> Self {
        Self {
            api,
            store,
            health: Mutex::new(RefreshHealth::default()),
        }
    }

    /// Shared read access to the credential store.
    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    /// Perform the client-credentials grant and store the result.
    ///
    /// Any failure here is fatal for startup: nothing downstream can run
    /// without a token.
    pub async fn acquire_initial(&self) -> Result<Arc<Credential>> {
        info!("requesting initial access token");
        let response = self
            .api
            .request_token(Grant::ClientCredentials)
            .await
            .inspect_err(|e| error!(error = %e, "initial authentication failed"))?;

        let credential = self
            .store
            .replace(Credential::from_response(response, None, Utc::now())?);
        info!(
            expires_in_secs = credential.expires_in_secs,
            expires_at = %credential.expires_at(),
            "access token obtained"
        );
        Ok(credential)
    }

    /// Exchange the current refresh token for a new credential.
    ///
    /// On failure the previous credential stays in place; it remains usable
    /// until it actually expires and the next scheduled attempt may succeed.
    pub async fn refresh(&self) -> Result<Arc<Credential>> {
        let outcome = self.try_refresh().await;
        let mut health = self.health.lock();
        match &outcome {
            Ok(credential) => {
                health.refreshes_succeeded += 1;
                health.consecutive_failures = 0;
                health.last_success = Some(credential.issued_at);
                health.last_error = None;
                metrics::counter!("nsp_token_refresh_total", "outcome" => "success").increment(1);
                info!(expires_at = %credential.expires_at(), "access token refreshed");
            }
            Err(e) => {
                health.consecutive_failures += 1;
                health.last_error = Some(e.to_string());
                metrics::counter!("nsp_token_refresh_total", "outcome" => "failure").increment(1);
                warn!(
                    error = %e,
                    consecutive_failures = health.consecutive_failures,
                    "token refresh failed, keeping previous token"
                );
            }
        }
        outcome
    }

    async fn try_refresh(&self) -> Result<Arc<Credential>> {
        let current = self.store.current().ok_or(Error::NotAuthenticated)?;
        let response = self
            .api
            .request_token(Grant::RefreshToken(&current.refresh_token))
            .await
            .map_err(|e| Error::RefreshFailure(e.to_string()))?;
        let credential =
            Credential::from_response(response, Some(&current.refresh_token), Utc::now())
                .map_err(|e| Error::RefreshFailure(e.to_string()))?;
        Ok(self.store.replace(credential))
    }

    /// Run `refresh()` every `interval` until `cancel` fires.
    pub fn start_auto_refresh(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        crate::refresh::spawn_refresh_task(self.clone(), interval, cancel)
    }

    /// `Bearer <token>` for the latest credential.
    pub fn current_authorization_header(&self) -> Result<String> {
        self.store.authorization_header()
    }

    /// Whether a credential exists and is outside its expiry margin.
    pub fn is_token_valid(&self) -> bool {
        self.store
            .current()
            .is_some_and(|c| c.is_valid_at(Utc::now()))
    }

    pub fn refresh_health(&self) -> RefreshHealth {
        self.health.lock().clone()
    }

    /// Revoke the current access token and clear the store.
    pub async fn revoke(&self) -> Result<()> {
        let current = self.store.current().ok_or(Error::NotAuthenticated)?;
        self.api.revoke(&current.access_token).await?;
        self.store.take();
        info!("access token revoked");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use crate::token::TokenResponse;

    /// In-memory token endpoint issuing `A<n>`/`R<n>` pairs.
    #[derive(Default)]
    pub struct FakeAuthApi {
        issued: AtomicU32,
        pub fail_refresh: AtomicBool,
        pub calls: Mutex<Vec<(tokio::time::Instant, String)>>,
        pub revoked: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AuthApi for FakeAuthApi {
        async fn request_token(&self, grant: Grant<'_>) -> Result<TokenResponse> {
            let label = match grant {
                Grant::ClientCredentials => "client_credentials".to_string(),
                Grant::RefreshToken(rt) => format!("refresh:{rt}"),
            };
            self.calls.lock().push((tokio::time::Instant::now(), label));

            if matches!(grant, Grant::RefreshToken(_)) && self.fail_refresh.load(Ordering::SeqCst) {
                return Err(Error::AuthFailure {
                    status: 503,
                    body: "unavailable".into(),
                });
            }
            let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(TokenResponse {
                access_token: format!("A{n}"),
                refresh_token: Some(format!("R{n}")),
                token_type: Some("Bearer".into()),
                expires_in: Some(3600),
            })
        }

        async fn revoke(&self, access_token: &str) -> Result<()> {
            self.revoked.lock().push(access_token.to_string());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeAuthApi;
    use super::*;
    use std::sync::atomic::Ordering;

    fn manager() -> (Arc<FakeAuthApi>, TokenManager) {
        let api = Arc::new(FakeAuthApi::default());
        let manager = TokenManager::new(api.clone(), Arc::new(CredentialStore::new()));
        (api, manager)
    }

    #[tokio::test]
    async fn acquire_initial_stores_credential() {
        let (_api, manager) = manager();
        let credential = manager.acquire_initial().await.unwrap();
        assert_eq!(credential.access_token, "A1");
        assert_eq!(credential.refresh_token, "R1");
        assert_eq!(credential.expires_in_secs, 3600);
        assert_eq!(manager.current_authorization_header().unwrap(), "Bearer A1");
        assert!(manager.is_token_valid());
    }

    #[tokio::test]
    async fn refresh_before_initial_is_not_authenticated() {
        let (_api, manager) = manager();
        let err = manager.refresh().await.unwrap_err();
        assert!(matches!(err, Error::NotAuthenticated), "got: {err:?}");
        assert_eq!(manager.refresh_health().consecutive_failures, 1);
    }

    #[tokio::test]
    async fn refresh_uses_current_refresh_token_and_replaces_credential() {
        let (api, manager) = manager();
        manager.acquire_initial().await.unwrap();
        manager.refresh().await.unwrap();

        let calls = api.calls.lock();
        assert_eq!(calls[1].1, "refresh:R1");
        drop(calls);

        // Every header handed out after the refresh carries the new token
        assert_eq!(manager.current_authorization_header().unwrap(), "Bearer A2");
        assert_eq!(manager.store().current().unwrap().refresh_token, "R2");
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_credential() {
        let (api, manager) = manager();
        manager.acquire_initial().await.unwrap();
        api.fail_refresh.store(true, Ordering::SeqCst);

        let err = manager.refresh().await.unwrap_err();
        assert!(matches!(err, Error::RefreshFailure(_)), "got: {err:?}");
        assert_eq!(manager.current_authorization_header().unwrap(), "Bearer A1");

        manager.refresh().await.unwrap_err();
        let health = manager.refresh_health();
        assert_eq!(health.consecutive_failures, 2);
        assert!(health.last_error.is_some());

        api.fail_refresh.store(false, Ordering::SeqCst);
        manager.refresh().await.unwrap();
        let health = manager.refresh_health();
        assert_eq!(health.consecutive_failures, 0);
        assert_eq!(health.refreshes_succeeded, 1);
        assert!(health.last_error.is_none());
    }

    #[tokio::test]
    async fn revoke_sends_access_token_and_clears_store() {
        let (api, manager) = manager();
        manager.acquire_initial().await.unwrap();
        manager.revoke().await.unwrap();

        assert_eq!(*api.revoked.lock(), vec!["A1".to_string()]);
        assert!(manager.store().current().is_none());
        assert!(!manager.is_token_valid());
    }
}
