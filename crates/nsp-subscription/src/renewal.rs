//! Fixed-interval background subscription renewal

use std::sync::Arc;
use std::time::Duration;

use common::spawn_periodic;
use tokio_util::sync::CancellationToken;

use crate::manager::SubscriptionManager;

/// Spawn a task that calls `SubscriptionManager::renew_subscription` every
/// `interval` until `cancel` fires. The first renewal is one interval out.
pub fn spawn_renewal_task(
    manager: Arc<SubscriptionManager>,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    spawn_periodic("subscription_renewal", interval, cancel, move || {
        let manager = manager.clone();
        async move {
            let _ = manager.renew_subscription().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::fake::FakeSubscriptionApi;
    use crate::store::SubscriptionStore;
    use chrono::Utc;
    use nsp_auth::{Credential, CredentialStore, TokenResponse};
    use std::sync::atomic::Ordering;

    async fn setup() -> (Arc<FakeSubscriptionApi>, Arc<SubscriptionManager>) {
        let api = Arc::new(FakeSubscriptionApi::default());
        let credentials = Arc::new(CredentialStore::new());
        credentials.replace(
            Credential::from_response(
                TokenResponse {
                    access_token: "A1".into(),
                    refresh_token: Some("R1".into()),
                    token_type: None,
                    expires_in: Some(3600),
                },
                None,
                Utc::now(),
            )
            .unwrap(),
        );
        let manager = Arc::new(SubscriptionManager::new(
            api.clone(),
            credentials,
            Arc::new(SubscriptionStore::new()),
            Duration::from_secs(3400),
        ));
        manager.create_subscription("NSP-FAULT", "").await.unwrap();
        (api, manager)
    }

    #[tokio::test(start_paused = true)]
    async fn renews_every_interval_with_constant_topic() {
        let (api, manager) = setup().await;
        let cancel = CancellationToken::new();
        let handle = spawn_renewal_task(manager.clone(), Duration::from_secs(1800), cancel.clone());

        tokio::time::sleep(Duration::from_secs(1800 * 3 + 1)).await;
        cancel.cancel();
        handle.await.unwrap();

        let renewals = api
            .calls
            .lock()
            .iter()
            .filter(|(call, _)| call == "renew:S1")
            .count();
        assert_eq!(renewals, 3);
        assert_eq!(manager.store().topic_id().as_deref(), Some("T1"));
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_retried_next_interval() {
        let (api, manager) = setup().await;
        api.fail_renew.store(true, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        let handle = spawn_renewal_task(manager.clone(), Duration::from_secs(60), cancel.clone());

        tokio::time::sleep(Duration::from_secs(121)).await;
        assert_eq!(manager.renewal_health().consecutive_failures, 2);

        api.fail_renew.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(manager.renewal_health().consecutive_failures, 0);

        cancel.cancel();
        handle.await.unwrap();
    }
}
