//! Subscription lifecycle management

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use nsp_auth::CredentialStore;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::client::SubscriptionApi;
use crate::error::{Error, Result};
use crate::store::{Subscription, SubscriptionStore};

/// Outcome bookkeeping for the periodic renewal.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RenewalHealth {
    pub renewals_succeeded: u64,
    pub consecutive_failures: u32,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Owns the `SubscriptionStore` writes.
///
/// The bearer header is read from the shared `CredentialStore` immediately
/// before each call, so a call issued after a token refresh always carries
/// the refreshed token.
pub struct SubscriptionManager {
    api: Arc<dyn SubscriptionApi>,
    credentials: Arc<CredentialStore>,
    store: Arc<SubscriptionStore>,
    /// Expiry assumed when NSP does not report one
    ttl: Duration,
    health: Mutex<RenewalHealth>,
}

impl SubscriptionManager {
    pub fn new(
        api: Arc<dyn SubscriptionApi>,
        credentials: Arc<CredentialStore>,
        store: Arc<SubscriptionStore>,
        ttl: Duration,
    ) -> Self {
        Self {
            api,
            credentials,
            store,
            ttl,
            health: Mutex::new(RenewalHealth::default()),
        }
    }

    pub fn store(&self) -> &Arc<SubscriptionStore> {
        &self.store
    }

    fn default_expiry(&self) -> DateTime<Utc> {
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::zero());
        Utc::now()
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Subscribe to `category` events matching `property_filter`.
    ///
    /// Fatal for startup on any error: without a topic there is nothing to
    /// consume.
    pub async fn create_subscription(
        &self,
        category: &str,
        property_filter: &str,
    ) -> Result<Arc<Subscription>> {
        info!(category, property_filter, "creating subscription");
        let authorization = self.credentials.authorization_header()?;
        let envelope = self
            .api
            .create(&authorization, category, property_filter)
            .await
            .inspect_err(|e| error!(error = %e, "subscription create failed"))?;

        let subscription = self.store.replace(Subscription {
            subscription_id: envelope.subscription_id,
            topic_id: envelope.topic_id,
            expires_at: envelope.expires_at.unwrap_or_else(|| self.default_expiry()),
        });
        info!(
            subscription_id = %subscription.subscription_id,
            topic_id = %subscription.topic_id,
            expires_at = %subscription.expires_at,
            "subscription created"
        );
        Ok(subscription)
    }

    /// Renew the stored subscription, extending its expiry.
    ///
    /// Failures are logged and counted; the caller keeps the renewal interval
    /// well inside the subscription TTL so one missed renewal is harmless.
    pub async fn renew_subscription(&self) -> Result<Arc<Subscription>> {
        let outcome = self.try_renew().await;
        let mut health = self.health.lock();
        match &outcome {
            Ok(subscription) => {
                health.renewals_succeeded += 1;
                health.consecutive_failures = 0;
                health.last_success = Some(Utc::now());
                health.last_error = None;
                metrics::counter!("nsp_subscription_renewal_total", "outcome" => "success")
                    .increment(1);
                info!(
                    subscription_id = %subscription.subscription_id,
                    expires_at = %subscription.expires_at,
                    "subscription renewed"
                );
            }
            Err(e) => {
                health.consecutive_failures += 1;
                health.last_error = Some(e.to_string());
                metrics::counter!("nsp_subscription_renewal_total", "outcome" => "failure")
                    .increment(1);
                warn!(
                    error = %e,
                    consecutive_failures = health.consecutive_failures,
                    "subscription renewal failed, will retry next interval"
                );
            }
        }
        outcome
    }

    async fn try_renew(&self) -> Result<Arc<Subscription>> {
        let current = self.store.current().ok_or(Error::NoSubscription)?;
        let authorization = self.credentials.authorization_header()?;
        let expires_at = self
            .api
            .renew(&authorization, &current.subscription_id)
            .await?
            .unwrap_or_else(|| self.default_expiry());
        self.store.extend(expires_at).ok_or(Error::NoSubscription)
    }

    /// Run `renew_subscription()` every `interval` until `cancel` fires.
    pub fn start_auto_renewal(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        crate::renewal::spawn_renewal_task(self.clone(), interval, cancel)
    }

    /// Delete the subscription on NSP and clear the store.
    pub async fn delete_subscription(&self) -> Result<()> {
        let current = self.store.current().ok_or(Error::NoSubscription)?;
        let authorization = self.credentials.authorization_header()?;
        self.api
            .delete(&authorization, &current.subscription_id)
            .await?;
        self.store.take();
        info!(subscription_id = %current.subscription_id, "subscription deleted");
        Ok(())
    }

    pub fn renewal_health(&self) -> RenewalHealth {
        self.health.lock().clone()
    }
}
