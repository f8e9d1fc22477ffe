//! Startup wiring, status, and ordered shutdown
//!
//! Startup (any failure aborts, nothing is left running):
//! 1. open the event log
//! 2. acquire the initial bearer token
//! 3. create the fault subscription
//! 4. start token refresh and subscription renewal
//! 5. spawn the stream consumer on the subscription's topic
//!
//! Shutdown runs the reverse cleanup, each step bounded and best-effort:
//! stop the consumer, cancel the periodic tasks, delete the subscription,
//! revoke the token.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use event_stream::{ConsumerSnapshot, EventSink, SourceConnector, StreamConsumer};
use nsp_auth::{AuthApi, CredentialStore, RefreshHealth, TokenManager};
use nsp_subscription::{RenewalHealth, SubscriptionApi, SubscriptionManager, SubscriptionStore};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::metrics::record_shutdown_step;

/// Upper bound on each shutdown step so one hung call cannot block the rest.
pub const SHUTDOWN_STEP_TIMEOUT: Duration = Duration::from_secs(10);

/// External collaborators, injectable for tests.
pub struct Components {
    pub auth_api: Arc<dyn AuthApi>,
    pub subscription_api: Arc<dyn SubscriptionApi>,
    pub connector: Arc<dyn SourceConnector>,
}

/// Schedules and subscription parameters, taken from config.
#[derive(Debug, Clone)]
pub struct Settings {
    pub refresh_interval: Duration,
    pub renewal_interval: Duration,
    pub subscription_ttl: Duration,
    pub category: String,
    pub property_filter: String,
    pub export_path: PathBuf,
    pub sync_each_write: bool,
}

struct Tasks {
    refresh: JoinHandle<()>,
    renewal: JoinHandle<()>,
    consumer: JoinHandle<event_stream::Result<()>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Healthy,
    /// Running with a usable token, but not exporting events
    Degraded,
    /// Stopped, or the token is no longer usable
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenStatus {
    pub valid: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub refresh: RefreshHealth,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionStatus {
    pub subscription_id: Option<String>,
    pub topic_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub expired: bool,
    pub renewal: RenewalHealth,
}

/// Point-in-time view of the whole agent.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub status: Health,
    pub is_running: bool,
    pub uptime_seconds: u64,
    pub token: TokenStatus,
    pub subscription: SubscriptionStatus,
    pub consumer: ConsumerSnapshot,
}

/// Owns every long-lived component and the background tasks driving them.
pub struct Orchestrator {
    tokens: Arc<TokenManager>,
    subscriptions: Arc<SubscriptionManager>,
    consumer: Arc<StreamConsumer>,
    started_at: Instant,
    running: AtomicBool,
    tasks_cancel: CancellationToken,
    consumer_cancel: CancellationToken,
    tasks: Mutex<Option<Tasks>>,
}

impl Orchestrator {
    /// Bring the agent up. Returns only once the token and subscription
    /// exist and every background task is spawned.
    pub async fn start(components: Components, settings: Settings) -> Result<Arc<Self>> {
        let sink =
            Arc::new(EventSink::open(&settings.export_path, settings.sync_each_write).await?);

        let credentials = Arc::new(CredentialStore::new());
        let tokens = Arc::new(TokenManager::new(components.auth_api, credentials.clone()));
        let credential = tokens.acquire_initial().await?;
        let token_lifetime = Duration::from_secs(credential.expires_in_secs);
        if settings.refresh_interval >= token_lifetime {
            abandon_startup(&tokens, None).await;
            return Err(Error::Schedule(format!(
                "refresh interval {}s is not shorter than the issued token lifetime {}s",
                settings.refresh_interval.as_secs(),
                token_lifetime.as_secs()
            )));
        }

        let subscriptions = Arc::new(SubscriptionManager::new(
            components.subscription_api,
            credentials,
            Arc::new(SubscriptionStore::new()),
            settings.subscription_ttl,
        ));
        let subscription = match subscriptions
            .create_subscription(&settings.category, &settings.property_filter)
            .await
        {
            Ok(subscription) => subscription,
            Err(e) => {
                abandon_startup(&tokens, None).await;
                return Err(e.into());
            }
        };
        let subscription_lifetime = (subscription.expires_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        if settings.renewal_interval >= subscription_lifetime {
            abandon_startup(&tokens, Some(&subscriptions)).await;
            return Err(Error::Schedule(format!(
                "renewal interval {}s is not shorter than the subscription lifetime {}s",
                settings.renewal_interval.as_secs(),
                subscription_lifetime.as_secs()
            )));
        }

        let tasks_cancel = CancellationToken::new();
        let consumer_cancel = CancellationToken::new();
        let refresh = tokens.start_auto_refresh(settings.refresh_interval, tasks_cancel.clone());
        let renewal =
            subscriptions.start_auto_renewal(settings.renewal_interval, tasks_cancel.clone());

        let consumer = Arc::new(StreamConsumer::new(components.connector, sink));
        let consume = consumer.spawn(subscription.topic_id.clone(), consumer_cancel.clone());

        info!(
            subscription_id = %subscription.subscription_id,
            topic_id = %subscription.topic_id,
            refresh_interval_secs = settings.refresh_interval.as_secs(),
            renewal_interval_secs = settings.renewal_interval.as_secs(),
            "orchestrator running"
        );

        Ok(Arc::new(Self {
            tokens,
            subscriptions,
            consumer,
            started_at: Instant::now(),
            running: AtomicBool::new(true),
            tasks_cancel,
            consumer_cancel,
            tasks: Mutex::new(Some(Tasks {
                refresh,
                renewal,
                consumer: consume,
            })),
        }))
    }

    pub fn sink(&self) -> &Arc<EventSink> {
        self.consumer.sink()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> StatusReport {
        let now = Utc::now();
        let credential = self.tokens.store().current();
        let subscription = self.subscriptions.store().current();
        let consumer = self.consumer.status().snapshot();

        let token = TokenStatus {
            valid: credential.as_ref().is_some_and(|c| c.is_valid_at(now)),
            expires_at: credential.as_ref().map(|c| c.expires_at()),
            refresh: self.tokens.refresh_health(),
        };
        let subscription = SubscriptionStatus {
            subscription_id: subscription.as_ref().map(|s| s.subscription_id.clone()),
            topic_id: subscription.as_ref().map(|s| s.topic_id.clone()),
            expires_at: subscription.as_ref().map(|s| s.expires_at),
            expired: subscription.as_ref().is_none_or(|s| s.is_expired_at(now)),
            renewal: self.subscriptions.renewal_health(),
        };

        let is_running = self.is_running();
        let consuming = consumer.state == event_stream::ConsumerState::Consuming;
        let status = if !is_running || !token.valid {
            Health::Unhealthy
        } else if subscription.expired || !consuming {
            Health::Degraded
        } else {
            Health::Healthy
        };

        StatusReport {
            status,
            is_running,
            uptime_seconds: self.started_at.elapsed().as_secs(),
            token,
            subscription,
            consumer,
        }
    }

    /// Ordered best-effort cleanup. A failed or timed-out step is logged and
    /// the next one still runs. Calling it twice is a no-op.
    pub async fn shutdown(&self) {
        let Some(tasks) = self.tasks.lock().take() else {
            debug!("shutdown already performed");
            return;
        };
        info!("shutting down");

        // 1. Stop the consumer; an in-flight record is still written.
        self.consumer_cancel.cancel();
        let abort = tasks.consumer.abort_handle();
        let stopped = match tokio::time::timeout(SHUTDOWN_STEP_TIMEOUT, tasks.consumer).await {
            Ok(Ok(Ok(()))) => true,
            Ok(Ok(Err(e))) => {
                info!(error = %e, "stream consumer had already stopped");
                true
            }
            Ok(Err(e)) => {
                error!(error = %e, "stream consumer task panicked");
                false
            }
            Err(_) => {
                abort.abort();
                warn!(
                    timeout_secs = SHUTDOWN_STEP_TIMEOUT.as_secs(),
                    "stream consumer did not stop in time, aborted"
                );
                false
            }
        };
        record_shutdown_step("stop_consumer", stopped);

        // 2. Cancel the periodic tasks.
        self.tasks_cancel.cancel();
        let joined = tokio::time::timeout(SHUTDOWN_STEP_TIMEOUT, async {
            let (refresh, renewal) = tokio::join!(tasks.refresh, tasks.renewal);
            refresh.is_ok() && renewal.is_ok()
        })
        .await
        .unwrap_or(false);
        if !joined {
            warn!("periodic tasks did not stop cleanly");
        }
        record_shutdown_step("cancel_tasks", joined);

        // 3. Delete the subscription.
        let deleted = match tokio::time::timeout(
            SHUTDOWN_STEP_TIMEOUT,
            self.subscriptions.delete_subscription(),
        )
        .await
        {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(error = %e, "subscription delete failed");
                false
            }
            Err(_) => {
                warn!("subscription delete timed out");
                false
            }
        };
        record_shutdown_step("delete_subscription", deleted);

        // 4. Revoke the token.
        let revoked = match tokio::time::timeout(SHUTDOWN_STEP_TIMEOUT, self.tokens.revoke()).await
        {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(error = %e, "token revocation failed");
                false
            }
            Err(_) => {
                warn!("token revocation timed out");
                false
            }
        };
        record_shutdown_step("revoke_token", revoked);

        self.running.store(false, Ordering::SeqCst);
        info!(stopped, deleted, revoked, "shutdown complete");
    }
}

/// Best-effort cleanup of what a failed startup already created on NSP.
async fn abandon_startup(tokens: &TokenManager, subscriptions: Option<&SubscriptionManager>) {
    if let Some(subscriptions) = subscriptions {
        if let Err(e) = subscriptions.delete_subscription().await {
            warn!(error = %e, "could not delete subscription after failed startup");
        }
    }
    if let Err(e) = tokens.revoke().await {
        warn!(error = %e, "could not revoke token after failed startup");
    }
}
