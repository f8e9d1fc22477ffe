//! In-memory subscription storage

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;

/// A live NSP notification subscription.
///
/// `topic_id` is fixed for the life of the subscription; renewals only move
/// `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subscription {
    pub subscription_id: String,
    pub topic_id: String,
    pub expires_at: DateTime<Utc>,
}

impl Subscription {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Holder of the current subscription. Written only by `SubscriptionManager`.
#[derive(Debug, Default)]
pub struct SubscriptionStore {
    current: RwLock<Option<Arc<Subscription>>>,
}

impl SubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Arc<Subscription>> {
        self.current.read().clone()
    }

    /// Topic of the current subscription, if any.
    pub fn topic_id(&self) -> Option<String> {
        self.current().map(|s| s.topic_id.clone())
    }

    pub fn replace(&self, subscription: Subscription) -> Arc<Subscription> {
        let subscription = Arc::new(subscription);
        *self.current.write() = Some(subscription.clone());
        subscription
    }

    /// Move `expires_at` forward, keeping id and topic. Returns the new snapshot.
    pub fn extend(&self, expires_at: DateTime<Utc>) -> Option<Arc<Subscription>> {
        let mut current = self.current.write();
        let renewed = current.as_ref().map(|existing| {
            Arc::new(Subscription {
                expires_at,
                ..Subscription::clone(existing)
            })
        })?;
        *current = Some(renewed.clone());
        debug!(subscription_id = %renewed.subscription_id, %expires_at, "subscription extended");
        Some(renewed)
    }

    pub fn take(&self) -> Option<Arc<Subscription>> {
        self.current.write().take()
    }
}
