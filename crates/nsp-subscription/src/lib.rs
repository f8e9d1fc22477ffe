//! NSP notification subscription lifecycle
//!
//! Creates the fault/alarm subscription that makes NSP publish events onto a
//! dedicated Kafka topic, renews it on a fixed interval, and deletes it on
//! shutdown. The live subscription sits in a `SubscriptionStore` that the
//! stream consumer reads once, when it subscribes to the topic.
//!
//! Lifecycle:
//! 1. `SubscriptionManager::create_subscription()` at startup (fatal on failure)
//! 2. `SubscriptionManager::start_auto_renewal()` extends `expires_at`
//! 3. `SubscriptionManager::delete_subscription()` during shutdown (best-effort)

pub mod client;
pub mod error;
pub mod manager;
pub mod renewal;
pub mod store;

pub use client::{HttpSubscriptionApi, SubscriptionApi, SubscriptionEnvelope};
pub use error::{Error, Result};
pub use manager::{RenewalHealth, SubscriptionManager};
pub use renewal::spawn_renewal_task;
pub use store::{Subscription, SubscriptionStore};
