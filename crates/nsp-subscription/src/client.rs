//! Notification subscription endpoint client
//!
//! Endpoints, relative to the notification service root
//! (e.g. `https://10.73.0.181:8544/nbi-notification/api/v1`):
//! - `POST   /notifications/subscriptions`               create
//! - `POST   /notifications/subscriptions/{id}/renewals` renew (empty body)
//! - `DELETE /notifications/subscriptions/{id}`          delete
//!
//! NSP wraps results as `{"response": {"data": {...}}}`; a bare object is
//! accepted too.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};

const SUBSCRIPTIONS_PATH: &str = "/notifications/subscriptions";

/// Fields extracted from a create (or renew) response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionEnvelope {
    pub subscription_id: String,
    pub topic_id: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl SubscriptionEnvelope {
    /// Parse a create response. `subscriptionId` and `topicId` are required.
    pub fn parse(body: &Value) -> Result<Self> {
        let data = envelope_data(body);
        let field = |name: &'static str| {
            data.get(name)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .ok_or(Error::MissingField(name))
        };
        Ok(Self {
            subscription_id: field("subscriptionId")?,
            topic_id: field("topicId")?,
            expires_at: data.get("expiresAt").and_then(parse_timestamp),
        })
    }
}

fn envelope_data(body: &Value) -> &Value {
    body.get("response")
        .and_then(|r| r.get("data"))
        .unwrap_or(body)
}

/// NSP reports `expiresAt` as epoch milliseconds; RFC 3339 strings are
/// accepted as well.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|d| d.with_timezone(&Utc))
            .ok()
            .or_else(|| s.parse::<i64>().ok().and_then(DateTime::from_timestamp_millis)),
        _ => None,
    }
}

/// Operations against the notification service. `authorization` is the full
/// `Bearer <token>` header value, read fresh by the caller for every call.
#[async_trait]
pub trait SubscriptionApi: Send + Sync {
    async fn create(
        &self,
        authorization: &str,
        category: &str,
        property_filter: &str,
    ) -> Result<SubscriptionEnvelope>;

    /// Renew; returns the new expiry when the response carries one.
    async fn renew(
        &self,
        authorization: &str,
        subscription_id: &str,
    ) -> Result<Option<DateTime<Utc>>>;

    async fn delete(&self, authorization: &str, subscription_id: &str) -> Result<()>;
}

/// reqwest-backed `SubscriptionApi`.
pub struct HttpSubscriptionApi {
    client: reqwest::Client,
    subscriptions_url: String,
}

impl HttpSubscriptionApi {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            subscriptions_url: format!("{}{SUBSCRIPTIONS_PATH}", base_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl SubscriptionApi for HttpSubscriptionApi {
    async fn create(
        &self,
        authorization: &str,
        category: &str,
        property_filter: &str,
    ) -> Result<SubscriptionEnvelope> {
        let payload = serde_json::json!({
            "categories": [{ "name": category, "propertyFilter": property_filter }]
        });
        debug!(url = %self.subscriptions_url, category, property_filter, "creating subscription");

        let response = self
            .client
            .post(&self.subscriptions_url)
            .header(reqwest::header::AUTHORIZATION, authorization)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::Http(format!("subscription create request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            return Err(Error::CreateFailure(format!(
                "notification service returned {status}: {body}"
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::CreateFailure(format!("invalid subscription response: {e}")))?;
        SubscriptionEnvelope::parse(&body)
    }

    async fn renew(
        &self,
        authorization: &str,
        subscription_id: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let url = format!("{}/{subscription_id}/renewals", self.subscriptions_url);
        let response = self
            .client
            .post(&url)
            .header(reqwest::header::AUTHORIZATION, authorization)
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| Error::Http(format!("subscription renewal request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::RenewFailure(format!(
                "notification service returned {status}"
            )));
        }

        // Renewal bodies vary between NSP releases; an unparseable one is not an error.
        let expires_at = response
            .json::<Value>()
            .await
            .ok()
            .and_then(|body| envelope_data(&body).get("expiresAt").and_then(parse_timestamp));
        Ok(expires_at)
    }

    async fn delete(&self, authorization: &str, subscription_id: &str) -> Result<()> {
        let url = format!("{}/{subscription_id}", self.subscriptions_url);
        let response = self
            .client
            .delete(&url)
            .header(reqwest::header::AUTHORIZATION, authorization)
            .send()
            .await
            .map_err(|e| Error::Http(format!("subscription delete request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::DeleteFailure(format!(
                "notification service returned {status}"
            )));
        }
        Ok(())
    }
}
