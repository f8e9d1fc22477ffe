//! Kafka record source over mutual TLS
//!
//! NSP publishes fault notifications on a per-subscription topic on its
//! Kafka brokers (port 9193). The client authenticates with a certificate
//! and key issued by the NSP CA; the broker certificate is checked against
//! that CA. NSP brokers typically present certificates whose names do not
//! match the address clients dial, so hostname verification is
//! configurable and disabling it is logged.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::Secret;
use rdkafka::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer as KafkaConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::Message;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::source::{RawRecord, RecordSource, SourceConnector};

/// Connection settings for the NSP brokers.
#[derive(Debug, Clone)]
pub struct KafkaSettings {
    /// Comma-separated `host:port` list
    pub brokers: String,
    pub group_id: String,
    pub ca_location: PathBuf,
    pub certificate_location: PathBuf,
    pub key_location: PathBuf,
    pub key_passphrase: Option<Secret<String>>,
    pub verify_hostname: bool,
    pub session_timeout_ms: u32,
    /// Bound on the broker metadata probe done at connect time
    pub connect_timeout: Duration,
}

impl KafkaSettings {
    /// librdkafka configuration for a TLS consumer in `group_id`.
    ///
    /// Offsets start at the earliest retained record for a new group and are
    /// auto-committed, giving at-least-once export.
    pub fn client_config(&self) -> Result<ClientConfig> {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", &self.group_id)
            .set("auto.offset.reset", "earliest")
            .set("enable.auto.commit", "true")
            .set("session.timeout.ms", self.session_timeout_ms.to_string())
            .set("security.protocol", "ssl")
            .set("ssl.ca.location", path_str(&self.ca_location)?)
            .set("ssl.certificate.location", path_str(&self.certificate_location)?)
            .set("ssl.key.location", path_str(&self.key_location)?)
            .set("enable.ssl.certificate.verification", "true");

        if let Some(passphrase) = &self.key_passphrase {
            config.set("ssl.key.password", passphrase.expose());
        }
        if !self.verify_hostname {
            warn!(
                brokers = %self.brokers,
                "broker hostname verification disabled, any certificate from the CA is accepted"
            );
            config.set("ssl.endpoint.identification.algorithm", "none");
        }
        Ok(config)
    }
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| Error::Transport(format!("non UTF-8 certificate path: {}", path.display())))
}

/// Errors after which the consumer cannot make progress without operator
/// action or a fresh connection.
fn is_fatal(e: &KafkaError) -> bool {
    matches!(
        e.rdkafka_error_code(),
        Some(
            RDKafkaErrorCode::AllBrokersDown
                | RDKafkaErrorCode::Authentication
                | RDKafkaErrorCode::SSL
                | RDKafkaErrorCode::Fatal
        )
    )
}

/// `SourceConnector` creating one librdkafka consumer per connect.
pub struct KafkaConnector {
    settings: KafkaSettings,
}

impl KafkaConnector {
    pub fn new(settings: KafkaSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl SourceConnector for KafkaConnector {
    async fn connect(&self, topic: &str) -> Result<Box<dyn RecordSource>> {
        let consumer: KafkaConsumer = self
            .settings
            .client_config()?
            .create()
            .map_err(|e| Error::Transport(format!("creating kafka consumer: {e}")))?;
        consumer
            .subscribe(&[topic])
            .map_err(|e| Error::Transport(format!("subscribing to {topic}: {e}")))?;

        // subscribe() is lazy; a metadata round trip surfaces unreachable
        // brokers and rejected certificates before we report success.
        let consumer = Arc::new(consumer);
        let probe = consumer.clone();
        let probe_topic = topic.to_string();
        let timeout = self.settings.connect_timeout;
        tokio::task::spawn_blocking(move || {
            probe
                .fetch_metadata(Some(probe_topic.as_str()), timeout)
                .map(|_| ())
        })
        .await
        .map_err(|e| Error::Transport(format!("metadata probe aborted: {e}")))?
        .map_err(|e| Error::Transport(format!("brokers unreachable or TLS rejected: {e}")))?;

        info!(
            brokers = %self.settings.brokers,
            group_id = %self.settings.group_id,
            topic,
            "kafka consumer connected"
        );
        Ok(Box::new(KafkaSource { consumer }))
    }
}

struct KafkaSource {
    consumer: Arc<KafkaConsumer>,
}

#[async_trait]
impl RecordSource for KafkaSource {
    async fn next_record(&mut self) -> Result<RawRecord> {
        loop {
            match self.consumer.recv().await {
                Ok(message) => {
                    return Ok(RawRecord {
                        topic: message.topic().to_string(),
                        partition: message.partition(),
                        offset: message.offset(),
                        payload: message.payload().map(<[u8]>::to_vec),
                    });
                }
                Err(e) if is_fatal(&e) => return Err(Error::Transport(e.to_string())),
                Err(e) => warn!(error = %e, "transient kafka error"),
            }
        }
    }

    async fn close(&mut self) {
        self.consumer.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> KafkaSettings {
        KafkaSettings {
            brokers: "10.73.0.181:9193".into(),
            group_id: "nsp-fault-gateway".into(),
            ca_location: "/etc/nsp/ca_cert.pem".into(),
            certificate_location: "/etc/nsp/client.pem".into(),
            key_location: "/etc/nsp/client.key".into(),
            key_passphrase: None,
            verify_hostname: false,
            session_timeout_ms: 10_000,
            connect_timeout: Duration::from_secs(10),
        }
    }

    #[test]
    fn client_config_uses_tls_and_earliest_offsets() {
        let config = settings().client_config().unwrap();
        assert_eq!(config.get("security.protocol"), Some("ssl"));
        assert_eq!(config.get("bootstrap.servers"), Some("10.73.0.181:9193"));
        assert_eq!(config.get("group.id"), Some("nsp-fault-gateway"));
        assert_eq!(config.get("auto.offset.reset"), Some("earliest"));
        assert_eq!(config.get("enable.auto.commit"), Some("true"));
        assert_eq!(config.get("ssl.ca.location"), Some("/etc/nsp/ca_cert.pem"));
        assert_eq!(config.get("ssl.key.location"), Some("/etc/nsp/client.key"));
        assert_eq!(config.get("enable.ssl.certificate.verification"), Some("true"));
        assert!(config.get("ssl.key.password").is_none());
    }

    #[test]
    fn relaxed_hostname_check_disables_identification() {
        let config = settings().client_config().unwrap();
        assert_eq!(config.get("ssl.endpoint.identification.algorithm"), Some("none"));

        let strict = KafkaSettings {
            verify_hostname: true,
            ..settings()
        };
        let config = strict.client_config().unwrap();
        assert!(config.get("ssl.endpoint.identification.algorithm").is_none());
    }

    #[test]
    fn key_passphrase_is_passed_through() {
        let with_key = KafkaSettings {
            key_passphrase: Some(Secret::new("hunter2".to_string())),
            ..settings()
        };
        let config = with_key.client_config().unwrap();
        assert_eq!(config.get("ssl.key.password"), Some("hunter2"));
    }

    #[test]
    fn fatal_error_classification() {
        let fatal = KafkaError::MessageConsumption(RDKafkaErrorCode::AllBrokersDown);
        assert!(is_fatal(&fatal));
        let ssl = KafkaError::MessageConsumption(RDKafkaErrorCode::SSL);
        assert!(is_fatal(&ssl));
        let transient = KafkaError::MessageConsumption(RDKafkaErrorCode::BrokerTransportFailure);
        assert!(!is_fatal(&transient));
        let eof = KafkaError::PartitionEOF(0);
        assert!(!is_fatal(&eof));
    }
}
