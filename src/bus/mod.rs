//! Message bus plumbing between the checker and the recorder.
//!
//! Probe results travel as JSON [`Envelope`]s on a single Kafka topic,
//! keyed by target id so every result for one target lands on the same
//! partition in publish order.

mod consumer;
mod envelope;
mod producer;

pub use consumer::*;
pub use envelope::*;
pub use producer::*;

use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::error::KafkaError;
use rdkafka::types::RDKafkaErrorCode;
use std::path::PathBuf;
use thiserror::Error;

/// Topic shared by the checker and the recorder.
pub const TOPIC: &str = "website.monitor";

/// Default consumer group of the recorder.
pub const DEFAULT_GROUP: &str = "website-monitor-1";

/// Bus error types.
#[derive(Error, Debug)]
pub enum BusError {
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("can't serialize envelope: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("can't deserialize envelope: {0}")]
    Deserialize(#[source] serde_json::Error),
    #[error("message has no payload")]
    MissingPayload,
    #[error("can't enqueue message: {0}")]
    Enqueue(KafkaError),
    #[error("publisher is closed")]
    Closed,
    #[error("topic admin failed: {0}")]
    Admin(String),
}

/// TLS material for the broker connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub ca_file: PathBuf,
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

/// Broker connection settings shared by producers, consumers and admin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KafkaSettings {
    pub brokers: Vec<String>,
    pub tls: Option<TlsFiles>,
}

impl KafkaSettings {
    pub fn new(brokers: Vec<String>) -> Self {
        Self { brokers, tls: None }
    }

    /// Base client configuration for any Kafka client.
    pub fn client_config(&self) -> ClientConfig {
        let mut cfg = ClientConfig::new();
        cfg.set("bootstrap.servers", self.brokers.join(","));

        if let Some(tls) = &self.tls {
            cfg.set("security.protocol", "ssl")
                .set("ssl.ca.location", tls.ca_file.display().to_string())
                .set("ssl.certificate.location", tls.cert_file.display().to_string())
                .set("ssl.key.location", tls.key_file.display().to_string());
        }

        cfg
    }
}

/// Create [`TOPIC`] if the cluster does not have it yet.
pub async fn create_topic(settings: &KafkaSettings) -> Result<(), BusError> {
    let admin: AdminClient<DefaultClientContext> = settings.client_config().create()?;

    let topic = NewTopic::new(TOPIC, 1, TopicReplication::Fixed(1));
    let results = admin
        .create_topics([&topic], &AdminOptions::new())
        .await?;

    for result in results {
        match result {
            Ok(name) => tracing::info!(topic = %name, "Topic created"),
            Err((_, RDKafkaErrorCode::TopicAlreadyExists)) => {
                tracing::debug!(topic = TOPIC, "Topic already exists");
            }
            Err((name, code)) => {
                return Err(BusError::Admin(format!("can't create topic {}: {}", name, code)));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_without_tls() {
        let settings = KafkaSettings::new(vec!["a:9092".into(), "b:9092".into()]);
        let cfg = settings.client_config();
        assert_eq!(cfg.get("bootstrap.servers"), Some("a:9092,b:9092"));
        assert_eq!(cfg.get("security.protocol"), None);
    }

    #[test]
    fn test_client_config_with_tls() {
        let settings = KafkaSettings {
            brokers: vec!["broker:9093".into()],
            tls: Some(TlsFiles {
                ca_file: "/etc/kafka/ca.pem".into(),
                cert_file: "/etc/kafka/service.cert".into(),
                key_file: "/etc/kafka/service.key".into(),
            }),
        };
        let cfg = settings.client_config();
        assert_eq!(cfg.get("security.protocol"), Some("ssl"));
        assert_eq!(cfg.get("ssl.ca.location"), Some("/etc/kafka/ca.pem"));
        assert_eq!(cfg.get("ssl.key.location"), Some("/etc/kafka/service.key"));
    }
}
