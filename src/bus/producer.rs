//! Asynchronous publisher of probe results.

use super::{BusError, Envelope, KafkaSettings, TOPIC};
use crate::domain::{ProbeResult, Target};

use async_trait::async_trait;
use rdkafka::producer::{DeliveryFuture, FutureProducer, FutureRecord, Producer};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// How long shutdown waits for in-flight messages to reach the broker.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Hands one (target, result) pair to the bus.
#[async_trait]
pub trait Publish: Send + Sync {
    async fn publish(&self, target: &Target, result: &ProbeResult) -> Result<(), BusError>;
}

/// Kafka publisher that never waits for broker acknowledgement.
///
/// Delivery reports are collected by a background task which logs
/// failures; they are never retried nor reported back to the caller.
pub struct KafkaPublisher {
    producer: FutureProducer,
    deliveries: Mutex<Option<mpsc::UnboundedSender<DeliveryFuture>>>,
    drain: Mutex<Option<JoinHandle<()>>>,
}

impl KafkaPublisher {
    pub fn new(settings: &KafkaSettings) -> Result<Self, BusError> {
        let producer: FutureProducer = settings
            .client_config()
            .set("message.timeout.ms", "30000")
            .create()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let drain = tokio::spawn(drain_deliveries(rx));

        Ok(Self {
            producer,
            deliveries: Mutex::new(Some(tx)),
            drain: Mutex::new(Some(drain)),
        })
    }

    /// Stop accepting sends, flush queued messages and wait for the
    /// delivery reports to be drained. Calling it twice is a no-op.
    pub async fn close(&self) {
        // Dropping the sender ends the drain loop once it is empty.
        if self.deliveries.lock().await.take().is_none() {
            return;
        }

        let producer = self.producer.clone();
        match tokio::task::spawn_blocking(move || producer.flush(FLUSH_TIMEOUT)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "Failed to flush publisher"),
            Err(e) => tracing::error!(error = %e, "Flush task failed"),
        }

        if let Some(drain) = self.drain.lock().await.take() {
            if let Err(e) = drain.await {
                tracing::error!(error = %e, "Delivery report task failed");
            }
        }
    }
}

#[async_trait]
impl Publish for KafkaPublisher {
    async fn publish(&self, target: &Target, result: &ProbeResult) -> Result<(), BusError> {
        let envelope = Envelope::new(target.clone(), result.clone());
        let payload = envelope.encode()?;

        let deliveries = self.deliveries.lock().await;
        let tx = deliveries.as_ref().ok_or(BusError::Closed)?;

        let record = FutureRecord::to(TOPIC).key(envelope.key()).payload(&payload);
        let delivery = self
            .producer
            .send_result(record)
            .map_err(|(e, _)| BusError::Enqueue(e))?;

        tx.send(delivery).map_err(|_| BusError::Closed)
    }
}

async fn drain_deliveries(mut rx: mpsc::UnboundedReceiver<DeliveryFuture>) {
    while let Some(delivery) = rx.recv().await {
        match delivery.await {
            Ok(Ok(_)) => {}
            Ok(Err((e, _))) => tracing::error!(error = %e, "Error producing result"),
            Err(_) => tracing::error!("Delivery report dropped before completion"),
        }
    }
    tracing::debug!("Delivery report task done");
}
