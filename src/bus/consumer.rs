//! Consumer group subscriber with at-least-once processing.

use super::{BusError, Envelope, KafkaSettings, TOPIC};
use crate::domain::{ProbeResult, Target};

use async_trait::async_trait;
use rdkafka::client::ClientContext;
use rdkafka::consumer::{Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::Offset;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Error returned by a [`ResultHandler`].
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Receives every decoded envelope.
#[async_trait]
pub trait ResultHandler: Send + Sync {
    async fn handle(&self, target: &Target, result: &ProbeResult) -> Result<(), HandlerError>;
}

/// What to do with a message whose handler failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitPolicy {
    /// Mark it processed anyway; the consumer never stalls.
    #[default]
    Lenient,
    /// Leave it unmarked and have it delivered again.
    Strict,
}

/// Outcome of processing one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Commit,
    Redeliver,
}

/// Decode one payload and run the handler on it.
///
/// Undecodable payloads are logged and committed so a poison message can
/// never block its partition.
pub async fn process_message(
    handler: &dyn ResultHandler,
    payload: Option<&[u8]>,
    policy: CommitPolicy,
) -> Disposition {
    let envelope = match payload.ok_or(BusError::MissingPayload).and_then(Envelope::decode) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::error!(error = %e, "Unable to decode message");
            return Disposition::Commit;
        }
    };

    match handler.handle(&envelope.target, &envelope.result).await {
        Ok(()) => Disposition::Commit,
        Err(e) => {
            tracing::error!(target_id = envelope.key(), error = %e, "Error handling message");
            match policy {
                CommitPolicy::Lenient => Disposition::Commit,
                CommitPolicy::Strict => Disposition::Redeliver,
            }
        }
    }
}

/// Forwards client-level errors to the drain task and logs rebalances.
struct SubscriberContext {
    errors: mpsc::UnboundedSender<KafkaError>,
}

impl ClientContext for SubscriberContext {
    fn error(&self, error: KafkaError, reason: &str) {
        tracing::debug!(reason, "Kafka client error");
        let _ = self.errors.send(error);
    }
}

impl ConsumerContext for SubscriberContext {
    fn post_rebalance(&self, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Assign(partitions) => {
                tracing::info!(partitions = partitions.count(), "Consumer session assigned");
            }
            Rebalance::Revoke(partitions) => {
                tracing::info!(partitions = partitions.count(), "Consumer session revoked");
            }
            Rebalance::Error(e) => tracing::warn!(error = %e, "Rebalance failed"),
        }
    }
}

/// Kafka consumer group member feeding a [`ResultHandler`].
pub struct KafkaSubscriber {
    consumer: Mutex<Option<StreamConsumer<SubscriberContext>>>,
    drain: Mutex<Option<JoinHandle<()>>>,
    handler: Arc<dyn ResultHandler>,
    policy: CommitPolicy,
    redelivery_delay: Duration,
}

impl KafkaSubscriber {
    pub fn new(
        settings: &KafkaSettings,
        group: &str,
        handler: Arc<dyn ResultHandler>,
        policy: CommitPolicy,
    ) -> Result<Self, BusError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let context = SubscriberContext { errors: tx };

        let consumer: StreamConsumer<SubscriberContext> = settings
            .client_config()
            .set("group.id", group)
            .set("auto.offset.reset", "earliest")
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false")
            .create_with_context(context)?;

        let drain = tokio::spawn(drain_errors(rx));

        Ok(Self {
            consumer: Mutex::new(Some(consumer)),
            drain: Mutex::new(Some(drain)),
            handler,
            policy,
            redelivery_delay: Duration::from_secs(1),
        })
    }

    /// Delay before a message is delivered again under the strict policy.
    pub fn with_redelivery_delay(mut self, delay: Duration) -> Self {
        self.redelivery_delay = delay;
        self
    }

    /// Consume [`TOPIC`] until `cancel` fires.
    ///
    /// Rebalances are handled inside the consumer group session and receive
    /// errors are logged before consumption resumes. Returns `Ok(())` on
    /// cancellation, so callers may simply call it again on error. Holds
    /// the consumer until it returns: cancel before calling [`close`].
    ///
    /// [`close`]: KafkaSubscriber::close
    pub async fn consume(&self, cancel: &CancellationToken) -> Result<(), BusError> {
        let guard = self.consumer.lock().await;
        let consumer = guard.as_ref().ok_or(BusError::Closed)?;
        consumer.subscribe(&[TOPIC])?;

        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Work done");
                    return Ok(());
                }
                message = consumer.recv() => message,
            };

            let message = match message {
                Ok(m) => m,
                Err(e) => {
                    if !is_transient(&e) {
                        tracing::error!(error = %e, "Error consuming result");
                    }
                    continue;
                }
            };

            tracing::debug!(
                partition = message.partition(),
                offset = message.offset(),
                key = %String::from_utf8_lossy(message.key().unwrap_or_default()),
                "Consumed message"
            );

            match process_message(self.handler.as_ref(), message.payload(), self.policy).await {
                Disposition::Commit => {
                    if let Err(e) = consumer.store_offset_from_message(&message) {
                        tracing::error!(error = %e, "Failed to mark message");
                    }
                }
                Disposition::Redeliver => self.rewind(consumer, &message, cancel).await?,
            }
        }
    }

    async fn rewind(
        &self,
        consumer: &StreamConsumer<SubscriberContext>,
        message: &BorrowedMessage<'_>,
        cancel: &CancellationToken,
    ) -> Result<(), BusError> {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(self.redelivery_delay) => {}
        }
        consumer.seek(
            message.topic(),
            message.partition(),
            Offset::Offset(message.offset()),
            Duration::from_secs(5),
        )?;
        Ok(())
    }

    /// Leave the consumer group and wait for the error drain to finish.
    pub async fn close(&self) {
        // The consumer context owns the only error sender, so dropping the
        // consumer ends the drain loop.
        if let Some(consumer) = self.consumer.lock().await.take() {
            consumer.unsubscribe();
        }

        if let Some(drain) = self.drain.lock().await.take() {
            if let Err(e) = drain.await {
                tracing::error!(error = %e, "Consumer error task failed");
            }
        }
    }
}

async fn drain_errors(mut rx: mpsc::UnboundedReceiver<KafkaError>) {
    while let Some(e) = rx.recv().await {
        if is_transient(&e) {
            continue;
        }
        tracing::error!(error = %e, "Error consuming result");
    }
    tracing::debug!("Consumer error task done");
}

/// Timeouts and end-of-partition notices are routine.
fn is_transient(e: &KafkaError) -> bool {
    matches!(
        e.rdkafka_error_code(),
        Some(RDKafkaErrorCode::OperationTimedOut)
            | Some(RDKafkaErrorCode::RequestTimedOut)
            | Some(RDKafkaErrorCode::PartitionEOF)
    )
}
