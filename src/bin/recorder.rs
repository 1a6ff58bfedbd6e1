//! Sitewatch recorder: consumes probe results and stores them.

use sitewatch::bus::{CommitPolicy, KafkaSubscriber};
use sitewatch::config::RecorderConfig;
use sitewatch::db::Store;

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Pause before consuming again after a failed session.
const RETRY_DELAY: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    sitewatch::logging::init()?;

    // Load configuration
    let cfg = RecorderConfig::load();
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Arc::new(Store::open(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    let policy = if cfg.strict_commit {
        CommitPolicy::Strict
    } else {
        CommitPolicy::Lenient
    };
    let subscriber = KafkaSubscriber::new(&cfg.kafka, &cfg.group, store, policy)?;

    let cancel = CancellationToken::new();
    tokio::spawn(sitewatch::signal::cancel_on_shutdown(cancel.clone()));

    while !cancel.is_cancelled() {
        match subscriber.consume(&cancel).await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Consumer session failed: {}", e);
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(RETRY_DELAY) => {}
                }
            }
        }
    }

    subscriber.close().await;
    tracing::info!("Recorder stopped");
    Ok(())
}
