//! Sitewatch checker: probes the configured targets and publishes results.

use sitewatch::bus::{self, KafkaPublisher};
use sitewatch::config::{self, CheckerConfig};
use sitewatch::probe::HttpProber;
use sitewatch::scheduler::Scheduler;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    sitewatch::logging::init()?;

    // Load configuration
    let cfg = CheckerConfig::load()?;
    let targets = config::load_targets(&cfg.targets_path)?;
    tracing::info!(
        "Loaded {} targets from {}",
        targets.len(),
        cfg.targets_path.display()
    );

    bus::create_topic(&cfg.kafka).await?;

    let prober = Arc::new(HttpProber::new()?);
    let publisher = Arc::new(KafkaPublisher::new(&cfg.kafka)?);
    let scheduler = Scheduler::new(prober, publisher.clone());

    let cancel = CancellationToken::new();
    tokio::spawn(sitewatch::signal::cancel_on_shutdown(cancel.clone()));

    let result = scheduler.run(cancel, targets, cfg.tick).await;
    publisher.close().await;
    result?;

    Ok(())
}
