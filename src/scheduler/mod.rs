//! Scheduler that probes every target once per tick.
//!
//! Each target gets a dedicated worker task for the whole run, fed through
//! a capacity-one queue. A tick hands the target to its worker's queue;
//! if the worker is still busy the unit waits there and runs as soon as
//! the worker is free. A tick that finds a unit already waiting is skipped
//! for that target only, so work never stacks up and a slow target never
//! delays the other workers.

use crate::bus::Publish;
use crate::domain::Target;
use crate::probe::Fetch;

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Scheduler error types.
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("tick interval must be positive")]
    ZeroTick,
    #[error("worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// Lifecycle of one [`Scheduler::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Draining,
    Stopped,
}

/// Periodically dispatches targets to their workers.
pub struct Scheduler {
    prober: Arc<dyn Fetch>,
    publisher: Arc<dyn Publish>,
    state: watch::Sender<SchedulerState>,
}

impl Scheduler {
    pub fn new(prober: Arc<dyn Fetch>, publisher: Arc<dyn Publish>) -> Self {
        let (state, _) = watch::channel(SchedulerState::Idle);
        Self {
            prober,
            publisher,
            state,
        }
    }

    /// Subscribe to lifecycle changes.
    pub fn state(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    /// Probe `targets` every `tick` until `cancel` fires.
    ///
    /// Each probe gets `tick` as its deadline. On cancellation no further
    /// work is dispatched, units still waiting in a queue are dropped, and
    /// the call returns once every worker has finished the unit it was on.
    pub async fn run(
        &self,
        cancel: CancellationToken,
        targets: Vec<Target>,
        tick: Duration,
    ) -> Result<(), SchedulerError> {
        if tick.is_zero() {
            return Err(SchedulerError::ZeroTick);
        }

        tracing::info!("Starting scheduler with {} targets", targets.len());

        let mut workers = JoinSet::new();
        let mut queues = Vec::with_capacity(targets.len());
        for id in 0..targets.len() {
            let (tx, rx) = mpsc::channel(1);
            workers.spawn(run_worker(
                id,
                rx,
                cancel.clone(),
                self.prober.clone(),
                self.publisher.clone(),
                tick,
            ));
            queues.push(tx);
        }

        self.state.send_replace(SchedulerState::Running);

        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + tick, tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("Scheduler cancelled, draining workers");
                    break;
                }
                _ = interval.tick() => dispatch(&queues, &targets),
            }
        }

        self.state.send_replace(SchedulerState::Draining);

        drop(queues);
        let mut result = Ok(());
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Worker failed: {}", e);
                result = Err(SchedulerError::Worker(e));
            }
        }

        self.state.send_replace(SchedulerState::Stopped);
        tracing::info!("Scheduler stopped");
        result
    }
}

fn dispatch(queues: &[mpsc::Sender<Target>], targets: &[Target]) {
    for (queue, target) in queues.iter().zip(targets) {
        match queue.try_send(target.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    target_id = target.id(),
                    "Skipping tick for {} because a probe is already pending",
                    target.raw_url()
                );
            }
            Err(TrySendError::Closed(_)) => {
                tracing::error!(target_id = target.id(), "Worker queue closed");
            }
        }
    }
}

async fn run_worker(
    id: usize,
    mut rx: mpsc::Receiver<Target>,
    cancel: CancellationToken,
    prober: Arc<dyn Fetch>,
    publisher: Arc<dyn Publish>,
    deadline: Duration,
) {
    loop {
        // A unit still queued when cancellation arrives is never started.
        let target = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            target = rx.recv() => match target {
                Some(t) => t,
                None => break,
            },
        };

        tracing::debug!(worker = id, target_id = target.id(), url = target.raw_url(), "Probing");

        let result = match prober.fetch(&target, deadline).await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(target_id = target.id(), "Probe failed for {}: {}", target.raw_url(), e);
                continue;
            }
        };

        tracing::debug!(worker = id, target_id = target.id(), ?result, "Probe done");

        if let Err(e) = publisher.publish(&target, &result).await {
            tracing::error!(target_id = target.id(), "Failed to publish result for {}: {}", target.raw_url(), e);
        }
    }

    tracing::debug!(worker = id, "Worker done");
}
