//! Probe to storage, with an in-process stand-in for the bus.

use async_trait::async_trait;
use axum::{routing::get, Router};
use sitewatch::bus::{process_message, BusError, CommitPolicy, Disposition, Envelope, Publish};
use sitewatch::db::Store;
use sitewatch::domain::{ProbeResult, Target};
use sitewatch::probe::HttpProber;
use sitewatch::scheduler::Scheduler;

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Keeps (key, payload) pairs in publish order.
#[derive(Default)]
struct MemoryBus {
    messages: Mutex<Vec<(String, Vec<u8>)>>,
}

#[async_trait]
impl Publish for MemoryBus {
    async fn publish(&self, target: &Target, result: &ProbeResult) -> Result<(), BusError> {
        let envelope = Envelope::new(target.clone(), result.clone());
        let payload = envelope.encode()?;
        self.messages
            .lock()
            .unwrap()
            .push((envelope.key().to_string(), payload));
        Ok(())
    }
}

#[tokio::test]
async fn test_probe_to_storage() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let router = Router::new().route("/", get(|| async { "all ok" }));
        axum::serve(listener, router).await.unwrap();
    });

    let target = Target::new(&format!("http://{addr}/"), "GET", "ok$").unwrap();
    let bus = Arc::new(MemoryBus::default());
    let scheduler = Scheduler::new(Arc::new(HttpProber::new().unwrap()), bus.clone());

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(650)).await;
        canceller.cancel();
    });
    scheduler
        .run(cancel, vec![target.clone()], Duration::from_millis(200))
        .await
        .unwrap();

    let messages = bus.messages.lock().unwrap().clone();
    assert!(!messages.is_empty());
    assert!(messages.len() <= 3);

    let store = Store::open_in_memory().unwrap();
    for (key, payload) in &messages {
        assert_eq!(key, target.id());
        // Every message is delivered twice.
        for _ in 0..2 {
            let disposition = process_message(&store, Some(payload.as_slice()), CommitPolicy::Lenient).await;
            assert_eq!(disposition, Disposition::Commit);
        }
    }

    assert_eq!(store.count_targets().unwrap(), 1);
    assert_eq!(store.count_results().unwrap(), messages.len() as i64);

    let stored = store.target(target.id()).unwrap().unwrap();
    assert_eq!(stored.method, "GET");
    assert_eq!(stored.match_regexp.as_deref(), Some("ok$"));

    for result in store.results_for(target.id()).unwrap() {
        assert_eq!(result.status, Some(200));
        assert_eq!(result.matched, Some(true));
        assert!(!result.unreachable);
    }
}
