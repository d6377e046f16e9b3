//! Readiness and supervision behaviour across broker outages.

use anyhow::anyhow;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};

use byn_realtime::broker::readiness::{EXTERNAL_HISTORY, EXTERNAL_LIVE, OFFICIAL_TAPE};
use byn_realtime::broker::{Broker, BrokerError, InMemoryBroker, ReadinessBarrier};
use byn_realtime::ingest::{ReferenceConfig, ReferenceWatcher};
use byn_realtime::resilience::{Cancelled, Supervisor, SupervisorConfig};
use rust_decimal_macros::dec;
use tokio::sync::watch;

use crate::fakes::{pipelines, World, POLL};

fn barrier(broker: &Arc<InMemoryBroker>) -> ReadinessBarrier {
    let shared: Arc<dyn Broker> = broker.clone();
    ReadinessBarrier::new(shared).with_poll_interval(POLL)
}

#[tokio::test]
async fn test_barrier_opens_once_every_pipeline_reports() {
    let broker = Arc::new(InMemoryBroker::new());
    let readiness = barrier(&broker);
    readiness.reset(&pipelines()).await.unwrap();

    // Flag writes ride out a short outage.
    broker.fail_next(2);
    readiness.mark_ready(EXTERNAL_HISTORY).await.unwrap();

    timeout(Duration::from_secs(1), readiness.wait_for_any(&pipelines()))
        .await
        .unwrap();
    let blocked = timeout(Duration::from_millis(50), readiness.wait_for_all(&pipelines())).await;
    assert!(blocked.is_err());

    readiness.mark_ready(EXTERNAL_LIVE).await.unwrap();
    readiness.mark_ready(OFFICIAL_TAPE).await.unwrap();

    // Reads failing meanwhile only delay the wait.
    broker.fail_next(3);
    timeout(Duration::from_secs(1), readiness.wait_for_all(&pipelines()))
        .await
        .unwrap();

    // A new session starts from scratch.
    readiness.reset(&pipelines()).await.unwrap();
    let blocked = timeout(Duration::from_millis(50), readiness.wait_for_any(&pipelines())).await;
    assert!(blocked.is_err());
}

#[tokio::test]
async fn test_supervised_reference_pipelines_open_the_barrier() {
    let world = World::new(dec!(3.24));
    world.readiness.reset(&pipelines()).await.unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();
    for (pipeline, feed) in [
        (EXTERNAL_HISTORY, world.collaborators.historical.clone()),
        (EXTERNAL_LIVE, world.collaborators.live.clone()),
    ] {
        let watcher = ReferenceWatcher::new(feed, world.readiness.clone(), pipeline, &ReferenceConfig::default());
        let supervisor = Supervisor::new(pipeline, SupervisorConfig::default()).with_shutdown(shutdown_rx.clone());
        tasks.push(tokio::spawn(async move { supervisor.run(|| watcher.run()).await }));
    }

    let reference = [EXTERNAL_HISTORY, EXTERNAL_LIVE];
    timeout(Duration::from_secs(1), world.readiness.wait_for_all(&reference))
        .await
        .unwrap();
    // The tape pipeline has not reported yet.
    let blocked = timeout(Duration::from_millis(50), world.readiness.wait_for_all(&pipelines())).await;
    assert!(blocked.is_err());

    shutdown_tx.send(true).unwrap();
    for task in tasks {
        assert_eq!(task.await.unwrap(), Err(Cancelled));
    }
}

#[tokio::test]
async fn test_closed_broker_is_not_retried() {
    let broker = Arc::new(InMemoryBroker::new());
    let readiness = barrier(&broker);
    broker.close();

    let err = readiness.mark_ready(OFFICIAL_TAPE).await.unwrap_err();
    assert!(matches!(err, BrokerError::Closed));
}

#[tokio::test(start_paused = true)]
async fn test_supervisor_backs_off_between_restarts() {
    let counter = AtomicU32::new(0);
    let attempts = &counter;
    let supervisor = Supervisor::new("flaky", SupervisorConfig::default());
    let started = Instant::now();

    let outcome = supervisor
        .run(move || async move {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(anyhow!("feed connection dropped"))
            } else {
                Ok(())
            }
        })
        .await;

    assert_eq!(outcome, Ok(()));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    // 1s after the first failure, 2s after the second.
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(3) && elapsed < Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_unit_is_never_restarted() {
    let counter = AtomicU32::new(0);
    let attempts = &counter;
    let supervisor = Supervisor::new("cancelled", SupervisorConfig::default());

    let outcome = supervisor
        .run(move || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(anyhow::Error::new(Cancelled))
        })
        .await;

    assert_eq!(outcome, Err(Cancelled));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}
