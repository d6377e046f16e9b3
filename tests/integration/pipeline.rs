//! End-to-end session flow: official prints go from the tape watcher
//! through the command queue into the coordinator, and PREDICT callers
//! see the trained estimate.

use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use byn_realtime::broker::readiness::{EXTERNAL_HISTORY, EXTERNAL_LIVE, OFFICIAL_TAPE};
use byn_realtime::broker::requests::COMMAND_QUEUE;
use byn_realtime::broker::{Broker, Command};
use byn_realtime::engine::PredictionCoordinator;
use byn_realtime::ingest::{TapeConfig, TapeWatcher};
use byn_realtime::replay::ReplayFixture;
use byn_realtime::resilience::{Cancelled, Supervisor, SupervisorConfig};
use byn_realtime::types::RateSample;

use crate::fakes::{pipelines, reference_rates, FixedTapeSource, World};

const WAIT: Duration = Duration::from_secs(2);

fn watcher(world: &World, source: Arc<FixedTapeSource>) -> TapeWatcher {
    TapeWatcher::new(
        source,
        world.archive.clone(),
        world.requests.clone(),
        world.readiness.clone(),
        world.calendar.clone(),
        &TapeConfig::default(),
    )
}

fn coordinator(world: &World) -> PredictionCoordinator {
    PredictionCoordinator::new(
        world.collaborators.clone(),
        world.requests.clone(),
        world.readiness.clone(),
        world.calendar.clone(),
    )
}

#[tokio::test]
async fn test_prints_flow_from_tape_to_predictions() {
    let world = World::new(dec!(3.24));
    world.readiness.reset(&pipelines()).await.unwrap();

    let coordinator = coordinator(&world);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let supervisor = Supervisor::new("coordinator", SupervisorConfig::default()).with_shutdown(shutdown_rx);
    let task = tokio::spawn(async move { supervisor.run(|| coordinator.run()).await });

    let source = Arc::new(FixedTapeSource::new(vec![
        RateSample::new(world.at(36_000), dec!(3.25)),
        // Far outside the band around the 3.24 baseline.
        RateSample::new(world.at(36_900), dec!(3.40)),
        RateSample::new(world.at(37_800), dec!(3.255)),
    ]));
    let watcher = watcher(&world, source);

    world.readiness.mark_ready(EXTERNAL_HISTORY).await.unwrap();
    world.readiness.mark_ready(EXTERNAL_LIVE).await.unwrap();
    let mut known = watcher.prime(world.today).await.unwrap();
    assert!(known.is_empty());

    // Nothing trained today yet: the previous close.
    let estimate = world.requests.predict(reference_rates(), WAIT).await.unwrap();
    assert_eq!(estimate.map(|e| e.rate), Some(dec!(3.24)));

    assert_eq!(watcher.poll_once(world.today, &mut known).await.unwrap(), 3);
    let estimate = world.requests.predict(reference_rates(), WAIT).await.unwrap();
    assert_eq!(estimate.map(|e| e.rate), Some(dec!(3.255)));

    // A rebuilt session re-seeds today's prints from the archive.
    world.requests.send(Command::Rebuild).await.unwrap();
    let estimate = world.requests.predict(reference_rates(), WAIT).await.unwrap();
    assert_eq!(estimate.map(|e| e.rate), Some(dec!(3.255)));

    shutdown_tx.send(true).unwrap();
    assert_eq!(task.await.unwrap(), Err(Cancelled));
}

#[tokio::test]
async fn test_watcher_announces_only_changes() {
    let world = World::new(dec!(3.24));
    let source = Arc::new(FixedTapeSource::new(vec![RateSample::new(world.at(36_000), dec!(3.25))]));
    let watcher = watcher(&world, source.clone());

    let mut known = watcher.prime(world.today).await.unwrap();
    let flags = world.broker.flags(byn_realtime::broker::readiness::READINESS_KEY).await.unwrap();
    assert_eq!(flags.get(OFFICIAL_TAPE), Some(&true));

    assert_eq!(watcher.poll_once(world.today, &mut known).await.unwrap(), 1);
    let first = world.requests.receive().await.unwrap();
    assert!(matches!(first.command, Command::NewData { ref samples } if samples.len() == 1));

    // Same tape again: nothing to announce.
    assert_eq!(watcher.poll_once(world.today, &mut known).await.unwrap(), 0);
    assert_eq!(world.broker.len(COMMAND_QUEUE).await.unwrap(), 0);

    source.publish(RateSample::new(world.at(36_900), dec!(3.26)));
    source.set_down(true);
    assert_eq!(watcher.poll_once(world.today, &mut known).await.unwrap(), 0);
    source.set_down(false);
    assert_eq!(watcher.poll_once(world.today, &mut known).await.unwrap(), 1);

    // The announcement carries the whole session tape.
    let second = world.requests.receive().await.unwrap();
    assert!(matches!(second.command, Command::NewData { ref samples } if samples.len() == 2));
    assert_eq!(world.archive.len(), 3);
}

#[tokio::test]
async fn test_stale_request_does_not_disturb_later_ones() {
    let world = World::new(dec!(3.24));
    world.readiness.reset(&pipelines()).await.unwrap();
    for pipeline in pipelines() {
        world.readiness.mark_ready(&pipeline).await.unwrap();
    }

    // Nobody is consuming yet, so this one times out and expires.
    let stale = world
        .requests
        .predict(reference_rates(), Duration::from_millis(30))
        .await
        .unwrap();
    assert!(stale.is_none());
    tokio::time::sleep(Duration::from_millis(20)).await;

    let coordinator = coordinator(&world);
    let task = tokio::spawn(async move { coordinator.run().await });

    let estimate = world.requests.predict(reference_rates(), WAIT).await.unwrap();
    assert_eq!(estimate.map(|e| e.rate), Some(dec!(3.24)));
    assert_eq!(world.broker.len(COMMAND_QUEUE).await.unwrap(), 0);

    task.abort();
}

#[tokio::test]
async fn test_coordinator_recovers_from_broker_outage() {
    let world = World::new(dec!(3.31));
    world.readiness.reset(&pipelines()).await.unwrap();
    for pipeline in pipelines() {
        world.readiness.mark_ready(&pipeline).await.unwrap();
    }

    let config = SupervisorConfig {
        max_backoff_secs: 0,
        ..SupervisorConfig::default()
    };
    let coordinator = coordinator(&world);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let supervisor = Supervisor::new("coordinator", config).with_shutdown(shutdown_rx);
    let task = tokio::spawn(async move { supervisor.run(|| coordinator.run()).await });

    // The coordinator's next pops fail; it is restarted from scratch.
    world.broker.fail_next(3);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let estimate = world.requests.predict(reference_rates(), WAIT).await.unwrap();
    assert_eq!(estimate.map(|e| e.rate), Some(dec!(3.31)));

    shutdown_tx.send(true).unwrap();
    assert_eq!(task.await.unwrap(), Err(Cancelled));
}

#[test]
fn test_bundled_replay_fixture_loads() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/data/replay.json");
    let origin = 1_700_000_000;
    let fixture = ReplayFixture::load(path).unwrap().anchored_at(origin);

    assert!(!fixture.tape_before(origin).is_empty());
    assert!(fixture.tape.iter().any(|s| s.timestamp > origin));

    let rates = fixture.reference_at(origin + 40_000).unwrap();
    assert!(rates.eur > dec!(2) && rates.eur < dec!(3));
    assert!(rates.dxy > dec!(90));
}
