//! BYN realtime: rate coordination service
//!
//! Entry point. Loads configuration, initialises structured logging,
//! wires the replay collaborators to the shared broker, runs the
//! supervised prediction coordinator, official tape watcher and
//! reference feed watchers, and acts
//! as a periodic PREDICT producer until Ctrl+C.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use byn_realtime::broker::readiness::{EXTERNAL_HISTORY, EXTERNAL_LIVE};
use byn_realtime::broker::{Broker, InMemoryBroker, ReadinessBarrier, RequestBroker};
use byn_realtime::config;
use byn_realtime::engine::{Collaborators, PredictionCoordinator};
use byn_realtime::ingest::{ReferenceWatcher, TapeWatcher, TradingCalendar};
use byn_realtime::model::{CarryForwardBuilder, DeviationBandFilter};
use byn_realtime::replay::{MemoryFeed, MemoryTapeArchive, ReplayFixture, StaticTapeSource};
use byn_realtime::resilience::Supervisor;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = config::AppConfig::load("config.toml")?;

    init_logging();

    info!(
        service = %cfg.service.name,
        replay = %cfg.service.replay_path,
        command_queue = %cfg.broker.command_queue,
        reply_queue = %cfg.broker.reply_queue,
        "Starting up"
    );

    let calendar = TradingCalendar::new(&cfg.calendar).context("Invalid trading calendar")?;
    let today = calendar.today();
    let origin = calendar.day_start(today).timestamp();
    let fixture = ReplayFixture::load(&cfg.service.replay_path)?.anchored_at(origin);

    // -- Shared broker ---------------------------------------------------

    let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());
    let requests = RequestBroker::new(broker.clone())
        .with_queues(cfg.broker.command_queue.as_str(), cfg.broker.reply_queue.as_str())
        .with_poll_interval(cfg.broker.poll_interval());
    let readiness = ReadinessBarrier::new(broker.clone())
        .with_key(cfg.readiness.key.as_str())
        .with_poll_interval(cfg.readiness.poll_interval())
        .with_write_retries(cfg.readiness.write_retries);

    readiness
        .reset(&cfg.readiness.pipelines)
        .await
        .context("Failed to reset readiness flags")?;

    // -- Collaborators ---------------------------------------------------

    let archive = Arc::new(MemoryTapeArchive::new(&fixture.tape_before(origin)));
    info!(%today, archived = archive.len(), "Replay fixture loaded");

    let collaborators = Collaborators {
        builder: Arc::new(CarryForwardBuilder::new(
            archive.clone(),
            calendar.clone(),
            fixture.fallback_rate,
        )),
        archive: archive.clone(),
        trust: Arc::new(DeviationBandFilter::new(&cfg.trust)),
        live: Arc::new(MemoryFeed::new(EXTERNAL_LIVE, fixture.live.clone())),
        historical: Arc::new(MemoryFeed::new(EXTERNAL_HISTORY, fixture.historical.clone())),
    };

    let coordinator = PredictionCoordinator::new(
        collaborators.clone(),
        requests.clone(),
        readiness.clone(),
        calendar.clone(),
    )
    .with_pipelines(cfg.readiness.pipelines.clone())
    .with_fusion_config(cfg.fusion.clone());

    let reference_watchers = [
        (EXTERNAL_HISTORY, collaborators.historical.clone()),
        (EXTERNAL_LIVE, collaborators.live.clone()),
    ]
    .map(|(pipeline, feed)| ReferenceWatcher::new(feed, readiness.clone(), pipeline, &cfg.reference));

    let watcher = TapeWatcher::new(
        Arc::new(StaticTapeSource::new(fixture.tape.clone(), calendar.clone())),
        archive,
        requests.clone(),
        readiness.clone(),
        calendar.clone(),
        &cfg.tape,
    );

    // -- Supervised loops ------------------------------------------------

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let coordinator_supervisor =
        Supervisor::new("prediction coordinator", cfg.supervisor.clone()).with_shutdown(shutdown_rx.clone());
    let coordinator_task =
        tokio::spawn(async move { coordinator_supervisor.run(|| coordinator.run()).await });

    let watcher_supervisor =
        Supervisor::new("official tape watcher", cfg.supervisor.clone()).with_shutdown(shutdown_rx.clone());
    let watcher_task = tokio::spawn(async move { watcher_supervisor.run(|| watcher.run()).await });

    let mut tasks = vec![
        ("coordinator".to_string(), coordinator_task),
        ("tape watcher".to_string(), watcher_task),
    ];
    for reference in reference_watchers {
        let name = format!("{} watcher", reference.pipeline());
        let supervisor = Supervisor::new(name.clone(), cfg.supervisor.clone()).with_shutdown(shutdown_rx.clone());
        tasks.push((name, tokio::spawn(async move { supervisor.run(|| reference.run()).await })));
    }

    // -- Producer loop ---------------------------------------------------

    let predict_interval = Duration::from_secs(cfg.service.predict_interval_secs.max(1));
    let mut interval = tokio::time::interval(predict_interval);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        interval_secs = predict_interval.as_secs(),
        timeout_ms = cfg.broker.predict_timeout_ms,
        "Entering main loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let now = calendar.now().timestamp();
                let rates = match fixture.reference_at(now) {
                    Ok(rates) => rates,
                    Err(e) => {
                        warn!(error = %e, "No reference context for a prediction");
                        continue;
                    }
                };

                match requests.predict(rates, cfg.broker.predict_timeout()).await {
                    Ok(Some(estimate)) => info!(%rates, %estimate, "Prediction received"),
                    Ok(None) => warn!(%rates, "No prediction before the deadline"),
                    Err(e) => error!(error = %e, "Prediction request failed"),
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    // Cancels every supervised loop; none is restarted.
    let _ = shutdown_tx.send(true);
    for (name, task) in tasks {
        match task.await {
            Ok(Ok(())) => info!(task = %name, "Finished"),
            Ok(Err(cancelled)) => info!(task = %name, reason = %cancelled, "Stopped"),
            Err(e) => error!(task = %name, error = %e, "Task panicked or was aborted"),
        }
    }

    info!("Shut down cleanly.");
    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("byn_realtime=info"));

    let json_logging = std::env::var("BYN_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
