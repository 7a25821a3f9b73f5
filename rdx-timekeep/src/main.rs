use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;
use timekeep::prelude::*;
use timekeep::{ENGINE_NAME, VERSION};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::LocalSet;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // 1. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    // 2. Load configuration: an optional TOML path as the first argument.
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let mut config = TimekeepConfig::load(config_path.as_deref())?;
    config.record_sessions = true;

    // 3. Trackers are !Send, so everything runs on one LocalSet.
    LocalSet::new().run_until(run_demo(config)).await
}

async fn run_demo(config: TimekeepConfig) -> Result<()> {
    let engine = TimekeepEngine::new(config);
    info!("{} v{} at {}.", ENGINE_NAME, VERSION, engine.clock_face_text());

    spawn_event_listener(&engine);

    // 4. A short countdown and a stopwatch running side by side.
    let timer = engine.add_timer(TimeSpan::from_secs(3));
    let stopwatch = engine.add_stopwatch();
    engine.dispatch(timer, Command::Start)?;
    engine.dispatch(stopwatch, Command::Start)?;

    for _ in 0..3 {
        tokio::time::sleep(Duration::from_millis(1_200)).await;
        if let CommandOutcome::LapRecorded(lap) = engine.dispatch(stopwatch, Command::Lap)? {
            info!("[LAP] #{} {} (total {})", lap.lap_number, lap.lap_time, lap.total_time);
        }
    }

    engine.dispatch(stopwatch, Command::Pause)?;
    tokio::time::sleep(Duration::from_millis(500)).await;
    engine.dispatch(stopwatch, Command::Stop)?;

    // A lap on a stopped stopwatch is rejected; a UI would grey the button out.
    if let Err(err) = engine.dispatch(stopwatch, Command::Lap) {
        warn!("[LAP] rejected: {err}");
    }

    for session in engine.sessions() {
        info!("[SESSION] {:?}", session);
    }
    Ok(())
}

/// Spawns a local task that logs every module event except ticks.
fn spawn_event_listener(engine: &TimekeepEngine) {
    let mut events = engine.subscribe();
    tokio::task::spawn_local(async move {
        loop {
            match events.recv().await {
                Ok(ModuleEvent { event: TrackerEvent::Tick(_), .. }) => {}
                Ok(ModuleEvent { module, event }) => info!("[EVENT] {:?} => {}", module, event.name()),
                Err(RecvError::Lagged(skipped)) => warn!("Event listener lagged; skipped {skipped} events."),
                Err(RecvError::Closed) => break,
            }
        }
    });
}
