use asset_tracker::power::WakeSource;
use asset_tracker::subsystems::ButtonGesture;
use asset_tracker::telemetry::SnapshotLog;
use asset_tracker::{AppState, SimTracker, TrackerConfig};
use std::time::Duration;
use tokio::time;
use tracing::{error, info, warn};

const SNAPSHOT_EVERY: u32 = 50;
const LOW_POWER_AT: u32 = 120;
const WAKE_PRESS_AT: u32 = 240;

fn load_config() -> Result<TrackerConfig, Box<dyn std::error::Error>> {
    match std::env::args().nth(1) {
        Some(path) => {
            let json = std::fs::read_to_string(&path)?;
            info!(%path, "loading configuration");
            Ok(TrackerConfig::from_json(&json)?)
        }
        None => Ok(TrackerConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    println!("📍 Asset Tracker Simulator");
    println!("==========================");

    let config = load_config()?;
    let period = Duration::from_millis(u64::from(config.tick_period_ms));

    let mut tracker = SimTracker::simulated(config)?;
    tracker.start();

    let mut snapshots = SnapshotLog::new();
    let mut interval = time::interval(period);
    let mut cycle: u32 = 0;
    let mut boots: u32 = 1;

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
        cycle = cycle.wrapping_add(1);

        // Scripted stimulus: one deferred low-power request, then a button
        // press to wake up again.
        if cycle == LOW_POWER_AT {
            if let Err(e) = tracker.schedule_low_power(WakeSource::Button) {
                warn!(error = %e, "low-power request refused");
            }
        }
        if cycle == WAKE_PRESS_AT {
            tracker.app_mut().board_mut().press(ButtonGesture::Button2Short);
        }

        match tracker.update() {
            Ok(report) => {
                if let Some(t) = report.transition {
                    let engine = tracker.engine();
                    info!(
                        "🔀 {} --({})--> {}",
                        engine.state_name(t.from),
                        engine.event_name(t.event),
                        engine.state_name(t.to)
                    );
                }
            }
            Err(e) if e.is_warning() => {}
            Err(e) => {
                error!("❌ Engine error: {}", e);
                break;
            }
        }

        if tracker.reboot_pending() {
            boots += 1;
            info!(boots, "🔄 simulated reset");
            tracker = tracker.reset()?;
        }

        if cycle % SNAPSHOT_EVERY == 0 {
            let snapshot = tracker.snapshot();
            info!("📡 SNAPSHOT: {}", snapshot.to_json()?);
            snapshots.push(snapshot);
        }

        if tracker.current_state() == Some(AppState::End) {
            info!("tracker shut down");
            break;
        }
    }

    tracker.stop();
    if let Some(last) = snapshots.latest() {
        println!("{}", last.to_json_pretty()?);
    }
    println!("🛑 Asset Tracker Simulator stopped after {} cycles and {} boots", cycle, boots);

    Ok(())
}
