//! Periodic liveness sweep.

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::engine::Engine;

/// Spawns the sweep loop, or returns `None` when the interval is zero.
///
/// The loop ends when the engine closes.
pub fn spawn_liveness_sweep(engine: Engine) -> Option<JoinHandle<()>> {
    let period = engine.config().sweep_interval()?;
    let mut shutdown = engine.shutdown_signal();

    Some(tokio::spawn(async move {
        info!(interval_secs = period.as_secs(), "Liveness sweep started");
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = engine.sweep().await;
                    debug!(removed, "Liveness sweep ran");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        debug!("Liveness sweep stopped");
    }))
}
