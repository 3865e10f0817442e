//! Timer-driven sampling
//!
//! One task polls the [`Readable`] driver at a fixed period and records every
//! reading in the [`SharedStore`]. The first tick fires immediately. Missed
//! ticks are skipped rather than bursted, so a slow sysfs read does not
//! produce a run of back-to-back samples.
//!
//! A failed read ends the task with [`SensorError::Sensor`]; the daemon treats
//! that as fatal.

use crate::data::SharedStore;
use crate::error::{AppResult, SensorError};
use crate::hardware::Readable;
use crate::shutdown::ShutdownListener;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Sampling loop state
pub struct Acquisition {
    sensor: Arc<dyn Readable>,
    store: SharedStore,
    interval: Duration,
}

impl Acquisition {
    /// Poll `sensor` every `interval` into `store`
    pub fn new(sensor: Arc<dyn Readable>, store: SharedStore, interval: Duration) -> Self {
        Self {
            sensor,
            store,
            interval,
        }
    }

    /// Run until shutdown or the first read error.
    pub async fn run(self, mut shutdown: ShutdownListener) -> AppResult<()> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            sensor = self.sensor.name(),
            interval_ms = self.interval.as_millis() as u64,
            "Acquisition started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let sample = self.sensor.read().await.map_err(|e| {
                        error!(sensor = self.sensor.name(), "Sensor read failed: {:#}", e);
                        SensorError::Sensor(format!("{:#}", e))
                    })?;
                    let stored = self.store.write().await.record(sample as f32);
                    debug!(sample, stored, "Recorded sample");
                }
                _ = shutdown.recv() => {
                    info!("Acquisition stopped");
                    return Ok(());
                }
            }
        }
    }

    /// Spawn [`Acquisition::run`] on the runtime
    pub fn spawn(self, shutdown: ShutdownListener) -> JoinHandle<AppResult<()>> {
        tokio::spawn(self.run(shutdown))
    }
}
