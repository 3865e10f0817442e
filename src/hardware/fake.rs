//! Synthetic temperature sensor
//!
//! Produces `sin(t) * 5 + 20` and advances `t` by 0.1 on every read, so a
//! 100 ms poll gives a slow sine around 20 C. Useful for wiring up the web
//! frontend without any hardware attached.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::hardware::capabilities::Readable;

const PHASE_STEP: f64 = 0.1;
const OFFSET: f64 = 20.0;
const AMPLITUDE: f64 = 5.0;

/// Sine wave "thermometer"
///
/// # Example
///
/// ```rust,ignore
/// let sensor = FakeSensor::new(Duration::from_millis(100));
/// assert_eq!(sensor.read().await?, 20.0);
/// ```
pub struct FakeSensor {
    phase: Arc<RwLock<f64>>,
    sample_rate_hz: f64,
}

impl FakeSensor {
    /// Create a fake sensor polled every `interval`
    pub fn new(interval: Duration) -> Self {
        let secs = interval.as_secs_f64();
        Self {
            phase: Arc::new(RwLock::new(0.0)),
            sample_rate_hz: if secs > 0.0 { 1.0 / secs } else { 0.0 },
        }
    }

    /// Current phase of the sine
    pub async fn phase(&self) -> f64 {
        *self.phase.read().await
    }
}

impl Default for FakeSensor {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

#[async_trait]
impl Readable for FakeSensor {
    async fn read(&self) -> Result<f64> {
        let mut phase = self.phase.write().await;
        let value = phase.sin() * AMPLITUDE + OFFSET;
        *phase += PHASE_STEP;
        Ok(value)
    }

    fn sample_rate_hz(&self) -> f64 {
        self.sample_rate_hz
    }

    fn name(&self) -> &str {
        "fake"
    }

    fn unit(&self) -> &str {
        "C"
    }
}
