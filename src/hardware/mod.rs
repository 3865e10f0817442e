//! Sensor drivers
//!
//! All drivers implement [`capabilities::Readable`]. [`build_sensor`] picks one
//! from the `[sensor]` configuration section.

pub mod capabilities;
pub mod ds18b20;
pub mod fake;
pub mod iio_adc;

pub use capabilities::Readable;
pub use ds18b20::Ds18b20;
pub use fake::FakeSensor;
pub use iio_adc::IioAdc;

use crate::config::{SensorConfig, SensorKind};
use anyhow::{anyhow, Result};
use std::sync::Arc;

/// Instantiate the driver described by `config`.
///
/// Hardware drivers perform a first read so a missing probe fails at start-up.
pub async fn build_sensor(config: &SensorConfig) -> Result<Arc<dyn Readable>> {
    let interval = config.interval();
    let device = || {
        config
            .device
            .clone()
            .ok_or_else(|| anyhow!("sensor '{}' requires a device path", config.kind))
    };

    let sensor: Arc<dyn Readable> = match config.kind {
        SensorKind::Fake => Arc::new(FakeSensor::new(interval)),
        SensorKind::Ds18b20 => {
            let probe = Ds18b20::new(device()?, interval);
            probe.probe().await?;
            Arc::new(probe)
        }
        SensorKind::Iio => {
            let adc = IioAdc::open(&device()?, config.channel, config.gain, interval).await?;
            adc.read().await?;
            Arc::new(adc)
        }
    };
    Ok(sensor)
}
