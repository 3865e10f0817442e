//! ADC channel through the Linux IIO subsystem
//!
//! ADS1115, USB-DUX and most other ADCs with a mainline kernel driver appear
//! under `/sys/bus/iio/devices/iio:deviceN/`. For voltage channel `N`:
//!
//! - `in_voltageN_raw` holds the latest conversion (integer counts)
//! - `in_voltageN_scale` (or the shared `in_voltage_scale`) converts counts to mV
//! - `in_voltageN_sampling_frequency`, `in_voltage_sampling_frequency` or
//!   `sampling_frequency` give the configured data rate in Hz
//!
//! Readings are `raw * scale * gain`. Without a scale file the unit is raw counts.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::hardware::capabilities::Readable;

/// One IIO voltage channel
pub struct IioAdc {
    raw_path: PathBuf,
    scale: Option<f64>,
    gain: f64,
    sample_rate_hz: f64,
    unit: String,
}

impl IioAdc {
    /// Open channel `channel` of the IIO device directory `device`.
    ///
    /// Reads the scale and sampling frequency once. When the device does not
    /// expose a sampling frequency, the poll `interval` is used instead.
    pub async fn open(device: &Path, channel: u32, gain: f64, interval: Duration) -> Result<Self> {
        let raw_path = device.join(format!("in_voltage{}_raw", channel));
        if !tokio::fs::try_exists(&raw_path).await.unwrap_or(false) {
            anyhow::bail!("IIO channel file {} does not exist", raw_path.display());
        }

        let scale = first_number(&[
            device.join(format!("in_voltage{}_scale", channel)),
            device.join("in_voltage_scale"),
        ])
        .await?;

        let sample_rate_hz = match first_number(&[
            device.join(format!("in_voltage{}_sampling_frequency", channel)),
            device.join("in_voltage_sampling_frequency"),
            device.join("sampling_frequency"),
        ])
        .await?
        {
            Some(hz) => hz,
            None => {
                let secs = interval.as_secs_f64();
                if secs > 0.0 {
                    1.0 / secs
                } else {
                    0.0
                }
            }
        };

        debug!(
            raw = %raw_path.display(),
            ?scale,
            gain,
            sample_rate_hz,
            "Opened IIO channel"
        );

        Ok(Self {
            raw_path,
            scale,
            gain,
            sample_rate_hz,
            unit: if scale.is_some() { "mV" } else { "raw" }.to_string(),
        })
    }

    /// Scale factor from counts to mV, if the device has one
    pub fn scale(&self) -> Option<f64> {
        self.scale
    }
}

/// Parse the first of `candidates` that exists. Missing files yield `None`,
/// an existing file that does not parse is an error.
async fn first_number(candidates: &[PathBuf]) -> Result<Option<f64>> {
    for path in candidates {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => {
                let value = contents
                    .trim()
                    .parse::<f64>()
                    .with_context(|| format!("invalid number in {}", path.display()))?;
                return Ok(Some(value));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => {
                return Err(e).with_context(|| format!("Could not open {}", path.display()));
            }
        }
    }
    Ok(None)
}

#[async_trait]
impl Readable for IioAdc {
    async fn read(&self) -> Result<f64> {
        let contents = tokio::fs::read_to_string(&self.raw_path)
            .await
            .with_context(|| format!("Could not open {}", self.raw_path.display()))?;
        let raw: f64 = contents
            .trim()
            .parse()
            .with_context(|| format!("Could not read from {}", self.raw_path.display()))?;
        Ok(raw * self.scale.unwrap_or(1.0) * self.gain)
    }

    fn sample_rate_hz(&self) -> f64 {
        self.sample_rate_hz
    }

    fn name(&self) -> &str {
        "iio"
    }

    fn unit(&self) -> &str {
        &self.unit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fake_device() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("in_voltage1_raw"), "1000\n").unwrap();
        dir
    }

    #[tokio::test]
    async fn test_scaled_reading() {
        let dir = fake_device();
        fs::write(dir.path().join("in_voltage1_scale"), "0.125000\n").unwrap();
        fs::write(dir.path().join("sampling_frequency"), "8\n").unwrap();

        let adc = IioAdc::open(dir.path(), 1, 1.0, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(adc.read().await.unwrap(), 125.0);
        assert_eq!(adc.sample_rate_hz(), 8.0);
        assert_eq!(adc.unit(), "mV");
    }

    #[tokio::test]
    async fn test_shared_scale_and_gain() {
        let dir = fake_device();
        fs::write(dir.path().join("in_voltage_scale"), "0.5").unwrap();

        let adc = IioAdc::open(dir.path(), 1, 100.0, Duration::from_millis(250))
            .await
            .unwrap();
        assert_eq!(adc.read().await.unwrap(), 50_000.0);
        // falls back to the poll interval
        assert_eq!(adc.sample_rate_hz(), 4.0);
    }

    #[tokio::test]
    async fn test_unscaled_reading() {
        let dir = fake_device();
        let adc = IioAdc::open(dir.path(), 1, 1.0, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(adc.scale(), None);
        assert_eq!(adc.unit(), "raw");
        assert_eq!(adc.read().await.unwrap(), 1000.0);

        fs::write(dir.path().join("in_voltage1_raw"), "-12\n").unwrap();
        assert_eq!(adc.read().await.unwrap(), -12.0);
    }

    #[tokio::test]
    async fn test_missing_channel() {
        let dir = fake_device();
        assert!(IioAdc::open(dir.path(), 3, 1.0, Duration::from_secs(1))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_garbage_raw_value() {
        let dir = fake_device();
        let adc = IioAdc::open(dir.path(), 1, 1.0, Duration::from_secs(1))
            .await
            .unwrap();
        fs::write(dir.path().join("in_voltage1_raw"), "busy").unwrap();
        assert!(adc.read().await.is_err());
    }
}
