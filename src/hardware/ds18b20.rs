//! DS18B20 1-wire temperature probe
//!
//! The kernel `w1_therm` driver exposes each probe under
//! `/sys/bus/w1/devices/28-<serial>/`. Two files are understood:
//!
//! - `temperature`: a single integer in millidegrees Celsius (`21375`)
//! - `w1_slave`: the raw scratchpad dump, ending in `t=21375`. Its first line
//!   carries the CRC verdict; anything but `YES` is rejected.
//!
//! Any failure to open or parse the file is reported as an error; the
//! acquisition loop treats that as fatal.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::hardware::capabilities::Readable;

/// DS18B20 read through sysfs
pub struct Ds18b20 {
    path: PathBuf,
    interval: Duration,
}

impl Ds18b20 {
    /// Create a driver for the sysfs file at `path`, polled every `interval`
    pub fn new(path: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            path: path.into(),
            interval,
        }
    }

    /// Path of the sysfs file being read
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Dummy read performed before acquisition starts.
    ///
    /// Fails early with a readable message if the probe is missing, instead of
    /// after the first interval has elapsed.
    pub async fn probe(&self) -> Result<f64> {
        let t = self.read().await?;
        info!(
            "Sensor read OK: {:3.1}C. Measuring every {}sec.",
            t,
            self.interval.as_secs()
        );
        Ok(t)
    }
}

/// Parse the contents of a `temperature` or `w1_slave` file into degrees Celsius.
pub fn parse_millidegrees(contents: &str) -> Result<f64> {
    if let Some(line) = contents.lines().find(|l| l.contains("crc=")) {
        if line.split_whitespace().last() != Some("YES") {
            return Err(anyhow!("CRC check failed: '{}'", line.trim()));
        }
    }

    let token = match contents.rfind("t=") {
        Some(pos) => contents[pos + 2..].split_whitespace().next(),
        None => contents.split_whitespace().next(),
    }
    .ok_or_else(|| anyhow!("no temperature value found"))?;

    let milli: f64 = token
        .parse()
        .with_context(|| format!("invalid temperature value '{}'", token))?;
    Ok(milli / 1000.0)
}

#[async_trait]
impl Readable for Ds18b20 {
    async fn read(&self) -> Result<f64> {
        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Could not open {}", self.path.display()))?;
        parse_millidegrees(&contents)
            .with_context(|| format!("Could not read from {}", self.path.display()))
    }

    fn sample_rate_hz(&self) -> f64 {
        let secs = self.interval.as_secs_f64();
        if secs > 0.0 {
            1.0 / secs
        } else {
            0.0
        }
    }

    fn name(&self) -> &str {
        "ds18b20"
    }

    fn unit(&self) -> &str {
        "C"
    }
}
