//! Sensor Capabilities
//!
//! Every driver in this crate is a scalar sensor: it produces one `f64` per poll.
//! The acquisition loop only sees the [`Readable`] trait, so adding a new sensor
//! means implementing it and registering the driver in [`crate::hardware::build_sensor`].
//!
//! # Design Philosophy
//!
//! - Async (uses #[async_trait]) so sysfs reads do not block the runtime
//! - Thread-safe (requires Send + Sync); state lives behind interior mutability
//! - Uses anyhow::Result for errors; the acquisition boundary converts them
//!
//! # Example
//!
//! ```rust,ignore
//! struct Thermistor { path: PathBuf }
//!
//! #[async_trait]
//! impl Readable for Thermistor {
//!     async fn read(&self) -> Result<f64> {
//!         let raw = tokio::fs::read_to_string(&self.path).await?;
//!         Ok(raw.trim().parse::<f64>()? / 1000.0)
//!     }
//!     fn sample_rate_hz(&self) -> f64 { 1.0 }
//!     fn name(&self) -> &str { "thermistor" }
//!     fn unit(&self) -> &str { "C" }
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;

/// Capability: Scalar Readout
///
/// Devices that return a single value per measurement (thermometers, ADC channels).
///
/// # Contract
/// - `read` performs one measurement and returns it in [`Readable::unit`]
/// - `sample_rate_hz` is the nominal rate reported to clients as `fs`
/// - An `Err` from `read` is treated as fatal by the acquisition loop
#[async_trait]
pub trait Readable: Send + Sync {
    /// Read current value
    ///
    /// # Returns
    /// - Ok(value) on successful read
    /// - Err on hardware error or unparsable data
    async fn read(&self) -> Result<f64>;

    /// Nominal sampling rate in Hz
    fn sample_rate_hz(&self) -> f64;

    /// Short driver name, used in logs and the JSON snapshot
    fn name(&self) -> &str;

    /// Physical unit of the returned values
    fn unit(&self) -> &str;
}
