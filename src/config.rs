//! Configuration System using Figment
//!
//! Configuration is loaded from (in order of precedence, highest first):
//! 1. Environment variables prefixed with `SENSOR_FCGI_`
//! 2. An optional TOML file (e.g. `config/sensor.toml`)
//! 3. Built-in defaults (fake sensor on `/tmp/sensorsocket`)
//!
//! Nested keys are separated by a double underscore so that snake_case field
//! names survive the split:
//!
//! ```text
//! SENSOR_FCGI_APPLICATION__LOG_LEVEL=debug
//! SENSOR_FCGI_SERVER__SOCKET_PATH=/run/sensor.sock
//! SENSOR_FCGI_SENSOR__KIND=ds18b20
//! SENSOR_FCGI_SENSOR__DEVICE=/sys/bus/w1/devices/28-3ce1e380ac02/temperature
//! ```
//!
//! # Example
//! ```no_run
//! use sensor_fcgi::config::Config;
//!
//! # fn main() -> sensor_fcgi::error::AppResult<()> {
//! let config = Config::load_from(Some("config/sensor.toml"))?;
//! println!("Socket: {}", config.server.socket_path.display());
//! # Ok(())
//! # }
//! ```

use crate::error::{AppResult, SensorError};
use crate::validation;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "SENSOR_FCGI_";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Application settings
    pub application: ApplicationConfig,
    /// FastCGI socket settings
    pub server: ServerConfig,
    /// Sensor driver settings
    pub sensor: SensorConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name, used in log output
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format
    pub log_format: LogFormat,
}

/// Log output format selectable from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, coloured output for interactive use
    Pretty,
    /// Single-line output, suitable for journald
    Compact,
    /// Newline-delimited JSON
    Json,
}

/// FastCGI socket configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Path of the Unix domain socket shared with the web server
    pub socket_path: PathBuf,
    /// Permission bits applied to the socket after binding
    pub socket_mode: u32,
    /// Upper bound on concurrently served connections
    pub max_connections: usize,
    /// Largest POST body accepted, in bytes
    pub max_body_bytes: usize,
    /// Largest FCGI_PARAMS stream accepted per request, in bytes
    pub max_params_bytes: usize,
}

/// Which driver produces the readings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    /// Synthetic sine wave, no hardware needed
    Fake,
    /// DS18B20 1-wire temperature probe via sysfs
    Ds18b20,
    /// ADC channel exposed through the Linux IIO subsystem (ADS1115 etc.)
    Iio,
}

impl SensorKind {
    /// Polling interval used when none is configured.
    pub fn default_interval(self) -> Duration {
        match self {
            SensorKind::Fake => Duration::from_millis(100),
            SensorKind::Ds18b20 => Duration::from_secs(10),
            // ADS1115 at its 8 Hz data rate
            SensorKind::Iio => Duration::from_millis(125),
        }
    }

    /// Ring buffer length used when none is configured.
    pub fn default_buffer_size(self) -> usize {
        match self {
            SensorKind::Ds18b20 => 500,
            SensorKind::Fake | SensorKind::Iio => 50,
        }
    }

    /// Whether the driver needs a `device` path.
    pub fn needs_device(self) -> bool {
        !matches!(self, SensorKind::Fake)
    }
}

impl std::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SensorKind::Fake => "fake",
            SensorKind::Ds18b20 => "ds18b20",
            SensorKind::Iio => "iio",
        };
        f.write_str(name)
    }
}

/// Sensor driver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Driver type
    pub kind: SensorKind,
    /// Polling interval in milliseconds (driver default when absent)
    pub interval_ms: Option<u64>,
    /// Number of readings kept (driver default when absent)
    pub buffer_size: Option<usize>,
    /// sysfs file (DS18B20) or IIO device directory (IIO ADC)
    pub device: Option<PathBuf>,
    /// IIO voltage channel index
    pub channel: u32,
    /// Multiplier applied to every reading after unit conversion
    pub gain: f64,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "sensor-fcgi".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Compact,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/tmp/sensorsocket"),
            socket_mode: 0o666,
            max_connections: 16,
            max_body_bytes: 64 * 1024,
            max_params_bytes: 16 * 1024,
        }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            kind: SensorKind::Fake,
            interval_ms: None,
            buffer_size: None,
            device: None,
            channel: 0,
            gain: 1.0,
        }
    }
}

impl SensorConfig {
    /// Polling interval after applying the driver default.
    pub fn interval(&self) -> Duration {
        self.interval_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.kind.default_interval())
    }

    /// Buffer length after applying the driver default.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
            .unwrap_or_else(|| self.kind.default_buffer_size())
    }
}

impl Config {
    /// Load configuration from defaults, an optional TOML file and the environment.
    ///
    /// A file that was asked for but does not exist is an error.
    /// The result is validated before it is returned.
    pub fn load_from<P: AsRef<Path>>(path: Option<P>) -> AppResult<Self> {
        let config: Self = Self::figment(path)?.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// The provider stack used by [`Config::load_from`].
    pub fn figment<P: AsRef<Path>>(path: Option<P>) -> AppResult<Figment> {
        let mut figment = Figment::new();
        if let Some(path) = path {
            let path = path.as_ref();
            if !path.is_file() {
                return Err(SensorError::Configuration(format!(
                    "Config file {} not found",
                    path.display()
                )));
            }
            figment = figment.merge(Toml::file(path));
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Application name is not blank
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Socket path is usable as a Unix socket address
    /// - Socket mode fits into permission bits
    /// - Buffer size and interval are non-zero
    /// - Hardware sensors have a device path
    /// - Gain is a finite number
    pub fn validate(&self) -> AppResult<()> {
        validation::is_not_empty(self.application.name.trim()).map_err(|e| {
            SensorError::Configuration(format!("Invalid application name: {}", e))
        })?;

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(SensorError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let socket = self.server.socket_path.to_string_lossy();
        validation::is_valid_socket_path(&socket).map_err(|e| {
            SensorError::Configuration(format!("Invalid socket_path '{}': {}", socket, e))
        })?;

        validation::is_in_range(self.server.socket_mode, 0..=0o777).map_err(|_| {
            SensorError::Configuration(format!(
                "Invalid socket_mode {:o}. Must be within 0o000-0o777",
                self.server.socket_mode
            ))
        })?;

        if self.server.max_connections == 0 {
            return Err(SensorError::Configuration(
                "max_connections must be > 0".to_string(),
            ));
        }

        if self.server.max_body_bytes == 0 {
            return Err(SensorError::Configuration(
                "max_body_bytes must be > 0".to_string(),
            ));
        }

        if self.server.max_params_bytes == 0 {
            return Err(SensorError::Configuration(
                "max_params_bytes must be > 0".to_string(),
            ));
        }

        if self.sensor.buffer_size() == 0 {
            return Err(SensorError::Configuration(
                "buffer_size must be > 0".to_string(),
            ));
        }

        if self.sensor.interval().is_zero() {
            return Err(SensorError::Configuration(
                "interval_ms must be > 0".to_string(),
            ));
        }

        if self.sensor.kind.needs_device() {
            let device = self
                .sensor
                .device
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default();
            validation::is_valid_path(&device).map_err(|e| {
                SensorError::Configuration(format!(
                    "Sensor '{}' requires a device path: {}",
                    self.sensor.kind, e
                ))
            })?;
        }

        if !self.sensor.gain.is_finite() {
            return Err(SensorError::Configuration(format!(
                "Invalid gain {}. Must be a finite number",
                self.sensor.gain
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sensor.kind, SensorKind::Fake);
        assert_eq!(config.sensor.interval(), Duration::from_millis(100));
        assert_eq!(config.sensor.buffer_size(), 50);
        assert_eq!(config.server.socket_path, PathBuf::from("/tmp/sensorsocket"));
        assert_eq!(config.server.socket_mode, 0o666);
    }

    #[test]
    fn test_driver_defaults() {
        let sensor = SensorConfig {
            kind: SensorKind::Ds18b20,
            ..Default::default()
        };
        assert_eq!(sensor.interval(), Duration::from_secs(10));
        assert_eq!(sensor.buffer_size(), 500);

        let sensor = SensorConfig {
            kind: SensorKind::Iio,
            interval_ms: Some(20),
            buffer_size: Some(8),
            ..Default::default()
        };
        assert_eq!(sensor.interval(), Duration::from_millis(20));
        assert_eq!(sensor.buffer_size(), 8);
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = Config::default();
        config.application.log_level = "verbose".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Invalid log_level"));
    }

    #[test]
    fn test_zero_buffer_rejected() {
        let mut config = Config::default();
        config.sensor.buffer_size = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = Config::default();
        config.sensor.interval_ms = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_hardware_sensor_requires_device() {
        let mut config = Config::default();
        config.sensor.kind = SensorKind::Ds18b20;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("requires a device path"));

        config.sensor.device = Some(PathBuf::from("/sys/bus/w1/devices/28-0/temperature"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_socket_mode_out_of_range() {
        let mut config = Config::default();
        config.server.socket_mode = 0o1777;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_socket_path_rejected() {
        let mut config = Config::default();
        config.server.socket_path = PathBuf::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file_and_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "sensor.toml",
                r#"
                [application]
                log_level = "debug"

                [server]
                socket_path = "/tmp/adc7705socket"
                socket_mode = 0o660

                [sensor]
                kind = "iio"
                device = "/sys/bus/iio/devices/iio:device0"
                channel = 2
                "#,
            )?;
            jail.set_env("SENSOR_FCGI_SENSOR__INTERVAL_MS", "250");

            let config = Config::load_from(Some("sensor.toml")).map_err(|e| e.to_string())?;
            assert_eq!(config.application.log_level, "debug");
            assert_eq!(config.server.socket_path, PathBuf::from("/tmp/adc7705socket"));
            assert_eq!(config.server.socket_mode, 0o660);
            assert_eq!(config.sensor.kind, SensorKind::Iio);
            assert_eq!(config.sensor.channel, 2);
            assert_eq!(config.sensor.interval(), Duration::from_millis(250));
            Ok(())
        });
    }

    #[test]
    fn test_no_file_uses_defaults() {
        Jail::expect_with(|_jail| {
            let config = Config::load_from(None::<&str>).map_err(|e| e.to_string())?;
            assert_eq!(config.sensor.kind, SensorKind::Fake);
            Ok(())
        });
    }

    #[test]
    fn test_missing_file_is_rejected() {
        Jail::expect_with(|_jail| {
            let err = Config::load_from(Some("does-not-exist.toml")).unwrap_err();
            assert!(err.to_string().contains("does-not-exist.toml"));
            Ok(())
        });
    }

    #[test]
    fn test_empty_application_name_rejected() {
        let mut config = Config::default();
        config.application.name = "  ".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Invalid application name"));
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("bad.toml", "[sensor]\nkind = \"thermocouple\"\n")?;
            assert!(Config::load_from(Some("bad.toml")).is_err());
            Ok(())
        });
    }
}
