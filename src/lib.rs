//! # sensor_fcgi
//!
//! Polls a sensor on a timer, keeps the most recent readings in a ring buffer
//! and serves them as JSON to a web server over a FastCGI Unix socket. A POST
//! from the browser can override the readings, which is handy for demos.
//!
//! ## Crate Structure
//!
//! - **`config`**: Figment-based configuration (TOML file + `SENSOR_FCGI_*` env vars).
//! - **`error`**: The `SensorError` enum and `AppResult` alias.
//! - **`logging`**: `tracing` subscriber set-up.
//! - **`data`**: `ReadingBuffer` and the shared `SensorStore`.
//! - **`hardware`**: The `Readable` trait and the fake, DS18B20 and IIO ADC drivers.
//! - **`acquisition`**: The sampling task.
//! - **`fastcgi`**: Record codec, Unix socket server and a small client.
//! - **`api`**: GET snapshot / POST override on top of the FastCGI server.
//! - **`shutdown`**: Signal handling and the shutdown broadcast.
//! - **`daemon`**: Wires everything together.
//! - **`validation`**: Value validators used by `config`.

pub mod acquisition;
pub mod api;
pub mod config;
pub mod daemon;
pub mod data;
pub mod error;
pub mod fastcgi;
pub mod hardware;
pub mod logging;
pub mod shutdown;
pub mod validation;
