//! Custom error types for the application.
//!
//! This module defines the primary error type, `SensorError`, for the whole daemon.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the different kinds of errors that can occur, from configuration issues to sensor
//! read failures and malformed FastCGI traffic.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically file parsing or type mismatches
//!   while extracting the configuration.
//! - **`Configuration`**: Semantic errors in a configuration that parsed fine but is
//!   logically wrong (zero buffer size, missing device path, ...). Raised by `validate()`.
//! - **`Io`**: Wraps `std::io::Error`, covering the Unix socket and sysfs reads.
//! - **`Sensor`**: The driver could not produce a reading. This is fatal for the daemon.
//! - **`Protocol`**: The web server sent something that is not valid FastCGI.
//! - **`BadRequest`** / **`MethodNotSupported`**: Request-level failures that are turned
//!   into HTTP status codes instead of tearing the connection down.
//!
//! By using `#[from]`, `SensorError` can be created from the underlying error types,
//! which keeps the `?` operator usable throughout the crate.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, SensorError>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum SensorError {
    /// Configuration could not be loaded or extracted.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration loaded but failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The sensor driver failed to deliver a reading.
    #[error("Sensor error: {0}")]
    Sensor(String),

    /// Malformed FastCGI record stream.
    #[error("FastCGI protocol error: {0}")]
    Protocol(String),

    /// Request body could not be understood.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The handler does not implement this request method.
    #[error("Method not supported: {0}")]
    MethodNotSupported(String),

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A background task panicked or was cancelled.
    #[error("Task failed: {0}")]
    Task(String),

    /// One or more components failed while shutting down.
    #[error("Shutdown failed with errors")]
    ShutdownFailed(Vec<SensorError>),
}

impl From<figment::Error> for SensorError {
    fn from(value: figment::Error) -> Self {
        SensorError::Config(Box::new(value))
    }
}

impl From<tokio::task::JoinError> for SensorError {
    fn from(value: tokio::task::JoinError) -> Self {
        SensorError::Task(value.to_string())
    }
}

impl SensorError {
    /// HTTP status code used when this error ends a FastCGI request.
    pub fn http_status(&self) -> u16 {
        match self {
            SensorError::BadRequest(_) | SensorError::Json(_) => 400,
            SensorError::MethodNotSupported(_) => 405,
            _ => 500,
        }
    }
}
