//! Daemon wiring
//!
//! ```text
//! Readable --(Acquisition)--> SharedStore <--(SensorApi)-- FastCgiServer <-- nginx
//! ```
//!
//! [`run`] builds the driver, binds the socket and runs the sampling task and
//! the server side by side. Whichever ends first brings the other one down:
//! a sensor failure triggers shutdown of the server, and a shutdown request
//! stops both.

use crate::acquisition::Acquisition;
use crate::api::{JsonHandler, SensorApi};
use crate::config::Config;
use crate::data::SensorStore;
use crate::error::{AppResult, SensorError};
use crate::fastcgi::FastCgiServer;
use crate::hardware::build_sensor;
use crate::shutdown::Shutdown;
use std::sync::Arc;
use tracing::{error, info};

/// Run until `shutdown` fires or the sensor fails.
///
/// Returns the sensor error if acquisition failed, so the caller can exit
/// with a non-zero status.
pub async fn run(config: Config, shutdown: Shutdown) -> AppResult<()> {
    let sensor = build_sensor(&config.sensor)
        .await
        .map_err(|e| SensorError::Sensor(format!("{:#}", e)))?;

    let store = SensorStore::new(config.sensor.buffer_size(), sensor.sample_rate_hz() as f32)?
        .with_sensor(sensor.name(), sensor.unit())
        .into_shared();

    let handler = Arc::new(JsonHandler::new(SensorApi::new(store.clone())));
    let server = FastCgiServer::bind(&config.server, handler)?;
    let server_task = tokio::spawn(server.run(shutdown.subscribe()));

    let acquisition = Acquisition::new(sensor, store, config.sensor.interval())
        .spawn(shutdown.subscribe());

    info!(
        name = %config.application.name,
        sensor = %config.sensor.kind,
        socket = %config.server.socket_path.display(),
        "up and running"
    );

    let acquisition_result = acquisition.await.map_err(SensorError::from).and_then(|r| r);
    if let Err(e) = &acquisition_result {
        error!("Acquisition failed: {}", e);
    }

    info!(name = %config.application.name, "shutting down");
    shutdown.trigger();
    let server_result = server_task.await.map_err(SensorError::from).and_then(|r| r);

    let mut errors: Vec<SensorError> = [acquisition_result, server_result]
        .into_iter()
        .filter_map(Result::err)
        .collect();
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(SensorError::ShutdownFailed(errors)),
    }
}
