//! CLI Entry Point for sensor-fcgi
//!
//! Provides command-line interface for:
//! - Running the sensor daemon behind nginx
//! - Probing a sensor once without starting the server
//! - Querying a running daemon over its FastCGI socket
//!
//! # Usage
//!
//! ```bash
//! sensor-fcgi run --sensor ds18b20 --device /sys/bus/w1/devices/28-3ce1e380ac02/temperature
//! sensor-fcgi probe --config config/sensor.toml
//! sensor-fcgi query --post '{"volt": 1.5, "hello": "world"}'
//! ```

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sensor_fcgi::config::{Config, SensorKind};
use sensor_fcgi::fastcgi::FastCgiClient;
use sensor_fcgi::hardware::build_sensor;
use sensor_fcgi::shutdown::{self, Shutdown};
use sensor_fcgi::{daemon, logging};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "sensor-fcgi")]
#[command(about = "Serves sensor readings as JSON over FastCGI", long_about = None)]
struct Cli {
    /// Configuration file (TOML). Defaults and environment are used without it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Overrides shared by `run` and `probe`
#[derive(clap::Args)]
struct SensorArgs {
    /// Sensor driver
    #[arg(long, value_enum)]
    sensor: Option<SensorKind>,

    /// sysfs file (ds18b20) or IIO device directory (iio)
    #[arg(long)]
    device: Option<PathBuf>,

    /// Polling interval in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon
    Run {
        /// FastCGI socket path
        #[arg(long)]
        socket: Option<PathBuf>,

        /// Number of readings kept
        #[arg(long)]
        buffer_size: Option<usize>,

        #[command(flatten)]
        sensor: SensorArgs,
    },

    /// Read the sensor once and print the value
    Probe {
        #[command(flatten)]
        sensor: SensorArgs,
    },

    /// Send a request to a running daemon and print the response
    Query {
        /// FastCGI socket path
        #[arg(long)]
        socket: Option<PathBuf>,

        /// POST this body instead of sending a GET
        #[arg(long)]
        post: Option<String>,

        /// Content type of the POST body
        #[arg(long, default_value = "application/json")]
        content_type: String,
    },
}

impl SensorArgs {
    fn apply(self, config: &mut Config) {
        if let Some(kind) = self.sensor {
            config.sensor.kind = kind;
        }
        if let Some(device) = self.device {
            config.sensor.device = Some(device);
        }
        if let Some(ms) = self.interval_ms {
            config.sensor.interval_ms = Some(ms);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config: Config = Config::figment(cli.config.as_ref())?
        .extract()
        .context("Failed to load configuration")?;

    match cli.command {
        Commands::Run {
            socket,
            buffer_size,
            sensor,
        } => {
            if let Some(socket) = socket {
                config.server.socket_path = socket;
            }
            if buffer_size.is_some() {
                config.sensor.buffer_size = buffer_size;
            }
            sensor.apply(&mut config);
            run(config).await
        }
        Commands::Probe { sensor } => {
            sensor.apply(&mut config);
            probe(config).await
        }
        Commands::Query {
            socket,
            post,
            content_type,
        } => {
            let socket = socket.unwrap_or(config.server.socket_path);
            query(socket, post, &content_type).await
        }
    }
}

fn init(config: &Config) -> Result<()> {
    config.validate()?;
    logging::init_from_config(config).map_err(anyhow::Error::msg)
}

async fn run(config: Config) -> Result<()> {
    init(&config)?;

    let shutdown = Shutdown::new();
    let signals = shutdown::listen_for_signals(shutdown.clone())
        .context("Failed to install signal handlers")?;

    let result = daemon::run(config, shutdown.clone()).await;
    shutdown.trigger();
    signals.await.ok();

    result?;
    info!("Clean exit");
    Ok(())
}

async fn probe(config: Config) -> Result<()> {
    init(&config)?;

    let sensor = build_sensor(&config.sensor).await?;
    let value = sensor.read().await?;
    println!("{}: {:.3} {}", sensor.name(), value, sensor.unit());
    Ok(())
}

async fn query(socket: PathBuf, post: Option<String>, content_type: &str) -> Result<()> {
    let client = FastCgiClient::new(&socket);
    let response = match post {
        Some(body) => client.post(content_type, body.as_bytes()).await,
        None => client.get().await,
    }
    .with_context(|| format!("Request to {} failed", socket.display()))?;

    println!("Status: {}", response.status);
    for (name, value) in &response.headers {
        println!("{}: {}", name, value);
    }
    println!();
    print!("{}", String::from_utf8_lossy(&response.body));

    if response.status >= 400 {
        anyhow::bail!("Daemon answered with status {}", response.status);
    }
    Ok(())
}
