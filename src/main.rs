// src/main.rs - plotter-host: CLI, logging, device wiring, and the HTTP API
use clap::Parser;
use std::path::Path;

use penplot_rs::config::{self, Config};
use penplot_rs::device::{Connector, SerialConnector, SerialTransport};
use penplot_rs::simulator::Simulator;
use penplot_rs::{web, Plotter};

const DEFAULT_CONFIG: &str = "plotter.toml";

#[derive(Parser, Debug)]
#[command(name = "plotter-host", version, about = "Pen plotter host with an HTTP control API")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Drive the built-in simulated controller instead of a serial port
    #[arg(long)]
    simulate: bool,

    /// Serial port, overriding the config file
    #[arg(long)]
    port: Option<String>,

    /// HTTP listen address, overriding the config file
    #[arg(long)]
    bind: Option<String>,

    /// Debug logging, including every protocol line
    #[arg(short, long)]
    verbose: bool,

    /// Start without connecting; use POST /api/device/connect later
    #[arg(long)]
    no_connect: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    tracing::info!("Starting plotter-host {}", env!("CARGO_PKG_VERSION"));

    let mut config = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path);
            config::load_config(path)?
        }
        None if Path::new(DEFAULT_CONFIG).exists() => {
            tracing::info!("Loading configuration from: {}", DEFAULT_CONFIG);
            config::load_config(DEFAULT_CONFIG)?
        }
        None => {
            tracing::warn!("No {} found; using built-in defaults", DEFAULT_CONFIG);
            Config::default()
        }
    };

    if let Some(port) = cli.port {
        config.device.port = port;
    }
    if let Some(bind) = cli.bind {
        config.web.bind = bind;
    }
    if cli.simulate {
        config.device.simulate = true;
    }
    if config.device.simulate {
        config.device.startup_delay_ms = 0;
        config.device.port = "sim".to_string();
    }
    config.validate()?;

    tracing::info!(
        "Bed: {:.1} x {:.1} mm ({:?} out-of-bounds policy)",
        config.bed.width_mm,
        config.bed.height_mm,
        config.bed.policy
    );
    tracing::info!("Pens configured: {}", config.pens.len());

    let connector: Box<dyn Connector> = if config.device.simulate {
        tracing::info!("Using simulated controller");
        Box::new(Simulator::new())
    } else {
        Box::new(SerialConnector)
    };

    let bind = config.web.bind.clone();
    let simulate = config.device.simulate;
    let (plotter, _device_task) = Plotter::new(config, connector);

    if !cli.no_connect {
        match plotter.connect(None, None).await {
            Ok(status) => tracing::info!("Device ready: {}", status.state),
            Err(e) => {
                tracing::warn!("Device not connected: {}", e);
                if !simulate {
                    match SerialTransport::available_ports() {
                        Ok(ports) => {
                            for port in ports {
                                tracing::info!("Available serial port: {}", port.display());
                            }
                        }
                        Err(e) => tracing::warn!("Could not list serial ports: {}", e),
                    }
                }
            }
        }
    }

    let app = web::create_router(plotter.clone());
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!("Web API listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down");
    plotter.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
