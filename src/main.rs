//! playout - Rundown controller for AMCP playout servers
//!
//! Connects to every configured device and plays a rundown from an operator
//! console.

mod config;
mod console;
mod controller;
mod rundown;

use clap::Parser;
use config::Config;
use controller::Controller;
use playout_client::DeviceManager;
use rundown::Rundown;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "playout")]
#[command(about = "Rundown controller for AMCP playout servers")]
#[command(version)]
struct Args {
    /// YAML configuration file (defaults to PLAYOUT_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// YAML rundown file
    #[arg(short, long)]
    rundown: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = Config::load(args.config.as_deref()).map_err(|e| {
        tracing::error!("Failed to load config: {}", e);
        e
    })?;
    if config.devices.is_empty() {
        tracing::warn!("No devices configured");
    }

    tracing::info!("Starting playout controller");
    for device in &config.devices {
        tracing::info!(
            "  Device {}: {}{}",
            device.name,
            device.endpoint(),
            if device.shadow { " (shadow)" } else { "" }
        );
    }
    tracing::info!("  Delay unit: {:?}", config.playout.delay_type);

    let rundown = Rundown::from_file(&args.rundown)?;
    if rundown.is_empty() {
        tracing::warn!("Rundown {} has no items", args.rundown.display());
    } else {
        tracing::info!("Loaded {} rundown items", rundown.len());
    }

    let devices = Arc::new(DeviceManager::new(
        config.connection.to_connection_config(),
    ));
    for device in &config.devices {
        devices
            .add(&device.name, device.endpoint(), device.shadow)
            .await;
    }
    // Failed devices keep reconnecting in the background.
    devices.connect_all().await;

    let mut controller = Controller::new(Arc::new(config), devices.clone(), rundown);
    console::run(&mut controller).await?;

    devices.disconnect_all().await;
    tracing::info!("Controller stopped");
    Ok(())
}
