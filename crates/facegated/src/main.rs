use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

mod awards;
mod config;
mod contacts;
mod dbus_interface;
mod engine;

use config::{BusKind, Config};
use dbus_interface::{GateService, OBJECT_PATH, SERVICE_NAME};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();
    tracing::info!(
        data_dir = %config.data_dir.display(),
        camera = %config.camera_device,
        detector = ?config.detector,
        threshold = config.settings.threshold,
        "facegated starting"
    );

    let engine = engine::spawn_engine(&config).context("failed to start engine")?;

    let builder = match config.bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let _conn = builder
        .name(SERVICE_NAME)?
        .serve_at(OBJECT_PATH, GateService::new(engine))?
        .build()
        .await
        .with_context(|| format!("failed to publish {SERVICE_NAME} on the {:?} bus", config.bus))?;

    tracing::info!(service = SERVICE_NAME, path = OBJECT_PATH, bus = ?config.bus, "facegated ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("facegated shutting down");

    Ok(())
}
