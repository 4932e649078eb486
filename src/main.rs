use std::path::Path;

use anyhow::{bail, Context, Result};
use log::{info, warn};

use sleepsense::{
    CalibrationEngine, Database, MonitorConfig, MonitorController, ReadingsStore, SimulatedSource,
    VoltageSource,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("SleepSense starting up...");

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "sleepsense.json".into());
    let config = MonitorConfig::load(Path::new(&config_path))?;

    let database = Database::new(config.db_path.clone())?;

    if !config.simulation {
        bail!(
            "no hardware voltage source is wired into this binary; set \
             \"simulation\": true or drive the pipeline through the library API"
        );
    }
    let source: Box<dyn VoltageSource> = Box::new(SimulatedSource::new());

    // The simulated bed occupies itself on its own schedule, so the two-phase
    // sampling procedure does not apply; hardware integrations drive
    // `ensure_profile` through the library API instead.
    let engine = CalibrationEngine::new(
        database.clone(),
        config.device_id.clone(),
        config.channel,
    );
    let profile = engine
        .ensure_preset(
            SimulatedSource::preset_profile(&config.device_id),
            config.force_recalibration,
        )
        .await?;

    let store = ReadingsStore::new(
        database.clone(),
        config.device_id.clone(),
        config.user_id.clone(),
        config.channel,
    );
    let stats = store.stats().await?;
    info!(
        "database status: {} readings, {} unsynced",
        stats.total_readings, stats.unsynced_readings
    );

    let mut controller = MonitorController::new();
    controller.start(source, profile, store, config.loop_settings())?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received");
    if let Some(health) = controller.health() {
        if health.degraded || health.sensor_fault {
            warn!("device health at shutdown: {health:?}");
        }
    }
    controller.stop().await?;

    let stats = database.reading_stats().await?;
    info!(
        "final database status: {} readings, {} unsynced",
        stats.total_readings, stats.unsynced_readings
    );

    Ok(())
}
