pub(crate) mod blender;
pub(crate) mod bridge;
pub(crate) mod combiner;
pub(crate) mod config;
pub(crate) mod engine;
pub(crate) mod error;
pub(crate) mod injection;
pub(crate) mod smoother;
pub(crate) mod sources;
pub(crate) mod stations;
pub(crate) mod util;

use std::{fs::File, path::PathBuf, time::Duration};

use clap::Parser;
use tokio::{
    signal,
    sync::watch,
    time::{self, MissedTickBehavior},
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::{
    bridge::{DevBridge, OfflineBridge, SimulatorBridge},
    config::AppConfig,
    engine::{Engine, StatusSnapshot},
    error::ApplicationResult,
    sources::{AviationWeatherSource, CannedSource, ObservationSource},
    stations::StationIndex,
};

#[derive(Debug, Parser)]
#[command(name = "weather_bridge", about = "Live real-world weather for a flight simulator")]
struct Args {
    /// Configuration file to use instead of the per-user default
    #[arg(long)]
    config: Option<PathBuf>,
    /// Station database CSV (icao,lat,lon,name,country)
    #[arg(long)]
    stations: Option<PathBuf>,
    /// Run against the development bridge instead of a simulator
    #[arg(long)]
    dev: bool,
    /// Override the engine tick interval
    #[arg(long)]
    tick_seconds: Option<f64>,
}

#[tokio::main]
async fn main() -> ApplicationResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    // Configuration problems are the one fatal startup condition.
    let mut config = AppConfig::load(args.config.as_deref())?;
    if args.dev {
        config.bridge.dev_mode = true;
    }
    if let Some(tick) = args.tick_seconds {
        config.engine.tick_interval_seconds = tick;
    }
    config.validate()?;

    let stations_path = args.stations.clone().unwrap_or_else(|| config.stations_path());
    let stations = match File::open(&stations_path) {
        Ok(file) => StationIndex::from_csv_reader(file)?,
        Err(e) => {
            warn!(
                path = %stations_path.display(),
                "Station database not readable ({e}); starting with an empty index"
            );
            StationIndex::new()
        }
    };
    info!(stations = stations.len(), "Station database loaded");

    // The OS-level simulator bridge attaches over this seam; without one the
    // engine runs disconnected and keeps retrying per its reconnect policy.
    let bridge: Box<dyn SimulatorBridge> = if config.bridge.dev_mode {
        info!("Using the development bridge");
        Box::new(DevBridge::new())
    } else {
        Box::new(OfflineBridge)
    };

    let source = if config.weather_source.enabled {
        ObservationSource::AviationWeather(AviationWeatherSource::new(
            config.weather_source.cache_seconds,
        ))
    } else {
        info!("Observation source disabled; serving no reports");
        ObservationSource::Canned(CannedSource::new())
    };

    let tick = Duration::from_secs_f64(config.engine.tick_interval_seconds);
    let mut engine = Engine::new(config, stations, bridge, source);

    // Observers (the UI layer) follow the per-tick snapshot on this channel.
    let (status_tx, _status_rx) = watch::channel(StatusSnapshot::default());

    let mut interval = time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!("Weather engine started (tick every {:.1}s)", tick.as_secs_f64());

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let status = engine.tick().await;
                status_tx.send_replace(status);
            }
            _ = signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
        }
    }

    Ok(())
}
