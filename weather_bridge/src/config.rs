use std::{
    fs,
    path::{Path, PathBuf},
};

use config::{Config, ConfigError};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use tracing::info;

use crate::error::ApplicationResult;

const CONFIG_FILE_NAME: &str = "config.toml";
const STATIONS_FILE_NAME: &str = "stations.csv";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombineMode {
    #[default]
    MetarOnly,
    MetarTafFallback,
    MetarTafAssist,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionMode {
    StepLimited,
    #[default]
    TimeBased,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManualMode {
    #[default]
    Station,
    Report,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherSourceConfig {
    pub enabled: bool,
    /// Per-ICAO TTL of the source's in-memory cache.
    pub cache_seconds: u64,
    pub metar_refresh_seconds: u64,
    pub taf_refresh_seconds: u64,
}

impl Default for WeatherSourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_seconds: 45,
            metar_refresh_seconds: 60,
            taf_refresh_seconds: 600,
        }
    }
}

impl WeatherSourceConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        range(
            "weather_source.cache_seconds",
            self.cache_seconds as f64,
            0.0,
            300.0,
        )?;
        range(
            "weather_source.metar_refresh_seconds",
            self.metar_refresh_seconds as f64,
            10.0,
            60.0,
        )?;
        range(
            "weather_source.taf_refresh_seconds",
            self.taf_refresh_seconds as f64,
            1.0,
            600.0,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherCombiningConfig {
    pub mode: CombineMode,
    /// METAR older than this falls back to the TAF in `metar_taf_fallback`.
    pub taf_fallback_stale_seconds: u64,
}

impl Default for WeatherCombiningConfig {
    fn default() -> Self {
        Self {
            mode: CombineMode::default(),
            taf_fallback_stale_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    pub transition_mode: TransitionMode,

    // Per-cycle caps in step_limited mode.
    pub max_wind_dir_change_deg: f64,
    pub max_wind_speed_change_kt: f64,
    pub max_qnh_change_hpa: f64,
    pub max_visibility_change_nm: f64,

    // Step sizes and cadence in time_based mode.
    pub transition_interval_seconds: f64,
    pub visibility_step_m: f64,
    pub wind_speed_step_kt: f64,
    pub wind_dir_step_deg: f64,
    pub qnh_step_hpa: f64,

    pub approach_freeze_alt_ft: f64,

    pub big_change_wind_deg: f64,
    pub big_change_wind_speed_kt: f64,
    pub big_change_qnh_hpa: f64,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            transition_mode: TransitionMode::default(),
            max_wind_dir_change_deg: 5.0,
            max_wind_speed_change_kt: 2.0,
            max_qnh_change_hpa: 0.5,
            max_visibility_change_nm: 0.5,
            transition_interval_seconds: 30.0,
            visibility_step_m: 200.0,
            wind_speed_step_kt: 2.0,
            wind_dir_step_deg: 5.0,
            qnh_step_hpa: 0.5,
            approach_freeze_alt_ft: 1000.0,
            big_change_wind_deg: 30.0,
            big_change_wind_speed_kt: 10.0,
            big_change_qnh_hpa: 5.0,
        }
    }
}

impl SmoothingConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        range(
            "smoothing.max_wind_dir_change_deg",
            self.max_wind_dir_change_deg,
            0.0,
            180.0,
        )?;
        range(
            "smoothing.max_wind_speed_change_kt",
            self.max_wind_speed_change_kt,
            0.0,
            50.0,
        )?;
        range("smoothing.max_qnh_change_hpa", self.max_qnh_change_hpa, 0.0, 10.0)?;
        at_least(
            "smoothing.max_visibility_change_nm",
            self.max_visibility_change_nm,
            0.0,
        )?;
        range(
            "smoothing.transition_interval_seconds",
            self.transition_interval_seconds,
            10.0,
            300.0,
        )?;
        range("smoothing.visibility_step_m", self.visibility_step_m, 50.0, 1000.0)?;
        range("smoothing.wind_speed_step_kt", self.wind_speed_step_kt, 0.5, 10.0)?;
        range("smoothing.wind_dir_step_deg", self.wind_dir_step_deg, 1.0, 30.0)?;
        range("smoothing.qnh_step_hpa", self.qnh_step_hpa, 0.1, 2.0)?;
        at_least(
            "smoothing.approach_freeze_alt_ft",
            self.approach_freeze_alt_ft,
            0.0,
        )?;
        at_least("smoothing.big_change_wind_deg", self.big_change_wind_deg, 0.0)?;
        at_least(
            "smoothing.big_change_wind_speed_kt",
            self.big_change_wind_speed_kt,
            0.0,
        )?;
        at_least("smoothing.big_change_qnh_hpa", self.big_change_qnh_hpa, 0.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StationSelectionConfig {
    pub radius_nm: f64,
    pub max_stations: usize,
    pub fallback_to_global: bool,
}

impl Default for StationSelectionConfig {
    fn default() -> Self {
        Self {
            radius_nm: 50.0,
            max_stations: 3,
            fallback_to_global: true,
        }
    }
}

impl StationSelectionConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        range("station_selection.radius_nm", self.radius_nm, 0.0, 500.0)?;
        range(
            "station_selection.max_stations",
            self.max_stations as f64,
            1.0,
            10.0,
        )
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ManualWeatherConfig {
    pub enabled: bool,
    pub mode: ManualMode,
    pub icao: Option<String>,
    pub raw_metar: Option<String>,
    pub raw_taf: Option<String>,
    /// Keep the manual report pinned: no observation refresh at all.
    pub freeze: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub enabled: bool,
    pub dev_mode: bool,
    pub auto_reconnect: bool,
    pub reconnect_interval_seconds: f64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dev_mode: false,
            auto_reconnect: true,
            reconnect_interval_seconds: 5.0,
        }
    }
}

impl BridgeConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        range(
            "bridge.reconnect_interval_seconds",
            self.reconnect_interval_seconds,
            1.0,
            60.0,
        )
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub tick_interval_seconds: f64,
    pub stations_file: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_seconds: 1.0,
            stations_file: None,
        }
    }
}

impl EngineConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        range(
            "engine.tick_interval_seconds",
            self.tick_interval_seconds,
            0.1,
            10.0,
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub weather_source: WeatherSourceConfig,
    pub weather_combining: WeatherCombiningConfig,
    pub smoothing: SmoothingConfig,
    pub station_selection: StationSelectionConfig,
    pub manual_weather: ManualWeatherConfig,
    pub bridge: BridgeConfig,
    pub engine: EngineConfig,
}

impl AppConfig {
    /// Load from `path`, or the per-user project directory. A missing file
    /// is written out with defaults first so the user has something to edit.
    pub fn load(path: Option<&Path>) -> ApplicationResult<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => default_config_path(),
        };

        if !path.exists() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, toml::to_string_pretty(&AppConfig::default())?)?;
            info!(path = %path.display(), "Wrote default configuration");
        }

        let config: AppConfig = Config::builder()
            .add_source(config::File::from(path))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.weather_source.validate()?;
        self.smoothing.validate()?;
        self.station_selection.validate()?;
        self.bridge.validate()?;
        self.engine.validate()
    }

    /// Station database path: configured file, or the per-user data dir.
    pub fn stations_path(&self) -> PathBuf {
        self.engine.stations_file.clone().unwrap_or_else(|| {
            project_dirs()
                .map(|dirs| dirs.data_dir().join(STATIONS_FILE_NAME))
                .unwrap_or_else(|| PathBuf::from(STATIONS_FILE_NAME))
        })
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "weather_bridge")
}

fn default_config_path() -> PathBuf {
    match project_dirs() {
        Some(dirs) => dirs.config_dir().join(CONFIG_FILE_NAME),
        None => PathBuf::from(CONFIG_FILE_NAME),
    }
}

fn range(name: &str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Message(format!(
            "{name} must be between {min} and {max}, got {value}"
        )))
    }
}

fn at_least(name: &str, value: f64, min: f64) -> Result<(), ConfigError> {
    if value >= min {
        Ok(())
    } else {
        Err(ConfigError::Message(format!(
            "{name} must be at least {min}, got {value}"
        )))
    }
}
