use std::time::{Duration, Instant};

use indexmap::IndexMap;
use jiff::Timestamp;
use serde::Serialize;
use tracing::{debug, info, warn};
use wx_decoder::{
    metar::ParsedMetar, parse_metar, parse_taf, taf::ParsedTaf,
};

use crate::{
    blender::blend_stations,
    bridge::{AircraftState, BridgeHandle, SimulatorBridge},
    combiner::{CombinedWeather, SampleSource, combine_weather},
    config::{AppConfig, ManualMode},
    injection::{InjectionController, StationObservation},
    smoother::{WeatherSmoother, WeatherState},
    sources::ObservationSource,
    stations::{Station, StationIndex},
};

#[derive(Debug, Clone, Serialize)]
pub struct StationStatus {
    pub icao: String,
    pub name: String,
    pub distance_nm: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportStatus {
    pub raw: String,
    pub age_seconds: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WeatherUpdateStatus {
    pub icao: String,
    pub name: String,
    pub distance_nm: f64,
    pub metar: Option<ReportStatus>,
    pub taf: Option<ReportStatus>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DataStatistics {
    pub stations_loaded: usize,
    pub metars_loaded: usize,
    pub tafs_loaded: usize,
}

/// Snapshot published to observers at the end of each tick.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusSnapshot {
    pub fsuipc_connected: bool,
    pub last_injection_success: Option<bool>,
    /// Monotonic seconds since engine start.
    pub last_injection_time: Option<f64>,
    pub data_statistics: DataStatistics,
    pub stations: Vec<StationStatus>,
    pub weather_updates: Vec<WeatherUpdateStatus>,
    pub aircraft_state: Option<AircraftState>,
    /// Telemetric summary only: single-nearest sample, or the
    /// distance-weighted blend when several stations are in scope.
    pub current_weather: Option<CombinedWeather>,
    pub manual_mode: bool,
    /// Wallclock seconds.
    pub last_update: Option<f64>,
}

/// Combined weather and raw reports for one station, for observers.
#[allow(dead_code)] // read by status observers; exercised in tests
#[derive(Debug, Clone, Serialize)]
pub struct IcaoWeather {
    pub icao: String,
    pub combined: CombinedWeather,
    pub metar_raw: Option<String>,
    pub taf_raw: Option<String>,
}

/// The weather engine: owns the station index, smoother, controller, the
/// one bridge handle and the observation source, and runs the per-tick
/// pipeline. All state mutates only inside `tick`.
pub struct Engine {
    config: AppConfig,
    stations: StationIndex,
    smoother: WeatherSmoother,
    controller: InjectionController,
    bridge: BridgeHandle,
    source: ObservationSource,
    current_stations: Vec<(Station, f64)>,
    current_metars: IndexMap<String, (ParsedMetar, Instant)>,
    current_tafs: IndexMap<String, (ParsedTaf, Instant)>,
    last_metar_refresh: Option<Instant>,
    last_taf_refresh: Option<Instant>,
    started_at: Instant,
    last_update: Option<Timestamp>,
}

impl Engine {
    pub fn new(
        config: AppConfig,
        stations: StationIndex,
        bridge: Box<dyn SimulatorBridge>,
        source: ObservationSource,
    ) -> Self {
        let smoother = WeatherSmoother::new(config.smoothing.clone());
        Self {
            smoother,
            controller: InjectionController::new(),
            bridge: BridgeHandle::new(bridge),
            source,
            stations,
            config,
            current_stations: Vec::new(),
            current_metars: IndexMap::new(),
            current_tafs: IndexMap::new(),
            last_metar_refresh: None,
            last_taf_refresh: None,
            started_at: Instant::now(),
            last_update: None,
        }
    }

    /// One pass: pose → station selection → observation refresh →
    /// combine → smooth → gate → dispatch → status.
    pub async fn tick(&mut self) -> StatusSnapshot {
        let aircraft = self.acquire_aircraft_state();

        if let Some(state) = aircraft {
            self.smoother.set_freeze_altitude(state.alt_ft);
            if !self.config.manual_weather.enabled {
                self.select_stations(state.lat, state.lon);
            }
        }
        self.apply_manual_station();

        if self.should_refresh_observations() {
            self.refresh_observations().await;
        }

        let manual_report = self.config.manual_weather.enabled
            && self.config.manual_weather.mode == ManualMode::Report;
        if !self.current_stations.is_empty() || manual_report {
            match self.target_sample() {
                Some(target) if target.source == SampleSource::None => {
                    debug!("No usable weather data for the target sample; skipping injection");
                }
                Some(target) => {
                    let smoothed = self.smoother.smooth(&target, aircraft.map(|a| a.alt_ft));
                    let now = Instant::now();
                    let refresh =
                        Duration::from_secs(self.config.weather_source.metar_refresh_seconds);
                    if self.controller.should_inject(
                        &smoothed,
                        &target,
                        &self.config.smoothing,
                        refresh,
                        now,
                    ) {
                        self.dispatch(&smoothed, now).await;
                    }
                }
                None => {}
            }
        } else {
            debug!("Weather processing skipped: no stations selected");
        }

        self.last_update = Some(Timestamp::now());
        self.snapshot(aircraft)
    }

    fn acquire_aircraft_state(&mut self) -> Option<AircraftState> {
        if !self.config.bridge.enabled {
            return None;
        }
        if !self.bridge.is_connected() {
            if !self.config.bridge.auto_reconnect {
                return None;
            }
            info!("Bridge disconnected, attempting to reconnect");
            if self.bridge.reconnect() {
                info!("Bridge reconnected");
            } else {
                warn!("Bridge reconnection failed");
                return None;
            }
        }
        self.bridge.aircraft_state()
    }

    fn select_stations(&mut self, lat: f64, lon: f64) {
        let selection = &self.config.station_selection;
        self.current_stations = self.stations.nearest(
            lat,
            lon,
            selection.radius_nm,
            selection.max_stations,
            selection.fallback_to_global,
        );
        if self.current_stations.is_empty() {
            warn!("No stations found near aircraft position ({lat:.4}, {lon:.4})");
        } else {
            debug!(
                "Selected {} station(s) for weather injection",
                self.current_stations.len()
            );
        }
    }

    fn apply_manual_station(&mut self) {
        let manual = &self.config.manual_weather;
        if !(manual.enabled && manual.mode == ManualMode::Station) {
            return;
        }
        let Some(icao) = manual.icao.clone() else {
            warn!("Manual station mode without an ICAO configured");
            return;
        };
        match self.stations.get(&icao) {
            Some(station) => self.current_stations = vec![(station.clone(), 0.0)],
            None => warn!(%icao, "Manual station not in the station database"),
        }
    }

    fn should_refresh_observations(&self) -> bool {
        if !self.config.weather_source.enabled {
            return false;
        }
        let manual = &self.config.manual_weather;
        if manual.enabled && (manual.freeze || manual.mode == ManualMode::Report) {
            debug!("Observation refresh skipped: manual weather");
            return false;
        }
        true
    }

    /// Refresh whichever of the two maps has aged out. A failed fetch keeps
    /// the previous map; the next tick retries without prejudice.
    async fn refresh_observations(&mut self) {
        let icaos: Vec<String> = self
            .current_stations
            .iter()
            .map(|(station, _)| station.icao.clone())
            .collect();
        if icaos.is_empty() {
            return;
        }

        let metar_interval = Duration::from_secs(self.config.weather_source.metar_refresh_seconds);
        if self
            .last_metar_refresh
            .is_none_or(|at| at.elapsed() >= metar_interval)
        {
            match self.source.fetch_metars(&icaos).await {
                Ok(fetched) => {
                    let count = fetched.len();
                    self.current_metars = merged_metars(&self.current_metars, fetched);
                    self.last_metar_refresh = Some(Instant::now());
                    info!("Updated {count} METAR report(s)");
                }
                Err(e) => warn!("METAR refresh failed, keeping previous reports: {e}"),
            }
        }

        let taf_interval = Duration::from_secs(self.config.weather_source.taf_refresh_seconds);
        if self
            .last_taf_refresh
            .is_none_or(|at| at.elapsed() >= taf_interval)
        {
            match self.source.fetch_tafs(&icaos).await {
                Ok(fetched) => {
                    let count = fetched.len();
                    self.current_tafs = merged_tafs(&self.current_tafs, fetched);
                    self.last_taf_refresh = Some(Instant::now());
                    info!("Updated {count} TAF report(s)");
                }
                Err(e) => warn!("TAF refresh failed, keeping previous reports: {e}"),
            }
        }
    }

    /// Target sample for smoothing: the manual report, or the single nearest
    /// station. With several stations in scope the others go out raw through
    /// multi-station dispatch; the simulator does the spatial blending.
    fn target_sample(&self) -> Option<CombinedWeather> {
        let manual = &self.config.manual_weather;
        if manual.enabled && manual.mode == ManualMode::Report {
            return Some(self.manual_report_sample());
        }

        let (station, _) = self.current_stations.first()?;
        if !self.current_metars.contains_key(&station.icao) {
            warn!(icao = %station.icao, "No METAR loaded for selected station");
        }
        Some(self.combined_for(&station.icao))
    }

    fn manual_report_sample(&self) -> CombinedWeather {
        let manual = &self.config.manual_weather;
        let metar = manual.raw_metar.as_deref().and_then(|raw| {
            parse_metar(raw)
                .inspect_err(|e| warn!("Manual METAR rejected: {e}"))
                .ok()
        });
        let taf = manual.raw_taf.as_deref().and_then(|raw| {
            parse_taf(raw)
                .inspect_err(|e| warn!("Manual TAF rejected: {e}"))
                .ok()
        });
        combine_weather(
            metar.as_ref(),
            taf.as_ref(),
            &self.config.weather_combining,
            None,
        )
    }

    fn combined_for(&self, icao: &str) -> CombinedWeather {
        let metar_entry = self.current_metars.get(icao);
        let metar_age = metar_entry.map(|(_, fetched_at)| fetched_at.elapsed().as_secs_f64());
        let taf = self.current_tafs.get(icao).map(|(taf, _)| taf);
        combine_weather(
            metar_entry.map(|(metar, _)| metar),
            taf,
            &self.config.weather_combining,
            metar_age,
        )
    }

    async fn dispatch(&mut self, smoothed: &WeatherState, now: Instant) {
        let observations: Vec<StationObservation> = self
            .current_stations
            .iter()
            .filter_map(|(station, distance)| {
                self.current_metars
                    .get(&station.icao)
                    .filter(|(metar, _)| metar.valid)
                    .map(|(metar, _)| StationObservation {
                        icao: station.icao.clone(),
                        metar: metar.clone(),
                        distance_nm: *distance,
                    })
            })
            .collect();

        if !observations.is_empty() {
            let max_stations = self.config.station_selection.max_stations;
            self.controller
                .dispatch_stations(&mut self.bridge, &observations, max_stations, smoothed, now)
                .await;
        } else {
            let icao = self
                .current_stations
                .first()
                .map(|(station, _)| station.icao.clone())
                .or_else(|| self.config.manual_weather.icao.clone())
                .unwrap_or_else(|| "GLOB".to_string());
            self.controller
                .dispatch_single(&mut self.bridge, smoothed, &icao, now)
                .await;
        }
    }

    fn current_weather(&self) -> Option<CombinedWeather> {
        if self.current_stations.len() > 1 {
            let samples: Vec<(f64, CombinedWeather)> = self
                .current_stations
                .iter()
                .map(|(station, distance)| (*distance, self.combined_for(&station.icao)))
                .collect();
            if let Some(blended) = blend_stations(&samples) {
                return Some(blended);
            }
        }
        self.target_sample()
    }

    /// Combined weather and raw reports for one station, for observers.
    #[allow(dead_code)] // used in tests
    pub fn weather_for_icao(&self, icao: &str) -> Option<IcaoWeather> {
        let icao = icao.trim().to_ascii_uppercase();
        let known = self.stations.get(&icao).is_some()
            || self.current_metars.contains_key(&icao)
            || self.current_tafs.contains_key(&icao);
        if !known {
            return None;
        }
        Some(IcaoWeather {
            combined: self.combined_for(&icao),
            metar_raw: self.current_metars.get(&icao).map(|(m, _)| m.raw.clone()),
            taf_raw: self.current_tafs.get(&icao).map(|(t, _)| t.raw.clone()),
            icao,
        })
    }

    fn snapshot(&mut self, aircraft: Option<AircraftState>) -> StatusSnapshot {
        let fsuipc_connected = self.config.bridge.enabled && self.bridge.is_connected();

        let weather_updates = self
            .current_stations
            .iter()
            .map(|(station, distance)| WeatherUpdateStatus {
                icao: station.icao.clone(),
                name: station.name.clone(),
                distance_nm: *distance,
                metar: self.current_metars.get(&station.icao).map(|(metar, at)| {
                    ReportStatus {
                        raw: metar.raw.clone(),
                        age_seconds: at.elapsed().as_secs_f64(),
                    }
                }),
                taf: self.current_tafs.get(&station.icao).map(|(taf, at)| ReportStatus {
                    raw: taf.raw.clone(),
                    age_seconds: at.elapsed().as_secs_f64(),
                }),
            })
            .collect();

        StatusSnapshot {
            fsuipc_connected,
            last_injection_success: self.controller.last_injection_success(),
            last_injection_time: self
                .controller
                .last_injection_time()
                .map(|at| at.duration_since(self.started_at).as_secs_f64()),
            data_statistics: DataStatistics {
                stations_loaded: self.stations.len(),
                metars_loaded: self.current_metars.len(),
                tafs_loaded: self.current_tafs.len(),
            },
            stations: self
                .current_stations
                .iter()
                .map(|(station, distance)| StationStatus {
                    icao: station.icao.clone(),
                    name: station.name.clone(),
                    distance_nm: *distance,
                })
                .collect(),
            weather_updates,
            aircraft_state: aircraft,
            current_weather: self.current_weather(),
            manual_mode: self.config.manual_weather.enabled,
            last_update: self.last_update.map(|t| t.as_millisecond() as f64 / 1000.0),
        }
    }
}

fn merged_metars(
    previous: &IndexMap<String, (ParsedMetar, Instant)>,
    fetched: IndexMap<String, String>,
) -> IndexMap<String, (ParsedMetar, Instant)> {
    let now = Instant::now();
    let mut next = previous.clone();
    for (icao, raw) in fetched {
        match parse_metar(&raw) {
            Ok(parsed) => {
                next.insert(icao, (parsed, now));
            }
            Err(e) => warn!(%icao, "Failed to decode METAR: {e}"),
        }
    }
    next
}

fn merged_tafs(
    previous: &IndexMap<String, (ParsedTaf, Instant)>,
    fetched: IndexMap<String, String>,
) -> IndexMap<String, (ParsedTaf, Instant)> {
    let now = Instant::now();
    let mut next = previous.clone();
    for (icao, raw) in fetched {
        match parse_taf(&raw) {
            Ok(parsed) => {
                next.insert(icao, (parsed, now));
            }
            Err(e) => warn!(%icao, "Failed to decode TAF: {e}"),
        }
    }
    next
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::{
        bridge::{BridgeError, OfflineBridge},
        config::{CombineMode, TransitionMode},
        sources::CannedSource,
        stations::tests::test_index,
    };

    struct ScriptedBridge {
        pose: Arc<Mutex<AircraftState>>,
        writes: Arc<Mutex<Vec<String>>>,
    }

    impl SimulatorBridge for ScriptedBridge {
        fn is_connected(&mut self) -> bool {
            true
        }

        fn reconnect(&mut self) -> bool {
            true
        }

        fn aircraft_state(&mut self) -> Option<AircraftState> {
            Some(*self.pose.lock().unwrap())
        }

        fn write_metar(&mut self, metar: &str) -> Result<(), BridgeError> {
            self.writes.lock().unwrap().push(metar.to_string());
            Ok(())
        }
    }

    fn pose_at(lat: f64, lon: f64, alt_ft: f64) -> AircraftState {
        AircraftState {
            lat,
            lon,
            alt_ft,
            gs_kt: 250.0,
            vs_fpm: 0.0,
            heading_deg: 90.0,
            on_ground: false,
        }
    }

    #[allow(clippy::type_complexity)]
    fn scripted_bridge(
        pose: AircraftState,
    ) -> (
        Box<dyn SimulatorBridge>,
        Arc<Mutex<AircraftState>>,
        Arc<Mutex<Vec<String>>>,
    ) {
        let pose = Arc::new(Mutex::new(pose));
        let writes = Arc::new(Mutex::new(Vec::new()));
        let bridge = ScriptedBridge {
            pose: Arc::clone(&pose),
            writes: Arc::clone(&writes),
        };
        (Box::new(bridge), pose, writes)
    }

    fn step_limited_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.smoothing.transition_mode = TransitionMode::StepLimited;
        config.weather_source.metar_refresh_seconds = 10;
        config
    }

    #[tokio::test]
    async fn clear_day_single_station() {
        let mut stations = StationIndex::new();
        stations.insert(Station {
            icao: "KJFK".to_string(),
            lat: 40.6398,
            lon: -73.7789,
            name: "John F Kennedy Intl".to_string(),
            country: "US".to_string(),
        });

        let mut canned = CannedSource::new();
        canned.insert_metar("KJFK", "METAR KJFK 121200Z 12015KT 10SM FEW020 12/08 A2992");

        let (bridge, _pose, writes) = scripted_bridge(pose_at(40.6398, -73.7789, 5000.0));
        let mut engine = Engine::new(
            step_limited_config(),
            stations,
            bridge,
            ObservationSource::Canned(canned),
        );

        let status = engine.tick().await;

        assert!(status.fsuipc_connected);
        assert_eq!(status.stations.len(), 1);
        assert_eq!(status.stations[0].icao, "KJFK");
        assert_eq!(status.last_injection_success, Some(true));
        assert!(status.last_injection_time.is_some());

        let weather = status.current_weather.unwrap();
        assert_eq!(weather.wind_dir_deg, Some(120.0));
        assert_eq!(weather.wind_speed_kt, Some(15.0));
        assert_eq!(weather.visibility_nm, Some(10.0));
        assert_eq!(weather.temperature_c, Some(12.0));

        let writes = writes.lock().unwrap();
        assert_eq!(writes.len(), 1);
        let metar = &writes[0];
        for token in ["KJFK METAR", "12015KT", "9999", "FEW020", "12/08", "Q1013"] {
            assert!(metar.contains(token), "missing {token}: {metar}");
        }
    }

    #[tokio::test]
    async fn unchanged_weather_does_not_reinject() {
        let mut stations = StationIndex::new();
        stations.insert(Station {
            icao: "KJFK".to_string(),
            lat: 40.6398,
            lon: -73.7789,
            name: String::new(),
            country: String::new(),
        });
        let mut canned = CannedSource::new();
        canned.insert_metar("KJFK", "METAR KJFK 121200Z 12015KT 10SM FEW020 12/08 A2992");

        let (bridge, _pose, writes) = scripted_bridge(pose_at(40.6398, -73.7789, 5000.0));
        let mut engine = Engine::new(
            step_limited_config(),
            stations,
            bridge,
            ObservationSource::Canned(canned),
        );

        engine.tick().await;
        engine.tick().await;

        assert_eq!(writes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn multi_station_dispatch_in_distance_order() {
        let stations = test_index();
        let mut canned = CannedSource::new();
        canned.insert_metar("KJFK", "METAR KJFK 121200Z 12015KT 10SM FEW020 12/08 A2992");
        canned.insert_metar("KLGA", "METAR KLGA 121200Z 13012KT 10SM SCT025 11/07 A2991");
        canned.insert_metar("KEWR", "METAR KEWR 121200Z 12514KT 10SM BKN030 12/06 A2993");

        let (bridge, _pose, writes) = scripted_bridge(pose_at(40.6398, -73.7789, 5000.0));
        let mut engine = Engine::new(
            step_limited_config(),
            stations,
            bridge,
            ObservationSource::Canned(canned),
        );

        let status = engine.tick().await;
        assert_eq!(status.stations.len(), 3);

        let writes = writes.lock().unwrap();
        let order: Vec<&str> = writes.iter().map(|m| &m[..4]).collect();
        assert_eq!(order, ["KJFK", "KLGA", "KEWR"]);
    }

    #[tokio::test]
    async fn manual_station_pins_selection() {
        let stations = test_index();
        let mut canned = CannedSource::new();
        canned.insert_metar("ENGM", "ENGM 121200Z 02008KT 9999 FEW025 12/05 Q1019");

        let mut config = step_limited_config();
        config.manual_weather.enabled = true;
        config.manual_weather.mode = ManualMode::Station;
        config.manual_weather.icao = Some("ENGM".to_string());

        // Aircraft far away from the pinned station.
        let (bridge, _pose, _writes) = scripted_bridge(pose_at(40.6398, -73.7789, 5000.0));
        let mut engine = Engine::new(config, stations, bridge, ObservationSource::Canned(canned));

        let status = engine.tick().await;
        assert!(status.manual_mode);
        assert_eq!(status.stations.len(), 1);
        assert_eq!(status.stations[0].icao, "ENGM");
        assert_eq!(status.stations[0].distance_nm, 0.0);
        assert_eq!(status.last_injection_success, Some(true));
    }

    #[tokio::test]
    async fn manual_report_drives_the_fallback_path() {
        let mut config = step_limited_config();
        config.manual_weather.enabled = true;
        config.manual_weather.mode = ManualMode::Report;
        config.manual_weather.icao = Some("EKCH".to_string());
        config.manual_weather.raw_metar =
            Some("EKCH 121200Z 27015KT 9999 SCT030 14/08 Q1009".to_string());

        let (bridge, _pose, writes) = scripted_bridge(pose_at(55.6, 12.6, 5000.0));
        let mut engine = Engine::new(
            config,
            StationIndex::new(),
            bridge,
            ObservationSource::Canned(CannedSource::new()),
        );

        let status = engine.tick().await;
        assert_eq!(status.last_injection_success, Some(true));
        let writes = writes.lock().unwrap();
        assert_eq!(writes.len(), 1);
        assert!(writes[0].starts_with("EKCH METAR"), "{}", writes[0]);
        assert!(writes[0].contains("27015KT"), "{}", writes[0]);
    }

    #[tokio::test]
    async fn disconnected_bridge_yields_a_quiet_snapshot() {
        let mut engine = Engine::new(
            AppConfig::default(),
            test_index(),
            Box::new(OfflineBridge),
            ObservationSource::Canned(CannedSource::new()),
        );

        let status = engine.tick().await;
        assert!(!status.fsuipc_connected);
        assert!(status.stations.is_empty());
        assert!(status.aircraft_state.is_none());
        assert!(status.current_weather.is_none());
        assert_eq!(status.last_injection_success, None);
        assert_eq!(status.data_statistics.stations_loaded, 10);
    }

    #[tokio::test]
    async fn taf_fallback_supplies_the_target() {
        let mut stations = StationIndex::new();
        stations.insert(Station {
            icao: "ENGM".to_string(),
            lat: 60.1939,
            lon: 11.1004,
            name: String::new(),
            country: String::new(),
        });

        // No METAR at all; only a TAF.
        let mut canned = CannedSource::new();
        canned.insert_taf("ENGM", "TAF ENGM 121130Z 121200/131200Z 24010KT 9999 SCT040");

        let mut config = step_limited_config();
        config.weather_combining.mode = CombineMode::MetarTafFallback;

        let (bridge, _pose, _writes) = scripted_bridge(pose_at(60.1939, 11.1004, 5000.0));
        let mut engine = Engine::new(config, stations, bridge, ObservationSource::Canned(canned));

        let status = engine.tick().await;
        let weather = status.current_weather.unwrap();
        assert_eq!(weather.source, crate::combiner::SampleSource::TafFallback);
        assert_eq!(weather.wind_dir_deg, Some(240.0));
        assert_eq!(weather.wind_speed_kt, Some(10.0));
    }

    #[tokio::test]
    async fn snapshot_serializes_for_observers() {
        let mut engine = Engine::new(
            AppConfig::default(),
            test_index(),
            Box::new(OfflineBridge),
            ObservationSource::Canned(CannedSource::new()),
        );
        let status = engine.tick().await;

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["fsuipc_connected"], serde_json::json!(false));
        assert_eq!(json["manual_mode"], serde_json::json!(false));
        assert!(json["stations"].is_array());
        assert!(json["weather_updates"].is_array());
        assert_eq!(json["data_statistics"]["stations_loaded"], serde_json::json!(10));
    }

    #[tokio::test]
    async fn weather_for_icao_reports_raw_text() {
        let stations = test_index();
        let mut canned = CannedSource::new();
        canned.insert_metar("KJFK", "METAR KJFK 121200Z 12015KT 10SM FEW020 12/08 A2992");

        let (bridge, _pose, _writes) = scripted_bridge(pose_at(40.6398, -73.7789, 5000.0));
        let mut engine = Engine::new(
            step_limited_config(),
            stations,
            bridge,
            ObservationSource::Canned(canned),
        );
        engine.tick().await;

        let weather = engine.weather_for_icao("kjfk").unwrap();
        assert_eq!(weather.icao, "KJFK");
        assert!(weather.metar_raw.unwrap().contains("12015KT"));
        assert!(engine.weather_for_icao("ZZZZ").is_none());
    }
}
