use std::{
    collections::HashSet,
    ops::RangeInclusive,
    time::{Duration, Instant},
};

use jiff::{Timestamp, Zoned, tz::TimeZone};
use tokio::time::sleep;
use tracing::{debug, info, warn};
use wx_decoder::{
    cloud::{CloudCoverage, CloudLayer},
    metar::ParsedMetar,
    weather::WeatherCode,
};

use crate::{
    bridge::BridgeHandle,
    combiner::CombinedWeather,
    config::{SmoothingConfig, TransitionMode},
    smoother::WeatherState,
    util::angle_delta_deg,
};

/// Hard floor between successive injections.
pub const MIN_INJECTION_INTERVAL: Duration = Duration::from_secs(10);
/// Cadence while a big change is still transitioning.
pub const BIG_CHANGE_INTERVAL: Duration = Duration::from_secs(30);

/// Pacing between per-station writes, and after the last one, so the
/// simulator side can absorb each METAR.
const STATION_WRITE_DELAY: Duration = Duration::from_millis(100);
const POST_DISPATCH_DELAY: Duration = Duration::from_millis(200);
/// Bridge contract: ASCII METAR of at most 255 bytes including terminator.
const METAR_MAX_BYTES: usize = 255;

// "Weather changed" thresholds; one breach triggers an injection.
const WIND_DIR_CHANGED_DEG: f64 = 5.0;
const WIND_SPEED_CHANGED_KT: f64 = 2.0;
const QNH_CHANGED_HPA: f64 = 0.5;
const VISIBILITY_CHANGED_NM: f64 = 0.5;
const TEMPERATURE_CHANGED_C: f64 = 2.0;

// Residuals that keep the step_limited cadence at the big-change interval.
const RESIDUAL_WIND_KT: f64 = 3.0;
const RESIDUAL_VISIBILITY_NM: f64 = 1.0;

// Inter-station consistency limits.
const PEER_RADIUS_NM: f64 = 20.0;
const PEER_VISIBILITY_DELTA_NM: f64 = 5.0;
const PEER_QNH_DELTA_HPA: f64 = 10.0;
const LOW_VISIBILITY_NM: f64 = 1.0;
const HIGH_VISIBILITY_NM: f64 = 5.0;

const METERS_PER_NM: f64 = 1852.0;
/// ICAO-style meter steps visibility is snapped to on synthesis.
const VISIBILITY_STEPS_M: [u32; 6] = [8000, 5000, 3000, 1600, 800, 400];
const QNH_VALID_RANGE: RangeInclusive<f64> = 870.0..=1080.0;
const QNH_FALLBACK_HPA: f64 = 1013.25;
/// Minimum synthesized cloud base, in hundreds of feet.
const MIN_CLOUD_BASE_CODE: u32 = 5;

/// One nearby station's parsed observation, ready for dispatch.
#[derive(Debug, Clone)]
pub struct StationObservation {
    pub icao: String,
    pub metar: ParsedMetar,
    pub distance_nm: f64,
}

/// Gates and dispatches METAR injections. Owns the last-injected bookkeeping
/// on a monotonic time base.
#[derive(Debug, Default)]
pub struct InjectionController {
    last_injected: Option<WeatherState>,
    last_injection_time: Option<Instant>,
    last_injection_success: Option<bool>,
}

impl InjectionController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_injection_time(&self) -> Option<Instant> {
        self.last_injection_time
    }

    pub fn last_injection_success(&self) -> Option<bool> {
        self.last_injection_success
    }

    /// Decide whether this tick injects at all.
    pub fn should_inject(
        &self,
        smoothed: &WeatherState,
        target: &CombinedWeather,
        smoothing: &SmoothingConfig,
        metar_refresh: Duration,
        now: Instant,
    ) -> bool {
        let (interval, still_transitioning) =
            self.injection_interval(smoothed, target, smoothing, metar_refresh);
        let waited_long_enough = self
            .last_injection_time
            .is_none_or(|t| now.duration_since(t) >= interval);

        if still_transitioning || smoothed.is_big_change || smoothed.is_very_big_change {
            if waited_long_enough {
                info!(
                    "Injection approved (transitioning): interval {:.0}s elapsed",
                    interval.as_secs_f64()
                );
            } else {
                info!(
                    "Injection skipped (transitioning): waiting out the {:.0}s interval",
                    interval.as_secs_f64()
                );
            }
            return waited_long_enough;
        }

        let changed = weather_changed(self.last_injected.as_ref(), smoothed);
        if changed && waited_long_enough {
            info!(
                "Injection approved: weather changed and interval {:.0}s elapsed",
                interval.as_secs_f64()
            );
            true
        } else {
            if !changed && waited_long_enough {
                info!("Injection skipped: weather has not changed");
            } else {
                debug!(
                    "Injection skipped: interval {:.0}s not yet elapsed",
                    interval.as_secs_f64()
                );
            }
            false
        }
    }

    fn injection_interval(
        &self,
        smoothed: &WeatherState,
        target: &CombinedWeather,
        smoothing: &SmoothingConfig,
        metar_refresh: Duration,
    ) -> (Duration, bool) {
        let wind_residual = residual(smoothed.wind_speed_kt, target.wind_speed_kt);
        let vis_residual = residual(smoothed.visibility_nm, target.visibility_nm);

        match smoothing.transition_mode {
            TransitionMode::TimeBased => {
                let interval =
                    Duration::from_secs_f64(smoothing.transition_interval_seconds)
                        .max(MIN_INJECTION_INTERVAL);
                let still_transitioning = wind_residual
                    .is_some_and(|d| d > smoothing.wind_speed_step_kt)
                    || vis_residual
                        .is_some_and(|d| d > smoothing.visibility_step_m / METERS_PER_NM);
                (interval, still_transitioning)
            }
            TransitionMode::StepLimited => {
                let still_transitioning = smoothed.is_very_big_change
                    || smoothed.is_big_change
                    || wind_residual.is_some_and(|d| d > RESIDUAL_WIND_KT)
                    || vis_residual.is_some_and(|d| d > RESIDUAL_VISIBILITY_NM);
                if still_transitioning {
                    (BIG_CHANGE_INTERVAL, true)
                } else {
                    (metar_refresh.max(MIN_INJECTION_INTERVAL), false)
                }
            }
        }
    }

    /// Preferred path: hand each nearby station's raw observation to the
    /// bridge in ascending distance order and let the simulator blend them.
    pub async fn dispatch_stations(
        &mut self,
        bridge: &mut BridgeHandle,
        observations: &[StationObservation],
        max_stations: usize,
        smoothed: &WeatherState,
        now: Instant,
    ) -> bool {
        if !bridge.is_connected() {
            warn!("Bridge not connected, cannot inject weather");
            self.record_failure();
            return false;
        }

        let mut sorted = observations.to_vec();
        sorted.sort_by(|a, b| {
            a.distance_nm
                .total_cmp(&b.distance_nm)
                .then_with(|| a.icao.cmp(&b.icao))
        });
        sorted.truncate(max_stations);
        let validated = filter_consistent(&sorted);

        let stamp = Timestamp::now().to_zoned(TimeZone::UTC);
        let mut metars = Vec::new();
        for obs in &validated {
            if !obs.metar.valid {
                debug!(icao = %obs.icao, "Skipping station: invalid METAR");
                continue;
            }
            let metar = metar_from_parsed(&obs.metar, &obs.icao, &stamp);
            if metar.len() + 1 > METAR_MAX_BYTES {
                warn!(icao = %obs.icao, "Skipping station: METAR exceeds the bridge write budget");
                continue;
            }
            info!(
                icao = %obs.icao,
                distance_nm = format_args!("{:.1}", obs.distance_nm),
                %metar,
                "Injecting station METAR"
            );
            metars.push(metar);
        }

        if metars.is_empty() {
            warn!("No valid METARs to dispatch");
            self.record_failure();
            return false;
        }

        let delivered = if bridge.supports_multi_write() {
            match bridge.write_metars(&metars) {
                Ok(()) => metars.len(),
                Err(e) => {
                    warn!("Batched METAR write failed: {e}");
                    0
                }
            }
        } else {
            let mut delivered = 0;
            for metar in &metars {
                match bridge.write_metar(metar) {
                    Ok(()) => delivered += 1,
                    Err(e) => warn!("METAR write failed: {e}"),
                }
                sleep(STATION_WRITE_DELAY).await;
            }
            sleep(POST_DISPATCH_DELAY).await;
            delivered
        };

        if delivered > 0 {
            info!("Injected METARs for {delivered} station(s); the simulator blends them spatially");
            self.record_success(smoothed.clone(), now);
            true
        } else {
            warn!("No stations were injected successfully");
            self.record_failure();
            false
        }
    }

    /// Fallback path: one METAR synthesized from the smoothed state, under
    /// the given ICAO (or `GLOB`).
    pub async fn dispatch_single(
        &mut self,
        bridge: &mut BridgeHandle,
        smoothed: &WeatherState,
        icao: &str,
        now: Instant,
    ) -> bool {
        if !bridge.is_connected() {
            warn!("Bridge not connected, cannot inject weather");
            self.record_failure();
            return false;
        }

        let stamp = Timestamp::now().to_zoned(TimeZone::UTC);
        let metar = metar_from_state(smoothed, icao, &stamp);
        if metar.len() + 1 > METAR_MAX_BYTES {
            warn!(%icao, "Synthesized METAR exceeds the bridge write budget");
            self.record_failure();
            return false;
        }

        info!(%icao, %metar, "Injecting smoothed METAR");
        let written = bridge.write_metar(&metar);
        sleep(POST_DISPATCH_DELAY).await;

        match written {
            Ok(()) => {
                self.record_success(smoothed.clone(), now);
                true
            }
            Err(e) => {
                warn!("METAR write failed: {e}");
                self.record_failure();
                false
            }
        }
    }

    fn record_success(&mut self, state: WeatherState, now: Instant) {
        self.last_injected = Some(state);
        self.last_injection_time = Some(now);
        self.last_injection_success = Some(true);
    }

    fn record_failure(&mut self) {
        self.last_injection_success = Some(false);
    }
}

/// Has the smoothed state drifted far enough from the last injection to be
/// worth another write? Any present/absent flip on a compared field counts.
pub(crate) fn weather_changed(last: Option<&WeatherState>, new: &WeatherState) -> bool {
    let Some(old) = last else {
        return true;
    };

    direction_changed(old.wind_dir_deg, new.wind_dir_deg)
        || scalar_changed(old.wind_speed_kt, new.wind_speed_kt, WIND_SPEED_CHANGED_KT)
        || scalar_changed(old.qnh_hpa, new.qnh_hpa, QNH_CHANGED_HPA)
        || scalar_changed(old.visibility_nm, new.visibility_nm, VISIBILITY_CHANGED_NM)
        || scalar_changed(old.temperature_c, new.temperature_c, TEMPERATURE_CHANGED_C)
        || old.clouds != new.clouds
        || token_set(&old.weather_tokens) != token_set(&new.weather_tokens)
}

fn scalar_changed(old: Option<f64>, new: Option<f64>, threshold: f64) -> bool {
    match (old, new) {
        (Some(old), Some(new)) => (new - old).abs() > threshold,
        (None, None) => false,
        _ => true,
    }
}

fn direction_changed(old: Option<f64>, new: Option<f64>) -> bool {
    match (old, new) {
        (Some(old), Some(new)) => angle_delta_deg(old, new) > WIND_DIR_CHANGED_DEG,
        (None, None) => false,
        _ => true,
    }
}

fn token_set(tokens: &[WeatherCode]) -> HashSet<WeatherCode> {
    tokens.iter().copied().collect()
}

fn residual(smoothed: Option<f64>, target: Option<f64>) -> Option<f64> {
    match (smoothed, target) {
        (Some(s), Some(t)) => Some((t - s).abs()),
        _ => None,
    }
}

/// Drop stations whose observation disagrees with their peers within 20 nm:
/// a low/high visibility split of more than 5 nm, or a QNH gap over 10 hPa.
pub(crate) fn filter_consistent(observations: &[StationObservation]) -> Vec<StationObservation> {
    if observations.len() <= 1 {
        return observations.to_vec();
    }

    let mut kept = Vec::with_capacity(observations.len());
    let mut rejected: Vec<String> = Vec::new();

    for candidate in observations {
        if !candidate.metar.valid {
            kept.push(candidate.clone());
            continue;
        }

        let peers: Vec<&StationObservation> = observations
            .iter()
            .filter(|o| {
                o.icao != candidate.icao && o.distance_nm <= PEER_RADIUS_NM && o.metar.valid
            })
            .collect();
        if peers.is_empty() {
            kept.push(candidate.clone());
            continue;
        }

        if let Some(vis) = candidate.metar.visibility_nm
            && let Some(avg) = mean(peers.iter().filter_map(|o| o.metar.visibility_nm))
        {
            let split = (vis < LOW_VISIBILITY_NM && avg > HIGH_VISIBILITY_NM)
                || (vis > HIGH_VISIBILITY_NM && avg < LOW_VISIBILITY_NM);
            if (vis - avg).abs() > PEER_VISIBILITY_DELTA_NM && split {
                info!(
                    icao = %candidate.icao,
                    "Skipping station: inconsistent visibility ({vis:.1}nm vs nearby avg {avg:.1}nm)"
                );
                rejected.push(candidate.icao.clone());
                continue;
            }
        }

        if let Some(qnh) = candidate.metar.qnh_hpa
            && let Some(avg) = mean(peers.iter().filter_map(|o| o.metar.qnh_hpa))
            && (qnh - avg).abs() > PEER_QNH_DELTA_HPA
            && candidate.distance_nm <= PEER_RADIUS_NM
        {
            info!(
                icao = %candidate.icao,
                "Skipping station: inconsistent QNH ({qnh:.1}hPa vs nearby avg {avg:.1}hPa)"
            );
            rejected.push(candidate.icao.clone());
            continue;
        }

        kept.push(candidate.clone());
    }

    if !rejected.is_empty() {
        info!(
            "Filtered out {} inconsistent station(s): {}",
            rejected.len(),
            rejected.join(", ")
        );
    }

    kept
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let mut sum = 0.0;
    let mut count = 0usize;
    for value in values {
        sum += value;
        count += 1;
    }
    (count > 0).then(|| sum / count as f64)
}

/// Canonical METAR from a station's raw parsed values, for multi-station
/// dispatch. Format: `ICAO METAR DDHHMMZ wind vis [weather] clouds
/// temp/dew Q####`.
pub fn metar_from_parsed(parsed: &ParsedMetar, icao: &str, at: &Zoned) -> String {
    build_metar(
        icao,
        at,
        parsed.wind_dir_deg.map(f64::from),
        parsed.wind_speed_kt,
        parsed.wind_gust_kt,
        parsed.visibility_nm,
        &parsed.weather_tokens,
        &parsed.clouds,
        parsed.temperature_c,
        parsed.dewpoint_c,
        parsed.qnh_hpa,
    )
}

/// Canonical METAR from the smoothed state, for the single-injection
/// fallback path.
pub fn metar_from_state(state: &WeatherState, icao: &str, at: &Zoned) -> String {
    build_metar(
        icao,
        at,
        state.wind_dir_deg,
        state.wind_speed_kt,
        state.wind_gust_kt,
        state.visibility_nm,
        &state.weather_tokens,
        &state.clouds,
        state.temperature_c,
        state.dewpoint_c,
        state.qnh_hpa,
    )
}

#[allow(clippy::too_many_arguments)]
fn build_metar(
    icao: &str,
    at: &Zoned,
    wind_dir_deg: Option<f64>,
    wind_speed_kt: Option<f64>,
    wind_gust_kt: Option<f64>,
    visibility_nm: Option<f64>,
    weather_tokens: &[WeatherCode],
    clouds: &[CloudLayer],
    temperature_c: Option<f64>,
    dewpoint_c: Option<f64>,
    qnh_hpa: Option<f64>,
) -> String {
    let mut parts: Vec<String> = vec![
        icao.to_ascii_uppercase(),
        "METAR".to_string(),
        at.strftime("%d%H%MZ").to_string(),
    ];

    parts.push(wind_token(wind_dir_deg, wind_speed_kt, wind_gust_kt));
    parts.push(visibility_token(visibility_nm));
    parts.extend(weather_tokens.iter().take(2).map(|t| t.code().to_string()));
    parts.extend(cloud_tokens(clouds));
    if let Some(token) = temperature_token(temperature_c, dewpoint_c) {
        parts.push(token);
    }
    parts.push(qnh_token(qnh_hpa, icao));

    parts.join(" ")
}

fn wind_token(dir_deg: Option<f64>, speed_kt: Option<f64>, gust_kt: Option<f64>) -> String {
    let (Some(dir), Some(speed)) = (dir_deg, speed_kt) else {
        return "00000KT".to_string();
    };

    let mut dir = (dir as i64).rem_euclid(360);
    let speed_whole = speed as i64;
    if speed_whole == 0 {
        return "00000KT".to_string();
    }
    // The simulator reads 000° with wind as ambiguous; force a real heading
    // for anything at 10 kt or more.
    if speed_whole >= 10 && dir == 0 {
        dir = 90;
    }

    match gust_kt {
        Some(gust) if gust > speed => {
            format!("{dir:03}{speed_whole:02}G{:02}KT", gust as i64)
        }
        _ => format!("{dir:03}{speed_whole:02}KT"),
    }
}

fn visibility_token(visibility_nm: Option<f64>) -> String {
    let Some(vis_nm) = visibility_nm else {
        return "9999".to_string();
    };
    let vis_m = (vis_nm * METERS_PER_NM).max(400.0);
    if vis_m >= 10_000.0 {
        return "9999".to_string();
    }
    let snapped = VISIBILITY_STEPS_M
        .iter()
        .copied()
        .find(|step| vis_m >= f64::from(*step))
        .unwrap_or(400);
    format!("{snapped:04}")
}

fn cloud_tokens(clouds: &[CloudLayer]) -> Vec<String> {
    if clouds.is_empty() {
        return vec!["SKC".to_string()];
    }
    clouds
        .iter()
        .take(3)
        .map(|layer| {
            let base = (layer.base_ft / 100).max(MIN_CLOUD_BASE_CODE);
            let coverage = match layer.coverage {
                CloudCoverage::Few => "FEW",
                CloudCoverage::Scattered => "SCT",
                CloudCoverage::Broken => "BKN",
                CloudCoverage::Overcast => "OVC",
                CloudCoverage::Clear => "SKC",
                // No vertical-visibility group on the write side; call it
                // scattered and keep the base.
                CloudCoverage::VerticalVisibility => "SCT",
            };
            format!("{coverage}{base:03}")
        })
        .collect()
}

fn temperature_token(temperature_c: Option<f64>, dewpoint_c: Option<f64>) -> Option<String> {
    let temperature = temperature_c? as i64;
    let dewpoint = dewpoint_c.map_or(temperature - 5, |d| d as i64);
    Some(format!("{temperature:02}/{dewpoint:02}"))
}

fn qnh_token(qnh_hpa: Option<f64>, icao: &str) -> String {
    let Some(mut qnh) = qnh_hpa else {
        return "Q1013".to_string();
    };
    if !QNH_VALID_RANGE.contains(&qnh) {
        warn!(%icao, "QNH {qnh:.1} hPa out of range, replacing with 1013");
        qnh = QNH_FALLBACK_HPA;
    }
    format!("Q{:04}", qnh.round() as i64)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use jiff::civil::date;
    use wx_decoder::parse_metar;

    use super::*;
    use crate::bridge::{AircraftState, BridgeError, DevBridge, SimulatorBridge};

    fn stamp() -> Zoned {
        date(2026, 3, 12)
            .at(12, 0, 0, 0)
            .to_zoned(TimeZone::UTC)
            .unwrap()
    }

    fn state(wind_dir: f64, wind_speed: f64, qnh: f64) -> WeatherState {
        WeatherState {
            wind_dir_deg: Some(wind_dir),
            wind_speed_kt: Some(wind_speed),
            qnh_hpa: Some(qnh),
            visibility_nm: Some(10.0),
            ..WeatherState::default()
        }
    }

    fn observation(icao: &str, raw: &str, distance_nm: f64) -> StationObservation {
        StationObservation {
            icao: icao.to_string(),
            metar: parse_metar(raw).unwrap(),
            distance_nm,
        }
    }

    #[test]
    fn weather_changed_is_false_on_itself() {
        let s = state(120.0, 15.0, 1013.0);
        assert!(!weather_changed(Some(&s), &s));
    }

    #[test]
    fn weather_changed_thresholds() {
        let base = state(120.0, 15.0, 1013.0);

        let mut nudged = base.clone();
        nudged.wind_speed_kt = Some(16.5);
        assert!(!weather_changed(Some(&base), &nudged));

        nudged.wind_speed_kt = Some(17.5);
        assert!(weather_changed(Some(&base), &nudged));

        let mut dir = base.clone();
        // 358 -> shortest arc from 120 is well past 5°.
        dir.wind_dir_deg = Some(358.0);
        assert!(weather_changed(Some(&base), &dir));

        let mut qnh = base.clone();
        qnh.qnh_hpa = Some(1013.4);
        assert!(!weather_changed(Some(&base), &qnh));
        qnh.qnh_hpa = Some(1014.0);
        assert!(weather_changed(Some(&base), &qnh));
    }

    #[test]
    fn weather_changed_on_presence_flip() {
        let base = state(120.0, 15.0, 1013.0);
        let mut gone = base.clone();
        gone.qnh_hpa = None;
        assert!(weather_changed(Some(&base), &gone));
        assert!(weather_changed(None, &base));
    }

    #[test]
    fn weather_changed_on_token_set_change() {
        let base = state(120.0, 15.0, 1013.0);
        let mut wet = base.clone();
        wet.weather_tokens = vec![WeatherCode::RA];
        assert!(weather_changed(Some(&base), &wet));
        // Order does not matter, only the set.
        let mut reordered = wet.clone();
        reordered.weather_tokens = vec![WeatherCode::RA];
        assert!(!weather_changed(Some(&wet), &reordered));
    }

    #[test]
    fn synthesis_matches_the_canonical_shape() {
        let parsed = parse_metar("METAR KJFK 121200Z 12015KT 10SM FEW020 12/08 A2992").unwrap();
        let metar = metar_from_parsed(&parsed, "KJFK", &stamp());
        assert!(metar.starts_with("KJFK METAR 121200Z "), "{metar}");
        assert!(metar.contains("12015KT"), "{metar}");
        assert!(metar.contains("9999"), "{metar}");
        assert!(metar.contains("FEW020"), "{metar}");
        assert!(metar.contains("12/08"), "{metar}");
        assert!(metar.ends_with("Q1013"), "{metar}");
    }

    #[test]
    fn wind_token_rules() {
        assert_eq!(wind_token(Some(120.0), Some(0.0), None), "00000KT");
        assert_eq!(wind_token(None, Some(15.0), None), "00000KT");
        // Direction 000 with real wind is forced off north.
        assert_eq!(wind_token(Some(0.0), Some(15.0), None), "09015KT");
        // Below 10 kt the zero heading is left alone.
        assert_eq!(wind_token(Some(0.0), Some(5.0), None), "00005KT");
        // Gusts only when above the sustained speed.
        assert_eq!(wind_token(Some(240.0), Some(12.0), Some(22.0)), "24012G22KT");
        assert_eq!(wind_token(Some(240.0), Some(12.0), Some(10.0)), "24012KT");
    }

    #[test]
    fn visibility_snaps_to_icao_steps() {
        assert_eq!(visibility_token(None), "9999");
        assert_eq!(visibility_token(Some(10.0)), "9999");
        assert_eq!(visibility_token(Some(2.0)), "3000");
        assert_eq!(visibility_token(Some(0.5)), "0800");
        assert_eq!(visibility_token(Some(0.05)), "0400");
    }

    #[test]
    fn cloud_tokens_enforce_a_floor() {
        let layers = [
            CloudLayer {
                coverage: CloudCoverage::Few,
                base_ft: 300,
            },
            CloudLayer {
                coverage: CloudCoverage::Broken,
                base_ft: 4000,
            },
        ];
        assert_eq!(cloud_tokens(&layers), ["FEW005", "BKN040"]);
        assert_eq!(cloud_tokens(&[]), ["SKC"]);
    }

    #[test]
    fn qnh_out_of_range_is_replaced() {
        assert_eq!(qnh_token(Some(1200.0), "KJFK"), "Q1013");
        assert_eq!(qnh_token(Some(860.0), "KJFK"), "Q1013");
        assert_eq!(qnh_token(None, "KJFK"), "Q1013");
        assert_eq!(qnh_token(Some(998.4), "KJFK"), "Q0998");
    }

    #[test]
    fn synthesis_round_trips_through_the_parser() {
        let original =
            parse_metar("METAR KJFK 121200Z 12015G25KT 10SM RA BKN040 OVC060 12/08 Q1013").unwrap();
        let synthesized = metar_from_parsed(&original, "KJFK", &stamp());
        let reparsed = parse_metar(&synthesized).unwrap();

        assert!(reparsed.valid, "{synthesized}");
        assert_eq!(reparsed.icao, original.icao);
        assert_eq!(reparsed.wind_dir_deg, original.wind_dir_deg);
        assert_eq!(
            reparsed.wind_speed_kt.map(|s| s as i64),
            original.wind_speed_kt.map(|s| s as i64)
        );
        assert_eq!(
            reparsed.qnh_hpa.map(|q| q.round() as i64),
            original.qnh_hpa.map(|q| q.round() as i64)
        );
        assert_eq!(reparsed.clouds, original.clouds);
    }

    #[test]
    #[tracing_test::traced_test]
    fn consistency_filter_drops_the_odd_station_out() {
        let observations = [
            observation("AAAA", "AAAA 121200Z 12010KT 9999 FEW020 12/08 Q1013", 5.0),
            observation("BBBB", "BBBB 121200Z 12010KT 0400 FG 12/08 Q1013", 9.0),
            observation("CCCC", "CCCC 121200Z 12012KT 9999 FEW025 12/07 Q1014", 14.0),
        ];
        let kept = filter_consistent(&observations);
        let icaos: Vec<&str> = kept.iter().map(|o| o.icao.as_str()).collect();
        assert_eq!(icaos, ["AAAA", "CCCC"]);
        assert!(logs_contain("inconsistent visibility"));
        assert!(logs_contain("Filtered out 1 inconsistent station(s)"));
    }

    #[test]
    fn consistency_filter_rejects_qnh_outliers() {
        let observations = [
            observation("AAAA", "AAAA 121200Z 12010KT 9999 FEW020 12/08 Q1013", 5.0),
            observation("BBBB", "BBBB 121200Z 12010KT 9999 FEW020 12/08 Q0990", 9.0),
            observation("CCCC", "CCCC 121200Z 12012KT 9999 FEW025 12/07 Q1014", 14.0),
        ];
        let kept = filter_consistent(&observations);
        let icaos: Vec<&str> = kept.iter().map(|o| o.icao.as_str()).collect();
        assert_eq!(icaos, ["AAAA", "CCCC"]);
    }

    #[test]
    fn single_station_is_never_filtered() {
        let observations =
            [observation("AAAA", "AAAA 121200Z 12010KT 0400 FG 12/08 Q1013", 5.0)];
        assert_eq!(filter_consistent(&observations).len(), 1);
    }

    #[test]
    fn gating_holds_the_interval_floor() {
        let mut controller = InjectionController::new();
        let smoothing = SmoothingConfig {
            transition_mode: TransitionMode::StepLimited,
            ..SmoothingConfig::default()
        };
        let refresh = Duration::from_secs(10);
        let now = Instant::now();
        let settled = state(120.0, 15.0, 1013.0);
        let target = CombinedWeather {
            wind_dir_deg: Some(120.0),
            wind_speed_kt: Some(15.0),
            qnh_hpa: Some(1013.0),
            visibility_nm: Some(10.0),
            ..CombinedWeather::default()
        };

        // Nothing injected yet: a changed state goes out immediately.
        assert!(controller.should_inject(&settled, &target, &smoothing, refresh, now));
        controller.record_success(settled.clone(), now);

        // A clearly changed state still has to wait out the interval.
        let mut shifted = settled.clone();
        shifted.wind_speed_kt = Some(25.0);
        let mut shifted_target = target.clone();
        shifted_target.wind_speed_kt = Some(25.0);
        assert!(!controller.should_inject(
            &shifted,
            &shifted_target,
            &smoothing,
            refresh,
            now + Duration::from_secs(5)
        ));
        assert!(controller.should_inject(
            &shifted,
            &shifted_target,
            &smoothing,
            refresh,
            now + Duration::from_secs(11)
        ));
    }

    #[test]
    fn unchanged_weather_is_not_reinjected() {
        let mut controller = InjectionController::new();
        let smoothing = SmoothingConfig {
            transition_mode: TransitionMode::StepLimited,
            ..SmoothingConfig::default()
        };
        let refresh = Duration::from_secs(10);
        let now = Instant::now();
        let settled = state(120.0, 15.0, 1013.0);
        let target = CombinedWeather {
            wind_dir_deg: Some(120.0),
            wind_speed_kt: Some(15.0),
            qnh_hpa: Some(1013.0),
            visibility_nm: Some(10.0),
            ..CombinedWeather::default()
        };

        controller.record_success(settled.clone(), now);
        assert!(!controller.should_inject(
            &settled,
            &target,
            &smoothing,
            refresh,
            now + Duration::from_secs(3600)
        ));
    }

    #[test]
    fn big_change_uses_the_thirty_second_interval() {
        let mut controller = InjectionController::new();
        let smoothing = SmoothingConfig {
            transition_mode: TransitionMode::StepLimited,
            ..SmoothingConfig::default()
        };
        let refresh = Duration::from_secs(60);
        let now = Instant::now();

        let mut transitioning = state(120.0, 20.0, 1013.0);
        transitioning.is_big_change = true;
        let target = CombinedWeather {
            wind_dir_deg: Some(300.0),
            wind_speed_kt: Some(35.0),
            qnh_hpa: Some(1008.0),
            visibility_nm: Some(10.0),
            ..CombinedWeather::default()
        };

        controller.record_success(transitioning.clone(), now);
        // 30 s beats the 60 s refresh interval while transitioning.
        assert!(!controller.should_inject(
            &transitioning,
            &target,
            &smoothing,
            refresh,
            now + Duration::from_secs(20)
        ));
        assert!(controller.should_inject(
            &transitioning,
            &target,
            &smoothing,
            refresh,
            now + Duration::from_secs(31)
        ));
    }

    struct RecordingBridge {
        writes: Arc<Mutex<Vec<String>>>,
    }

    impl SimulatorBridge for RecordingBridge {
        fn is_connected(&mut self) -> bool {
            true
        }

        fn reconnect(&mut self) -> bool {
            true
        }

        fn aircraft_state(&mut self) -> Option<AircraftState> {
            None
        }

        fn write_metar(&mut self, metar: &str) -> Result<(), BridgeError> {
            self.writes.lock().unwrap().push(metar[..4].to_string());
            Ok(())
        }
    }

    fn recording_bridge() -> (BridgeHandle, Arc<Mutex<Vec<String>>>) {
        let writes = Arc::new(Mutex::new(Vec::new()));
        let bridge = BridgeHandle::new(Box::new(RecordingBridge {
            writes: Arc::clone(&writes),
        }));
        (bridge, writes)
    }

    fn three_observations() -> [StationObservation; 3] {
        [
            observation("CCCC", "CCCC 121200Z 12012KT 9999 FEW025 12/07 Q1014", 18.0),
            observation("AAAA", "AAAA 121200Z 12010KT 9999 FEW020 12/08 Q1013", 5.0),
            observation("BBBB", "BBBB 121200Z 12011KT 9999 FEW022 12/08 Q1013", 12.0),
        ]
    }

    #[tokio::test]
    async fn dispatch_preserves_ascending_distance_order() {
        let mut controller = InjectionController::new();
        let (mut bridge, writes) = recording_bridge();
        let smoothed = state(120.0, 11.0, 1013.0);

        let ok = controller
            .dispatch_stations(
                &mut bridge,
                &three_observations(),
                3,
                &smoothed,
                Instant::now(),
            )
            .await;
        assert!(ok);
        assert_eq!(*writes.lock().unwrap(), ["AAAA", "BBBB", "CCCC"]);
        assert_eq!(controller.last_injection_success(), Some(true));
        assert!(controller.last_injection_time().is_some());
    }

    #[tokio::test]
    async fn dispatch_respects_max_stations() {
        let mut controller = InjectionController::new();
        let (mut bridge, writes) = recording_bridge();
        let smoothed = state(120.0, 11.0, 1013.0);

        let ok = controller
            .dispatch_stations(
                &mut bridge,
                &three_observations(),
                2,
                &smoothed,
                Instant::now(),
            )
            .await;
        assert!(ok);
        assert_eq!(*writes.lock().unwrap(), ["AAAA", "BBBB"]);
    }

    #[tokio::test]
    async fn single_dispatch_writes_the_smoothed_state() {
        let mut controller = InjectionController::new();
        let mut bridge = BridgeHandle::new(Box::new(DevBridge::new()));
        let smoothed = state(120.0, 15.0, 1013.0);

        let ok = controller
            .dispatch_single(&mut bridge, &smoothed, "GLOB", Instant::now())
            .await;
        assert!(ok);
        assert_eq!(controller.last_injection_success(), Some(true));
    }

    #[tokio::test]
    async fn failed_writes_record_a_failure_without_rollback() {
        struct RejectingBridge;
        impl SimulatorBridge for RejectingBridge {
            fn is_connected(&mut self) -> bool {
                true
            }
            fn reconnect(&mut self) -> bool {
                true
            }
            fn aircraft_state(&mut self) -> Option<AircraftState> {
                None
            }
            fn write_metar(&mut self, _metar: &str) -> Result<(), BridgeError> {
                Err(BridgeError::WriteRejected("offset write failed".into()))
            }
        }

        let mut controller = InjectionController::new();
        let mut bridge = BridgeHandle::new(Box::new(RejectingBridge));
        let smoothed = state(120.0, 15.0, 1013.0);
        let before = controller.last_injection_time();

        let ok = controller
            .dispatch_single(&mut bridge, &smoothed, "GLOB", Instant::now())
            .await;
        assert!(!ok);
        assert_eq!(controller.last_injection_success(), Some(false));
        assert_eq!(controller.last_injection_time(), before);
    }
}
