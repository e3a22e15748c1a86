use serde::Serialize;
use tracing::info;
use wx_decoder::{cloud::CloudLayer, weather::WeatherCode};

use crate::{
    combiner::CombinedWeather,
    config::{SmoothingConfig, TransitionMode},
    util::{angle_delta_deg, normalize_heading_deg, shortest_arc_deg},
};

/// Rate escalation in step_limited mode. Empirically tuned: big changes run
/// ten times the configured caps, very big changes fifty times.
const BIG_CHANGE_RATE_BOOST: f64 = 10.0;
const VERY_BIG_CHANGE_RATE_BOOST: f64 = 50.0;

const VERY_BIG_WIND_SPEED_DELTA_KT: f64 = 20.0;
const VERY_BIG_VISIBILITY_DELTA_NM: f64 = 10.0;

const BIG_CHANGE_VISIBILITY_DELTA_NM: f64 = 5.0;
const LOW_VISIBILITY_NM: f64 = 1.0;
const HIGH_VISIBILITY_NM: f64 = 5.0;

const METERS_PER_NM: f64 = 1852.0;

/// The published weather state: what the simulator was last steered toward.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WeatherState {
    pub wind_dir_deg: Option<f64>,
    pub wind_speed_kt: Option<f64>,
    pub wind_gust_kt: Option<f64>,
    pub visibility_nm: Option<f64>,
    pub temperature_c: Option<f64>,
    pub dewpoint_c: Option<f64>,
    pub qnh_hpa: Option<f64>,
    pub clouds: Vec<CloudLayer>,
    pub weather_tokens: Vec<WeatherCode>,
    /// Still transitioning through a big / very big change; the controller
    /// shortens its injection cadence while these hold.
    pub is_big_change: bool,
    pub is_very_big_change: bool,
}

struct RateLimits {
    wind_dir_deg: f64,
    wind_speed_kt: f64,
    qnh_hpa: f64,
    visibility_nm: f64,
}

/// Stateful transducer from a target sample to the published state. Owns the
/// one mutable `WeatherState` and the altitude-driven freeze flag.
pub struct WeatherSmoother {
    config: SmoothingConfig,
    current: WeatherState,
    frozen: bool,
}

impl WeatherSmoother {
    pub fn new(config: SmoothingConfig) -> Self {
        Self {
            config,
            current: WeatherState::default(),
            frozen: false,
        }
    }

    #[allow(dead_code)] // used in tests
    pub fn current(&self) -> &WeatherState {
        &self.current
    }

    /// Below the approach-freeze altitude the published state holds still so
    /// short-final weather does not shift under the aircraft.
    pub fn set_freeze_altitude(&mut self, altitude_ft: f64) {
        self.frozen = altitude_ft < self.config.approach_freeze_alt_ft;
    }

    /// Advance the published state one cycle toward `target`.
    pub fn smooth(
        &mut self,
        target: &CombinedWeather,
        aircraft_alt_ft: Option<f64>,
    ) -> WeatherState {
        if let Some(alt) = aircraft_alt_ft {
            self.set_freeze_altitude(alt);
        }

        if self.frozen {
            // The freeze must not wedge initialisation, and a big change is
            // worth showing even on approach.
            if self.is_initialised() && !self.is_big_change(target) {
                return self.current.clone();
            }
            self.frozen = false;
        }

        let is_big_change = self.is_big_change(target);
        let is_very_big_change = self.is_very_big_change(target);
        let limits = self.rate_limits(is_big_change, is_very_big_change);

        let mut smoothed = WeatherState {
            wind_dir_deg: smooth_direction(
                self.current.wind_dir_deg,
                target.wind_dir_deg,
                limits.wind_dir_deg,
            ),
            wind_speed_kt: smooth_value(
                self.current.wind_speed_kt,
                target.wind_speed_kt,
                limits.wind_speed_kt,
            ),
            wind_gust_kt: smooth_value(
                self.current.wind_gust_kt,
                target.wind_gust_kt,
                limits.wind_speed_kt,
            ),
            qnh_hpa: smooth_value(self.current.qnh_hpa, target.qnh_hpa, limits.qnh_hpa),
            visibility_nm: smooth_value(
                self.current.visibility_nm,
                target.visibility_nm,
                limits.visibility_nm,
            ),
            // Temperature, dewpoint, clouds and weather follow the target
            // instantly.
            temperature_c: target.temperature_c,
            dewpoint_c: target.dewpoint_c,
            clouds: target.clouds.clone(),
            weather_tokens: target.weather_tokens.clone(),
            is_big_change: false,
            is_very_big_change: false,
        };

        // Re-evaluate against the target: the flags mean "still far away",
        // not "a big change happened at some point".
        let still_very_big = is_very_big_change
            && (residual_over(smoothed.wind_speed_kt, target.wind_speed_kt, 5.0)
                || residual_over(smoothed.visibility_nm, target.visibility_nm, 2.0)
                || direction_residual_over(smoothed.wind_dir_deg, target.wind_dir_deg, 30.0));
        let still_big = is_big_change
            && !still_very_big
            && (residual_over(smoothed.wind_speed_kt, target.wind_speed_kt, 3.0)
                || residual_over(smoothed.visibility_nm, target.visibility_nm, 1.0)
                || direction_residual_over(smoothed.wind_dir_deg, target.wind_dir_deg, 15.0));
        smoothed.is_big_change = still_big;
        smoothed.is_very_big_change = still_very_big;

        self.current = smoothed.clone();
        smoothed
    }

    fn is_initialised(&self) -> bool {
        self.current.wind_dir_deg.is_some()
            && self.current.wind_speed_kt.is_some()
            && self.current.qnh_hpa.is_some()
    }

    /// A target far enough from the current state to break the freeze and
    /// escalate the transition rate.
    fn is_big_change(&self, target: &CombinedWeather) -> bool {
        if !self.is_initialised() {
            return true;
        }

        if let (Some(current), Some(target)) = (self.current.wind_dir_deg, target.wind_dir_deg)
            && angle_delta_deg(current, target) > self.config.big_change_wind_deg
        {
            return true;
        }

        if delta_over(
            self.current.wind_speed_kt,
            target.wind_speed_kt,
            self.config.big_change_wind_speed_kt,
        ) || delta_over(
            self.current.qnh_hpa,
            target.qnh_hpa,
            self.config.big_change_qnh_hpa,
        ) {
            return true;
        }

        if let (Some(current), Some(target)) = (self.current.visibility_nm, target.visibility_nm) {
            let crossing = (current < LOW_VISIBILITY_NM && target > HIGH_VISIBILITY_NM)
                || (current > HIGH_VISIBILITY_NM && target < LOW_VISIBILITY_NM);
            if (target - current).abs() > BIG_CHANGE_VISIBILITY_DELTA_NM || crossing {
                return true;
            }
        }

        // Cloud topology: appearing or vanishing cover counts when the side
        // that has clouds carries a BKN/OVC layer.
        let current_has = !self.current.clouds.is_empty();
        let target_has = !target.clouds.is_empty();
        if current_has != target_has {
            let side = if current_has {
                &self.current.clouds
            } else {
                &target.clouds
            };
            if side.iter().any(|layer| layer.coverage.is_ceiling()) {
                return true;
            }
        }

        false
    }

    fn is_very_big_change(&self, target: &CombinedWeather) -> bool {
        delta_over(
            self.current.wind_speed_kt,
            target.wind_speed_kt,
            VERY_BIG_WIND_SPEED_DELTA_KT,
        ) || delta_over(
            self.current.visibility_nm,
            target.visibility_nm,
            VERY_BIG_VISIBILITY_DELTA_NM,
        )
    }

    fn rate_limits(&self, is_big_change: bool, is_very_big_change: bool) -> RateLimits {
        match self.config.transition_mode {
            TransitionMode::TimeBased => {
                let limits = RateLimits {
                    wind_dir_deg: self.config.wind_dir_step_deg,
                    wind_speed_kt: self.config.wind_speed_step_kt,
                    qnh_hpa: self.config.qnh_step_hpa,
                    visibility_nm: self.config.visibility_step_m / METERS_PER_NM,
                };
                if is_big_change || is_very_big_change {
                    info!(
                        "Time-based transition: wind={:.1}kt, vis={:.0}m, dir={:.1}° per {:.0}s interval",
                        limits.wind_speed_kt,
                        self.config.visibility_step_m,
                        limits.wind_dir_deg,
                        self.config.transition_interval_seconds,
                    );
                }
                limits
            }
            TransitionMode::StepLimited => {
                let boost = if is_very_big_change {
                    info!("Very large weather change detected - using near-instant smoothing");
                    VERY_BIG_CHANGE_RATE_BOOST
                } else if is_big_change {
                    info!("Big weather change detected - using faster smoothing");
                    BIG_CHANGE_RATE_BOOST
                } else {
                    1.0
                };
                RateLimits {
                    wind_dir_deg: self.config.max_wind_dir_change_deg * boost,
                    wind_speed_kt: self.config.max_wind_speed_change_kt * boost,
                    qnh_hpa: self.config.max_qnh_change_hpa * boost,
                    visibility_nm: self.config.max_visibility_change_nm * boost,
                }
            }
        }
    }
}

/// Move `current` toward `target` by at most `max_change`. Absent current
/// adopts the target; absent target keeps the current value.
fn smooth_value(current: Option<f64>, target: Option<f64>, max_change: f64) -> Option<f64> {
    match (current, target) {
        (_, None) => current,
        (None, Some(target)) => Some(target),
        (Some(current), Some(target)) => {
            let diff = (target - current).clamp(-max_change, max_change);
            Some(current + diff)
        }
    }
}

/// Shortest-arc direction smoothing: the path from 350° to 10° runs through
/// north, never backwards around the compass.
fn smooth_direction(current: Option<f64>, target: Option<f64>, max_change: f64) -> Option<f64> {
    match (current, target) {
        (_, None) => current,
        (None, Some(target)) => Some(target),
        (Some(current), Some(target)) => {
            let diff = shortest_arc_deg(current, target).clamp(-max_change, max_change);
            Some(normalize_heading_deg(current + diff))
        }
    }
}

fn delta_over(current: Option<f64>, target: Option<f64>, threshold: f64) -> bool {
    matches!((current, target), (Some(c), Some(t)) if (t - c).abs() > threshold)
}

fn residual_over(smoothed: Option<f64>, target: Option<f64>, threshold: f64) -> bool {
    delta_over(smoothed, target, threshold)
}

fn direction_residual_over(smoothed: Option<f64>, target: Option<f64>, threshold: f64) -> bool {
    matches!(
        (smoothed, target),
        (Some(s), Some(t)) if angle_delta_deg(s, t) > threshold
    )
}
