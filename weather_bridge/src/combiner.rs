use serde::Serialize;
use wx_decoder::{
    cloud::CloudLayer, metar::ParsedMetar, taf::ParsedTaf, weather::WeatherCode,
};

use crate::config::{CombineMode, WeatherCombiningConfig};

/// Where a combined sample's fields came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleSource {
    MetarOnly,
    Metar,
    MetarStale,
    TafFallback,
    Blended,
    #[default]
    None,
}

/// The target weather sample handed to the smoother, and the shape the
/// blender produces for status.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CombinedWeather {
    pub wind_dir_deg: Option<f64>,
    pub wind_speed_kt: Option<f64>,
    pub wind_gust_kt: Option<f64>,
    pub visibility_nm: Option<f64>,
    pub temperature_c: Option<f64>,
    pub dewpoint_c: Option<f64>,
    pub qnh_hpa: Option<f64>,
    pub clouds: Vec<CloudLayer>,
    pub weather_tokens: Vec<WeatherCode>,
    pub source: SampleSource,
    pub metar_used: bool,
    pub taf_used: bool,
}

/// Fuse one station's METAR and TAF according to the combining mode.
pub fn combine_weather(
    metar: Option<&ParsedMetar>,
    taf: Option<&ParsedTaf>,
    config: &WeatherCombiningConfig,
    metar_age_seconds: Option<f64>,
) -> CombinedWeather {
    let mut combined = CombinedWeather::default();
    let metar = metar.filter(|m| m.valid);
    let taf = taf.filter(|t| t.valid);

    match config.mode {
        CombineMode::MetarOnly => {
            if let Some(metar) = metar {
                apply_metar(&mut combined, metar);
                combined.source = SampleSource::MetarOnly;
                combined.metar_used = true;
            }
        }
        CombineMode::MetarTafFallback => {
            let metar_stale = metar_age_seconds
                .is_some_and(|age| age > config.taf_fallback_stale_seconds as f64);

            if let Some(metar) = metar.filter(|_| !metar_stale) {
                apply_metar(&mut combined, metar);
                combined.source = SampleSource::Metar;
                combined.metar_used = true;
            } else if let Some(taf) = taf {
                apply_taf_prevailing(&mut combined, taf);
                combined.source = SampleSource::TafFallback;
                combined.taf_used = true;
            } else if let Some(metar) = metar {
                // Stale METAR beats nothing at all.
                apply_metar(&mut combined, metar);
                combined.source = SampleSource::MetarStale;
                combined.metar_used = true;
            }
        }
        CombineMode::MetarTafAssist => {
            if let Some(metar) = metar {
                apply_metar(&mut combined, metar);
                combined.source = SampleSource::Metar;
                combined.metar_used = true;
                // The TAF guides transitions but never overwrites fields.
                combined.taf_used = taf.is_some();
            } else if let Some(taf) = taf {
                apply_taf_prevailing(&mut combined, taf);
                combined.source = SampleSource::TafFallback;
                combined.taf_used = true;
            }
        }
    }

    combined
}

fn apply_metar(combined: &mut CombinedWeather, metar: &ParsedMetar) {
    combined.wind_dir_deg = metar.wind_dir_deg.map(f64::from);
    combined.wind_speed_kt = metar.wind_speed_kt;
    combined.wind_gust_kt = metar.wind_gust_kt;
    combined.visibility_nm = metar.visibility_nm;
    combined.temperature_c = metar.temperature_c;
    combined.dewpoint_c = metar.dewpoint_c;
    combined.qnh_hpa = metar.qnh_hpa;
    combined.clouds = metar.clouds.clone();
    combined.weather_tokens = metar.weather_tokens.clone();
}

fn apply_taf_prevailing(combined: &mut CombinedWeather, taf: &ParsedTaf) {
    let prevailing = &taf.prevailing;
    combined.wind_dir_deg = prevailing.wind_dir_deg.map(f64::from);
    combined.wind_speed_kt = prevailing.wind_speed_kt;
    combined.wind_gust_kt = prevailing.wind_gust_kt;
    combined.visibility_nm = prevailing.visibility_nm;
    combined.clouds = prevailing.clouds.clone();
    combined.weather_tokens = prevailing.weather_tokens.clone();
}
