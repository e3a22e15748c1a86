use indexmap::IndexSet;

use crate::combiner::{CombinedWeather, SampleSource};

/// Distance weight: inverse square with a small epsilon so a station under
/// the aircraft does not swamp the division.
fn weight_for(distance_nm: f64) -> f64 {
    1.0 / (distance_nm + 0.1).powi(2)
}

/// Distance-weighted blend across stations, used for the status snapshot
/// only; injection always dispatches raw per-station observations.
///
/// Scalars blend by weighted mean over the stations that carry the value;
/// wind direction blends as a weighted circular mean; clouds come verbatim
/// from the nearest station; weather tokens are the union.
pub fn blend_stations(samples: &[(f64, CombinedWeather)]) -> Option<CombinedWeather> {
    if samples.is_empty() {
        return None;
    }

    let total_weight: f64 = samples.iter().map(|(d, _)| weight_for(*d)).sum();
    if total_weight == 0.0 {
        return None;
    }

    let weighted: Vec<(f64, &CombinedWeather)> = samples
        .iter()
        .map(|(d, w)| (weight_for(*d) / total_weight, w))
        .collect();

    let mut blended = CombinedWeather {
        source: SampleSource::Blended,
        metar_used: weighted.iter().any(|(_, w)| w.metar_used),
        taf_used: weighted.iter().any(|(_, w)| w.taf_used),
        ..CombinedWeather::default()
    };

    blended.wind_dir_deg = circular_mean(
        weighted
            .iter()
            .filter_map(|(weight, w)| w.wind_dir_deg.map(|dir| (*weight, dir))),
    );
    blended.wind_speed_kt = weighted_mean(&weighted, |w| w.wind_speed_kt);
    blended.wind_gust_kt = weighted_mean(&weighted, |w| w.wind_gust_kt);
    blended.qnh_hpa = weighted_mean(&weighted, |w| w.qnh_hpa);
    blended.visibility_nm = weighted_mean(&weighted, |w| w.visibility_nm);
    blended.temperature_c = weighted_mean(&weighted, |w| w.temperature_c);
    blended.dewpoint_c = weighted_mean(&weighted, |w| w.dewpoint_c);

    // Clouds are too structured to interpolate; the nearest station's layers
    // stand for the whole picture.
    if let Some((_, nearest)) = samples
        .iter()
        .min_by(|(da, _), (db, _)| da.total_cmp(db))
    {
        blended.clouds = nearest.clouds.clone();
    }

    let tokens: IndexSet<_> = samples
        .iter()
        .flat_map(|(_, w)| w.weather_tokens.iter().copied())
        .collect();
    blended.weather_tokens = tokens.into_iter().collect();

    Some(blended)
}

/// Weighted mean over present values only. The weights of absent stations
/// are renormalised away.
fn weighted_mean(
    weighted: &[(f64, &CombinedWeather)],
    field: impl Fn(&CombinedWeather) -> Option<f64>,
) -> Option<f64> {
    let mut sum = 0.0;
    let mut weight_sum = 0.0;
    for (weight, sample) in weighted {
        if let Some(value) = field(sample) {
            sum += weight * value;
            weight_sum += weight;
        }
    }
    (weight_sum > 0.0).then(|| sum / weight_sum)
}

/// Weighted circular mean: `atan2(Σw sinθ, Σw cosθ)` folded into [0, 360).
fn circular_mean(directions: impl Iterator<Item = (f64, f64)>) -> Option<f64> {
    let mut sin_sum = 0.0;
    let mut cos_sum = 0.0;
    let mut any = false;
    for (weight, dir) in directions {
        sin_sum += weight * dir.to_radians().sin();
        cos_sum += weight * dir.to_radians().cos();
        any = true;
    }
    if !any || (sin_sum == 0.0 && cos_sum == 0.0) {
        return None;
    }
    Some(sin_sum.atan2(cos_sum).to_degrees().rem_euclid(360.0))
}
