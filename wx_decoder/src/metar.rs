use std::str::FromStr;

use nom::{
    IResult, Parser,
    bytes::complete::{tag, take},
    character::complete::{char, u32},
    combinator::{all_consuming, map_parser, opt},
    sequence::{preceded, separated_pair},
};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::{
    cloud::{CloudLayer, nom_cloud_layer},
    weather::WeatherCode,
    wind::find_wind,
};

/// Conversion used when a report carries visibility in meters.
pub const METERS_TO_NM: f64 = 0.000_539_957;
/// Inches of mercury to hectopascals.
pub const INHG_TO_HPA: f64 = 33.8639;

const MIN_REPORT_LEN: usize = 10;
/// QNH outside this range is treated as a garbled group and discarded.
const QNH_PLAUSIBLE_HPA: std::ops::RangeInclusive<f64> = 870.0..=1080.0;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("report too short to decode ({0} chars)")]
    TooShort(usize),
}

/// A decoded METAR. Every field the report may omit is optional; `valid`
/// is derived: ICAO present, wind direction or speed present, QNH present.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParsedMetar {
    pub raw: String,
    pub icao: Option<String>,
    pub wind_dir_deg: Option<u16>,
    pub wind_speed_kt: Option<f64>,
    pub wind_gust_kt: Option<f64>,
    pub visibility_nm: Option<f64>,
    pub temperature_c: Option<f64>,
    pub dewpoint_c: Option<f64>,
    pub qnh_hpa: Option<f64>,
    pub altimeter_inhg: Option<f64>,
    pub clouds: Vec<CloudLayer>,
    pub weather_tokens: Vec<WeatherCode>,
    pub valid: bool,
}

impl FromStr for ParsedMetar {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_metar(s)
    }
}

/// Decode a METAR. This is a pragmatic token scanner, not an ICAO-compliant
/// parser: field order within the report is free and the first match wins
/// per field.
pub fn parse_metar(raw: &str) -> Result<ParsedMetar, ParseError> {
    let trimmed = raw.trim();
    if trimmed.len() < MIN_REPORT_LEN {
        return Err(ParseError::TooShort(trimmed.len()));
    }

    let mut metar = ParsedMetar {
        raw: raw.to_string(),
        ..ParsedMetar::default()
    };
    let tokens: Vec<&str> = trimmed.split_whitespace().collect();

    metar.icao = extract_icao(&tokens, "METAR");

    let wind = find_wind(&tokens);
    if let Some((_, wind)) = &wind {
        metar.wind_dir_deg = wind.dir_deg;
        metar.wind_speed_kt = Some(wind.speed_kt);
        metar.wind_gust_kt = wind.gust_kt;
    }

    let cavok = tokens.iter().any(|t| t.eq_ignore_ascii_case("CAVOK"));
    if cavok {
        // CAVOK: visibility at least 10 km, no significant clouds. Skip any
        // further visibility and cloud matching.
        metar.visibility_nm = Some(10.0);
        metar.clouds.clear();
    } else {
        // Visibility sits in the token right after the wind group: either a
        // 4-digit meters value or a statute-miles form.
        if let Some((wind_idx, _)) = wind
            && let Some(token) = tokens.get(wind_idx + 1)
        {
            metar.visibility_nm = parse_visibility(token);
        }

        for token in &tokens {
            if let Ok((_, layer)) = all_consuming(nom_cloud_layer).parse(token) {
                metar.clouds.push(layer);
            }
        }
    }

    if let Some((temperature, dewpoint)) = tokens
        .iter()
        .find_map(|t| all_consuming(nom_temperature_pair).parse(t).ok())
        .map(|(_, pair)| pair)
    {
        metar.temperature_c = Some(temperature);
        metar.dewpoint_c = Some(dewpoint);
    }

    // Altimeter first, QNH second: an explicit Q group wins over the value
    // derived from A.
    if let Some(inhg) = tokens
        .iter()
        .find_map(|t| all_consuming(nom_altimeter).parse(t).ok())
        .map(|(_, v)| v)
    {
        metar.altimeter_inhg = Some(inhg);
        metar.qnh_hpa = Some(inhg * INHG_TO_HPA);
    }
    if let Some(hpa) = tokens
        .iter()
        .find_map(|t| all_consuming(nom_qnh).parse(t).ok())
        .map(|(_, v)| v)
    {
        metar.qnh_hpa = Some(hpa);
        metar.altimeter_inhg = Some(hpa / INHG_TO_HPA);
    }
    if let Some(qnh) = metar.qnh_hpa
        && !QNH_PLAUSIBLE_HPA.contains(&qnh)
    {
        debug!(qnh, "QNH outside plausible range, discarding");
        metar.qnh_hpa = None;
    }

    for token in &tokens {
        let bare = token.trim_start_matches(['+', '-']);
        if let Some(code) = WeatherCode::from_code(bare) {
            metar.weather_tokens.push(code);
        }
    }

    metar.valid = metar.icao.is_some()
        && (metar.wind_dir_deg.is_some() || metar.wind_speed_kt.is_some())
        && metar.qnh_hpa.is_some();
    if !metar.valid {
        debug!(raw = %metar.raw, "Report missing required fields, marked invalid");
    }

    Ok(metar)
}

/// First token if it is 4 characters, or the first four characters of the
/// token after a leading report keyword (`METAR` / `TAF`).
pub(crate) fn extract_icao(tokens: &[&str], keyword: &str) -> Option<String> {
    let first = tokens.first()?;
    if first.eq_ignore_ascii_case(keyword) {
        let second = tokens.get(1)?;
        let end = second.char_indices().nth(4).map_or(second.len(), |(i, _)| i);
        Some(second[..end].to_ascii_uppercase())
    } else if first.len() == 4 {
        Some(first.to_ascii_uppercase())
    } else {
        None
    }
}

fn parse_visibility(token: &str) -> Option<f64> {
    if let Ok((_, meters)) = nom_meters_visibility(token) {
        if meters >= 9999 {
            // "9999" means 10 km or more
            return Some(10.0);
        }
        return Some(f64::from(meters) * METERS_TO_NM);
    }
    all_consuming(nom_statute_visibility)
        .parse(token)
        .ok()
        .map(|(_, nm)| nm)
}

/// Four digits, optionally followed by trailing letters (`9999NDV`).
fn nom_meters_visibility(input: &str) -> IResult<&str, u32> {
    let (rest, value) = map_parser(take(4usize), all_consuming(u32)).parse(input)?;
    if rest.chars().all(|c| c.is_ascii_uppercase()) {
        Ok(("", value))
    } else {
        Err(nom::Err::Error(nom::error::Error::new(
            rest,
            nom::error::ErrorKind::Verify,
        )))
    }
}

/// Integer or simple fraction in statute miles, optionally prefixed with `M`
/// for "less than": `10SM`, `1/2SM`, `M1/4SM`.
fn nom_statute_visibility(input: &str) -> IResult<&str, f64> {
    (
        opt(char('M')),
        u32,
        opt(preceded(char('/'), u32)),
        tag("SM"),
    )
        .map_res(|(_, numerator, denominator, _)| match denominator {
            Some(0) => Err("zero denominator"),
            Some(d) => Ok(f64::from(numerator) / f64::from(d)),
            None => Ok(f64::from(numerator)),
        })
        .parse(input)
}

/// `TT/DD` with an `M` prefix for negatives on either side.
fn nom_temperature_pair(input: &str) -> IResult<&str, (f64, f64)> {
    separated_pair(nom_signed_2digit, char('/'), nom_signed_2digit).parse(input)
}

fn nom_signed_2digit(input: &str) -> IResult<&str, f64> {
    (opt(char('M')), map_parser(take(2usize), all_consuming(u32)))
        .map(|(minus, value)| {
            let value = f64::from(value);
            if minus.is_some() { -value } else { value }
        })
        .parse(input)
}

/// `Annnn`: altimeter in hundredths of inches of mercury.
fn nom_altimeter(input: &str) -> IResult<&str, f64> {
    preceded(char('A'), map_parser(take(4usize), all_consuming(u32)))
        .map(|v| f64::from(v) / 100.0)
        .parse(input)
}

/// `Qnnnn`: QNH in whole hectopascals.
fn nom_qnh(input: &str) -> IResult<&str, f64> {
    preceded(char('Q'), map_parser(take(4usize), all_consuming(u32)))
        .map(f64::from)
        .parse(input)
}
