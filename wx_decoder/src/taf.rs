use std::str::FromStr;

use itertools::Itertools;
use jiff::{
    Timestamp, ToSpan,
    civil::{Date, DateTime, Time},
    tz::TimeZone,
};
use serde::Serialize;

use crate::{
    cloud::CloudLayer,
    metar::{ParseError, extract_icao},
    weather::WeatherCode,
    wind::find_wind,
};

const MIN_REPORT_LEN: usize = 10;
/// `DDHHMM` dates carry no month; anything more than this far from the
/// current UTC time is folded into the neighbouring month.
const MONTH_ROLLOVER_TOLERANCE_DAYS: i64 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum TafGroupKind {
    #[default]
    #[serde(rename = "PREVAILING")]
    Prevailing,
    #[serde(rename = "FM")]
    From,
    #[serde(rename = "TEMPO")]
    Tempo,
    #[serde(rename = "PROB")]
    Prob,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TafGroup {
    pub kind: TafGroupKind,
    pub start: Option<DateTime>,
    pub end: Option<DateTime>,
    pub wind_dir_deg: Option<u16>,
    pub wind_speed_kt: Option<f64>,
    pub wind_gust_kt: Option<f64>,
    pub visibility_nm: Option<f64>,
    pub clouds: Vec<CloudLayer>,
    pub weather_tokens: Vec<WeatherCode>,
}

/// A decoded TAF: a prevailing group plus ordered FM change groups.
/// `valid` is derived: ICAO present and `valid_from` present.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParsedTaf {
    pub raw: String,
    pub icao: Option<String>,
    pub issue_time: Option<DateTime>,
    pub valid_from: Option<DateTime>,
    pub valid_to: Option<DateTime>,
    pub prevailing: TafGroup,
    pub groups: Vec<TafGroup>,
    pub valid: bool,
}

impl FromStr for ParsedTaf {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_taf(s)
    }
}

/// Decode a TAF against the current UTC time.
pub fn parse_taf(raw: &str) -> Result<ParsedTaf, ParseError> {
    let base = Timestamp::now().to_zoned(TimeZone::UTC).datetime();
    parse_taf_at(raw, base)
}

/// Decode a TAF, interpreting `DDHHMM` dates against `base` (UTC).
pub fn parse_taf_at(raw: &str, base: DateTime) -> Result<ParsedTaf, ParseError> {
    let trimmed = raw.trim();
    if trimmed.len() < MIN_REPORT_LEN {
        return Err(ParseError::TooShort(trimmed.len()));
    }

    let mut taf = ParsedTaf {
        raw: raw.to_string(),
        ..ParsedTaf::default()
    };
    let tokens: Vec<&str> = trimmed.split_whitespace().collect();

    taf.icao = extract_icao(&tokens, "TAF");

    // `DDHHMMZ` tokens in order; the trailing half of a `DDHHMM/DDHHMMZ`
    // period counts as one of them.
    let dates: Vec<Option<DateTime>> = tokens
        .iter()
        .filter_map(|t| date_digits(t))
        .map(|digits| parse_taf_date(digits, base))
        .collect();

    if let Some(&issue) = dates.first() {
        taf.issue_time = issue;
    }
    if let Some(&from) = dates.get(1) {
        taf.valid_from = from;
    }
    if let Some(&to) = dates.get(2) {
        taf.valid_to = to;
    } else if dates.len() >= 2
        && let Some((from, to)) = tokens.iter().find_map(|t| period_digits(t))
    {
        taf.valid_from = parse_taf_date(from, base);
        taf.valid_to = parse_taf_date(to, base);
    }

    let fm_positions: Vec<usize> = tokens
        .iter()
        .positions(|t| fm_digits(t).is_some())
        .collect();

    // Prevailing wind comes from the text before the first FM marker.
    let prevailing_end = fm_positions.first().copied().unwrap_or(tokens.len());
    if let Some((_, wind)) = find_wind(&tokens[..prevailing_end]) {
        taf.prevailing.wind_dir_deg = wind.dir_deg;
        taf.prevailing.wind_speed_kt = Some(wind.speed_kt);
        taf.prevailing.wind_gust_kt = wind.gust_kt;
    }

    for (i, &pos) in fm_positions.iter().enumerate() {
        let start = fm_digits(tokens[pos]).and_then(|d| parse_taf_date(d, base));
        let end = match fm_positions.get(i + 1) {
            Some(&next) => fm_digits(tokens[next]).and_then(|d| parse_taf_date(d, base)),
            None => taf.valid_to,
        };
        let span_end = fm_positions.get(i + 1).copied().unwrap_or(tokens.len());

        let mut group = TafGroup {
            kind: TafGroupKind::From,
            start,
            end,
            ..TafGroup::default()
        };
        if let Some((_, wind)) = find_wind(&tokens[pos + 1..span_end]) {
            group.wind_dir_deg = wind.dir_deg;
            group.wind_speed_kt = Some(wind.speed_kt);
            group.wind_gust_kt = wind.gust_kt;
        }
        taf.groups.push(group);
    }

    taf.valid = taf.icao.is_some() && taf.valid_from.is_some();

    Ok(taf)
}

/// Interpret a `DDHHMM` string against `base`, folding into the previous or
/// next month when the result lands more than the tolerance away.
pub fn parse_taf_date(digits: &str, base: DateTime) -> Option<DateTime> {
    if digits.len() != 6 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let day: i8 = digits[..2].parse().ok()?;
    let hour: i8 = digits[2..4].parse().ok()?;
    let minute: i8 = digits[4..6].parse().ok()?;

    let year = base.date().year();
    let month = base.date().month();
    let result = civil_date_time(year, month, day, hour, minute)?;

    let upper = base.checked_add(MONTH_ROLLOVER_TOLERANCE_DAYS.days()).ok()?;
    let lower = base.checked_sub(MONTH_ROLLOVER_TOLERANCE_DAYS.days()).ok()?;

    if result > upper {
        let (year, month) = if month == 1 { (year - 1, 12) } else { (year, month - 1) };
        civil_date_time(year, month, day, hour, minute)
    } else if result < lower {
        let (year, month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
        civil_date_time(year, month, day, hour, minute)
    } else {
        Some(result)
    }
}

fn civil_date_time(year: i16, month: i8, day: i8, hour: i8, minute: i8) -> Option<DateTime> {
    let date = Date::new(year, month, day).ok()?;
    let time = Time::new(hour, minute, 0, 0).ok()?;
    Some(DateTime::from_parts(date, time))
}

/// `DDHHMMZ`, or the trailing half of `DDHHMM/DDHHMMZ`.
fn date_digits(token: &str) -> Option<&str> {
    if let Some((_, to)) = period_digits(token) {
        return Some(to);
    }
    let digits = token.strip_suffix('Z')?;
    (digits.len() == 6 && digits.bytes().all(|b| b.is_ascii_digit())).then_some(digits)
}

/// `DDHHMM/DDHHMMZ` validity period.
fn period_digits(token: &str) -> Option<(&str, &str)> {
    let rest = token.strip_suffix('Z')?;
    let (from, to) = rest.split_once('/')?;
    let six_digits = |s: &str| s.len() == 6 && s.bytes().all(|b| b.is_ascii_digit());
    (six_digits(from) && six_digits(to)).then_some((from, to))
}

/// `FMDDHHMMZ` change-group marker.
fn fm_digits(token: &str) -> Option<&str> {
    let rest = token.strip_prefix("FM")?;
    let digits = rest.strip_suffix('Z')?;
    (digits.len() == 6 && digits.bytes().all(|b| b.is_ascii_digit())).then_some(digits)
}
