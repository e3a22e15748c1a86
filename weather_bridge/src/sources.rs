use std::time::{Duration, Instant};

use indexmap::IndexMap;
use reqwest::Client;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{info, warn};
use tracing_unwrap::ResultExt;

const AVIATIONWEATHER_BASE_URL: &str = "https://aviationweather.gov/api/data";
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("observation transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReportKind {
    Metar,
    Taf,
}

impl ReportKind {
    const fn path(self) -> &'static str {
        match self {
            ReportKind::Metar => "metar",
            ReportKind::Taf => "taf",
        }
    }

    const fn keyword(self) -> &'static str {
        match self {
            ReportKind::Metar => "METAR",
            ReportKind::Taf => "TAF",
        }
    }

    const fn hours(self) -> &'static str {
        match self {
            ReportKind::Metar => "1",
            ReportKind::Taf => "6",
        }
    }
}

/// Where raw observation text comes from. Selected by configuration; the
/// canned variant backs tests and offline development.
pub enum ObservationSource {
    AviationWeather(AviationWeatherSource),
    Canned(CannedSource),
}

impl ObservationSource {
    pub async fn fetch_metars(
        &mut self,
        icaos: &[String],
    ) -> Result<IndexMap<String, String>, SourceError> {
        match self {
            ObservationSource::AviationWeather(source) => {
                source.fetch(ReportKind::Metar, icaos).await
            }
            ObservationSource::Canned(source) => Ok(source.select(ReportKind::Metar, icaos)),
        }
    }

    pub async fn fetch_tafs(
        &mut self,
        icaos: &[String],
    ) -> Result<IndexMap<String, String>, SourceError> {
        match self {
            ObservationSource::AviationWeather(source) => {
                source.fetch(ReportKind::Taf, icaos).await
            }
            ObservationSource::Canned(source) => Ok(source.select(ReportKind::Taf, icaos)),
        }
    }
}

/// AviationWeather.gov data API, with a per-ICAO TTL cache so a tight tick
/// loop does not re-hit the endpoint.
pub struct AviationWeatherSource {
    client: Client,
    cache_ttl: Duration,
    metar_cache: IndexMap<String, (String, Instant)>,
    taf_cache: IndexMap<String, (String, Instant)>,
}

impl AviationWeatherSource {
    pub fn new(cache_seconds: u64) -> Self {
        Self {
            client: Client::builder()
                .timeout(FETCH_TIMEOUT)
                .build()
                .unwrap_or_log(),
            cache_ttl: Duration::from_secs(cache_seconds),
            metar_cache: IndexMap::new(),
            taf_cache: IndexMap::new(),
        }
    }

    async fn fetch(
        &mut self,
        kind: ReportKind,
        icaos: &[String],
    ) -> Result<IndexMap<String, String>, SourceError> {
        let mut result = IndexMap::new();
        let mut uncached = Vec::new();

        for icao in icaos {
            let icao = icao.trim().to_ascii_uppercase();
            match self.cache(kind).get(&icao) {
                Some((raw, fetched_at)) if fetched_at.elapsed() < self.cache_ttl => {
                    result.insert(icao, raw.clone());
                }
                _ => uncached.push(icao),
            }
        }

        if uncached.is_empty() {
            return Ok(result);
        }

        info!(
            kind = kind.keyword(),
            stations = uncached.join(","),
            "Fetching observations"
        );
        let text = self.get_with_retry(kind, &uncached).await?;
        let fetched_at = Instant::now();
        let mut fetched = 0usize;
        for line in text.lines().map(str::trim).filter(|line| !line.is_empty()) {
            let Some(icao) = report_station(line, kind.keyword()) else {
                continue;
            };
            if uncached.contains(&icao) {
                self.cache_mut(kind)
                    .insert(icao.clone(), (line.to_string(), fetched_at));
                result.insert(icao, line.to_string());
                fetched += 1;
            }
        }
        info!(
            kind = kind.keyword(),
            "Observation fetch complete: {fetched}/{} stations",
            uncached.len()
        );

        Ok(result)
    }

    /// One retry after a short delay; the engine keeps its previous maps if
    /// that fails too.
    async fn get_with_retry(
        &self,
        kind: ReportKind,
        icaos: &[String],
    ) -> Result<String, SourceError> {
        let url = format!("{AVIATIONWEATHER_BASE_URL}/{}", kind.path());
        let params = [
            ("ids", icaos.join(",")),
            ("format", "raw".to_string()),
            ("hours", kind.hours().to_string()),
        ];

        match self.get_text(&url, &params).await {
            Ok(text) => Ok(text),
            Err(e) => {
                warn!("Observation fetch failed, retrying once: {e}");
                sleep(RETRY_DELAY).await;
                Ok(self.get_text(&url, &params).await?)
            }
        }
    }

    async fn get_text(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<String, reqwest::Error> {
        self.client
            .get(url)
            .query(params)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
    }

    fn cache(&self, kind: ReportKind) -> &IndexMap<String, (String, Instant)> {
        match kind {
            ReportKind::Metar => &self.metar_cache,
            ReportKind::Taf => &self.taf_cache,
        }
    }

    fn cache_mut(&mut self, kind: ReportKind) -> &mut IndexMap<String, (String, Instant)> {
        match kind {
            ReportKind::Metar => &mut self.metar_cache,
            ReportKind::Taf => &mut self.taf_cache,
        }
    }
}

/// A fixed set of raw reports, for tests and offline development.
#[derive(Debug, Default)]
pub struct CannedSource {
    metars: IndexMap<String, String>,
    tafs: IndexMap<String, String>,
}

impl CannedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_metar(&mut self, icao: &str, raw: &str) {
        self.metars
            .insert(icao.to_ascii_uppercase(), raw.to_string());
    }

    pub fn insert_taf(&mut self, icao: &str, raw: &str) {
        self.tafs.insert(icao.to_ascii_uppercase(), raw.to_string());
    }

    fn select(&self, kind: ReportKind, icaos: &[String]) -> IndexMap<String, String> {
        let reports = match kind {
            ReportKind::Metar => &self.metars,
            ReportKind::Taf => &self.tafs,
        };
        icaos
            .iter()
            .map(|icao| icao.trim().to_ascii_uppercase())
            .filter_map(|icao| reports.get(&icao).map(|raw| (icao, raw.clone())))
            .collect()
    }
}

/// ICAO of a raw report line: the first token, or the one after a leading
/// `METAR` / `TAF` keyword.
fn report_station(line: &str, keyword: &str) -> Option<String> {
    let mut parts = line.split_whitespace();
    let first = parts.next()?;
    let candidate = if first.eq_ignore_ascii_case(keyword) {
        parts.next()?
    } else {
        first
    };
    (candidate.len() == 4).then(|| candidate.to_ascii_uppercase())
}
