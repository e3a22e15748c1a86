use std::io::Read;

use indexmap::IndexMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{error::ApplicationResult, util::haversine_nm};

/// A weather-reporting station. Immutable after load, keyed by ICAO.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Station {
    pub icao: String,
    pub lat: f64,
    pub lon: f64,
    pub name: String,
    pub country: String,
}

impl Station {
    pub fn distance_to(&self, lat: f64, lon: f64) -> f64 {
        haversine_nm(self.lat, self.lon, lat, lon)
    }
}

#[derive(Debug, Deserialize)]
struct StationRecord {
    icao: String,
    lat: f64,
    lon: f64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    country: String,
}

/// All known stations, answering nearest-neighbour queries in nautical miles.
#[derive(Debug, Default)]
pub struct StationIndex {
    stations: IndexMap<String, Station>,
}

impl StationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from CSV with an `icao,lat,lon,name,country` header. Rows that
    /// fail to decode are skipped with a warning.
    pub fn from_csv_reader<R: Read>(reader: R) -> ApplicationResult<Self> {
        let mut index = Self::new();
        for row in csv::Reader::from_reader(reader).deserialize::<StationRecord>() {
            // An unreadable stream is fatal; a malformed row is just skipped.
            let record = match row {
                Ok(record) => record,
                Err(e) if e.is_io_error() => return Err(e.into()),
                Err(e) => {
                    warn!("Skipping station row: {e}");
                    continue;
                }
            };
            let icao = record.icao.trim().to_ascii_uppercase();
            if icao.is_empty() {
                continue;
            }
            index.insert(Station {
                icao,
                lat: record.lat,
                lon: record.lon,
                name: record.name.trim().to_string(),
                country: record.country.trim().to_string(),
            });
        }
        Ok(index)
    }

    pub fn insert(&mut self, station: Station) {
        self.stations.insert(station.icao.clone(), station);
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    pub fn get(&self, icao: &str) -> Option<&Station> {
        self.stations.get(&icao.trim().to_ascii_uppercase())
    }

    /// Stations within `radius_nm` of the point, closest first, at most
    /// `max_results`. Ties on distance break on ICAO order. When nothing is
    /// in range and `fallback_global` is set, the globally nearest stations
    /// are returned instead.
    pub fn nearest(
        &self,
        lat: f64,
        lon: f64,
        radius_nm: f64,
        max_results: usize,
        fallback_global: bool,
    ) -> Vec<(Station, f64)> {
        let mut hits = self.sorted_by_distance(lat, lon, Some(radius_nm));
        hits.truncate(max_results);

        if hits.is_empty() && fallback_global {
            hits = self.sorted_by_distance(lat, lon, None);
            hits.truncate(max_results);
        }

        hits
    }

    fn sorted_by_distance(&self, lat: f64, lon: f64, radius_nm: Option<f64>) -> Vec<(Station, f64)> {
        self.stations
            .values()
            .map(|station| (station.clone(), station.distance_to(lat, lon)))
            .filter(|(_, distance)| radius_nm.is_none_or(|radius| *distance <= radius))
            .sorted_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.icao.cmp(&b.0.icao)))
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::Cursor;

    use super::*;

    pub(crate) fn test_index() -> StationIndex {
        StationIndex::from_csv_reader(Cursor::new(include_str!("../stations.test"))).unwrap()
    }

    #[test]
    fn loads_fixture() {
        let index = test_index();
        assert_eq!(index.len(), 10);
        let station = index.get("KJFK").unwrap();
        assert_eq!(station.icao, "KJFK");
        assert_eq!(station.country, "US");
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let index = test_index();
        assert!(index.get("kjfk").is_some());
        assert!(index.get(" kjfk ").is_some());
        assert!(index.get("XXXX").is_none());
    }

    #[test]
    fn distance_between_jfk_and_lax() {
        let index = test_index();
        let jfk = index.get("KJFK").unwrap();
        let lax = index.get("KLAX").unwrap();
        let distance = jfk.distance_to(lax.lat, lax.lon);
        assert!(distance > 2100.0, "distance was {distance}");
        assert!(distance < 2300.0, "distance was {distance}");
    }

    #[test]
    fn nearest_sorts_ascending_and_truncates() {
        let index = test_index();
        // Near JFK: KJFK itself, then LaGuardia, then Newark.
        let results = index.nearest(40.6398, -73.7789, 50.0, 3, false);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].0.icao, "KJFK");
        assert_eq!(results[1].0.icao, "KLGA");
        assert_eq!(results[2].0.icao, "KEWR");
        for pair in results.windows(2) {
            assert!(pair[0].1 <= pair[1].1);
        }
    }

    #[test]
    fn empty_radius_without_fallback_is_empty() {
        let index = test_index();
        // Middle of the Pacific, nothing within 50 nm.
        assert!(index.nearest(0.0, -150.0, 50.0, 3, false).is_empty());
    }

    #[test]
    fn global_fallback_returns_nearest_anyway() {
        let index = test_index();
        let results = index.nearest(0.0, -150.0, 50.0, 2, true);
        assert_eq!(results.len(), 2);
        assert!(results[0].1 > 50.0);
        assert!(results[0].1 <= results[1].1);
    }

    #[test]
    fn ties_break_on_icao_order() {
        let mut index = StationIndex::new();
        for icao in ["BBBB", "AAAA", "CCCC"] {
            index.insert(Station {
                icao: icao.to_string(),
                lat: 10.0,
                lon: 10.0,
                name: String::new(),
                country: String::new(),
            });
        }
        let results = index.nearest(10.0, 10.0, 5.0, 3, false);
        let order: Vec<&str> = results.iter().map(|(s, _)| s.icao.as_str()).collect();
        assert_eq!(order, ["AAAA", "BBBB", "CCCC"]);
    }

    #[test]
    fn malformed_rows_are_skipped() {
        let csv = "icao,lat,lon,name,country\nKJFK,40.6398,-73.7789,JFK,US\nBROKEN,not_a_number,0,x,y\n";
        let index = StationIndex::from_csv_reader(Cursor::new(csv)).unwrap();
        assert_eq!(index.len(), 1);
    }
}
