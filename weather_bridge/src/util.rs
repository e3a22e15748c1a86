const EARTH_RADIUS_NM: f64 = 6371.0 / 1.852;

/// Great-circle distance between two points in nautical miles.
pub fn haversine_nm(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();

    let a = (dlat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (dlon / 2.0).sin().powi(2);

    EARTH_RADIUS_NM * 2.0 * a.sqrt().asin()
}

/// Directed difference `to - from` between two bearings, normalised to
/// (-180, 180].
pub fn shortest_arc_deg(from: f64, to: f64) -> f64 {
    let diff = (to - from).rem_euclid(360.0);
    if diff > 180.0 { diff - 360.0 } else { diff }
}

/// Absolute bearing difference, wrapped to at most 180 degrees.
pub fn angle_delta_deg(a: f64, b: f64) -> f64 {
    shortest_arc_deg(a, b).abs()
}

/// Fold a bearing into [0, 360).
pub fn normalize_heading_deg(deg: f64) -> f64 {
    deg.rem_euclid(360.0)
}
