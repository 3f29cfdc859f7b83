use super::protocol::Endpoint;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two coordinates, kilometres.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

/// Nearest endpoint to the given coordinates. Ties go to the endpoint listed
/// first; `None` only for an empty catalog.
pub fn nearest_endpoint(endpoints: &[Endpoint], latitude: f64, longitude: f64) -> Option<&Endpoint> {
    let mut best: Option<(&Endpoint, f64)> = None;
    for endpoint in endpoints {
        let distance = haversine_km(latitude, longitude, endpoint.latitude, endpoint.longitude);
        // NaN never wins, so malformed coordinates sink to the back.
        let closer = match best {
            None => true,
            Some((_, best_distance)) => distance < best_distance || best_distance.is_nan(),
        };
        if closer {
            best = Some((endpoint, distance));
        }
    }
    best.map(|(endpoint, _)| endpoint)
}
