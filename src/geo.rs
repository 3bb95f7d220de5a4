use crate::model::GeoPoint;

const EARTH_RADIUS_M: f64 = 6_371_000.0;
// Widens the box so float error never drops a point right at the radius.
const BOX_MARGIN: f64 = 1.001;

/// Great-circle distance between two points, in metres.
pub fn haversine_distance(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1_rad = a.lat.to_radians();
    let lat2_rad = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lon = (b.lon - a.lon).to_radians();

    let h = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().asin();

    EARTH_RADIUS_M * c
}

/// Corners `([lon_min, lat_min], [lon_max, lat_max])` of a box that contains
/// every point within `radius_m` metres of `center`.
///
/// The box is slightly generous; callers still filter on exact distance.
pub fn bounding_box(center: GeoPoint, radius_m: f64) -> ([f64; 2], [f64; 2]) {
    // Same sphere as `haversine_distance`, so the box never undercuts it.
    let dlat = (radius_m / EARTH_RADIUS_M).to_degrees() * BOX_MARGIN;
    // Clamp so the longitude span stays finite near the poles.
    let cos_lat = center.lat.to_radians().cos().abs().max(0.01);
    let dlon = dlat / cos_lat;

    (
        [center.lon - dlon, center.lat - dlat],
        [center.lon + dlon, center.lat + dlat],
    )
}
