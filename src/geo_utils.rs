//! Geographic utilities: great-circle distance, Web Mercator projection and
//! bounding boxes.

use geo::{BoundingRect, Coord, LineString};

use crate::{Bounds, GpsPoint};

/// Mean Earth radius in meters (IUGG).
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Semi-major axis used by the spherical Web Mercator projection (EPSG:3857).
pub const WEB_MERCATOR_RADIUS_M: f64 = 6_378_137.0;

/// Latitude limit of the Web Mercator projection.
const WEB_MERCATOR_MAX_LAT: f64 = 85.051_128_779_806_59;

/// Great-circle distance between two points in meters (haversine formula).
///
/// # Example
/// ```
/// use route_animator::GpsPoint;
/// use route_animator::geo_utils::haversine_distance;
///
/// let a = GpsPoint::new(0.0, 0.0);
/// let b = GpsPoint::new(0.0, 1.0);
/// let d = haversine_distance(&a, &b);
/// assert!((d - 111_195.0).abs() < 10.0);
/// ```
pub fn haversine_distance(p1: &GpsPoint, p2: &GpsPoint) -> f64 {
    let lat1 = p1.latitude.to_radians();
    let lat2 = p2.latitude.to_radians();
    let dlat = (p2.latitude - p1.latitude).to_radians();
    let dlng = (p2.longitude - p1.longitude).to_radians();

    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    // Clamp guards against a > 1 from rounding on antipodal points
    let c = 2.0 * a.sqrt().min(1.0).asin();
    EARTH_RADIUS_M * c
}

/// Total length of a polyline in meters.
pub fn polyline_length(points: &[GpsPoint]) -> f64 {
    points
        .windows(2)
        .map(|w| haversine_distance(&w[0], &w[1]))
        .sum()
}

/// Project a point to Web Mercator (EPSG:3857) meters, returned as (x, y).
///
/// Latitudes beyond the projection limit are clamped to it.
pub fn to_web_mercator(point: &GpsPoint) -> (f64, f64) {
    let lat = point
        .latitude
        .clamp(-WEB_MERCATOR_MAX_LAT, WEB_MERCATOR_MAX_LAT)
        .to_radians();
    let x = WEB_MERCATOR_RADIUS_M * point.longitude.to_radians();
    let y = WEB_MERCATOR_RADIUS_M * (std::f64::consts::FRAC_PI_4 + lat / 2.0).tan().ln();
    (x, y)
}

/// Compute the bounding box of a set of points.
///
/// Returns `None` for an empty slice.
pub fn compute_bounds(points: &[GpsPoint]) -> Option<Bounds> {
    let line: LineString<f64> = points
        .iter()
        .map(|p| Coord {
            x: p.longitude,
            y: p.latitude,
        })
        .collect();
    let rect = line.bounding_rect()?;

    Some(Bounds {
        min_lat: rect.min().y,
        max_lat: rect.max().y,
        min_lng: rect.min().x,
        max_lng: rect.max().x,
    })
}
