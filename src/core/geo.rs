//! Great-circle distance for the customer ordering radius.

use serde::{Deserialize, Serialize};

/// Mean Earth radius in metres.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A WGS84 coordinate in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude
    pub lat: f64,
    /// Longitude
    pub long: f64,
}

impl GeoPoint {
    /// Creates a point from latitude and longitude.
    #[must_use]
    pub const fn new(lat: f64, long: f64) -> Self {
        Self { lat, long }
    }
}

/// Haversine distance between two points, in metres.
#[must_use]
pub fn distance_meters(from: GeoPoint, to: GeoPoint) -> f64 {
    let d_lat = (to.lat - from.lat).to_radians();
    let d_long = (to.long - from.long).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + from.lat.to_radians().cos() * to.lat.to_radians().cos() * (d_long / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
}
