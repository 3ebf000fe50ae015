//! `GeoPoint` — a validated WGS84 coordinate pair.
//!
//! Construction is fallible: every stored or queried coordinate must be
//! in-range, and that invariant is enforced once, at the boundary, rather
//! than re-checked by every consumer.

use crate::error::{GeoBankError, Result};
use geo::Point as GeoCratePoint;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A geographic point on Earth's surface, validated at construction.
///
/// Latitude must lie in `[-90, 90]` and longitude in `[-180, 180]`;
/// boundary values are accepted, anything past them is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    lat: f64,
    lon: f64,
}

impl GeoPoint {
    pub const MIN_LAT: f64 = -90.0;
    pub const MAX_LAT: f64 = 90.0;
    pub const MIN_LON: f64 = -180.0;
    pub const MAX_LON: f64 = 180.0;

    /// Construct a point, rejecting out-of-range coordinates.
    pub fn new(lat: f64, lon: f64) -> Result<Self> {
        if !lat.is_finite() || !(Self::MIN_LAT..=Self::MAX_LAT).contains(&lat) {
            return Err(GeoBankError::invalid(
                "lat",
                "latitude must be between -90 and 90",
            ));
        }
        if !lon.is_finite() || !(Self::MIN_LON..=Self::MAX_LON).contains(&lon) {
            return Err(GeoBankError::invalid(
                "lon",
                "longitude must be between -180 and 180",
            ));
        }
        Ok(Self { lat, lon })
    }

    pub fn lat(&self) -> f64 {
        self.lat
    }

    pub fn lon(&self) -> f64 {
        self.lon
    }

    /// Quantize to `decimals` places, for use in cache-key construction.
    pub fn quantized(&self, decimals: u32) -> (f64, f64) {
        let scale = 10f64.powi(decimals as i32);
        ((self.lat * scale).round() / scale, (self.lon * scale).round() / scale)
    }

    pub(crate) fn to_geo_point(self) -> GeoCratePoint<f64> {
        GeoCratePoint::new(self.lon, self.lat)
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.lat, self.lon)
    }
}
