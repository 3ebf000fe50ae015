//! The distance kernel (C1): a pure, stateless great-circle distance and
//! bearing calculation over [`GeoPoint`]s, plus the [`Distance`] value type.
//!
//! Both `haversine` and `bearing` are total on valid `GeoPoint`s — there is
//! nothing left to validate once the points themselves were constructed,
//! so neither function returns a `Result`.

use super::point::GeoPoint;
use geo::algorithm::Distance as GeoDistanceTrait;
use geo::Haversine;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Mean Earth radius used by the Haversine formula, in kilometers.
pub const EARTH_RADIUS_KM: f64 = 6_371.0;

/// A non-negative distance, always expressed internally in kilometers.
///
/// Comparisons and arithmetic operate on the raw kilometer value; rounding
/// to 2 decimal places happens only when a `Distance` is formatted for an
/// external boundary (see [`Distance::rounded_km`]), never internally.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Distance {
    km: f64,
}

impl Distance {
    pub const ZERO: Distance = Distance { km: 0.0 };

    /// Construct from a kilometer value, clamping negatives to zero.
    ///
    /// Floating-point cancellation in the Haversine formula can yield a
    /// tiny negative value for coincident points; clamping here keeps the
    /// "distance is non-negative" invariant exact rather than approximate.
    pub fn from_km(km: f64) -> Self {
        Self { km: km.max(0.0) }
    }

    pub fn km(&self) -> f64 {
        self.km
    }

    pub fn meters(&self) -> f64 {
        self.km * 1_000.0
    }

    pub fn miles(&self) -> f64 {
        self.km / 1.609_34
    }

    /// Kilometer value rounded to 2 decimal places, for external APIs.
    pub fn rounded_km(&self) -> f64 {
        (self.km * 100.0).round() / 100.0
    }

    /// Subtract, saturating at zero rather than going negative.
    pub fn saturating_sub(self, other: Distance) -> Distance {
        Distance::from_km((self.km - other.km).max(0.0))
    }

    pub fn add(self, other: Distance) -> Distance {
        Distance::from_km(self.km + other.km)
    }
}

impl Eq for Distance {}

impl PartialOrd for Distance {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Distance {
    fn cmp(&self, other: &Self) -> Ordering {
        self.km.total_cmp(&other.km)
    }
}

impl fmt::Display for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} km", self.km)
    }
}

/// Great-circle distance between two points, via the Haversine formula.
pub fn haversine(a: GeoPoint, b: GeoPoint) -> Distance {
    let p1 = a.to_geo_point();
    let p2 = b.to_geo_point();
    let meters = Haversine.distance(p1, p2);
    Distance::from_km(meters / 1_000.0)
}

/// Initial bearing from `a` to `b`, in degrees, normalized to `[0, 360)`.
///
/// Computed directly from the forward-azimuth formula on the same sphere
/// the Haversine distance assumes, rather than through `geo`'s `Bearing`
/// trait, whose implementations default to the ellipsoidal/rhumb lines —
/// inconsistent with a Haversine-based kernel.
pub fn bearing(a: GeoPoint, b: GeoPoint) -> f64 {
    let phi1 = a.lat().to_radians();
    let phi2 = b.lat().to_radians();
    let delta_lambda = (b.lon() - a.lon()).to_radians();

    let y = delta_lambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * delta_lambda.cos();
    let theta = y.atan2(x).to_degrees();

    ((theta % 360.0) + 360.0) % 360.0
}
