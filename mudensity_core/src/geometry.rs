//! Fixed-point coordinates and spherical triangle measurements.
//!
//! Coordinates arrive from the host as integer microdegrees (latE6/lngE6).
//! Both the comm log and the rendered geometry come from the same fixed-point
//! source, so identity is always exact integer equality.

use geo::Point;
use h3o::{CellIndex, LatLng, Resolution};
use serde::{Deserialize, Serialize};

use crate::error::GeometryError;

/// Mean earth radius in kilometers.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Fixed-point scale of host coordinates.
pub const E6: f64 = 1e6;

/// A (latitude, longitude) pair in integer microdegrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coordinate {
    #[serde(rename = "latE6")]
    pub lat_e6: i32,
    #[serde(rename = "lngE6")]
    pub lng_e6: i32,
}

impl Coordinate {
    pub const fn new(lat_e6: i32, lng_e6: i32) -> Self {
        Self { lat_e6, lng_e6 }
    }

    /// Build from decimal degrees, rounding to the nearest microdegree.
    pub fn from_degrees(lat: f64, lng: f64) -> Self {
        Self {
            lat_e6: (lat * E6).round() as i32,
            lng_e6: (lng * E6).round() as i32,
        }
    }

    #[inline]
    pub fn lat(&self) -> f64 {
        self.lat_e6 as f64 / E6
    }

    #[inline]
    pub fn lng(&self) -> f64 {
        self.lng_e6 as f64 / E6
    }

    /// Decimal-degree point (x = longitude, y = latitude).
    pub fn to_point(&self) -> Point<f64> {
        Point::new(self.lng(), self.lat())
    }

    /// H3 cell containing this coordinate at the given resolution.
    pub fn to_cell(&self, resolution: Resolution) -> Result<CellIndex, GeometryError> {
        if self.lat().abs() > 90.0 || self.lng().abs() > 180.0 {
            return Err(GeometryError::InvalidCoordinates(self.to_string()));
        }
        let latlng = LatLng::new(self.lat(), self.lng())
            .map_err(|e| GeometryError::InvalidCoordinates(format!("{:?}: {}", self, e)))?;
        Ok(latlng.to_cell(resolution))
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6},{:.6}", self.lat(), self.lng())
    }
}

/// Great-circle distance in kilometers (haversine).
///
/// Identical points yield 0.
pub fn distance(p: Coordinate, q: Coordinate) -> f64 {
    let d_lat = (q.lat() - p.lat()).to_radians();
    let d_lng = (q.lng() - p.lng()).to_radians();

    // Rounding can push `a` just past 1 for antipodal points.
    let a = ((d_lat / 2.0).sin().powi(2)
        + p.lat().to_radians().cos() * q.lat().to_radians().cos() * (d_lng / 2.0).sin().powi(2))
    .clamp(0.0, 1.0);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// Triangle area in km² via Heron's formula on the three haversine sides.
///
/// The radicand is clamped at zero: collinear vertices cancel to a tiny
/// negative value under floating point, and must come out as 0, not NaN.
pub fn triangle_area(a: Coordinate, b: Coordinate, c: Coordinate) -> f64 {
    let ab = distance(a, b);
    let bc = distance(b, c);
    let ca = distance(c, a);

    let s = (ab + bc + ca) / 2.0;
    let radicand = s * (s - ab) * (s - bc) * (s - ca);

    radicand.max(0.0).sqrt()
}

/// Arithmetic mean of three vertices, rounded to the nearest microdegree.
pub fn centroid(a: Coordinate, b: Coordinate, c: Coordinate) -> Coordinate {
    let lat = (a.lat_e6 as i64 + b.lat_e6 as i64 + c.lat_e6 as i64) as f64 / 3.0;
    let lng = (a.lng_e6 as i64 + b.lng_e6 as i64 + c.lng_e6 as i64) as f64 / 3.0;
    Coordinate::new(lat.round() as i32, lng.round() as i32)
}
