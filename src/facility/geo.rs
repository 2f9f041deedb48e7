use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CareError, CareResult};

/// Mean earth radius in kilometres
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// A geographic point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    #[serde(alias = "lng")]
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Create a point, rejecting non-finite or out-of-range coordinates
    pub fn checked(lat: f64, lon: f64) -> CareResult<Self> {
        let point = Self::new(lat, lon);
        point.validate()?;
        Ok(point)
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }

    pub fn validate(&self) -> CareResult<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(CareError::InvalidRecord(format!(
                "coordinates ({}, {}) are out of range",
                self.lat, self.lon
            )))
        }
    }

    /// Parse geo point from JSON value
    /// Supports: { "lat": 23.8, "lng": 90.4 } (also lon/longitude) or [lat, lon]
    pub fn from_value(value: &Value) -> Option<Self> {
        if let Some(obj) = value.as_object() {
            let lat = obj.get("lat").or(obj.get("latitude"))?.as_f64()?;
            let lon = obj
                .get("lon")
                .or(obj.get("lng"))
                .or(obj.get("longitude"))?
                .as_f64()?;
            return Some(Self::new(lat, lon));
        }

        if let Some(arr) = value.as_array() {
            if arr.len() == 2 {
                return Some(Self::new(arr[0].as_f64()?, arr[1].as_f64()?));
            }
        }

        None
    }

    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        haversine_distance(self, other)
    }
}

/// Great-circle distance between two points using the Haversine formula.
/// Returns kilometres.
pub fn haversine_distance(p1: &GeoPoint, p2: &GeoPoint) -> f64 {
    let lat1_rad = p1.lat.to_radians();
    let lat2_rad = p2.lat.to_radians();
    let delta_lat = (p2.lat - p1.lat).to_radians();
    let delta_lon = (p2.lon - p1.lon).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);

    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_KM * c
}

/// Calculate distance from coordinates
pub fn distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    haversine_distance(&GeoPoint::new(lat1, lon1), &GeoPoint::new(lat2, lon2))
}
