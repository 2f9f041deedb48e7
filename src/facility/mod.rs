//! Health facility directory
//!
//! An in-memory catalog of hospitals, clinics, pharmacies and volunteer
//! centres, queried by type and by great-circle distance from a point.

pub mod catalog;
pub mod directory;
pub mod geo;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CareError, CareResult};

pub use catalog::{builtin_catalog, load_catalog_file, parse_catalog};
pub use directory::{FacilityDirectory, FacilityHit};
pub use geo::{distance_km, haversine_distance, GeoPoint, EARTH_RADIUS_KM};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacilityType {
    Hospital,
    Clinic,
    Pharmacy,
    Volunteer,
}

impl FacilityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FacilityType::Hospital => "hospital",
            FacilityType::Clinic => "clinic",
            FacilityType::Pharmacy => "pharmacy",
            FacilityType::Volunteer => "volunteer",
        }
    }
}

impl fmt::Display for FacilityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FacilityType {
    type Err = CareError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hospital" => Ok(FacilityType::Hospital),
            "clinic" => Ok(FacilityType::Clinic),
            "pharmacy" => Ok(FacilityType::Pharmacy),
            "volunteer" => Ok(FacilityType::Volunteer),
            other => Err(CareError::InvalidRecord(format!(
                "unknown facility type '{}'",
                other
            ))),
        }
    }
}

/// A place offering care
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Facility {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FacilityType,
    #[serde(alias = "latitude")]
    pub lat: f64,
    #[serde(rename = "lng", alias = "lon", alias = "longitude")]
    pub lon: f64,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub phone: String,
}

impl Facility {
    pub fn location(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lon)
    }

    pub fn validate(&self) -> CareResult<()> {
        if self.name.trim().is_empty() {
            return Err(CareError::InvalidRecord(
                "facility name must not be empty".to_string(),
            ));
        }
        self.location().validate().map_err(|e| {
            CareError::InvalidRecord(format!("facility '{}': {}", self.name, e))
        })
    }
}

/// Type restriction for directory queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FacilityFilter {
    #[default]
    All,
    Only(FacilityType),
}

impl FacilityFilter {
    pub fn matches(&self, facility: &Facility) -> bool {
        match self {
            FacilityFilter::All => true,
            FacilityFilter::Only(kind) => facility.kind == *kind,
        }
    }
}

impl From<FacilityType> for FacilityFilter {
    fn from(kind: FacilityType) -> Self {
        FacilityFilter::Only(kind)
    }
}

impl FromStr for FacilityFilter {
    type Err = CareError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("all") {
            Ok(FacilityFilter::All)
        } else {
            s.parse().map(FacilityFilter::Only)
        }
    }
}
