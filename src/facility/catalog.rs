use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::directory::FacilityDirectory;
use super::{Facility, FacilityType};
use crate::error::{CareError, CareResult};
use crate::storage::collection::FACILITY_CACHE;
use crate::storage::{RecordId, RecordStore};

/// Key of the cached catalog inside the facility cache collection
pub const CATALOG_KEY: &str = "catalog";

fn facility(name: &str, kind: FacilityType, lat: f64, lon: f64, address: &str, phone: &str) -> Facility {
    Facility {
        name: name.to_string(),
        kind,
        lat,
        lon,
        address: address.to_string(),
        phone: phone.to_string(),
    }
}

/// Catalog shipped with the application (central Dhaka)
pub fn builtin_catalog() -> Vec<Facility> {
    use FacilityType::*;
    vec![
        facility("Dhaka Medical College Hospital", Hospital, 23.8223, 90.4131, "Shahbag, Dhaka", "02-8616641"),
        facility("Bangabandhu Sheikh Mujib Medical University", Hospital, 23.8245, 90.4153, "Shahbag, Dhaka", "02-9130800"),
        facility("Ibn Sina Hospital", Hospital, 23.7589, 90.3876, "Dhanmondi, Dhaka", "02-8616600"),
        facility("Square Hospital", Hospital, 23.7465, 90.3760, "Panthapath, Dhaka", "02-8144400"),
        facility("Ibn Sina Diagnostic Center", Clinic, 23.7925, 90.4075, "Dhanmondi, Dhaka", "02-8618800"),
        facility("Popular Diagnostic Center", Clinic, 23.7589, 90.3876, "Dhanmondi, Dhaka", "02-8616600"),
        facility("Labaid Pharmacy", Pharmacy, 23.8103, 90.4125, "Dhanmondi, Dhaka", "02-8616600"),
        facility("Health Service Volunteer Center", Volunteer, 23.7954, 90.4043, "Shahbag, Dhaka", "02-8616600"),
    ]
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogFile {
    List(Vec<Facility>),
    Wrapped { facilities: Vec<Facility> },
}

/// Parse a catalog from JSON: either an array of facilities or
/// `{ "facilities": [...] }`
pub fn parse_catalog(json: &str) -> CareResult<Vec<Facility>> {
    let parsed: CatalogFile = serde_json::from_str(json)
        .map_err(|e| CareError::InvalidRecord(format!("facility catalog: {}", e)))?;
    let facilities = match parsed {
        CatalogFile::List(list) => list,
        CatalogFile::Wrapped { facilities } => facilities,
    };
    for f in &facilities {
        f.validate()?;
    }
    Ok(facilities)
}

pub fn load_catalog_file<P: AsRef<Path>>(path: P) -> CareResult<Vec<Facility>> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|e| {
        CareError::ConfigError(format!("cannot read catalog {}: {}", path.display(), e))
    })?;
    parse_catalog(&contents)
}

#[derive(Serialize, Deserialize)]
struct CachedCatalog {
    id: String,
    saved_at: chrono::DateTime<Utc>,
    facilities: Vec<Facility>,
}

impl FacilityDirectory {
    /// Save the current snapshot to the facility cache collection
    pub async fn persist(&self, store: &RecordStore) -> CareResult<usize> {
        let snapshot = self.snapshot();
        let cached = CachedCatalog {
            id: CATALOG_KEY.to_string(),
            saved_at: Utc::now(),
            facilities: snapshot.to_vec(),
        };
        store.put(FACILITY_CACHE, serde_json::to_value(&cached)?).await?;
        Ok(snapshot.len())
    }

    /// Load the cached snapshot, if one was persisted.
    /// Returns the number of facilities restored.
    pub async fn restore(&self, store: &RecordStore) -> CareResult<Option<usize>> {
        let id = RecordId::from(CATALOG_KEY);
        let Some(record) = store.get(FACILITY_CACHE, &id).await? else {
            return Ok(None);
        };
        let cached: CachedCatalog = record.decode()?;
        self.load(cached.facilities).map(Some)
    }
}
