use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;

use super::geo::GeoPoint;
use super::{Facility, FacilityFilter};
use crate::error::CareResult;

/// A facility matched by a query, with its distance from the query centre
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FacilityHit {
    #[serde(flatten)]
    pub facility: Facility,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,
}

/// Read-mostly facility catalog.
///
/// Queries work on an immutable snapshot; `load` swaps in a new snapshot
/// only after every entry validated.
#[derive(Debug, Default)]
pub struct FacilityDirectory {
    snapshot: RwLock<Arc<Vec<Facility>>>,
}

impl FacilityDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_catalog(facilities: Vec<Facility>) -> CareResult<Self> {
        let directory = Self::new();
        directory.load(facilities)?;
        Ok(directory)
    }

    /// Replace the catalog. Returns the number of facilities loaded.
    pub fn load(&self, facilities: Vec<Facility>) -> CareResult<usize> {
        for facility in &facilities {
            facility.validate()?;
        }
        let count = facilities.len();
        *self.snapshot.write() = Arc::new(facilities);
        tracing::debug!("Loaded {} facilities", count);
        Ok(count)
    }

    pub fn snapshot(&self) -> Arc<Vec<Facility>> {
        self.snapshot.read().clone()
    }

    pub fn len(&self) -> usize {
        self.snapshot.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.read().is_empty()
    }

    /// Facilities matching `filter`, nearest first when a centre is given.
    ///
    /// `radius_km` only applies together with `center`.
    pub fn query(
        &self,
        filter: FacilityFilter,
        center: Option<GeoPoint>,
        radius_km: Option<f64>,
    ) -> Vec<Facility> {
        self.query_with_distance(filter, center, radius_km)
            .into_iter()
            .map(|hit| hit.facility)
            .collect()
    }

    pub fn query_with_distance(
        &self,
        filter: FacilityFilter,
        center: Option<GeoPoint>,
        radius_km: Option<f64>,
    ) -> Vec<FacilityHit> {
        let snapshot = self.snapshot();
        let candidates = snapshot.iter().filter(|f| filter.matches(f));

        let Some(center) = center else {
            return candidates
                .map(|facility| FacilityHit {
                    facility: facility.clone(),
                    distance_km: None,
                })
                .collect();
        };

        let mut hits: Vec<FacilityHit> = candidates
            .map(|facility| FacilityHit {
                distance_km: Some(center.distance_km(&facility.location())),
                facility: facility.clone(),
            })
            .filter(|hit| match (radius_km, hit.distance_km) {
                (Some(radius), Some(d)) => d <= radius,
                _ => true,
            })
            .collect();

        // Stable sort: equal distances keep catalog order
        hits.sort_by(|a, b| {
            let da = a.distance_km.unwrap_or(f64::INFINITY);
            let db = b.distance_km.unwrap_or(f64::INFINITY);
            da.total_cmp(&db)
        });
        hits
    }

    /// Closest facility matching `filter`
    pub fn nearest_of(&self, filter: FacilityFilter, point: GeoPoint) -> Option<Facility> {
        self.query_with_distance(filter, Some(point), None)
            .into_iter()
            .next()
            .map(|hit| hit.facility)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facility::{builtin_catalog, FacilityType};

    fn names(facilities: &[Facility]) -> Vec<&str> {
        facilities.iter().map(|f| f.name.as_str()).collect()
    }

    #[test]
    fn test_query_without_center_keeps_catalog_order() {
        let dir = FacilityDirectory::with_catalog(builtin_catalog()).unwrap();
        let all = dir.query(FacilityFilter::All, None, None);
        assert_eq!(all.len(), 8);
        assert_eq!(all[0].name, "Dhaka Medical College Hospital");

        // Radius is ignored without a centre
        let clinics = dir.query(FacilityType::Clinic.into(), None, Some(0.1));
        assert_eq!(
            names(&clinics),
            vec!["Ibn Sina Diagnostic Center", "Popular Diagnostic Center"]
        );
    }

    #[test]
    fn test_query_sorted_by_distance() {
        let dir = FacilityDirectory::with_catalog(builtin_catalog()).unwrap();
        let home = GeoPoint::new(23.8103, 90.4125);
        let hits = dir.query_with_distance(FacilityFilter::All, Some(home), None);
        assert_eq!(hits[0].facility.name, "Labaid Pharmacy");
        assert_eq!(hits[0].distance_km, Some(0.0));
        for pair in hits.windows(2) {
            assert!(pair[0].distance_km <= pair[1].distance_km);
        }
    }

    #[test]
    fn test_equal_distances_keep_catalog_order() {
        let dir = FacilityDirectory::with_catalog(builtin_catalog()).unwrap();
        // Ibn Sina Hospital and Popular Diagnostic Center share coordinates
        let hits = dir.query(FacilityFilter::All, Some(GeoPoint::new(23.7589, 90.3876)), Some(0.5));
        assert_eq!(names(&hits), vec!["Ibn Sina Hospital", "Popular Diagnostic Center"]);
    }

    #[test]
    fn test_invalid_load_keeps_previous_snapshot() {
        let dir = FacilityDirectory::with_catalog(builtin_catalog()).unwrap();
        let mut bad = builtin_catalog();
        bad[3].lat = f64::NAN;
        assert!(dir.load(bad).is_err());
        assert_eq!(dir.len(), 8);
    }

    #[test]
    fn test_nearest_of() {
        let dir = FacilityDirectory::with_catalog(builtin_catalog()).unwrap();
        let home = GeoPoint::new(23.8103, 90.4125);
        let nearest = dir.nearest_of(FacilityType::Hospital.into(), home).unwrap();
        assert_eq!(nearest.name, "Dhaka Medical College Hospital");

        let empty = FacilityDirectory::new();
        assert!(empty.nearest_of(FacilityFilter::All, home).is_none());
    }
}
