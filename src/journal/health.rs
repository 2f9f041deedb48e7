use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use super::{decode_all, non_empty};
use crate::error::{CareError, CareResult};
use crate::storage::collection::OBSERVATIONS;
use crate::storage::{RecordStore, WriteOp};
use crate::sync::{WriteGate, WriteOutcome};

/// What was measured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ObservationKind {
    /// Self-reported score
    Mood,
    /// Systolic in `value`, diastolic in `secondary`
    BloodPressure,
    BloodSugar,
    Weight,
    HeartRate,
    Energy,
    /// Severity in `value`, the symptom itself in the note
    Symptom,
}

impl ObservationKind {
    pub const ALL: [ObservationKind; 7] = [
        ObservationKind::Mood,
        ObservationKind::BloodPressure,
        ObservationKind::BloodSugar,
        ObservationKind::Weight,
        ObservationKind::HeartRate,
        ObservationKind::Energy,
        ObservationKind::Symptom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ObservationKind::Mood => "mood",
            ObservationKind::BloodPressure => "bloodPressure",
            ObservationKind::BloodSugar => "bloodSugar",
            ObservationKind::Weight => "weight",
            ObservationKind::HeartRate => "heartRate",
            ObservationKind::Energy => "energy",
            ObservationKind::Symptom => "symptom",
        }
    }
}

impl fmt::Display for ObservationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObservationKind {
    type Err = CareError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.replace(['-', '_'], "").to_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().to_lowercase() == wanted)
            .ok_or_else(|| CareError::ValidationFailed(format!("unknown observation type '{}'", s)))
    }
}

/// One health measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    /// Assigned by the store when the write is applied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(rename = "type")]
    pub kind: ObservationKind,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Calendar day, indexed
    pub date: NaiveDate,
    pub recorded_at: DateTime<Utc>,
}

impl Observation {
    pub fn new(kind: ObservationKind, value: f64) -> Self {
        Self::at(kind, value, Utc::now())
    }

    pub fn at(kind: ObservationKind, value: f64, recorded_at: DateTime<Utc>) -> Self {
        Self {
            id: None,
            kind,
            value,
            secondary: None,
            note: None,
            date: recorded_at.date_naive(),
            recorded_at,
        }
    }

    pub fn with_secondary(mut self, secondary: f64) -> Self {
        self.secondary = Some(secondary);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    fn validate(&self) -> CareResult<()> {
        let finite = self.value.is_finite() && self.secondary.map_or(true, f64::is_finite);
        if !finite {
            return Err(CareError::ValidationFailed(format!(
                "{} reading must be a finite number",
                self.kind
            )));
        }
        match (&self.note, self.kind) {
            (Some(note), _) => {
                non_empty(note, "note")?;
            }
            (None, ObservationKind::Symptom) => {
                return Err(CareError::ValidationFailed(
                    "symptom reading needs a note naming the symptom".to_string(),
                ));
            }
            (None, _) => {}
        }
        Ok(())
    }
}

/// A point on a tracking chart
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub at: DateTime<Utc>,
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary: Option<f64>,
}

#[derive(Clone)]
pub struct HealthJournal {
    gate: WriteGate,
    store: RecordStore,
}

impl HealthJournal {
    pub fn new(gate: WriteGate, store: RecordStore) -> Self {
        Self { gate, store }
    }

    /// Record a reading taken now
    pub async fn record(
        &self,
        kind: ObservationKind,
        value: f64,
        note: Option<String>,
    ) -> CareResult<WriteOutcome> {
        let mut observation = Observation::new(kind, value);
        observation.note = note;
        self.add(observation).await
    }

    pub async fn add(&self, observation: Observation) -> CareResult<WriteOutcome> {
        observation.validate()?;
        self.gate
            .submit(OBSERVATIONS, WriteOp::upsert(&observation)?)
            .await
    }

    pub async fn all(&self) -> CareResult<Vec<Observation>> {
        decode_all(self.store.get_all(OBSERVATIONS).await?)
    }

    pub async fn on_date(&self, date: NaiveDate) -> CareResult<Vec<Observation>> {
        let key = Value::String(date.to_string());
        decode_all(self.store.query_by_index(OBSERVATIONS, "date", &key).await?)
    }

    pub async fn of_kind(&self, kind: ObservationKind) -> CareResult<Vec<Observation>> {
        let key = Value::String(kind.as_str().to_string());
        decode_all(self.store.query_by_index(OBSERVATIONS, "type", &key).await?)
    }

    /// Readings of one kind in chronological order
    pub async fn series(&self, kind: ObservationKind) -> CareResult<Vec<SeriesPoint>> {
        let mut readings = self.of_kind(kind).await?;
        readings.sort_by_key(|o| o.recorded_at);
        Ok(readings
            .into_iter()
            .map(|o| SeriesPoint {
                at: o.recorded_at,
                value: o.value,
                secondary: o.secondary,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_kind_parsing() {
        assert_eq!("bloodPressure".parse::<ObservationKind>().unwrap(), ObservationKind::BloodPressure);
        assert_eq!("heart-rate".parse::<ObservationKind>().unwrap(), ObservationKind::HeartRate);
        assert_eq!("WEIGHT".parse::<ObservationKind>().unwrap(), ObservationKind::Weight);
        assert_eq!("mood".parse::<ObservationKind>().unwrap(), ObservationKind::Mood);
        assert_eq!("Energy".parse::<ObservationKind>().unwrap(), ObservationKind::Energy);
        assert!("steps".parse::<ObservationKind>().is_err());
    }

    #[test]
    fn test_wire_format() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 8, 30, 0).unwrap();
        let obs = Observation::at(ObservationKind::BloodPressure, 120.0, at).with_secondary(80.0);
        let value = serde_json::to_value(&obs).unwrap();
        assert_eq!(value["type"], "bloodPressure");
        assert_eq!(value["date"], "2026-03-01");
        assert!(value.get("id").is_none());
        assert!(value.get("note").is_none());
    }

    #[test]
    fn test_validation() {
        assert!(Observation::new(ObservationKind::Weight, f64::NAN).validate().is_err());
        assert!(Observation::new(ObservationKind::BloodPressure, 120.0)
            .with_secondary(f64::INFINITY)
            .validate()
            .is_err());
        assert!(Observation::new(ObservationKind::Weight, 61.5)
            .with_note(" ")
            .validate()
            .is_err());
        assert!(Observation::new(ObservationKind::Weight, 61.5).validate().is_ok());
        assert!(Observation::new(ObservationKind::Symptom, 2.0).validate().is_err());
        assert!(Observation::new(ObservationKind::Symptom, 2.0)
            .with_note("headache")
            .validate()
            .is_ok());
    }
}
