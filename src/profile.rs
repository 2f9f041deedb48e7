//! The single local user profile

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{CareError, CareResult};
use crate::session::SessionState;
use crate::storage::collection::PROFILE;
use crate::storage::{RecordId, RecordStore};

/// Key the profile is stored under; there is at most one profile
pub const PROFILE_KEY: &str = "userProfile";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    /// Age bracket (child, teen, adult, elderly)
    pub age: String,
    pub gender: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub religion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default)]
    pub health_conditions: Vec<String>,
    pub login_time: DateTime<Utc>,
}

/// Profile as entered by the user, before validation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProfileFields {
    pub age: Option<String>,
    pub gender: Option<String>,
    pub religion: Option<String>,
    pub region: Option<String>,
    pub health_conditions: Vec<String>,
}

fn required(value: &Option<String>, field: &str) -> CareResult<String> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(CareError::ValidationFailed(format!("{} is required", field))),
    }
}

fn optional(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl ProfileFields {
    fn into_profile(self, login_time: DateTime<Utc>) -> CareResult<Profile> {
        let age = required(&self.age, "age")?;
        let gender = required(&self.gender, "gender")?;
        // First occurrence wins, order kept
        let mut seen = HashSet::new();
        let health_conditions: Vec<String> = self
            .health_conditions
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty() && seen.insert(*c))
            .map(str::to_string)
            .collect();

        Ok(Profile {
            id: PROFILE_KEY.to_string(),
            age,
            gender,
            religion: optional(&self.religion),
            region: optional(&self.region),
            health_conditions,
            login_time,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ProfileManager {
    store: RecordStore,
}

impl ProfileManager {
    pub fn new(store: RecordStore) -> Self {
        Self { store }
    }

    /// Validate and store the profile, replacing any previous one
    pub async fn save(&self, fields: ProfileFields, session: &mut SessionState) -> CareResult<Profile> {
        let profile = fields.into_profile(Utc::now())?;
        self.store
            .put(PROFILE, serde_json::to_value(&profile)?)
            .await?;
        session.logged_in = true;
        tracing::info!("Profile saved ({} / {})", profile.age, profile.gender);
        Ok(profile)
    }

    /// Delete the profile and log the session out.
    /// Returns whether a profile existed.
    pub async fn clear(&self, session: &mut SessionState) -> CareResult<bool> {
        let existed = self
            .store
            .delete(PROFILE, &RecordId::from(PROFILE_KEY))
            .await?;
        session.logged_in = false;
        Ok(existed)
    }

    pub async fn current(&self) -> CareResult<Option<Profile>> {
        match self.store.get(PROFILE, &RecordId::from(PROFILE_KEY)).await? {
            Some(record) => record.decode().map(Some),
            None => Ok(None),
        }
    }

    /// Mark the session logged in when a profile is already stored
    pub async fn resume(&self, session: &mut SessionState) -> CareResult<Option<Profile>> {
        let profile = self.current().await?;
        session.logged_in = profile.is_some();
        Ok(profile)
    }
}
