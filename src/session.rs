//! Per-process session state and persisted user preferences

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CareError, CareResult};
use crate::storage::collection::{KEY_FIELD, PREFERENCES};
use crate::storage::{RecordId, RecordStore};

/// Key of the preferences singleton
pub const PREFERENCES_KEY: &str = "preferences";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Preferences {
    /// UI language code
    pub language: String,
    pub voice_enabled: bool,
    pub dark_mode: bool,
    pub large_text: bool,
    pub high_contrast: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            language: "bn".to_string(),
            voice_enabled: true,
            dark_mode: false,
            large_text: false,
            high_contrast: false,
        }
    }
}

impl Preferences {
    /// Read the stored preferences, falling back to defaults
    pub async fn load(store: &RecordStore) -> CareResult<Self> {
        match store.get(PREFERENCES, &RecordId::from(PREFERENCES_KEY)).await? {
            Some(record) => record.decode(),
            None => Ok(Self::default()),
        }
    }

    pub async fn save(&self, store: &RecordStore) -> CareResult<()> {
        let mut value = serde_json::to_value(self)?;
        let Value::Object(map) = &mut value else {
            return Err(CareError::InvalidRecord(
                "preferences must serialize to an object".to_string(),
            ));
        };
        map.insert(KEY_FIELD.to_string(), Value::from(PREFERENCES_KEY));
        store.put(PREFERENCES, value).await?;
        Ok(())
    }

    /// Set a preference by name from its textual form
    pub fn set(&mut self, name: &str, value: &str) -> CareResult<()> {
        let flag = || -> CareResult<bool> {
            value.parse().map_err(|_| {
                CareError::ValidationFailed(format!("'{}' expects true or false, got '{}'", name, value))
            })
        };
        match name {
            "language" => {
                if value.trim().is_empty() {
                    return Err(CareError::ValidationFailed("language must not be empty".to_string()));
                }
                self.language = value.trim().to_string();
            }
            "voiceEnabled" | "voice_enabled" => self.voice_enabled = flag()?,
            "darkMode" | "dark_mode" => self.dark_mode = flag()?,
            "largeText" | "large_text" => self.large_text = flag()?,
            "highContrast" | "high_contrast" => self.high_contrast = flag()?,
            other => {
                return Err(CareError::ValidationFailed(format!("unknown preference '{}'", other)))
            }
        }
        Ok(())
    }
}

/// State of the running session, owned by the application context
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub logged_in: bool,
    pub preferences: Preferences,
}

impl SessionState {
    pub fn new(preferences: Preferences) -> Self {
        Self {
            logged_in: false,
            preferences,
        }
    }
}
