//! Application configuration
//!
//! Settings come from an optional `carepoint.toml`, then environment
//! variables, then command-line flags (applied by the binary).
//!
//! ## Environment Variables
//!
//! - `CAREPOINT_DATA_DIR` - Directory of the local database
//! - `CAREPOINT_DEVICE_ID` - Identifier sent with mirrored writes
//! - `CAREPOINT_REMOTE_URL` - Base URL of the sync endpoint
//! - `CAREPOINT_PROBE_ADDR` - `host:port` used to detect connectivity
//! - `CAREPOINT_FACILITY_CATALOG` - JSON facility catalog to load
//! - `CAREPOINT_OFFLINE` - `true`/`1` starts offline without probing
//!
//! These can be set in a `.env` file in the working directory.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CareError, CareResult};
use crate::facility::GeoPoint;
use crate::sync::QueueConfig;

/// Configuration file name
pub const CONFIG_FILE_NAME: &str = "carepoint.toml";

/// Environment variable names
pub const ENV_DATA_DIR: &str = "CAREPOINT_DATA_DIR";
pub const ENV_DEVICE_ID: &str = "CAREPOINT_DEVICE_ID";
pub const ENV_REMOTE_URL: &str = "CAREPOINT_REMOTE_URL";
pub const ENV_PROBE_ADDR: &str = "CAREPOINT_PROBE_ADDR";
pub const ENV_FACILITY_CATALOG: &str = "CAREPOINT_FACILITY_CATALOG";
pub const ENV_OFFLINE: &str = "CAREPOINT_OFFLINE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory of the local database
    pub data_dir: PathBuf,
    /// Generated and stored in the data directory when unset
    pub device_id: Option<String>,
    /// Base URL of the sync endpoint; writes stay local when unset
    pub remote_url: Option<String>,
    pub remote_timeout_ms: u64,
    /// Probed with a TCP connect at startup; defaults to the remote's
    /// host and port
    pub probe_addr: Option<String>,
    pub probe_timeout_ms: u64,
    /// Start offline and skip the probe; writes are queued and nothing is
    /// flushed at startup
    pub offline: bool,
    /// JSON catalog replacing the built-in facilities
    pub facility_catalog: Option<PathBuf>,
    pub queue: QueueConfig,
    /// Default location for facility searches
    pub home: GeoPoint,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./carepoint-data"),
            device_id: None,
            remote_url: None,
            remote_timeout_ms: 10_000,
            probe_addr: None,
            probe_timeout_ms: 2_000,
            offline: false,
            facility_catalog: None,
            queue: QueueConfig::default(),
            home: GeoPoint::new(23.8103, 90.4125),
        }
    }
}

impl AppConfig {
    /// Load configuration.
    ///
    /// An explicit `path` must exist; otherwise `carepoint.toml` in the
    /// working directory is used when present. A `.env` file is loaded
    /// before environment overrides are applied.
    pub fn load(path: Option<&Path>) -> CareResult<Self> {
        // Missing .env is fine
        let _ = dotenvy::dotenv();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(CONFIG_FILE_NAME).exists() => Self::from_file(Path::new(CONFIG_FILE_NAME))?,
            None => Self::default(),
        };

        config.apply_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> CareResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CareError::ConfigError(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> CareResult<Self> {
        toml::from_str(content).map_err(|e| CareError::ConfigError(e.to_string()))
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// production)
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(dir) = var(ENV_DATA_DIR) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(id) = var(ENV_DEVICE_ID) {
            self.device_id = Some(id);
        }
        if let Some(url) = var(ENV_REMOTE_URL) {
            self.remote_url = Some(url);
        }
        if let Some(addr) = var(ENV_PROBE_ADDR) {
            self.probe_addr = Some(addr);
        }
        if let Some(path) = var(ENV_FACILITY_CATALOG) {
            self.facility_catalog = Some(PathBuf::from(path));
        }
        if let Some(flag) = var(ENV_OFFLINE) {
            self.offline = matches!(flag.trim().to_lowercase().as_str(), "1" | "true" | "yes");
        }
    }

    pub fn validate(&self) -> CareResult<()> {
        if let Some(url) = &self.remote_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(CareError::ConfigError(format!(
                    "remote_url must be an http(s) URL, got '{}'",
                    url
                )));
            }
        }
        if self.queue.max_count == 0 || self.queue.max_bytes == 0 {
            return Err(CareError::ConfigError(
                "queue limits must be greater than zero".to_string(),
            ));
        }
        self.home
            .validate()
            .map_err(|e| CareError::ConfigError(format!("home: {}", e)))
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn to_toml(&self) -> CareResult<String> {
        toml::to_string_pretty(self).map_err(|e| CareError::ConfigError(e.to_string()))
    }
}
