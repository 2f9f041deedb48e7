//! Application context
//!
//! Owns every component of a running client and the background task that
//! flushes the pending log when connectivity returns.

use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::config::AppConfig;
use crate::connectivity::{
    Connectivity, ConnectivityMonitor, ConnectivityProbe, FixedProbe, TcpProbe,
};
use crate::error::{CareError, CareResult};
use crate::facility::{builtin_catalog, load_catalog_file, FacilityDirectory};
use crate::journal::{CommunityBoard, HealthJournal, ReminderBook};
use crate::profile::ProfileManager;
use crate::session::{Preferences, SessionState};
use crate::storage::RecordStore;
use crate::sync::{HttpRemote, PendingLog, RemoteEndpoint, SyncCoordinator, WriteGate};

const DEVICE_ID_FILE: &str = "device_id";

pub struct AppContext {
    pub config: AppConfig,
    pub device_id: String,
    pub store: RecordStore,
    pub monitor: Arc<ConnectivityMonitor>,
    pub coordinator: Arc<SyncCoordinator>,
    pub gate: WriteGate,
    pub profiles: ProfileManager,
    pub health: HealthJournal,
    pub reminders: ReminderBook,
    pub community: CommunityBoard,
    pub facilities: FacilityDirectory,
    pub session: SessionState,
    sync_task: Option<JoinHandle<()>>,
}

impl AppContext {
    /// Open the context described by `config`, probing connectivity and
    /// building the HTTP remote when one is configured
    pub async fn open(config: AppConfig) -> CareResult<Self> {
        let device_id = resolve_device_id(&config)?;

        let remote: Option<Arc<dyn RemoteEndpoint>> = match &config.remote_url {
            Some(url) => Some(Arc::new(HttpRemote::new(
                url,
                &device_id,
                config.remote_timeout(),
            )?)),
            None => None,
        };

        let probe: Box<dyn ConnectivityProbe> = match probe_addr(&config) {
            Some(addr) if !config.offline => {
                Box::new(TcpProbe::new(&addr, config.probe_timeout()))
            }
            // Nothing to reach: local writes apply directly unless forced offline
            _ => Box::new(FixedProbe(!config.offline)),
        };

        Self::open_with(config, device_id, probe.as_ref(), remote).await
    }

    /// Open with an explicit probe and remote endpoint. `config.offline`
    /// wins over the probe.
    pub async fn open_with(
        config: AppConfig,
        device_id: String,
        probe: &dyn ConnectivityProbe,
        remote: Option<Arc<dyn RemoteEndpoint>>,
    ) -> CareResult<Self> {
        let store = RecordStore::open(&config.data_dir)?;
        let monitor = if config.offline {
            tracing::info!("Starting offline, pending writes stay queued");
            Arc::new(ConnectivityMonitor::new(Connectivity::Offline))
        } else {
            Arc::new(ConnectivityMonitor::probe(probe).await)
        };
        let log = PendingLog::open(store.clone(), config.queue)?;
        let coordinator = Arc::new(SyncCoordinator::new(log, remote));
        let sync_task = coordinator.clone().start(monitor.subscribe());
        let gate = WriteGate::new(monitor.clone(), coordinator.clone());

        // Writes queued by an earlier run while offline
        if monitor.is_online() && !coordinator.pending().is_empty()? {
            match coordinator.flush().await {
                Ok(report) => tracing::info!("Startup flush: {:?}", report.outcome),
                Err(e) => tracing::warn!("Startup flush failed: {}", e),
            }
        }

        let facilities = FacilityDirectory::new();
        load_facilities(&config, &facilities, &store).await?;

        let profiles = ProfileManager::new(store.clone());
        let mut session = SessionState::new(Preferences::load(&store).await?);
        if let Some(profile) = profiles.resume(&mut session).await? {
            tracing::info!("Resumed session for {} profile", profile.age);
        }

        tracing::info!(
            "Context ready (device {}, {} facilities, remote: {})",
            device_id,
            facilities.len(),
            coordinator.has_remote()
        );

        Ok(Self {
            health: HealthJournal::new(gate.clone(), store.clone()),
            reminders: ReminderBook::new(gate.clone(), store.clone()),
            community: CommunityBoard::new(gate.clone(), store.clone()),
            config,
            device_id,
            store,
            monitor,
            coordinator,
            gate,
            profiles,
            facilities,
            session,
            sync_task: Some(sync_task),
        })
    }

    pub async fn save_preferences(&self) -> CareResult<()> {
        self.session.preferences.save(&self.store).await
    }

    /// Stop the sync task and flush the store to disk
    pub async fn close(mut self) -> CareResult<()> {
        if let Some(task) = self.sync_task.take() {
            task.abort();
            let _ = task.await;
        }
        self.store.flush()
    }
}

impl Drop for AppContext {
    fn drop(&mut self) {
        if let Some(task) = self.sync_task.take() {
            task.abort();
        }
    }
}

/// Configured probe address, or the remote endpoint's host and port
fn probe_addr(config: &AppConfig) -> Option<String> {
    if let Some(addr) = &config.probe_addr {
        return Some(addr.clone());
    }
    let url = reqwest::Url::parse(config.remote_url.as_deref()?).ok()?;
    let host = url.host_str()?;
    let port = url.port_or_known_default()?;
    Some(format!("{}:{}", host, port))
}

/// Configured device id, or one generated on first start and kept in the
/// data directory
fn resolve_device_id(config: &AppConfig) -> CareResult<String> {
    if let Some(id) = &config.device_id {
        return Ok(id.clone());
    }
    let path = config.data_dir.join(DEVICE_ID_FILE);
    if path.exists() {
        let id = std::fs::read_to_string(&path)?.trim().to_string();
        if !id.is_empty() {
            return Ok(id);
        }
    }
    std::fs::create_dir_all(&config.data_dir)?;
    let id = uuid::Uuid::new_v4().to_string();
    std::fs::write(&path, &id)?;
    Ok(id)
}

async fn load_facilities(
    config: &AppConfig,
    facilities: &FacilityDirectory,
    store: &RecordStore,
) -> CareResult<()> {
    if let Some(path) = &config.facility_catalog {
        let catalog = load_catalog_file(path)?;
        facilities.load(catalog)?;
        facilities.persist(store).await?;
        return Ok(());
    }

    match facilities.restore(store).await {
        Ok(Some(count)) => {
            tracing::debug!("Restored {} cached facilities", count);
            return Ok(());
        }
        Ok(None) => {}
        Err(CareError::InvalidRecord(e)) => {
            tracing::warn!("Ignoring unreadable facility cache: {}", e);
        }
        Err(e) => return Err(e),
    }

    facilities.load(builtin_catalog())?;
    Ok(())
}
