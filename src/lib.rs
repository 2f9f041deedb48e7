pub mod config;
pub mod connectivity;
pub mod context;
pub mod error;
pub mod facility;
pub mod journal;
pub mod profile;
pub mod session;
pub mod storage;
pub mod sync;

pub use config::AppConfig;
pub use connectivity::{Connectivity, ConnectivityEvent, ConnectivityMonitor, ConnectivityProbe, FixedProbe, TcpProbe};
pub use context::AppContext;
pub use error::{CareError, CareResult};
pub use facility::{Facility, FacilityDirectory, FacilityFilter, FacilityType, GeoPoint};
pub use journal::{CommunityBoard, CommunityPost, HealthJournal, Observation, ObservationKind, Reminder, ReminderBook};
pub use profile::{Profile, ProfileFields, ProfileManager};
pub use session::{Preferences, SessionState};
pub use storage::{Record, RecordId, RecordStore, WriteOp};
pub use sync::{FlushOutcome, PendingLog, QueueConfig, RemoteEndpoint, RemoteError, SyncCoordinator, SyncReport, WriteGate, WriteOutcome};
