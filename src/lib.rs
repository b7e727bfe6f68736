//! Sheba cache: offline-first catalog of citizen services.
//!
//! A SQLite-backed local store kept in step with a hosted catalog, plus a
//! search waterfall that escalates from local results to remote keyword
//! search and finally to a generated entry.

pub mod connectivity;
pub mod error;
pub mod firestore;
pub mod generate;
pub mod live;
pub mod llm;
pub mod model;
pub mod remote;
pub mod search;
pub mod store;
pub mod sync;

use std::path::PathBuf;

pub use connectivity::Connectivity;
pub use error::StoreError;
pub use live::LiveQuery;
pub use model::{Favorite, HistoryEntry, LocalizedString, ServiceDetail, ServiceSummary};
pub use remote::{RemoteCatalog, RemoteError};
pub use search::{Escalation, EscalationOutcome, SearchOutcome, SearchWaterfall};
pub use store::LocalStore;
pub use sync::{RefreshOutcome, RetryPolicy, SyncCoordinator, SyncError};

/// Resolve the database path from env var or default location.
pub fn resolve_db_path() -> PathBuf {
    if let Ok(path) = std::env::var("SHEBA_DB") {
        return PathBuf::from(path);
    }

    let data_dir = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    data_dir.join("sheba").join("cache.db")
}
