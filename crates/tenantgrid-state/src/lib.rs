//! tenantgrid-state — persisted state for TenantGrid.
//!
//! Three stores, one per kind of state:
//!
//! - [`StateStore`]: redb ledger of finished deployment attempts.
//! - [`ConfigStore`]: the current effective configuration on disk, guarded
//!   by an advisory [`ConfigLock`] shared by deployment and rollback.
//! - [`SnapshotArchive`]: immutable, timestamped copies of effective
//!   configuration used as rollback targets.

pub mod config_store;
pub mod error;
pub mod snapshot;
pub mod store;
pub mod tables;
pub mod types;

pub use config_store::{ConfigLock, ConfigStore, LOCK_FILE, MANIFEST_FILE};
pub use error::{StateError, StateResult};
pub use snapshot::SnapshotArchive;
pub use store::StateStore;
pub use types::*;
