//! tenantgrid-rollout — deployment sequencing and rollback.
//!
//! # Components
//!
//! - **`network`** — ensures declared networks exist before anything starts
//! - **`sequencer`** — the deployment state machine (render, environment,
//!   networks, core → landing → selected, verification)
//! - **`rollback`** — snapshots and restores the effective configuration
//!
//! The sequencer and the rollback manager share one [`ConfigStore`] and
//! take its lock for their whole run, so they never overlap on a host.
//!
//! [`ConfigStore`]: tenantgrid_state::ConfigStore

pub mod error;
pub mod network;
pub mod rollback;
pub mod sequencer;

pub use error::{
    DeployError, DeployErrorKind, DeployResult, ProvisionError, RollbackError, RollbackResult,
};
pub use network::{NetworkDrift, NetworkProvisioner, ProvisionReport};
pub use rollback::{PostCheck, RollbackManager, RollbackReport};
pub use sequencer::{Sequencer, SequencerSettings};
