//! Error types for deployment, provisioning and rollback.

use std::time::Duration;

use thiserror::Error;

use tenant_core::{CatalogError, SelectionError, ServiceGroup};
use tenantgrid_runtime::RuntimeError;
use tenantgrid_state::{DeployPhase, StateError};

/// A network could not be ensured.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("failed to inspect network {network}: {source}")]
    Inspect {
        network: String,
        #[source]
        source: RuntimeError,
    },

    #[error("failed to create network {network}: {source}")]
    Create {
        network: String,
        #[source]
        source: RuntimeError,
    },
}

/// Fatal deployment failure, tagged with the phase it happened in.
#[derive(Debug, Error)]
#[error("deployment failed while {phase}: {kind}")]
pub struct DeployError {
    pub phase: DeployPhase,
    #[source]
    pub kind: DeployErrorKind,
}

impl DeployError {
    pub fn new(phase: DeployPhase, kind: impl Into<DeployErrorKind>) -> Self {
        Self {
            phase,
            kind: kind.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum DeployErrorKind {
    #[error("invalid tenant selection: {0}")]
    Selection(#[from] SelectionError),

    #[error("topology unusable: {0}")]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error("{group} group failed to start: {source}")]
    GroupStart {
        group: ServiceGroup,
        #[source]
        source: RuntimeError,
    },

    #[error("deployment deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),
}

pub type DeployResult<T> = Result<T, DeployError>;

/// A rollback did not complete.
///
/// Errors raised once units have started being stopped leave the host in
/// an unknown state; [`RollbackError::is_degraded`] reports that.
#[derive(Debug, Error)]
pub enum RollbackError {
    #[error("no snapshot available to roll back to")]
    NoSnapshots,

    #[error("snapshot {0} not found")]
    SnapshotNotFound(String),

    #[error("current configuration is empty; nothing to snapshot")]
    NothingToSnapshot,

    /// Failure before anything was changed.
    #[error(transparent)]
    State(#[from] StateError),

    /// Runtime failure before anything was changed.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("failed to stop running units: {0}")]
    Stop(#[source] RuntimeError),

    #[error("failed to restore configuration: {0}")]
    Restore(#[source] StateError),

    #[error("failed to restart units: {0}")]
    Restart(#[source] RuntimeError),
}

impl RollbackError {
    /// Whether the host was left in an unknown, partially restored state.
    pub fn is_degraded(&self) -> bool {
        matches!(
            self,
            RollbackError::Stop(_) | RollbackError::Restore(_) | RollbackError::Restart(_)
        )
    }
}

pub type RollbackResult<T> = Result<T, RollbackError>;
