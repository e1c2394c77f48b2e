//! Rollback manager — snapshots and restores the effective configuration.
//!
//! A rollback runs under the same configuration lock as a deployment:
//!
//! 1. resolve the target snapshot (nothing is touched if there is none)
//! 2. keep a forensic snapshot of the configuration being discarded
//! 3. stop running units, gracefully first, forced if that fails
//! 4. replace the configuration with the snapshot's
//! 5. restart units, group by group when the restored manifest says how
//! 6. check that at least one unit is running
//!
//! A failed post-check is reported, never answered with another rollback.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use tenant_core::{ConfigError, OrchestratorConfig, ServiceGroup};
use tenantgrid_runtime::{ContainerRuntime, StopMode};
use tenantgrid_state::{
    ConfigStore, DeploymentSnapshot, SnapshotArchive, SnapshotReason, SnapshotSummary,
};

use crate::error::{RollbackError, RollbackResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostCheck {
    pub running: Vec<String>,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RollbackReport {
    pub target: SnapshotSummary,
    /// Copy of the configuration that was replaced, if there was one.
    pub forensic_snapshot: Option<String>,
    pub stopped: Vec<String>,
    /// Graceful stop failed and units were killed.
    pub forced: bool,
    pub restarted: Vec<String>,
    pub post_check: PostCheck,
}

pub struct RollbackManager {
    runtime: Arc<dyn ContainerRuntime>,
    store: ConfigStore,
    snapshots: SnapshotArchive,
    stop_grace: Duration,
}

impl RollbackManager {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        store: ConfigStore,
        snapshots: SnapshotArchive,
        stop_grace: Duration,
    ) -> Self {
        Self {
            runtime,
            store,
            snapshots,
            stop_grace,
        }
    }

    pub fn from_config(
        runtime: Arc<dyn ContainerRuntime>,
        config: &OrchestratorConfig,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(
            runtime,
            ConfigStore::new(&config.paths.config_dir, &config.runtime.env_file),
            SnapshotArchive::new(&config.paths.snapshot_dir),
            config.stop_grace()?,
        ))
    }

    pub fn snapshots(&self) -> &SnapshotArchive {
        &self.snapshots
    }

    /// Snapshot the current effective configuration.
    pub fn snapshot(&self, reason: SnapshotReason) -> RollbackResult<SnapshotSummary> {
        let _lock = self.store.lock()?;
        let current = self.store.read_effective()?;
        if current.is_empty() {
            return Err(RollbackError::NothingToSnapshot);
        }
        let tenant = self.current_tenant();
        Ok(self.snapshots.create(tenant.as_deref(), reason, &current)?)
    }

    /// Restore snapshot `id`, or the most recent restorable one.
    pub async fn rollback(&self, id: Option<&str>) -> RollbackResult<RollbackReport> {
        let lock = self.store.lock()?;
        let target = self.resolve_target(id)?;
        info!(snapshot = %target.id, reason = %target.reason, "rolling back");

        let current = self.store.read_effective()?;
        let forensic_snapshot = if current.is_empty() {
            None
        } else {
            let tenant = self.current_tenant();
            let summary =
                self.snapshots
                    .create(tenant.as_deref(), SnapshotReason::PreRollback, &current)?;
            Some(summary.id)
        };

        let running = self.runtime.running_units().await?;
        let forced = self.stop_all(&running).await?;

        self.store
            .replace(&lock, &target.config)
            .map_err(RollbackError::Restore)?;
        debug!(snapshot = %target.id, files = target.config.files.len(), "configuration restored");

        let restarted = self.restart().await?;
        let post_check = self.post_check().await;
        if post_check.passed {
            info!(snapshot = %target.id, running = post_check.running.len(), "rollback complete");
        } else {
            error!(snapshot = %target.id, "rollback finished but no unit is running");
        }

        Ok(RollbackReport {
            target: SnapshotSummary::from(&target),
            forensic_snapshot,
            stopped: running,
            forced,
            restarted,
            post_check,
        })
    }

    /// Forensic snapshots are never picked implicitly; they hold the state
    /// a previous rollback discarded. Nor are snapshots taken for another
    /// tenant, when the deployed tenant is known.
    fn resolve_target(&self, id: Option<&str>) -> RollbackResult<DeploymentSnapshot> {
        match id {
            Some(id) => self
                .snapshots
                .get(id)?
                .ok_or_else(|| RollbackError::SnapshotNotFound(id.to_string())),
            None => {
                let tenant = self.current_tenant();
                let latest = self
                    .snapshots
                    .list()?
                    .into_iter()
                    .rev()
                    .filter(|s| s.reason != SnapshotReason::PreRollback)
                    .find(|s| match (&tenant, &s.tenant_id) {
                        (Some(current), Some(owner)) => current == owner,
                        _ => true,
                    })
                    .ok_or(RollbackError::NoSnapshots)?;
                self.snapshots
                    .get(&latest.id)?
                    .ok_or(RollbackError::SnapshotNotFound(latest.id))
            }
        }
    }

    /// Returns whether the stop had to be forced.
    async fn stop_all(&self, units: &[String]) -> RollbackResult<bool> {
        if units.is_empty() {
            return Ok(false);
        }
        let graceful = StopMode::Graceful {
            timeout: self.stop_grace,
        };
        match self.runtime.stop(units, graceful).await {
            Ok(()) => Ok(false),
            Err(e) => {
                warn!(units = units.len(), error = %e, "graceful stop failed; forcing");
                self.runtime
                    .stop(units, StopMode::Force)
                    .await
                    .map_err(RollbackError::Stop)?;
                Ok(true)
            }
        }
    }

    async fn restart(&self) -> RollbackResult<Vec<String>> {
        let manifest = match self.store.read_manifest() {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "restored manifest unreadable; starting all defined units");
                None
            }
        };

        let mut restarted = Vec::new();
        match manifest.filter(|m| !m.groups.is_empty()) {
            Some(manifest) => {
                for group in ServiceGroup::ALL {
                    let units = manifest.groups.units(group);
                    if units.is_empty() {
                        continue;
                    }
                    debug!(%group, units = units.len(), "restarting group");
                    self.runtime
                        .start_group(units)
                        .await
                        .map_err(RollbackError::Restart)?;
                    restarted.extend(units.iter().cloned());
                }
            }
            None => {
                let units = self
                    .runtime
                    .defined_units()
                    .await
                    .map_err(RollbackError::Restart)?;
                if !units.is_empty() {
                    self.runtime
                        .start_group(&units)
                        .await
                        .map_err(RollbackError::Restart)?;
                }
                restarted = units;
            }
        }
        Ok(restarted)
    }

    async fn post_check(&self) -> PostCheck {
        match self.runtime.running_units().await {
            Ok(running) => PostCheck {
                passed: !running.is_empty(),
                running,
                error: None,
            },
            Err(e) => PostCheck {
                running: Vec::new(),
                passed: false,
                error: Some(e.to_string()),
            },
        }
    }

    fn current_tenant(&self) -> Option<String> {
        match self.store.read_manifest() {
            Ok(m) => m.map(|m| m.tenant_id),
            Err(e) => {
                debug!(error = %e, "no readable manifest");
                None
            }
        }
    }
}
