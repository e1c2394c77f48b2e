//! SnapshotArchive — immutable copies of effective configuration.
//!
//! One JSON archive per snapshot under the snapshot dir, named
//! `{id}.json` where the id is a UTC timestamp. Archives are written to a
//! temp file and renamed into place; an existing id is never overwritten.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::{StateError, StateResult};
use crate::types::{DeploymentSnapshot, EffectiveConfig, SnapshotReason, SnapshotSummary};

#[derive(Debug, Clone)]
pub struct SnapshotArchive {
    dir: PathBuf,
}

impl SnapshotArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Store `config` as a new snapshot.
    pub fn create(
        &self,
        tenant_id: Option<&str>,
        reason: SnapshotReason,
        config: &EffectiveConfig,
    ) -> StateResult<SnapshotSummary> {
        self.create_at(Utc::now(), tenant_id, reason, config)
    }

    /// Store `config` as a new snapshot stamped `created_at`.
    pub fn create_at(
        &self,
        created_at: DateTime<Utc>,
        tenant_id: Option<&str>,
        reason: SnapshotReason,
        config: &EffectiveConfig,
    ) -> StateResult<SnapshotSummary> {
        std::fs::create_dir_all(&self.dir).map_err(|e| StateError::io(&self.dir, e))?;

        let base = created_at.format("%Y%m%dT%H%M%S%3fZ").to_string();
        let mut id = base.clone();
        let mut n = 1;
        while self.archive_path(&id).exists() {
            id = format!("{base}-{n}");
            n += 1;
        }

        let snapshot = DeploymentSnapshot {
            id: id.clone(),
            tenant_id: tenant_id.map(str::to_string),
            created_at,
            reason,
            digest: config.digest(),
            config: config.clone(),
        };
        let json = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| StateError::Serialize(e.to_string()))?;

        let path = self.archive_path(&id);
        let tmp = self.dir.join(format!(".{id}.json.tmp"));
        std::fs::write(&tmp, json).map_err(|e| StateError::io(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| StateError::io(&path, e))?;

        info!(snapshot = %id, %reason, files = config.files.len(), "snapshot created");
        Ok(SnapshotSummary::from(&snapshot))
    }

    /// All snapshots, oldest first. Unreadable archives are skipped.
    pub fn list(&self) -> StateResult<Vec<SnapshotSummary>> {
        Ok(self
            .load_all()?
            .iter()
            .map(SnapshotSummary::from)
            .collect())
    }

    pub fn get(&self, id: &str) -> StateResult<Option<DeploymentSnapshot>> {
        validate_id(id)?;
        let path = self.archive_path(id);
        match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StateError::Deserialize(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StateError::io(&path, e)),
        }
    }

    pub fn latest(&self) -> StateResult<Option<DeploymentSnapshot>> {
        Ok(self.load_all()?.pop())
    }

    /// Delete the oldest snapshots so at most `keep` remain. Returns the
    /// deleted ids.
    pub fn prune(&self, keep: usize) -> StateResult<Vec<String>> {
        let all = self.list()?;
        let excess = all.len().saturating_sub(keep);
        let mut deleted = Vec::with_capacity(excess);
        for summary in all.into_iter().take(excess) {
            let path = self.archive_path(&summary.id);
            std::fs::remove_file(&path).map_err(|e| StateError::io(&path, e))?;
            debug!(snapshot = %summary.id, "snapshot pruned");
            deleted.push(summary.id);
        }
        Ok(deleted)
    }

    fn load_all(&self) -> StateResult<Vec<DeploymentSnapshot>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StateError::io(&self.dir, e)),
        };
        let mut snapshots = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StateError::io(&self.dir, e))?;
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || !name.ends_with(".json") {
                continue;
            }
            let parsed = std::fs::read(&path)
                .map_err(|e| e.to_string())
                .and_then(|b| {
                    serde_json::from_slice::<DeploymentSnapshot>(&b).map_err(|e| e.to_string())
                });
            match parsed {
                Ok(s) => snapshots.push(s),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable snapshot"),
            }
        }
        snapshots.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(snapshots)
    }

    fn archive_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}

fn validate_id(id: &str) -> StateResult<()> {
    let ok = !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if ok {
        Ok(())
    } else {
        Err(StateError::InvalidSnapshotId(id.to_string()))
    }
}
