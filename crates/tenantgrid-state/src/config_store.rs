//! ConfigStore — the current effective configuration on the deployment host.
//!
//! The config dir is owned entirely by the orchestrator: rendered
//! descriptors, the effective environment file and the deployment manifest
//! all live there. Writers must hold a [`ConfigLock`], an exclusive OS
//! lock on a file inside the dir; deployment and rollback both take it for
//! their whole duration. The kernel drops the lock when its holder exits,
//! so a crashed run never leaves the store locked.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use fs2::FileExt;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{StateError, StateResult};
use crate::types::{DeploymentManifest, EffectiveConfig};

/// Advisory lock file name; never part of the effective configuration.
pub const LOCK_FILE: &str = ".tenantgrid.lock";

/// Deployment manifest file name.
pub const MANIFEST_FILE: &str = "tenantgrid-manifest.json";

/// Handle to the config dir.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    dir: PathBuf,
    env_file: String,
}

/// Held for the duration of a deployment or rollback. Released on drop.
///
/// The lock file itself stays in place; only the lock on it matters. Its
/// content names the last holder and is informational.
#[derive(Debug)]
pub struct ConfigLock {
    file: File,
    path: PathBuf,
}

impl Drop for ConfigLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %e, "failed to release config lock");
        } else {
            debug!(path = %self.path.display(), "config lock released");
        }
    }
}

impl ConfigStore {
    pub fn new(dir: impl Into<PathBuf>, env_file: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            env_file: env_file.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn env_path(&self) -> PathBuf {
        self.dir.join(&self.env_file)
    }

    /// Take the exclusive lock. Fails with `Locked` if another operation
    /// holds it.
    pub fn lock(&self) -> StateResult<ConfigLock> {
        std::fs::create_dir_all(&self.dir).map_err(|e| StateError::io(&self.dir, e))?;
        let path = self.dir.join(LOCK_FILE);
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| StateError::io(&path, e))?;

        if let Err(e) = file.try_lock_exclusive() {
            if e.raw_os_error() != fs2::lock_contended_error().raw_os_error() {
                return Err(StateError::io(&path, e));
            }
            let mut holder = String::new();
            if file.read_to_string(&mut holder).is_err() || holder.trim().is_empty() {
                holder = "unknown holder".to_string();
            }
            return Err(StateError::Locked {
                path: path.display().to_string(),
                holder: holder.trim().to_string(),
            });
        }

        let holder = format!(
            "pid {} since {}",
            std::process::id(),
            Utc::now().to_rfc3339()
        );
        record_holder(&mut file, &holder).map_err(|e| StateError::io(&path, e))?;
        debug!(path = %path.display(), "config lock acquired");
        Ok(ConfigLock { file, path })
    }

    /// Read every file of the current configuration. A missing dir is an
    /// empty configuration.
    pub fn read_effective(&self) -> StateResult<EffectiveConfig> {
        read_tree(&self.dir)
    }

    /// Directory the renderer writes into before promotion. Sibling of the
    /// config dir so a failed render never touches the live configuration.
    pub fn staging_dir(&self) -> PathBuf {
        let mut name = self
            .dir
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".staging");
        self.dir.with_file_name(name)
    }

    /// Create an empty staging dir, discarding leftovers of earlier runs.
    pub fn prepare_staging(&self, _lock: &ConfigLock) -> StateResult<PathBuf> {
        let staging = self.staging_dir();
        if staging.exists() {
            std::fs::remove_dir_all(&staging).map_err(|e| StateError::io(&staging, e))?;
        }
        std::fs::create_dir_all(&staging).map_err(|e| StateError::io(&staging, e))?;
        Ok(staging)
    }

    /// Make the staged render the effective configuration.
    pub fn promote_staging(&self, lock: &ConfigLock) -> StateResult<EffectiveConfig> {
        let staging = self.staging_dir();
        let config = read_tree(&staging)?;
        self.replace(lock, &config)?;
        std::fs::remove_dir_all(&staging).map_err(|e| StateError::io(&staging, e))?;
        Ok(config)
    }

    /// Replace the whole configuration with `config`.
    pub fn replace(&self, lock: &ConfigLock, config: &EffectiveConfig) -> StateResult<()> {
        self.clear(lock)?;
        for (rel, content) in &config.files {
            let path = self.resolve(rel)?;
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| StateError::io(parent, e))?;
            }
            std::fs::write(&path, content).map_err(|e| StateError::io(&path, e))?;
        }
        debug!(
            dir = %self.dir.display(),
            files = config.files.len(),
            "effective configuration replaced"
        );
        Ok(())
    }

    /// Remove everything but the lock file.
    pub fn clear(&self, _lock: &ConfigLock) -> StateResult<()> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| StateError::io(&self.dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| StateError::io(&self.dir, e))?;
            if entry.file_name() == LOCK_FILE {
                continue;
            }
            let path = entry.path();
            let result = if path.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            result.map_err(|e| StateError::io(&path, e))?;
        }
        Ok(())
    }

    /// Write the effective environment file as `KEY="value"` lines.
    pub fn write_environment<'a>(
        &self,
        _lock: &ConfigLock,
        vars: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> StateResult<PathBuf> {
        let mut out = String::from("# Generated by tenantgrid. Do not edit.\n");
        for (key, value) in vars {
            out.push_str(key);
            out.push_str("=\"");
            out.push_str(&escape_env_value(value));
            out.push_str("\"\n");
        }
        let path = self.env_path();
        write_private(&path, out.as_bytes())?;
        Ok(path)
    }

    pub fn write_manifest(
        &self,
        _lock: &ConfigLock,
        manifest: &DeploymentManifest,
    ) -> StateResult<()> {
        let path = self.dir.join(MANIFEST_FILE);
        let json = serde_json::to_vec_pretty(manifest)
            .map_err(|e| StateError::Serialize(e.to_string()))?;
        std::fs::write(&path, json).map_err(|e| StateError::io(&path, e))
    }

    pub fn read_manifest(&self) -> StateResult<Option<DeploymentManifest>> {
        let path = self.dir.join(MANIFEST_FILE);
        match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StateError::Deserialize(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StateError::io(&path, e)),
        }
    }

    /// Map a relative key back to a path inside the dir, refusing escapes.
    fn resolve(&self, rel: &str) -> StateResult<PathBuf> {
        let path = Path::new(rel);
        let escapes = path.is_absolute()
            || path
                .components()
                .any(|c| !matches!(c, std::path::Component::Normal(_)));
        if escapes || rel == LOCK_FILE {
            return Err(StateError::io(path, "path escapes the config dir"));
        }
        Ok(self.dir.join(path))
    }
}

fn record_holder(file: &mut File, holder: &str) -> std::io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(holder.as_bytes())
}

fn read_tree(root: &Path) -> StateResult<EffectiveConfig> {
    let mut config = EffectiveConfig::default();
    if !root.exists() {
        return Ok(config);
    }
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| StateError::io(root, e))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = relative_key(root, entry.path())?;
        if rel == LOCK_FILE {
            continue;
        }
        let content =
            std::fs::read_to_string(entry.path()).map_err(|e| StateError::io(entry.path(), e))?;
        config.files.insert(rel, content);
    }
    Ok(config)
}

fn relative_key(root: &Path, path: &Path) -> StateResult<String> {
    let rel = path
        .strip_prefix(root)
        .map_err(|e| StateError::io(path, e))?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}

fn escape_env_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '$' => out.push_str("$$"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(unix)]
fn write_private(path: &Path, bytes: &[u8]) -> StateResult<()> {
    use std::os::unix::fs::OpenOptionsExt;
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .map_err(|e| StateError::io(path, e))?;
    file.write_all(bytes).map_err(|e| StateError::io(path, e))
}

#[cfg(not(unix))]
fn write_private(path: &Path, bytes: &[u8]) -> StateResult<()> {
    std::fs::write(path, bytes).map_err(|e| StateError::io(path, e))
}
