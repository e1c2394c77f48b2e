//! Domain types persisted by TenantGrid.
//!
//! Attempt records go into the redb ledger; effective configuration and
//! snapshots live as files. Everything here is JSON-serializable.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use tenant_core::{DeploymentGroups, ServiceGroup, UnitName};

// ── Deployment attempt ────────────────────────────────────────────

/// States of the deployment sequencer, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployPhase {
    Init,
    Validating,
    Rendering,
    EnvMaterializing,
    NetworkProvisioning,
    StartingCore,
    StartingLanding,
    StartingSelected,
    Verifying,
    Succeeded,
    PartialFailure,
    Failed,
}

impl DeployPhase {
    pub fn starting(group: ServiceGroup) -> Self {
        match group {
            ServiceGroup::Core => DeployPhase::StartingCore,
            ServiceGroup::Landing => DeployPhase::StartingLanding,
            ServiceGroup::Selected => DeployPhase::StartingSelected,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeployPhase::Succeeded | DeployPhase::PartialFailure | DeployPhase::Failed
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            DeployPhase::Init => "init",
            DeployPhase::Validating => "validating",
            DeployPhase::Rendering => "rendering",
            DeployPhase::EnvMaterializing => "env_materializing",
            DeployPhase::NetworkProvisioning => "network_provisioning",
            DeployPhase::StartingCore => "starting_core",
            DeployPhase::StartingLanding => "starting_landing",
            DeployPhase::StartingSelected => "starting_selected",
            DeployPhase::Verifying => "verifying",
            DeployPhase::Succeeded => "succeeded",
            DeployPhase::PartialFailure => "partial_failure",
            DeployPhase::Failed => "failed",
        }
    }
}

impl fmt::Display for DeployPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

/// Terminal classification of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Succeeded,
    PartialFailure,
    Failed,
}

impl Verdict {
    /// Process exit code callers should map this verdict to.
    pub fn exit_code(&self) -> i32 {
        match self {
            Verdict::Succeeded => 0,
            Verdict::PartialFailure => 2,
            Verdict::Failed => 3,
        }
    }

    pub fn phase(&self) -> DeployPhase {
        match self {
            Verdict::Succeeded => DeployPhase::Succeeded,
            Verdict::PartialFailure => DeployPhase::PartialFailure,
            Verdict::Failed => DeployPhase::Failed,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Succeeded => "SUCCEEDED",
            Verdict::PartialFailure => "PARTIAL FAILURE",
            Verdict::Failed => "FAILED",
        }
    }
}

/// Per-unit health classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Unhealthy,
    TimedOut,
    /// Running without a health check; counts as healthy.
    NoHealthCheck,
}

/// Final health observation for one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitHealthReport {
    pub state: HealthState,
    /// Whether the runtime last reported the unit as running.
    pub running: bool,
    /// Number of health queries issued.
    pub polls: u32,
    /// Last runtime query error, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// A non-fatal problem recorded during an attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptWarning {
    pub phase: DeployPhase,
    pub message: String,
}

/// Why an attempt ended in `Failed` before verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    pub phase: DeployPhase,
    pub message: String,
}

/// Record of one orchestration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentAttempt {
    pub attempt_id: String,
    pub tenant_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Every phase entered, in order.
    pub transitions: Vec<DeployPhase>,
    pub groups: DeploymentGroups,
    /// Groups whose start command was issued.
    pub groups_attempted: Vec<ServiceGroup>,
    pub per_unit_health: BTreeMap<UnitName, UnitHealthReport>,
    pub warnings: Vec<AttemptWarning>,
    pub verdict: Option<Verdict>,
    pub failure: Option<FailureReason>,
    /// Snapshot taken before this attempt overwrote the configuration.
    pub pre_deploy_snapshot: Option<String>,
}

impl DeploymentAttempt {
    pub fn new(attempt_id: String, tenant_id: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            attempt_id,
            tenant_id: tenant_id.to_string(),
            started_at,
            finished_at: None,
            transitions: vec![DeployPhase::Init],
            groups: DeploymentGroups::default(),
            groups_attempted: Vec::new(),
            per_unit_health: BTreeMap::new(),
            warnings: Vec::new(),
            verdict: None,
            failure: None,
            pre_deploy_snapshot: None,
        }
    }

    /// Current (last entered) phase.
    pub fn phase(&self) -> DeployPhase {
        self.transitions.last().copied().unwrap_or(DeployPhase::Init)
    }

    /// Build the composite key for the attempts table.
    pub fn table_key(&self) -> String {
        format!(
            "{}:{:020}:{}",
            self.tenant_id,
            self.started_at.timestamp_millis().max(0),
            self.attempt_id
        )
    }
}

// ── Effective configuration ───────────────────────────────────────

/// The files making up the current effective configuration, keyed by
/// path relative to the config dir (always `/`-separated).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub files: BTreeMap<String, String>,
}

impl EffectiveConfig {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// SHA-256 over paths and contents, hex-encoded.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for (path, content) in &self.files {
            hasher.update(path.as_bytes());
            hasher.update([0u8]);
            hasher.update(content.as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }
}

/// Written next to the rendered configuration so snapshots carry the
/// group layout needed to restart units in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentManifest {
    pub tenant_id: String,
    pub domain: String,
    pub attempt_id: String,
    pub groups: DeploymentGroups,
    pub written_at: DateTime<Utc>,
}

// ── Snapshots ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotReason {
    Manual,
    PreDeploy,
    /// Forensic copy of the state a rollback is about to discard.
    PreRollback,
}

impl fmt::Display for SnapshotReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            SnapshotReason::Manual => "manual",
            SnapshotReason::PreDeploy => "pre-deploy",
            SnapshotReason::PreRollback => "pre-rollback",
        })
    }
}

/// Immutable copy of an effective configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentSnapshot {
    pub id: String,
    pub tenant_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub reason: SnapshotReason,
    pub digest: String,
    pub config: EffectiveConfig,
}

/// Listing entry for a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub id: String,
    pub tenant_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub reason: SnapshotReason,
    pub digest: String,
    pub files: usize,
}

impl From<&DeploymentSnapshot> for SnapshotSummary {
    fn from(s: &DeploymentSnapshot) -> Self {
        Self {
            id: s.id.clone(),
            tenant_id: s.tenant_id.clone(),
            created_at: s.created_at,
            reason: s.reason,
            digest: s.digest.clone(),
            files: s.config.files.len(),
        }
    }
}
