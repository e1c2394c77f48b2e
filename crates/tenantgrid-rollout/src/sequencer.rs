//! Deployment sequencer — drives one deployment attempt through its phases.
//!
//! ```text
//! Init → Validating → Rendering → EnvMaterializing → NetworkProvisioning
//!      → StartingCore → StartingLanding → StartingSelected → Verifying
//!      → Succeeded | PartialFailure | Failed
//! ```
//!
//! Phases run strictly in order. A fatal error ends the attempt as
//! `Failed` in the phase where it happened; nothing started earlier is
//! stopped. Warnings never halt the run and always end up in the attempt.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use tenant_core::credentials;
use tenant_core::{
    resolve, ConfigError, CredentialSource, NetworkSpec, OrchestratorConfig, RuntimeTopology,
    ServiceGroup, TenantSelection,
};
use tenantgrid_health::{aggregate_verdict, HealthVerifier};
use tenantgrid_runtime::{ContainerRuntime, TemplateRenderer};
use tenantgrid_state::{
    AttemptWarning, ConfigLock, ConfigStore, DeployPhase, DeploymentAttempt, DeploymentManifest,
    FailureReason, SnapshotArchive, SnapshotReason, StateStore, Verdict,
};

use crate::error::{DeployError, DeployErrorKind, DeployResult};
use crate::network::NetworkProvisioner;

/// Fixed inputs of every attempt, taken from the orchestrator config.
#[derive(Debug, Clone, Default)]
pub struct SequencerSettings {
    pub core: Vec<String>,
    pub landing: Vec<String>,
    pub networks: Vec<NetworkSpec>,
    /// Merged in order; later sources win.
    pub credential_sources: Vec<CredentialSource>,
    pub critical_keys: Vec<String>,
    /// Snapshot the current configuration before overwriting it.
    pub auto_snapshot: bool,
    /// Bound on the whole attempt.
    pub timeout: Option<Duration>,
}

impl SequencerSettings {
    pub fn from_config(config: &OrchestratorConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            core: config.groups.core.clone(),
            landing: config.groups.landing.clone(),
            networks: config.networks.clone(),
            credential_sources: config
                .credentials
                .sources
                .iter()
                .cloned()
                .map(CredentialSource::File)
                .collect(),
            critical_keys: config.credentials.critical.clone(),
            auto_snapshot: config.rollback.auto_snapshot,
            timeout: config.deploy_timeout()?,
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: Instant,
    limit: Duration,
}

pub struct Sequencer {
    runtime: Arc<dyn ContainerRuntime>,
    renderer: Arc<dyn TemplateRenderer>,
    store: ConfigStore,
    snapshots: SnapshotArchive,
    provisioner: NetworkProvisioner,
    verifier: HealthVerifier,
    ledger: Option<StateStore>,
    settings: SequencerSettings,
}

impl Sequencer {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        renderer: Arc<dyn TemplateRenderer>,
        store: ConfigStore,
        snapshots: SnapshotArchive,
        verifier: HealthVerifier,
        settings: SequencerSettings,
    ) -> Self {
        Self {
            provisioner: NetworkProvisioner::new(Arc::clone(&runtime)),
            runtime,
            renderer,
            store,
            snapshots,
            verifier,
            ledger: None,
            settings,
        }
    }

    /// Record every finished attempt in `ledger`.
    pub fn with_ledger(mut self, ledger: StateStore) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Run one deployment attempt for `selection`.
    ///
    /// Returns the finished attempt whatever its verdict. `Err` means the
    /// attempt could not begin, e.g. another deployment or rollback holds
    /// the configuration lock.
    pub async fn deploy(&self, selection: &TenantSelection) -> DeployResult<DeploymentAttempt> {
        let lock = self
            .store
            .lock()
            .map_err(|e| DeployError::new(DeployPhase::Init, e))?;

        let mut attempt = DeploymentAttempt::new(
            Uuid::new_v4().to_string(),
            &selection.tenant_id,
            Utc::now(),
        );
        let deadline = self.settings.timeout.map(|limit| Deadline {
            at: Instant::now() + limit,
            limit,
        });
        info!(
            tenant = %selection.tenant_id,
            attempt = %attempt.attempt_id,
            "deployment started"
        );

        let verdict = match self.execute(selection, &lock, &mut attempt, deadline).await {
            Ok(verdict) => verdict,
            Err(err) => {
                error!(
                    tenant = %selection.tenant_id,
                    phase = %err.phase,
                    error = %err.kind,
                    "deployment aborted"
                );
                attempt.failure = Some(FailureReason {
                    phase: err.phase,
                    message: err.kind.to_string(),
                });
                Verdict::Failed
            }
        };
        drop(lock);

        attempt.transitions.push(verdict.phase());
        attempt.verdict = Some(verdict);
        attempt.finished_at = Some(Utc::now());
        info!(
            tenant = %selection.tenant_id,
            attempt = %attempt.attempt_id,
            verdict = verdict.label(),
            warnings = attempt.warnings.len(),
            "deployment finished"
        );

        if let Some(ledger) = &self.ledger {
            if let Err(e) = ledger.record_attempt(&attempt) {
                warn!(attempt = %attempt.attempt_id, error = %e, "failed to record attempt");
            }
        }
        Ok(attempt)
    }

    async fn execute(
        &self,
        selection: &TenantSelection,
        lock: &ConfigLock,
        attempt: &mut DeploymentAttempt,
        deadline: Option<Deadline>,
    ) -> DeployResult<Verdict> {
        // Validating: nothing is touched until every tool answers.
        let phase = enter(attempt, DeployPhase::Validating, deadline)?;
        selection
            .validate()
            .map_err(|e| DeployError::new(phase, e))?;
        bounded(phase, deadline, self.renderer.check()).await?;
        bounded(phase, deadline, self.runtime.ping()).await?;

        // Rendering
        let phase = enter(attempt, DeployPhase::Rendering, deadline)?;
        let at_phase = |e| DeployError::new(phase, DeployErrorKind::State(e));
        if self.settings.auto_snapshot {
            let current = self.store.read_effective().map_err(at_phase)?;
            if !current.is_empty() {
                let summary = self
                    .snapshots
                    .create(Some(&selection.tenant_id), SnapshotReason::PreDeploy, &current)
                    .map_err(at_phase)?;
                attempt.pre_deploy_snapshot = Some(summary.id);
            }
        }
        // The live configuration is replaced only once the staged render
        // has produced a topology that resolves.
        let staging = self.store.prepare_staging(lock).map_err(at_phase)?;
        bounded(phase, deadline, self.renderer.render(selection, &staging)).await?;
        let units = bounded(phase, deadline, self.runtime.defined_units_in(&staging)).await?;

        let topology = RuntimeTopology {
            core_services: self.settings.core.clone(),
            landing_services: self.settings.landing.clone(),
            networks: self.settings.networks.clone(),
            units,
        };
        let resolution = resolve(selection, &topology).map_err(|e| DeployError::new(phase, e))?;
        let rendered = self.store.promote_staging(lock).map_err(at_phase)?;
        debug!(
            files = rendered.files.len(),
            units = topology.units.len(),
            "configuration rendered"
        );
        for w in &resolution.warnings {
            record_warning(attempt, phase, w.to_string());
        }
        attempt.groups = resolution.groups;

        // EnvMaterializing
        let phase = enter(attempt, DeployPhase::EnvMaterializing, deadline)?;
        let at_phase = |e| DeployError::new(phase, DeployErrorKind::State(e));
        let report = credentials::load(
            &self.settings.credential_sources,
            &self.settings.critical_keys,
        );
        for w in &report.warnings {
            record_warning(attempt, phase, w.to_string());
        }
        let mut vars = selection.tenant_variables();
        for (key, value) in report.credentials.iter() {
            vars.insert(key.to_string(), value.to_string());
        }
        let env_path = self
            .store
            .write_environment(lock, vars.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .map_err(at_phase)?;
        self.store
            .write_manifest(
                lock,
                &DeploymentManifest {
                    tenant_id: selection.tenant_id.clone(),
                    domain: selection.domain.clone(),
                    attempt_id: attempt.attempt_id.clone(),
                    groups: attempt.groups.clone(),
                    written_at: Utc::now(),
                },
            )
            .map_err(at_phase)?;
        debug!(
            path = %env_path.display(),
            variables = vars.len(),
            credentials = report.credentials.len(),
            "environment written"
        );

        // NetworkProvisioning
        let phase = enter(attempt, DeployPhase::NetworkProvisioning, deadline)?;
        let provisioned =
            bounded(phase, deadline, self.provisioner.ensure(&self.settings.networks)).await?;
        for drift in &provisioned.drift {
            record_warning(attempt, phase, drift.to_string());
        }

        // Starting*, strictly in group order.
        for group in ServiceGroup::ALL {
            let phase = enter(attempt, DeployPhase::starting(group), deadline)?;
            let units = attempt.groups.units(group).to_vec();
            if units.is_empty() {
                info!(tenant = %attempt.tenant_id, %group, "group empty; skipped");
                continue;
            }
            attempt.groups_attempted.push(group);
            let runtime = &self.runtime;
            let statuses = bounded(phase, deadline, async {
                runtime
                    .start_group(&units)
                    .await
                    .map_err(|source| DeployErrorKind::GroupStart { group, source })
            })
            .await?;
            for status in &statuses {
                debug!(%group, unit = %status.unit, state = %status.state, "unit started");
            }
        }

        // Verifying
        let phase = enter(attempt, DeployPhase::Verifying, deadline)?;
        let units = attempt.groups.all_units();
        let verifier = &self.verifier;
        let reports = bounded(phase, deadline, async {
            Ok::<_, DeployErrorKind>(verifier.verify(&units).await)
        })
        .await?;
        attempt.per_unit_health = reports;
        Ok(aggregate_verdict(&attempt.per_unit_health))
    }
}

/// Move `attempt` into `phase`, failing if the deadline already passed.
fn enter(
    attempt: &mut DeploymentAttempt,
    phase: DeployPhase,
    deadline: Option<Deadline>,
) -> DeployResult<DeployPhase> {
    if let Some(d) = deadline {
        if Instant::now() >= d.at {
            return Err(DeployError::new(
                attempt.phase(),
                DeployErrorKind::DeadlineExceeded(d.limit),
            ));
        }
    }
    attempt.transitions.push(phase);
    info!(tenant = %attempt.tenant_id, %phase, "phase entered");
    Ok(phase)
}

/// Await `fut`, bounded by the remaining time before the deadline.
async fn bounded<T, E, F>(phase: DeployPhase, deadline: Option<Deadline>, fut: F) -> DeployResult<T>
where
    F: Future<Output = Result<T, E>>,
    E: Into<DeployErrorKind>,
{
    let result = match deadline {
        Some(d) => tokio::time::timeout_at(d.at, fut)
            .await
            .map_err(|_| DeployError::new(phase, DeployErrorKind::DeadlineExceeded(d.limit)))?,
        None => fut.await,
    };
    result.map_err(|e| DeployError::new(phase, e))
}

fn record_warning(attempt: &mut DeploymentAttempt, phase: DeployPhase, message: String) {
    warn!(tenant = %attempt.tenant_id, %phase, %message, "deployment warning");
    attempt.warnings.push(AttemptWarning { phase, message });
}
