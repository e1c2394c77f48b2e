//! Wiring from the orchestrator config to the library components.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use tracing::{debug, info};

use tenant_core::OrchestratorConfig;
use tenantgrid_health::{HealthVerifier, Reporter};
use tenantgrid_rollout::{RollbackManager, Sequencer, SequencerSettings};
use tenantgrid_runtime::{CommandRenderer, ContainerRuntime, DockerCompose};
use tenantgrid_state::{ConfigStore, DeploymentManifest, SnapshotArchive, StateStore};

pub struct Context {
    pub config: OrchestratorConfig,
}

impl Context {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let config = OrchestratorConfig::from_file(path)
                    .with_context(|| format!("loading {}", path.display()))?;
                info!(path = %path.display(), "configuration loaded");
                config
            }
            None => {
                debug!("no configuration file given; using defaults");
                OrchestratorConfig::default()
            }
        };
        Ok(Self { config })
    }

    pub fn runtime(&self) -> Result<Arc<dyn ContainerRuntime>> {
        let runtime = DockerCompose::from_config(&self.config).context("configuring runtime")?;
        Ok(Arc::new(runtime))
    }

    pub fn config_store(&self) -> ConfigStore {
        ConfigStore::new(&self.config.paths.config_dir, &self.config.runtime.env_file)
    }

    pub fn snapshots(&self) -> SnapshotArchive {
        SnapshotArchive::new(&self.config.paths.snapshot_dir)
    }

    pub fn ledger(&self) -> Result<StateStore> {
        let path = &self.config.paths.state_path;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        StateStore::open(path).with_context(|| format!("opening ledger {}", path.display()))
    }

    pub fn sequencer(&self, runtime: Arc<dyn ContainerRuntime>) -> Result<Sequencer> {
        let renderer = CommandRenderer::from_config(&self.config).context("configuring renderer")?;
        let verifier = HealthVerifier::from_config(Arc::clone(&runtime), &self.config)
            .context("configuring health verifier")?;
        let settings = SequencerSettings::from_config(&self.config)?;
        Ok(Sequencer::new(
            runtime,
            Arc::new(renderer),
            self.config_store(),
            self.snapshots(),
            verifier,
            settings,
        )
        .with_ledger(self.ledger()?))
    }

    pub fn rollback_manager(&self, runtime: Arc<dyn ContainerRuntime>) -> Result<RollbackManager> {
        RollbackManager::from_config(runtime, &self.config).context("configuring rollback")
    }

    /// Reporter labelled with the currently deployed tenant, if any.
    pub fn reporter(&self, runtime: Arc<dyn ContainerRuntime>) -> Result<Reporter> {
        let mut reporter = Reporter::new(runtime, self.config.monitor.probes.clone());
        if let Some(manifest) = self.manifest()? {
            reporter = reporter.with_tenant(manifest.tenant_id, manifest.domain);
        }
        Ok(reporter)
    }

    pub fn manifest(&self) -> Result<Option<DeploymentManifest>> {
        self.config_store()
            .read_manifest()
            .context("reading deployment manifest")
    }
}
