//! tenantgrid-runtime — the container runtime and template renderer seams.
//!
//! The orchestrator never talks to Docker or the renderer directly; it
//! goes through [`ContainerRuntime`] and [`TemplateRenderer`] so tests can
//! substitute [`fakes`].

pub mod docker;
pub mod error;
pub mod fakes;
pub mod renderer;
pub mod types;

mod command;

use std::path::Path;

use async_trait::async_trait;

use tenant_core::{NetworkSpec, TenantSelection};

pub use docker::DockerCompose;
pub use error::{RuntimeError, RuntimeResult};
pub use renderer::CommandRenderer;
pub use types::{NetworkCreate, NetworkInfo, ReportedHealth, StopMode, UnitHealth, UnitStatus};

/// Container runtime operations scoped to one tenant project.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Check the runtime daemon is reachable.
    async fn ping(&self) -> RuntimeResult<()>;

    /// Units defined by the currently rendered configuration.
    async fn defined_units(&self) -> RuntimeResult<Vec<String>>;

    /// Units defined by a configuration rendered into `dir`, which need not
    /// be the live config dir.
    async fn defined_units_in(&self, dir: &Path) -> RuntimeResult<Vec<String>>;

    /// `None` when no network with that name exists.
    async fn inspect_network(&self, name: &str) -> RuntimeResult<Option<NetworkInfo>>;

    async fn create_network(&self, spec: &NetworkSpec) -> RuntimeResult<NetworkCreate>;

    /// Start `units` together and report their initial state.
    async fn start_group(&self, units: &[String]) -> RuntimeResult<Vec<UnitStatus>>;

    async fn unit_health(&self, unit: &str) -> RuntimeResult<UnitHealth>;

    /// Units of the project with a running container.
    async fn running_units(&self) -> RuntimeResult<Vec<String>>;

    async fn stop(&self, units: &[String], mode: StopMode) -> RuntimeResult<()>;
}

/// Produces the effective configuration for a selection.
#[async_trait]
pub trait TemplateRenderer: Send + Sync {
    /// Check the renderer is installed and runnable.
    async fn check(&self) -> RuntimeResult<()>;

    /// Render `selection` into `out_dir`, which exists and is empty.
    async fn render(&self, selection: &TenantSelection, out_dir: &Path) -> RuntimeResult<()>;
}
