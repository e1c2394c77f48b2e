//! Docker Compose backend.
//!
//! Drives the `docker` CLI: `docker compose` for units of the tenant
//! project, `docker network` for networks. Every call is bounded by the
//! configured command timeout.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use tenant_core::{ConfigError, NetworkSpec, OrchestratorConfig};

use crate::command::{self, describe, run, run_checked};
use crate::error::{RuntimeError, RuntimeResult};
use crate::types::{NetworkCreate, NetworkInfo, ReportedHealth, StopMode, UnitHealth, UnitStatus};
use crate::ContainerRuntime;

/// Extra time granted to `compose stop` beyond the graceful timeout.
const STOP_MARGIN: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct DockerCompose {
    program: String,
    project: String,
    project_dir: PathBuf,
    compose_file: String,
    env_file: String,
    command_timeout: Duration,
}

impl DockerCompose {
    pub fn new(
        program: impl Into<String>,
        project: impl Into<String>,
        project_dir: impl Into<PathBuf>,
        compose_file: impl Into<String>,
        env_file: impl Into<String>,
        command_timeout: Duration,
    ) -> Self {
        Self {
            program: program.into(),
            project: project.into(),
            project_dir: project_dir.into(),
            compose_file: compose_file.into(),
            env_file: env_file.into(),
            command_timeout,
        }
    }

    pub fn from_config(config: &OrchestratorConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(
            &config.runtime.program,
            &config.runtime.project,
            &config.paths.config_dir,
            &config.runtime.compose_file,
            &config.runtime.env_file,
            config.command_timeout()?,
        ))
    }

    fn docker(&self) -> Command {
        Command::new(&self.program)
    }

    fn compose(&self) -> Command {
        self.compose_in(&self.project_dir)
    }

    /// `docker compose` against the configuration rendered in `dir`.
    fn compose_in(&self, dir: &Path) -> Command {
        let mut cmd = self.docker();
        cmd.arg("compose")
            .arg("--project-name")
            .arg(&self.project)
            .arg("--project-directory")
            .arg(dir)
            .arg("--file")
            .arg(dir.join(&self.compose_file));
        let env = dir.join(&self.env_file);
        if env.exists() {
            cmd.arg("--env-file").arg(env);
        }
        cmd
    }

    async fn ps(&self, all: bool, units: &[String]) -> RuntimeResult<Vec<PsEntry>> {
        let mut cmd = self.compose();
        cmd.arg("ps").arg("--format").arg("json");
        if all {
            cmd.arg("--all");
        }
        cmd.args(units);
        let out = run_checked(cmd, self.command_timeout).await?;
        parse_ps(&String::from_utf8_lossy(&out.stdout))
    }
}

#[async_trait]
impl ContainerRuntime for DockerCompose {
    async fn ping(&self) -> RuntimeResult<()> {
        let mut cmd = self.docker();
        cmd.args(["info", "--format", "{{.ServerVersion}}"]);
        let out = run_checked(cmd, self.command_timeout)
            .await
            .map_err(|e| match e {
                RuntimeError::CommandFailed { stderr, .. } => {
                    RuntimeError::Unavailable(format!("docker daemon ({stderr})"))
                }
                other => other,
            })?;
        debug!(
            version = %String::from_utf8_lossy(&out.stdout).trim(),
            "container runtime reachable"
        );
        Ok(())
    }

    async fn defined_units(&self) -> RuntimeResult<Vec<String>> {
        self.defined_units_in(&self.project_dir).await
    }

    async fn defined_units_in(&self, dir: &Path) -> RuntimeResult<Vec<String>> {
        let mut cmd = self.compose_in(dir);
        cmd.args(["config", "--services"]);
        let out = run_checked(cmd, self.command_timeout).await?;
        Ok(String::from_utf8_lossy(&out.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn inspect_network(&self, name: &str) -> RuntimeResult<Option<NetworkInfo>> {
        let mut cmd = self.docker();
        cmd.args(["network", "inspect", "--format", "{{json .}}", name]);
        let label = describe(&cmd);
        let out = run(cmd, self.command_timeout).await?;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            if is_missing_network(&stderr) {
                return Ok(None);
            }
            return command::expect_success(&label, out).map(|_| None);
        }
        parse_network(&String::from_utf8_lossy(&out.stdout)).map(Some)
    }

    async fn create_network(&self, spec: &NetworkSpec) -> RuntimeResult<NetworkCreate> {
        let mut cmd = self.docker();
        cmd.args(["network", "create", "--driver", &spec.driver]);
        if spec.attachable {
            cmd.arg("--attachable");
        }
        cmd.arg(&spec.name);
        let label = describe(&cmd);
        let out = run(cmd, self.command_timeout).await?;
        if out.status.success() {
            info!(network = %spec.name, driver = %spec.driver, "network created");
            return Ok(NetworkCreate::Created);
        }
        if String::from_utf8_lossy(&out.stderr).contains("already exists") {
            return Ok(NetworkCreate::AlreadyExists);
        }
        command::expect_success(&label, out).map(|_| NetworkCreate::Created)
    }

    async fn start_group(&self, units: &[String]) -> RuntimeResult<Vec<UnitStatus>> {
        let mut cmd = self.compose();
        cmd.args(["up", "--detach"]).args(units);
        run_checked(cmd, self.command_timeout).await?;
        let entries = self.ps(true, units).await?;
        Ok(units
            .iter()
            .map(|unit| UnitStatus {
                unit: unit.clone(),
                state: entries
                    .iter()
                    .find(|e| &e.service == unit)
                    .map(|e| e.state.clone())
                    .unwrap_or_else(|| "missing".to_string()),
            })
            .collect())
    }

    async fn unit_health(&self, unit: &str) -> RuntimeResult<UnitHealth> {
        let entries = self.ps(true, &[unit.to_string()]).await?;
        Ok(entries
            .iter()
            .find(|e| e.service == unit)
            .map(PsEntry::health)
            .unwrap_or_else(UnitHealth::absent))
    }

    async fn running_units(&self) -> RuntimeResult<Vec<String>> {
        let mut units: Vec<String> = self
            .ps(false, &[])
            .await?
            .into_iter()
            .filter(|e| e.state == "running")
            .map(|e| e.service)
            .collect();
        units.sort();
        units.dedup();
        Ok(units)
    }

    async fn stop(&self, units: &[String], mode: StopMode) -> RuntimeResult<()> {
        if units.is_empty() {
            return Ok(());
        }
        let mut cmd = self.compose();
        let timeout = match mode {
            StopMode::Graceful { timeout } => {
                cmd.arg("stop")
                    .arg("--timeout")
                    .arg(timeout.as_secs().max(1).to_string());
                timeout + STOP_MARGIN
            }
            StopMode::Force => {
                cmd.arg("kill");
                self.command_timeout
            }
        };
        cmd.args(units);
        run_checked(cmd, timeout).await?;
        info!(units = units.len(), ?mode, "units stopped");
        Ok(())
    }
}

/// One row of `docker compose ps --format json`.
#[derive(Debug, Clone, Deserialize)]
struct PsEntry {
    #[serde(rename = "Service")]
    service: String,
    #[serde(rename = "State", default)]
    state: String,
    #[serde(rename = "Health", default)]
    health: String,
}

impl PsEntry {
    fn health(&self) -> UnitHealth {
        let health = match self.health.as_str() {
            "healthy" => ReportedHealth::Healthy,
            "unhealthy" => ReportedHealth::Unhealthy,
            "starting" => ReportedHealth::Starting,
            _ => ReportedHealth::NoHealthCheck,
        };
        UnitHealth {
            health,
            running: self.state == "running",
        }
    }
}

/// Compose prints a JSON array on older releases and one object per line
/// on newer ones.
fn parse_ps(stdout: &str) -> RuntimeResult<Vec<PsEntry>> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).map_err(|e| RuntimeError::Parse(e.to_string()));
    }
    trimmed
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).map_err(|e| RuntimeError::Parse(e.to_string())))
        .collect()
}

#[derive(Debug, Deserialize)]
struct NetworkInspect {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Driver")]
    driver: String,
    #[serde(rename = "Attachable", default)]
    attachable: bool,
}

fn parse_network(stdout: &str) -> RuntimeResult<NetworkInfo> {
    let raw: NetworkInspect =
        serde_json::from_str(stdout.trim()).map_err(|e| RuntimeError::Parse(e.to_string()))?;
    Ok(NetworkInfo {
        name: raw.name,
        driver: raw.driver,
        attachable: raw.attachable,
    })
}

fn is_missing_network(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("no such network") || lower.contains("not found")
}
