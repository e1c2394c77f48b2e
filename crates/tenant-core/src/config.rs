//! tenantgrid.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::NetworkSpec;

/// Keys whose absence leaves the deployment running on insecure placeholders.
pub const DEFAULT_CRITICAL_KEYS: [&str; 2] = ["PROXY_ADMIN_SECRET", "POSTGRES_PASSWORD"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid duration {value:?} for {field}")]
    Duration { field: &'static str, value: String },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub paths: PathsConfig,
    pub groups: GroupsConfig,
    pub networks: Vec<NetworkSpec>,
    pub credentials: CredentialsConfig,
    pub health: HealthConfig,
    pub rollback: RollbackConfig,
    pub runtime: RuntimeConfig,
    pub renderer: RendererConfig,
    pub deploy: DeployConfig,
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory holding the current effective configuration. Owned
    /// entirely by the orchestrator.
    pub config_dir: PathBuf,
    pub snapshot_dir: PathBuf,
    /// redb file holding the attempt ledger.
    pub state_path: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from("/srv/tenantgrid/config"),
            snapshot_dir: PathBuf::from("/var/lib/tenantgrid/snapshots"),
            state_path: PathBuf::from("/var/lib/tenantgrid/state.redb"),
        }
    }
}

/// Always-on groups. Not tenant-controlled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupsConfig {
    pub core: Vec<String>,
    pub landing: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// dotenv files, lowest precedence first.
    pub sources: Vec<PathBuf>,
    pub critical: Vec<String>,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            critical: DEFAULT_CRITICAL_KEYS.iter().map(|k| k.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub poll_interval: String,
    pub per_unit_timeout: String,
    /// Consecutive failed health queries after which a unit counts as
    /// unhealthy.
    pub query_error_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            poll_interval: "5s".to_string(),
            per_unit_timeout: "120s".to_string(),
            query_error_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RollbackConfig {
    /// Wait for a graceful stop before forcing termination.
    pub stop_grace: String,
    /// Snapshot the current configuration before every deployment.
    pub auto_snapshot: bool,
}

impl Default for RollbackConfig {
    fn default() -> Self {
        Self {
            stop_grace: "30s".to_string(),
            auto_snapshot: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub program: String,
    pub project: String,
    /// Service-topology descriptor, relative to `paths.config_dir`.
    pub compose_file: String,
    /// Effective environment file, relative to `paths.config_dir`.
    pub env_file: String,
    pub command_timeout: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            program: "docker".to_string(),
            project: "tenantgrid".to_string(),
            compose_file: "docker-compose.yml".to_string(),
            env_file: ".env".to_string(),
            command_timeout: "5m".to_string(),
        }
    }
}

/// External template renderer. `{input}` and `{output}` in `args` are
/// replaced with the selection file and the config dir.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            program: "tenantgrid-render".to_string(),
            args: vec![
                "--data".to_string(),
                "{input}".to_string(),
                "--out".to_string(),
                "{output}".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Overall deadline for one attempt. Unbounded when absent.
    pub timeout: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub probes: Vec<ProbeTarget>,
}

/// HTTP reachability target sampled by the monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeTarget {
    /// `ip:port` to connect to.
    pub address: String,
    #[serde(default = "default_probe_path")]
    pub path: String,
    /// Host header; `{domain}` is replaced with the tenant domain.
    pub host: Option<String>,
}

fn default_probe_path() -> String {
    "/".to_string()
}

impl OrchestratorConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: OrchestratorConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for name in self.groups.core.iter().chain(&self.groups.landing) {
            if name.trim().is_empty() {
                return Err(ConfigError::Invalid("empty service name in [groups]".to_string()));
            }
        }
        for net in &self.networks {
            if net.name.trim().is_empty() {
                return Err(ConfigError::Invalid("network with empty name".to_string()));
            }
        }
        if self.poll_interval()?.is_zero() {
            return Err(ConfigError::Invalid(
                "health.poll_interval must be greater than zero".to_string(),
            ));
        }
        if self.per_unit_timeout()?.is_zero() {
            return Err(ConfigError::Invalid(
                "health.per_unit_timeout must be greater than zero".to_string(),
            ));
        }
        self.stop_grace()?;
        self.command_timeout()?;
        self.deploy_timeout()?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Result<Duration, ConfigError> {
        duration_field("health.poll_interval", &self.health.poll_interval)
    }

    pub fn per_unit_timeout(&self) -> Result<Duration, ConfigError> {
        duration_field("health.per_unit_timeout", &self.health.per_unit_timeout)
    }

    pub fn stop_grace(&self) -> Result<Duration, ConfigError> {
        duration_field("rollback.stop_grace", &self.rollback.stop_grace)
    }

    pub fn command_timeout(&self) -> Result<Duration, ConfigError> {
        duration_field("runtime.command_timeout", &self.runtime.command_timeout)
    }

    pub fn deploy_timeout(&self) -> Result<Option<Duration>, ConfigError> {
        self.deploy
            .timeout
            .as_deref()
            .map(|s| duration_field("deploy.timeout", s))
            .transpose()
    }
}

fn duration_field(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    parse_duration(value).ok_or_else(|| ConfigError::Duration {
        field,
        value: value.to_string(),
    })
}

/// Parse a duration string like "5s", "500ms", "2m".
/// A plain number is taken as seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        let m = mins.parse::<u64>().ok()?;
        m.checked_mul(60).map(Duration::from_secs)
    } else if let Some(hours) = s.strip_suffix('h') {
        let h = hours.parse::<u64>().ok()?;
        h.checked_mul(3600).map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
