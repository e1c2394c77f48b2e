//! Shared types used across TenantGrid crates.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name of a unit managed by the container runtime.
pub type UnitName = String;

// ── Tenant selection ──────────────────────────────────────────────

/// The declarative input: which services a tenant wants on its host.
///
/// Read once per deployment attempt and never mutated by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantSelection {
    pub tenant_id: String,
    /// Base DNS domain used for routing.
    pub domain: String,
    /// Service name → selection. Document order is preserved.
    #[serde(default)]
    pub services: IndexMap<String, ServiceSelection>,
}

/// One entry of a tenant's service selection.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ServiceSelection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("failed to read selection {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse selection {path}: {message}")]
    Parse { path: String, message: String },
    #[error("invalid selection: {0}")]
    Invalid(String),
}

impl TenantSelection {
    /// Load a selection document. `.json` files are parsed as JSON,
    /// everything else as TOML.
    pub fn from_file(path: &Path) -> Result<Self, SelectionError> {
        let content = std::fs::read_to_string(path).map_err(|source| SelectionError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let is_json = path.extension().is_some_and(|ext| ext == "json");
        let selection = if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_toml_str(&content)
        }
        .map_err(|e| match e {
            SelectionError::Parse { message, .. } => SelectionError::Parse {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })?;
        Ok(selection)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, SelectionError> {
        let selection: TenantSelection = toml::from_str(s).map_err(|e| SelectionError::Parse {
            path: "<inline>".to_string(),
            message: e.to_string(),
        })?;
        selection.validate()?;
        Ok(selection)
    }

    pub fn from_json_str(s: &str) -> Result<Self, SelectionError> {
        let selection: TenantSelection =
            serde_json::from_str(s).map_err(|e| SelectionError::Parse {
                path: "<inline>".to_string(),
                message: e.to_string(),
            })?;
        selection.validate()?;
        Ok(selection)
    }

    /// Reject documents without a tenant id, a domain or with blank service
    /// names.
    pub fn validate(&self) -> Result<(), SelectionError> {
        if self.tenant_id.trim().is_empty() {
            return Err(SelectionError::Invalid("tenant_id is empty".to_string()));
        }
        if self.domain.trim().is_empty() {
            return Err(SelectionError::Invalid("domain is empty".to_string()));
        }
        if let Some(name) = self.services.keys().find(|name| name.trim().is_empty()) {
            return Err(SelectionError::Invalid(format!(
                "service name {name:?} is empty"
            )));
        }
        Ok(())
    }

    /// Names of enabled services, in document order.
    pub fn enabled_services(&self) -> impl Iterator<Item = &str> {
        self.services
            .iter()
            .filter(|(_, sel)| sel.enabled)
            .map(|(name, _)| name.as_str())
    }

    /// Non-secret variables derived from the selection.
    ///
    /// `TENANT_ID` and `TENANT_DOMAIN`, a `<SERVICE>_ENABLED` flag for every
    /// listed service, and `<SERVICE>_<KEY>` for each config entry of an
    /// enabled service.
    pub fn tenant_variables(&self) -> BTreeMap<String, String> {
        let mut vars = BTreeMap::new();
        vars.insert("TENANT_ID".to_string(), self.tenant_id.clone());
        vars.insert("TENANT_DOMAIN".to_string(), self.domain.clone());
        for (name, sel) in &self.services {
            let prefix = env_key(name);
            vars.insert(format!("{prefix}_ENABLED"), sel.enabled.to_string());
            if sel.enabled {
                for (key, value) in &sel.config {
                    vars.insert(format!("{prefix}_{}", env_key(key)), value.clone());
                }
            }
        }
        vars
    }
}

/// Normalize a name into an environment variable fragment.
fn env_key(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

// ── Topology ──────────────────────────────────────────────────────

/// Declared isolated network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub name: String,
    #[serde(default = "default_driver")]
    pub driver: String,
    #[serde(default)]
    pub attachable: bool,
}

fn default_driver() -> String {
    "bridge".to_string()
}

/// One of the three ordered start batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceGroup {
    Core,
    Landing,
    Selected,
}

impl ServiceGroup {
    /// Start order.
    pub const ALL: [ServiceGroup; 3] = [Self::Core, Self::Landing, Self::Selected];

    pub fn label(&self) -> &'static str {
        match self {
            ServiceGroup::Core => "core",
            ServiceGroup::Landing => "landing",
            ServiceGroup::Selected => "selected",
        }
    }
}

impl fmt::Display for ServiceGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

/// Resolved, renderable configuration for one tenant.
///
/// `core_services` and `landing_services` come from the orchestrator
/// config; `units` is the list of units the render step actually produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeTopology {
    pub core_services: Vec<UnitName>,
    pub landing_services: Vec<UnitName>,
    pub networks: Vec<NetworkSpec>,
    pub units: Vec<UnitName>,
}

impl RuntimeTopology {
    pub fn defines(&self, unit: &str) -> bool {
        self.units.iter().any(|u| u == unit)
    }
}

/// The three disjoint, ordered unit lists of a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeploymentGroups {
    pub core: Vec<UnitName>,
    pub landing: Vec<UnitName>,
    pub selected: Vec<UnitName>,
}

impl DeploymentGroups {
    pub fn units(&self, group: ServiceGroup) -> &[UnitName] {
        match group {
            ServiceGroup::Core => &self.core,
            ServiceGroup::Landing => &self.landing,
            ServiceGroup::Selected => &self.selected,
        }
    }

    /// All units in start order.
    pub fn all_units(&self) -> Vec<UnitName> {
        ServiceGroup::ALL
            .iter()
            .flat_map(|g| self.units(*g).iter().cloned())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.core.is_empty() && self.landing.is_empty() && self.selected.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SELECTION: &str = r#"
tenant_id = "acme"
domain = "acme.example"

[services.vikunja]
enabled = false

[services.nextcloud]
enabled = true
config = { admin_user = "ops", "trusted-proxy" = "10.0.0.1" }

[services.gitea]
enabled = true
"#;

    #[test]
    fn parses_toml_selection_preserving_order() {
        let sel = TenantSelection::from_toml_str(SELECTION).unwrap();
        assert_eq!(sel.tenant_id, "acme");
        let names: Vec<&str> = sel.services.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["vikunja", "nextcloud", "gitea"]);
        let enabled: Vec<&str> = sel.enabled_services().collect();
        assert_eq!(enabled, vec!["nextcloud", "gitea"]);
    }

    #[test]
    fn parses_json_selection() {
        let sel = TenantSelection::from_json_str(
            r#"{"tenant_id":"t1","domain":"t1.example","services":{"b":{"enabled":true},"a":{"enabled":true}}}"#,
        )
        .unwrap();
        let enabled: Vec<&str> = sel.enabled_services().collect();
        assert_eq!(enabled, vec!["b", "a"]);
    }

    #[test]
    fn rejects_empty_tenant_id() {
        let err = TenantSelection::from_toml_str("tenant_id = \"\"\ndomain = \"x\"\n").unwrap_err();
        assert!(matches!(err, SelectionError::Invalid(_)));
    }

    #[test]
    fn missing_domain_is_parse_error() {
        let err = TenantSelection::from_toml_str("tenant_id = \"a\"\n").unwrap_err();
        assert!(matches!(err, SelectionError::Parse { .. }));
    }

    #[test]
    fn tenant_variables_cover_flags_and_config() {
        let sel = TenantSelection::from_toml_str(SELECTION).unwrap();
        let vars = sel.tenant_variables();
        assert_eq!(vars["TENANT_ID"], "acme");
        assert_eq!(vars["TENANT_DOMAIN"], "acme.example");
        assert_eq!(vars["VIKUNJA_ENABLED"], "false");
        assert_eq!(vars["NEXTCLOUD_ENABLED"], "true");
        assert_eq!(vars["NEXTCLOUD_ADMIN_USER"], "ops");
        assert_eq!(vars["NEXTCLOUD_TRUSTED_PROXY"], "10.0.0.1");
    }

    #[test]
    fn network_spec_defaults() {
        let net: NetworkSpec = toml::from_str("name = \"proxy\"").unwrap();
        assert_eq!(net.driver, "bridge");
        assert!(!net.attachable);
    }

    #[test]
    fn groups_all_units_in_start_order() {
        let groups = DeploymentGroups {
            core: vec!["proxy".into(), "sso".into()],
            landing: vec!["home".into()],
            selected: vec!["nextcloud".into()],
        };
        assert_eq!(groups.all_units(), vec!["proxy", "sso", "home", "nextcloud"]);
        assert!(!groups.is_empty());
        assert!(DeploymentGroups::default().is_empty());
    }
}
