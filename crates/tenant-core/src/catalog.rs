//! Service catalog resolution.
//!
//! Splits a tenant selection into the three start groups. `core` and
//! `landing` come verbatim from the topology; `selected` is whatever the
//! tenant enabled, minus anything already in core/landing, minus anything
//! the render step did not produce. Only a broken topology is fatal.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::{DeploymentGroups, RuntimeTopology, ServiceGroup, TenantSelection};

#[derive(Debug, Error, PartialEq)]
pub enum CatalogError {
    #[error("topology lists an empty service name in the {0} group")]
    EmptyName(ServiceGroup),
}

/// Non-fatal resolution outcome worth reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolveWarning {
    /// Enabled by the tenant but not produced by the render step.
    NotRendered { service: String },
    /// Listed in more than one fixed group; kept in the earliest.
    DuplicateInTopology { service: String, kept_in: ServiceGroup },
}

impl fmt::Display for ResolveWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveWarning::NotRendered { service } => write!(
                f,
                "service {service:?} is enabled but not defined in the rendered topology; skipped"
            ),
            ResolveWarning::DuplicateInTopology { service, kept_in } => write!(
                f,
                "service {service:?} appears in several groups; started with {kept_in} only"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Resolution {
    pub groups: DeploymentGroups,
    pub warnings: Vec<ResolveWarning>,
}

/// Resolve a selection against a rendered topology.
pub fn resolve(
    selection: &TenantSelection,
    topology: &RuntimeTopology,
) -> Result<Resolution, CatalogError> {
    let mut warnings = Vec::new();
    let mut fixed: HashSet<String> = HashSet::new();
    let core = fixed_group(
        ServiceGroup::Core,
        &topology.core_services,
        &mut fixed,
        &mut warnings,
    )?;
    let landing = fixed_group(
        ServiceGroup::Landing,
        &topology.landing_services,
        &mut fixed,
        &mut warnings,
    )?;

    let rendered: HashSet<&str> = topology.units.iter().map(String::as_str).collect();
    let mut selected = Vec::new();
    for service in selection.enabled_services() {
        if fixed.contains(service) {
            debug!(%service, "enabled service already part of core/landing");
            continue;
        }
        if !rendered.contains(service) {
            warn!(
                tenant = %selection.tenant_id,
                %service,
                "enabled service not rendered; skipping"
            );
            warnings.push(ResolveWarning::NotRendered {
                service: service.to_string(),
            });
            continue;
        }
        selected.push(service.to_string());
    }

    debug!(
        tenant = %selection.tenant_id,
        core = core.len(),
        landing = landing.len(),
        selected = selected.len(),
        "service catalog resolved"
    );

    Ok(Resolution {
        groups: DeploymentGroups {
            core,
            landing,
            selected,
        },
        warnings,
    })
}

/// Copy a fixed group, dropping names an earlier group already claimed.
fn fixed_group(
    group: ServiceGroup,
    names: &[String],
    fixed: &mut HashSet<String>,
    warnings: &mut Vec<ResolveWarning>,
) -> Result<Vec<String>, CatalogError> {
    let mut out: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        if name.trim().is_empty() {
            return Err(CatalogError::EmptyName(group));
        }
        if out.contains(name) {
            continue;
        }
        if fixed.contains(name) {
            debug!(service = %name, %group, "service already claimed by core");
            warnings.push(ResolveWarning::DuplicateInTopology {
                service: name.clone(),
                kept_in: ServiceGroup::Core,
            });
            continue;
        }
        fixed.insert(name.clone());
        out.push(name.clone());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ServiceSelection;

    fn topology(units: &[&str]) -> RuntimeTopology {
        RuntimeTopology {
            core_services: vec!["traefik".into(), "authelia".into()],
            landing_services: vec!["homepage".into()],
            networks: Vec::new(),
            units: units.iter().map(|u| u.to_string()).collect(),
        }
    }

    fn selection(services: &[(&str, bool)]) -> TenantSelection {
        TenantSelection {
            tenant_id: "acme".into(),
            domain: "acme.example".into(),
            services: services
                .iter()
                .map(|(name, enabled)| {
                    (
                        name.to_string(),
                        ServiceSelection {
                            enabled: *enabled,
                            ..Default::default()
                        },
                    )
                })
                .collect(),
        }
    }

    #[test]
    fn enabled_service_is_selected_and_disabled_is_not() {
        let res = resolve(
            &selection(&[("nextcloud", true), ("vikunja", false)]),
            &topology(&["traefik", "authelia", "homepage", "nextcloud", "vikunja"]),
        )
        .unwrap();
        assert_eq!(res.groups.selected, vec!["nextcloud"]);
        assert!(res.warnings.is_empty());
    }

    #[test]
    fn unrendered_service_is_dropped_with_one_warning() {
        let res = resolve(
            &selection(&[("legacyapp", true)]),
            &topology(&["traefik", "authelia", "homepage", "nextcloud"]),
        )
        .unwrap();
        assert!(res.groups.selected.is_empty());
        assert_eq!(
            res.warnings,
            vec![ResolveWarning::NotRendered {
                service: "legacyapp".into()
            }]
        );
    }

    #[test]
    fn core_and_landing_are_copied_verbatim() {
        let res = resolve(&selection(&[]), &topology(&[])).unwrap();
        assert_eq!(res.groups.core, vec!["traefik", "authelia"]);
        assert_eq!(res.groups.landing, vec!["homepage"]);
    }

    #[test]
    fn selected_never_intersects_core_or_landing() {
        let res = resolve(
            &selection(&[("authelia", true), ("homepage", true), ("gitea", true)]),
            &topology(&["traefik", "authelia", "homepage", "gitea"]),
        )
        .unwrap();
        assert_eq!(res.groups.selected, vec!["gitea"]);
        for s in &res.groups.selected {
            assert!(!res.groups.core.contains(s));
            assert!(!res.groups.landing.contains(s));
        }
        assert!(res.warnings.is_empty());
    }

    #[test]
    fn selected_keeps_document_order() {
        let res = resolve(
            &selection(&[("zulip", true), ("gitea", true), ("nextcloud", true)]),
            &topology(&["nextcloud", "gitea", "zulip"]),
        )
        .unwrap();
        assert_eq!(res.groups.selected, vec!["zulip", "gitea", "nextcloud"]);
    }

    #[test]
    fn service_in_core_and_landing_is_started_with_core() {
        let mut topo = topology(&[]);
        topo.landing_services.push("authelia".into());
        let res = resolve(&selection(&[]), &topo).unwrap();
        assert_eq!(res.groups.core, vec!["traefik", "authelia"]);
        assert_eq!(res.groups.landing, vec!["homepage"]);
        assert_eq!(
            res.warnings,
            vec![ResolveWarning::DuplicateInTopology {
                service: "authelia".into(),
                kept_in: ServiceGroup::Core,
            }]
        );
    }

    #[test]
    fn empty_topology_name_is_fatal() {
        let mut topo = topology(&[]);
        topo.core_services.push(String::new());
        let err = resolve(&selection(&[]), &topo).unwrap_err();
        assert_eq!(err, CatalogError::EmptyName(ServiceGroup::Core));
    }
}
