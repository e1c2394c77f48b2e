//! Network provisioning.
//!
//! Networks are a hard prerequisite: the first one that cannot be ensured
//! aborts the whole run. Existing networks are left alone even when their
//! settings differ from the declaration; the difference is reported.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use tenant_core::NetworkSpec;
use tenantgrid_runtime::{ContainerRuntime, NetworkCreate, NetworkInfo};

use crate::error::ProvisionError;

/// Declared and actual settings of an existing network disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkDrift {
    pub network: String,
    pub declared_driver: String,
    pub actual_driver: String,
    pub declared_attachable: bool,
    pub actual_attachable: bool,
}

impl fmt::Display for NetworkDrift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "network {} exists with driver={} attachable={} but is declared with driver={} attachable={}; left unchanged",
            self.network,
            self.actual_driver,
            self.actual_attachable,
            self.declared_driver,
            self.declared_attachable
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProvisionReport {
    pub created: Vec<String>,
    pub existing: Vec<String>,
    pub drift: Vec<NetworkDrift>,
}

pub struct NetworkProvisioner {
    runtime: Arc<dyn ContainerRuntime>,
}

impl NetworkProvisioner {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    /// Make sure every network in `networks` exists.
    pub async fn ensure(
        &self,
        networks: &[NetworkSpec],
    ) -> Result<ProvisionReport, ProvisionError> {
        let mut report = ProvisionReport::default();

        for spec in networks {
            let existing = self
                .runtime
                .inspect_network(&spec.name)
                .await
                .map_err(|source| ProvisionError::Inspect {
                    network: spec.name.clone(),
                    source,
                })?;

            if let Some(actual) = existing {
                debug!(network = %spec.name, "network already exists");
                if let Some(drift) = drift(spec, &actual) {
                    warn!(network = %spec.name, %drift, "network settings differ from declaration");
                    report.drift.push(drift);
                }
                report.existing.push(spec.name.clone());
                continue;
            }

            match self.runtime.create_network(spec).await {
                Ok(NetworkCreate::Created) => {
                    info!(
                        network = %spec.name,
                        driver = %spec.driver,
                        attachable = spec.attachable,
                        "network created"
                    );
                    report.created.push(spec.name.clone());
                }
                Ok(NetworkCreate::AlreadyExists) => {
                    debug!(network = %spec.name, "network appeared concurrently");
                    report.existing.push(spec.name.clone());
                }
                Err(source) => {
                    return Err(ProvisionError::Create {
                        network: spec.name.clone(),
                        source,
                    });
                }
            }
        }

        Ok(report)
    }
}

fn drift(spec: &NetworkSpec, actual: &NetworkInfo) -> Option<NetworkDrift> {
    if spec.driver == actual.driver && spec.attachable == actual.attachable {
        return None;
    }
    Some(NetworkDrift {
        network: spec.name.clone(),
        declared_driver: spec.driver.clone(),
        actual_driver: actual.driver.clone(),
        declared_attachable: spec.attachable,
        actual_attachable: actual.attachable,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenantgrid_runtime::fakes::{FakeRuntime, RuntimeCall};

    fn net(name: &str, attachable: bool) -> NetworkSpec {
        NetworkSpec {
            name: name.to_string(),
            driver: "bridge".to_string(),
            attachable,
        }
    }

    #[tokio::test]
    async fn creates_missing_and_skips_existing() {
        let rt = Arc::new(FakeRuntime::new());
        rt.add_network("proxy", "bridge", true);
        let report = NetworkProvisioner::new(rt.clone())
            .ensure(&[net("proxy", true), net("backend", false)])
            .await
            .unwrap();
        assert_eq!(report.created, vec!["backend"]);
        assert_eq!(report.existing, vec!["proxy"]);
        assert!(report.drift.is_empty());
        assert!(!rt.calls().contains(&RuntimeCall::CreateNetwork("proxy".into())));
    }

    #[tokio::test]
    async fn second_run_is_a_no_op() {
        let rt = Arc::new(FakeRuntime::new());
        let p = NetworkProvisioner::new(rt.clone());
        let nets = [net("proxy", true)];
        p.ensure(&nets).await.unwrap();
        let report = p.ensure(&nets).await.unwrap();
        assert!(report.created.is_empty());
        assert_eq!(report.existing, vec!["proxy"]);
    }

    #[tokio::test]
    async fn drift_is_reported_not_fixed() {
        let rt = Arc::new(FakeRuntime::new());
        rt.add_network("proxy", "overlay", false);
        let report = NetworkProvisioner::new(rt.clone())
            .ensure(&[net("proxy", true)])
            .await
            .unwrap();
        assert_eq!(report.drift.len(), 1);
        assert_eq!(report.drift[0].actual_driver, "overlay");
        assert_eq!(rt.networks()[0].driver, "overlay");
    }

    #[tokio::test]
    async fn lost_race_counts_as_existing() {
        let rt = Arc::new(FakeRuntime::new());
        rt.race_network("proxy");
        let report = NetworkProvisioner::new(rt).ensure(&[net("proxy", true)]).await.unwrap();
        assert_eq!(report.existing, vec!["proxy"]);
    }

    #[tokio::test]
    async fn first_failure_aborts() {
        let rt = Arc::new(FakeRuntime::new());
        rt.fail_network("a");
        let err = NetworkProvisioner::new(rt.clone())
            .ensure(&[net("a", false), net("b", false)])
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Create { ref network, .. } if network == "a"));
        assert!(!rt.calls().contains(&RuntimeCall::InspectNetwork("b".into())));
    }
}
