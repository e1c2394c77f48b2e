//! Monitor/Reporter — on-demand and periodic sampling outside the deploy
//! path.
//!
//! A [`MonitorReport`] combines unit health as the runtime reports it,
//! host load and memory from `/proc`, and HTTP reachability of the
//! configured probe targets.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use tenant_core::ProbeTarget;
use tenantgrid_runtime::{ContainerRuntime, ReportedHealth};

use crate::checker::{http_probe, ProbeResult};

const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize)]
pub struct MonitorReport {
    pub sampled_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    pub units: Vec<UnitSample>,
    pub host: HostUsage,
    pub probes: Vec<ProbeSample>,
    /// Sampling problems that did not prevent a report.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl MonitorReport {
    pub fn running_units(&self) -> usize {
        self.units.iter().filter(|u| u.running).count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitSample {
    pub unit: String,
    pub running: bool,
    /// `None` when the health query itself failed.
    pub health: Option<ReportedHealth>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HostUsage {
    pub load_1m: Option<f64>,
    pub load_5m: Option<f64>,
    pub load_15m: Option<f64>,
    pub mem_total_kib: Option<u64>,
    pub mem_available_kib: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbeSample {
    pub address: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub result: ProbeResult,
    pub elapsed_ms: u64,
}

pub struct Reporter {
    runtime: Arc<dyn ContainerRuntime>,
    probes: Vec<ProbeTarget>,
    tenant_id: Option<String>,
    domain: Option<String>,
    probe_timeout: Duration,
    proc_root: PathBuf,
}

impl Reporter {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, probes: Vec<ProbeTarget>) -> Self {
        Self {
            runtime,
            probes,
            tenant_id: None,
            domain: None,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            proc_root: PathBuf::from("/proc"),
        }
    }

    /// Tenant the samples are attributed to; `domain` fills the `{domain}`
    /// placeholder of probe host headers.
    pub fn with_tenant(mut self, tenant_id: impl Into<String>, domain: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self.domain = Some(domain.into());
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Read host statistics from another procfs root.
    pub fn with_proc_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.proc_root = root.into();
        self
    }

    /// Take one sample.
    pub async fn sample(&self) -> MonitorReport {
        let mut errors = Vec::new();

        let units = match self.runtime.defined_units().await {
            Ok(units) => units,
            Err(e) => {
                errors.push(format!("listing units: {e}"));
                match self.runtime.running_units().await {
                    Ok(units) => units,
                    Err(e) => {
                        errors.push(format!("listing running units: {e}"));
                        Vec::new()
                    }
                }
            }
        };

        let mut samples = Vec::with_capacity(units.len());
        for unit in units {
            match self.runtime.unit_health(&unit).await {
                Ok(h) => samples.push(UnitSample {
                    unit,
                    running: h.running,
                    health: Some(h.health),
                }),
                Err(e) => {
                    errors.push(format!("{unit}: {e}"));
                    samples.push(UnitSample {
                        unit,
                        running: false,
                        health: None,
                    });
                }
            }
        }

        let mut probes = Vec::with_capacity(self.probes.len());
        for target in &self.probes {
            let host = target
                .host
                .as_ref()
                .map(|h| h.replace("{domain}", self.domain.as_deref().unwrap_or("localhost")));
            let started = Instant::now();
            let result = http_probe(
                &target.address,
                &target.path,
                host.as_deref(),
                self.probe_timeout,
            )
            .await;
            probes.push(ProbeSample {
                address: target.address.clone(),
                path: target.path.clone(),
                host,
                result,
                elapsed_ms: started.elapsed().as_millis() as u64,
            });
        }

        let report = MonitorReport {
            sampled_at: Utc::now(),
            tenant_id: self.tenant_id.clone(),
            units: samples,
            host: read_host_usage(&self.proc_root),
            probes,
            errors,
        };
        debug!(
            units = report.units.len(),
            running = report.running_units(),
            errors = report.errors.len(),
            "monitor sample"
        );
        report
    }

    /// Sample every `interval` until `shutdown` flips, handing each report
    /// to `on_report`. The first sample is taken immediately.
    pub async fn run<F>(
        &self,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
        mut on_report: F,
    )
    where
        F: FnMut(&MonitorReport),
    {
        if *shutdown.borrow() {
            return;
        }
        loop {
            let report = self.sample().await;
            on_report(&report);

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("monitor loop shutting down");
                        break;
                    }
                }
            }
        }
    }
}

fn read_host_usage(proc_root: &Path) -> HostUsage {
    let mut usage = HostUsage::default();

    match std::fs::read_to_string(proc_root.join("loadavg")) {
        Ok(content) => {
            let mut fields = content.split_whitespace().map(|f| f.parse::<f64>().ok());
            usage.load_1m = fields.next().flatten();
            usage.load_5m = fields.next().flatten();
            usage.load_15m = fields.next().flatten();
        }
        Err(e) => debug!(error = %e, "load average unavailable"),
    }

    match std::fs::read_to_string(proc_root.join("meminfo")) {
        Ok(content) => {
            for line in content.lines() {
                let mut parts = line.split_whitespace();
                let key = parts.next();
                let value = parts.next().and_then(|v| v.parse::<u64>().ok());
                match key {
                    Some("MemTotal:") => usage.mem_total_kib = value,
                    Some("MemAvailable:") => usage.mem_available_kib = value,
                    _ => {}
                }
            }
        }
        Err(e) => debug!(error = %e, "memory info unavailable"),
    }

    if usage == HostUsage::default() {
        warn!(root = %proc_root.display(), "no host statistics available");
    }
    usage
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenantgrid_runtime::fakes::{FakeRuntime, HealthStep};

    fn fake_proc() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("loadavg"), "0.52 0.58 0.59 1/467 12345\n").unwrap();
        std::fs::write(
            dir.path().join("meminfo"),
            "MemTotal:       16318480 kB\nMemFree:         1234567 kB\nMemAvailable:    8123456 kB\n",
        )
        .unwrap();
        dir
    }

    #[test]
    fn parses_proc_files() {
        let dir = fake_proc();
        let usage = read_host_usage(dir.path());
        assert_eq!(usage.load_1m, Some(0.52));
        assert_eq!(usage.load_15m, Some(0.59));
        assert_eq!(usage.mem_total_kib, Some(16_318_480));
        assert_eq!(usage.mem_available_kib, Some(8_123_456));
    }

    #[test]
    fn missing_proc_files_yield_empty_usage() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_host_usage(dir.path()), HostUsage::default());
    }

    #[tokio::test]
    async fn sample_reports_units_and_probes() {
        let proc = fake_proc();
        let rt = Arc::new(FakeRuntime::new());
        rt.define_units(["proxy", "db", "worker"]);
        rt.set_running(["proxy", "db"]);
        rt.script_health("db", [HealthStep::QueryError("timeout".into())]);

        let reporter = Reporter::new(
            rt,
            vec![ProbeTarget {
                address: "127.0.0.1:1".into(),
                path: "/".into(),
                host: Some("dash.{domain}".into()),
            }],
        )
        .with_tenant("acme", "acme.test")
        .with_probe_timeout(Duration::from_millis(200))
        .with_proc_root(proc.path());

        let report = reporter.sample().await;
        assert_eq!(report.tenant_id.as_deref(), Some("acme"));
        assert_eq!(report.units.len(), 3);
        assert_eq!(report.running_units(), 1);
        assert!(report.units.iter().any(|u| u.unit == "db" && u.health.is_none()));
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.probes[0].host.as_deref(), Some("dash.acme.test"));
        assert_eq!(report.probes[0].result, ProbeResult::Failed);
        assert_eq!(report.host.load_5m, Some(0.58));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["units"][0]["unit"], "proxy");
    }

    #[tokio::test]
    async fn unreachable_runtime_still_reports() {
        let rt = Arc::new(FakeRuntime::new());
        rt.set_unavailable(true);
        let report = Reporter::new(rt, vec![]).sample().await;
        assert!(report.units.is_empty());
        assert_eq!(report.errors.len(), 2);
        assert!(report.errors[0].starts_with("listing units"));
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_shutdown() {
        let rt = Arc::new(FakeRuntime::new());
        let reporter = Reporter::new(rt, vec![]).with_proc_root("/nonexistent");
        let (tx, rx) = watch::channel(false);

        let mut count = 0;
        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(25)).await;
            let _ = tx.send(true);
        });
        reporter
            .run(Duration::from_secs(10), rx, |_| count += 1)
            .await;
        stopper.await.unwrap();
        // Samples at 0s, 10s and 20s.
        assert_eq!(count, 3);
    }
}
