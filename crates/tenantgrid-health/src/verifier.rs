//! Health verification after a deployment.
//!
//! Every unit gets its own poll task with its own deadline; the verifier
//! joins all of them before returning, so one slow unit never delays the
//! classification of the others.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use tenant_core::{ConfigError, OrchestratorConfig};
use tenantgrid_runtime::ContainerRuntime;
use tenantgrid_state::{HealthState, UnitHealthReport, Verdict};

use crate::checker::PollTracker;

#[derive(Clone)]
pub struct HealthVerifier {
    runtime: Arc<dyn ContainerRuntime>,
    poll_interval: Duration,
    per_unit_timeout: Duration,
    query_error_threshold: u32,
}

impl HealthVerifier {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        poll_interval: Duration,
        per_unit_timeout: Duration,
    ) -> Self {
        Self {
            runtime,
            poll_interval,
            per_unit_timeout,
            query_error_threshold: 3,
        }
    }

    pub fn from_config(
        runtime: Arc<dyn ContainerRuntime>,
        config: &OrchestratorConfig,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(runtime, config.poll_interval()?, config.per_unit_timeout()?)
            .with_error_threshold(config.health.query_error_threshold))
    }

    /// Consecutive runtime query errors after which a unit counts as
    /// unhealthy.
    pub fn with_error_threshold(mut self, threshold: u32) -> Self {
        self.query_error_threshold = threshold;
        self
    }

    pub fn per_unit_timeout(&self) -> Duration {
        self.per_unit_timeout
    }

    /// Classify every unit in `units`. Always returns one report per
    /// distinct unit; a unit that never settles is `TimedOut`.
    pub async fn verify(&self, units: &[String]) -> BTreeMap<String, UnitHealthReport> {
        let mut reports: BTreeMap<String, UnitHealthReport> = BTreeMap::new();
        let mut tasks = JoinSet::new();

        for unit in units {
            if reports.contains_key(unit) {
                continue;
            }
            // Placeholder in case the task dies without reporting.
            reports.insert(
                unit.clone(),
                UnitHealthReport {
                    state: HealthState::Unhealthy,
                    running: false,
                    polls: 0,
                    last_error: Some("health task aborted".to_string()),
                },
            );
            let runtime = Arc::clone(&self.runtime);
            let unit = unit.clone();
            let interval = self.poll_interval;
            let timeout = self.per_unit_timeout;
            let threshold = self.query_error_threshold;
            tasks.spawn(async move {
                let report = poll_unit(runtime.as_ref(), &unit, interval, timeout, threshold).await;
                (unit, report)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((unit, report)) => {
                    reports.insert(unit, report);
                }
                Err(e) => warn!(error = %e, "health task failed"),
            }
        }
        reports
    }
}

async fn poll_unit(
    runtime: &dyn ContainerRuntime,
    unit: &str,
    interval: Duration,
    timeout: Duration,
    error_threshold: u32,
) -> UnitHealthReport {
    let deadline = Instant::now() + timeout;
    let mut tracker = PollTracker::new(interval, error_threshold);

    loop {
        let result = match tokio::time::timeout_at(deadline, runtime.unit_health(unit)).await {
            Ok(result) => result,
            Err(_) => break,
        };
        if let Some(state) = tracker.record(&result) {
            match state {
                HealthState::Healthy | HealthState::NoHealthCheck => {
                    debug!(%unit, ?state, polls = tracker.polls(), "unit settled")
                }
                _ => warn!(%unit, ?state, polls = tracker.polls(), "unit settled"),
            }
            return tracker.report(state);
        }

        let now = Instant::now();
        if now >= deadline {
            break;
        }
        tokio::time::sleep_until((now + tracker.next_interval()).min(deadline)).await;
        if Instant::now() >= deadline {
            break;
        }
    }

    warn!(%unit, polls = tracker.polls(), ?timeout, "unit did not settle in time");
    tracker.report(HealthState::TimedOut)
}

/// Collapse per-unit reports into a verdict.
///
/// Any unhealthy unit fails the deployment, as does a timed-out unit the
/// runtime no longer reports as running. A unit that is running but never
/// turned healthy only degrades it to a partial failure.
pub fn aggregate_verdict(reports: &BTreeMap<String, UnitHealthReport>) -> Verdict {
    let mut verdict = Verdict::Succeeded;
    for report in reports.values() {
        match report.state {
            HealthState::Unhealthy => return Verdict::Failed,
            HealthState::TimedOut if !report.running => return Verdict::Failed,
            HealthState::TimedOut => verdict = Verdict::PartialFailure,
            HealthState::Healthy | HealthState::NoHealthCheck => {}
        }
    }
    info!(units = reports.len(), ?verdict, "health verdict");
    verdict
}
