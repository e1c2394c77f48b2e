//! `tenantctl deploy` and `tenantctl resolve`.

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context as _, Result};
use serde::Serialize;
use tracing::{error, info, warn};

use tenant_core::{resolve as resolve_selection, RuntimeTopology, ServiceGroup, TenantSelection};
use tenantgrid_rollout::RollbackReport;
use tenantgrid_state::{DeploymentAttempt, HealthState, Verdict};

use crate::commands::{emit_json, rollback::print_report};
use crate::context::Context;
use crate::OutputFormat;

#[derive(Serialize)]
struct DeployOutput<'a> {
    attempt: &'a DeploymentAttempt,
    #[serde(skip_serializing_if = "Option::is_none")]
    rollback: Option<&'a RollbackReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rollback_error: Option<RollbackFailure>,
}

/// A rollback after a failed deployment that did not complete.
#[derive(Debug, Serialize)]
struct RollbackFailure {
    snapshot: String,
    message: String,
    /// The host was left partially restored.
    degraded: bool,
}

pub async fn deploy(
    ctx: &Context,
    selection_path: &Path,
    rollback_on_failure: bool,
    format: OutputFormat,
) -> Result<ExitCode> {
    let selection = TenantSelection::from_file(selection_path)?;
    let runtime = ctx.runtime()?;
    let sequencer = ctx.sequencer(runtime.clone())?;

    let attempt = sequencer.deploy(&selection).await?;
    let verdict = attempt.verdict.unwrap_or(Verdict::Failed);

    let mut rollback = None;
    if verdict == Verdict::Failed && rollback_on_failure {
        match &attempt.pre_deploy_snapshot {
            Some(id) => {
                info!(snapshot = %id, "rolling back failed deployment");
                let manager = ctx.rollback_manager(runtime)?;
                rollback = Some(manager.rollback(Some(id.as_str())).await.map_err(|e| {
                    RollbackFailure {
                        snapshot: id.clone(),
                        message: e.to_string(),
                        degraded: e.is_degraded(),
                    }
                }));
            }
            None => warn!("no pre-deploy snapshot; nothing to roll back to"),
        }
    }

    report(&attempt, rollback, format)
}

/// Print the attempt and any rollback that followed it. The attempt is
/// always reported, even when the rollback failed.
fn report(
    attempt: &DeploymentAttempt,
    rollback: Option<Result<RollbackReport, RollbackFailure>>,
    format: OutputFormat,
) -> Result<ExitCode> {
    let verdict = attempt.verdict.unwrap_or(Verdict::Failed);
    let (report, failure) = match rollback {
        Some(Ok(report)) => (Some(report), None),
        Some(Err(failure)) => (None, Some(failure)),
        None => (None, None),
    };
    if let Some(f) = &failure {
        if f.degraded {
            error!(
                snapshot = %f.snapshot,
                error = %f.message,
                "rollback interrupted; host state is unknown"
            );
        } else {
            error!(snapshot = %f.snapshot, error = %f.message, "rollback failed");
        }
    }

    let exit = deploy_exit_code(verdict, failure.as_ref());
    let output = DeployOutput {
        attempt,
        rollback: report.as_ref(),
        rollback_error: failure,
    };
    if !emit_json(format, &output)? {
        print_attempt(attempt);
        if let Some(report) = &output.rollback {
            println!();
            print_report(report);
        }
        if let Some(f) = &output.rollback_error {
            println!();
            let state = if f.degraded { " (host left degraded)" } else { "" };
            println!("Rollback to {} failed{state}: {}", f.snapshot, f.message);
        }
    }
    Ok(ExitCode::from(exit))
}

fn deploy_exit_code(verdict: Verdict, rollback_failure: Option<&RollbackFailure>) -> u8 {
    match rollback_failure {
        Some(_) => 1,
        None => verdict.exit_code() as u8,
    }
}

pub async fn resolve(
    ctx: &Context,
    selection_path: &Path,
    format: OutputFormat,
) -> Result<ExitCode> {
    let selection = TenantSelection::from_file(selection_path)?;
    let runtime = ctx.runtime()?;
    let units = runtime
        .defined_units()
        .await
        .context("listing units of the rendered topology")?;
    let topology = RuntimeTopology {
        core_services: ctx.config.groups.core.clone(),
        landing_services: ctx.config.groups.landing.clone(),
        networks: ctx.config.networks.clone(),
        units,
    };
    let resolution = resolve_selection(&selection, &topology)?;

    if !emit_json(format, &resolution)? {
        for group in ServiceGroup::ALL {
            println!("{:<9} {}", group, resolution.groups.units(group).join(", "));
        }
        for w in &resolution.warnings {
            println!("warning: {w}");
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn print_attempt(attempt: &DeploymentAttempt) {
    let verdict = attempt.verdict.map(|v| v.label()).unwrap_or("UNFINISHED");
    println!("Deployment {} for {}: {verdict}", attempt.attempt_id, attempt.tenant_id);

    for group in ServiceGroup::ALL {
        let units = attempt.groups.units(group);
        if units.is_empty() {
            continue;
        }
        let marker = if attempt.groups_attempted.contains(&group) {
            "started"
        } else {
            "not started"
        };
        println!("  {group:<9} {} ({marker})", units.join(", "));
    }

    if !attempt.per_unit_health.is_empty() {
        println!("  health:");
        for (unit, report) in &attempt.per_unit_health {
            let running = if report.running { "running" } else { "not running" };
            println!(
                "    {unit:<20} {:<15} {running}, {} polls",
                health_label(report.state),
                report.polls
            );
        }
    }

    for w in &attempt.warnings {
        println!("  warning [{}]: {}", w.phase, w.message);
    }
    if let Some(failure) = &attempt.failure {
        println!("  failed while {}: {}", failure.phase, failure.message);
    }
    if let Some(id) = &attempt.pre_deploy_snapshot {
        println!("  pre-deploy snapshot: {id}");
    }
}

fn health_label(state: HealthState) -> &'static str {
    match state {
        HealthState::Healthy => "healthy",
        HealthState::Unhealthy => "unhealthy",
        HealthState::TimedOut => "timed out",
        HealthState::NoHealthCheck => "no health check",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tenantgrid_rollout::RollbackError;
    use tenantgrid_runtime::RuntimeError;
    use tenantgrid_state::{AttemptWarning, DeployPhase};

    fn failed_attempt() -> DeploymentAttempt {
        let mut attempt = DeploymentAttempt::new("a1".into(), "acme", Utc::now());
        attempt.verdict = Some(Verdict::Failed);
        attempt.pre_deploy_snapshot = Some("20260101T000000.000Z".into());
        attempt.warnings.push(AttemptWarning {
            phase: DeployPhase::EnvMaterializing,
            message: "critical credential POSTGRES_PASSWORD is not set".into(),
        });
        attempt
    }

    fn restart_failure() -> RollbackFailure {
        let err = RollbackError::Restart(RuntimeError::Unavailable("docker".into()));
        RollbackFailure {
            snapshot: "20260101T000000.000Z".into(),
            message: err.to_string(),
            degraded: err.is_degraded(),
        }
    }

    #[test]
    fn failed_rollback_keeps_attempt_in_output() {
        let attempt = failed_attempt();
        let output = DeployOutput {
            attempt: &attempt,
            rollback: None,
            rollback_error: Some(restart_failure()),
        };
        let json = serde_json::to_value(&output).unwrap();

        assert_eq!(json["attempt"]["verdict"], serde_json::to_value(Verdict::Failed).unwrap());
        assert_eq!(json["attempt"]["warnings"].as_array().unwrap().len(), 1);
        assert_eq!(json["rollback_error"]["degraded"], true);
        assert!(json["rollback_error"]["message"]
            .as_str()
            .unwrap()
            .contains("failed to restart units"));
        assert!(json.get("rollback").is_none());
    }

    #[test]
    fn failed_rollback_exits_one() {
        let failure = restart_failure();
        assert_eq!(deploy_exit_code(Verdict::Failed, Some(&failure)), 1);
        assert_eq!(deploy_exit_code(Verdict::Failed, None), 3);
        assert_eq!(deploy_exit_code(Verdict::PartialFailure, None), 2);
        assert_eq!(deploy_exit_code(Verdict::Succeeded, None), 0);
    }

    #[test]
    fn report_succeeds_when_rollback_fails() {
        let attempt = failed_attempt();
        assert!(report(&attempt, Some(Err(restart_failure())), OutputFormat::Json).is_ok());
    }
}
