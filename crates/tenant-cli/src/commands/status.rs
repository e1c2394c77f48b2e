//! `tenantctl status` and `tenantctl monitor`.

use std::process::ExitCode;

use anyhow::{anyhow, Result};
use tokio::sync::watch;
use tracing::{info, warn};

use tenant_core::parse_duration;
use tenantgrid_health::{MonitorReport, ProbeResult};
use tenantgrid_runtime::ReportedHealth;

use crate::context::Context;
use crate::OutputFormat;

pub async fn status(ctx: &Context, format: OutputFormat) -> Result<ExitCode> {
    let reporter = ctx.reporter(ctx.runtime()?)?;
    let report = reporter.sample().await;
    emit(&report, format)?;
    Ok(if report.errors.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

pub async fn monitor(ctx: &Context, interval: &str, format: OutputFormat) -> Result<ExitCode> {
    let interval = parse_duration(interval)
        .filter(|d| !d.is_zero())
        .ok_or_else(|| anyhow!("invalid interval {interval:?}"))?;
    let reporter = ctx.reporter(ctx.runtime()?)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    info!(interval = ?interval, "monitoring");
    reporter
        .run(interval, shutdown_rx, |report| {
            if let Err(e) = emit(report, format) {
                warn!(error = %e, "failed to print sample");
            }
        })
        .await;
    Ok(ExitCode::SUCCESS)
}

fn emit(report: &MonitorReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            // One line per sample so the stream stays machine-readable.
            println!("{}", serde_json::to_string(report)?);
        }
        OutputFormat::Text => print_report(report),
    }
    Ok(())
}

fn print_report(report: &MonitorReport) {
    println!(
        "{}  tenant {}  {}/{} units running",
        report.sampled_at.format("%Y-%m-%d %H:%M:%S"),
        report.tenant_id.as_deref().unwrap_or("-"),
        report.running_units(),
        report.units.len()
    );
    for unit in &report.units {
        let health = unit.health.map(health_label).unwrap_or("unknown");
        let state = if unit.running { "running" } else { "stopped" };
        println!("  {:<20} {state:<8} {health}", unit.unit);
    }

    let host = &report.host;
    if let (Some(l1), Some(l5), Some(l15)) = (host.load_1m, host.load_5m, host.load_15m) {
        println!("  load average: {l1:.2} {l5:.2} {l15:.2}");
    }
    if let (Some(total), Some(avail)) = (host.mem_total_kib, host.mem_available_kib) {
        println!(
            "  memory: {} MiB available of {} MiB",
            avail / 1024,
            total / 1024
        );
    }

    for probe in &report.probes {
        let result = match probe.result {
            ProbeResult::Reachable => "reachable".to_string(),
            ProbeResult::BadStatus(code) => format!("status {code}"),
            ProbeResult::Failed => "unreachable".to_string(),
        };
        let host = probe.host.as_deref().unwrap_or(&probe.address);
        println!(
            "  probe {host}{} via {}: {result} ({} ms)",
            probe.path, probe.address, probe.elapsed_ms
        );
    }
    for e in &report.errors {
        println!("  error: {e}");
    }
}

fn health_label(health: ReportedHealth) -> &'static str {
    match health {
        ReportedHealth::Healthy => "healthy",
        ReportedHealth::Unhealthy => "unhealthy",
        ReportedHealth::Starting => "starting",
        ReportedHealth::NoHealthCheck => "no health check",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tenantgrid_health::Reporter;
    use tenantgrid_runtime::fakes::{FakeRuntime, HealthStep};

    #[tokio::test]
    async fn json_sample_is_a_single_line() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.define_units(["proxy", "db"]);
        runtime.set_running(["proxy"]);
        runtime.script_health("db", [HealthStep::exited()]);
        let proc_root = tempfile::tempdir().unwrap();

        let report = Reporter::new(runtime, Vec::new())
            .with_tenant("acme", "acme.example")
            .with_proc_root(proc_root.path())
            .sample()
            .await;
        assert_eq!(report.running_units(), 1);

        let line = serde_json::to_string(&report).unwrap();
        assert!(!line.contains('\n'));
        assert!(line.contains("\"tenant_id\":\"acme\""));
    }
}
