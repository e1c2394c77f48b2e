use std::process::ExitCode;

use anyhow::{Context as _, Result};
use tracing::error;

use tenantgrid_rollout::RollbackReport;

use crate::commands::emit_json;
use crate::context::Context;
use crate::OutputFormat;

pub async fn rollback(ctx: &Context, id: Option<&str>, format: OutputFormat) -> Result<ExitCode> {
    let manager = ctx.rollback_manager(ctx.runtime()?)?;
    let report = match manager.rollback(id).await {
        Ok(report) => report,
        Err(e) => {
            if e.is_degraded() {
                error!(error = %e, "rollback interrupted; host state is unknown");
            }
            return Err(e).context("rollback failed");
        }
    };

    if !emit_json(format, &report)? {
        print_report(&report);
    }
    Ok(if report.post_check.passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

pub(crate) fn print_report(report: &RollbackReport) {
    println!(
        "Rolled back to {} ({}, {} files)",
        report.target.id, report.target.reason, report.target.files
    );
    if let Some(id) = &report.forensic_snapshot {
        println!("  replaced configuration kept as {id}");
    }
    let how = if report.forced { "forced" } else { "graceful" };
    println!("  stopped ({how}): {}", report.stopped.join(", "));
    println!("  restarted: {}", report.restarted.join(", "));
    match (&report.post_check.error, report.post_check.passed) {
        (Some(e), _) => println!("  post-check failed: {e}"),
        (None, true) => println!("  post-check: {} units running", report.post_check.running.len()),
        (None, false) => println!("  post-check failed: no unit is running"),
    }
}
