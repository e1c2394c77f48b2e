use std::process::ExitCode;

use anyhow::{bail, Context as _, Result};

use crate::commands::emit_json;
use crate::context::Context;
use crate::OutputFormat;

pub fn history(
    ctx: &Context,
    tenant: Option<&str>,
    limit: usize,
    format: OutputFormat,
) -> Result<ExitCode> {
    let tenant = match tenant {
        Some(t) => t.to_string(),
        None => match ctx.manifest()? {
            Some(m) => m.tenant_id,
            None => bail!("no tenant deployed here; pass --tenant"),
        },
    };
    let ledger = ctx.ledger()?;
    let attempts = ledger
        .list_attempts(&tenant, limit)
        .with_context(|| format!("listing attempts for {tenant}"))?;

    if emit_json(format, &attempts)? {
        return Ok(ExitCode::SUCCESS);
    }
    if attempts.is_empty() {
        println!("No recorded deployments for {tenant}");
    }
    for a in &attempts {
        let verdict = a.verdict.map(|v| v.label()).unwrap_or("UNFINISHED");
        let detail = match &a.failure {
            Some(f) => format!("{}: {}", f.phase, f.message),
            None => format!("{} units, {} warnings", a.per_unit_health.len(), a.warnings.len()),
        };
        println!(
            "{}  {:<36}  {:<15}  {detail}",
            a.started_at.format("%Y-%m-%d %H:%M:%S"),
            a.attempt_id,
            verdict
        );
    }
    Ok(ExitCode::SUCCESS)
}
