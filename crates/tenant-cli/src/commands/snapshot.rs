use std::process::ExitCode;

use anyhow::{Context as _, Result};

use tenantgrid_state::SnapshotReason;

use crate::commands::emit_json;
use crate::context::Context;
use crate::OutputFormat;

pub fn create(ctx: &Context) -> Result<ExitCode> {
    let manager = ctx.rollback_manager(ctx.runtime()?)?;
    let summary = manager
        .snapshot(SnapshotReason::Manual)
        .context("creating snapshot")?;
    println!("✓ Snapshot {} ({} files)", summary.id, summary.files);
    println!("  SHA256: {}", summary.digest);
    Ok(ExitCode::SUCCESS)
}

pub fn list(ctx: &Context, format: OutputFormat) -> Result<ExitCode> {
    let snapshots = ctx.snapshots().list().context("listing snapshots")?;
    if emit_json(format, &snapshots)? {
        return Ok(ExitCode::SUCCESS);
    }
    if snapshots.is_empty() {
        println!("No snapshots in {}", ctx.snapshots().dir().display());
    }
    for s in &snapshots {
        println!(
            "{:<26} {:<12} {:<10} {:>4} files  {}",
            s.id,
            s.reason,
            s.tenant_id.as_deref().unwrap_or("-"),
            s.files,
            &s.digest[..s.digest.len().min(12)]
        );
    }
    Ok(ExitCode::SUCCESS)
}

pub fn prune(ctx: &Context, keep: usize) -> Result<ExitCode> {
    let deleted = ctx.snapshots().prune(keep).context("pruning snapshots")?;
    println!("✓ Pruned {} snapshots, kept at most {keep}", deleted.len());
    for id in deleted {
        println!("  - {id}");
    }
    Ok(ExitCode::SUCCESS)
}
