pub mod deploy;
pub mod history;
pub mod rollback;
pub mod snapshot;
pub mod status;

use serde::Serialize;

use crate::OutputFormat;

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// `true` when the caller asked for JSON and it has been printed.
pub(crate) fn emit_json<T: Serialize>(format: OutputFormat, value: &T) -> anyhow::Result<bool> {
    match format {
        OutputFormat::Json => {
            print_json(value)?;
            Ok(true)
        }
        OutputFormat::Text => Ok(false),
    }
}
