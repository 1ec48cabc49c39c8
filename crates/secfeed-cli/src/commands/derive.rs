use crate::cli::{Cli, DeriveArgs};
use crate::error::CliError;

use super::{open_warehouse, optional_symbols, CommandOutput};

pub fn run(cli: &Cli, args: &DeriveArgs) -> Result<CommandOutput, CliError> {
    let symbols = optional_symbols(&args.universe)?;
    let report = open_warehouse(cli)?.derive_historical_metrics(symbols.as_deref())?;
    if !report.failed_symbols.is_empty() {
        tracing::warn!(
            failed = report.failed_symbols.len(),
            "some symbols were not derived"
        );
    }
    Ok(CommandOutput::ok(serde_json::to_value(&report)?))
}
