use secfeed_core::AuditOptions;

use crate::cli::{AuditArgs, Cli};
use crate::error::CliError;

use super::{open_warehouse, optional_symbols, CommandOutput};

pub fn run(cli: &Cli, args: &AuditArgs) -> Result<CommandOutput, CliError> {
    // Without a catalog, coverage is measured against the instruments table.
    let report = open_warehouse(cli)?.audit(&AuditOptions {
        catalog: optional_symbols(&args.universe)?,
        gap_tolerance_days: args.gap_tolerance_days,
        max_gap_findings: args.max_gaps,
        stale_after_days: args.stale_after_days,
    })?;
    Ok(CommandOutput::ok(serde_json::to_value(&report)?))
}
