use secfeed_core::Plan;

use crate::cli::{Cli, IngestArgs};
use crate::error::CliError;

use super::ingest::{ingest_config, pipeline};
use super::{open_warehouse, require_universe, CommandOutput};

/// Resolve the work an `ingest` with the same flags would do, without fetching.
pub fn run(cli: &Cli, args: &IngestArgs) -> Result<CommandOutput, CliError> {
    let config = ingest_config(args)?;
    let universe = require_universe(&args.universe, config.exchange_suffix.as_deref())?;
    let plan: Plan = pipeline(config, open_warehouse(cli)?).plan(&universe)?;

    tracing::info!(
        universe = plan.universe,
        to_fetch = plan.to_fetch.len(),
        requests = plan.requests,
        batches = plan.batches,
        estimate_ms = plan.estimate_ms,
        "backlog resolved"
    );
    Ok(CommandOutput::ok(serde_json::to_value(&plan)?))
}
