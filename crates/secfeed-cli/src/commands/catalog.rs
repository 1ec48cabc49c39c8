use secfeed_core::IngestConfig;

use crate::cli::CatalogArgs;
use crate::error::CliError;

use super::{effective_suffix, require_universe, CommandOutput};

pub fn run(args: &CatalogArgs) -> Result<CommandOutput, CliError> {
    let config = IngestConfig::from_env()?;
    let suffix = effective_suffix(&args.universe, &config);
    let universe = require_universe(&args.universe, suffix.as_deref())?;

    if !universe.rejected.is_empty() {
        tracing::warn!(
            accepted = universe.symbols.len(),
            rejected = universe.rejected.len(),
            "catalog contains rejected tokens"
        );
    }
    Ok(CommandOutput::ok(serde_json::to_value(&universe)?))
}
