use secfeed_core::QueryGuardrails;

use crate::cli::{Cli, SqlArgs};
use crate::error::CliError;

use super::{open_warehouse, CommandOutput};

pub fn run(cli: &Cli, args: &SqlArgs) -> Result<CommandOutput, CliError> {
    if args.query.trim().is_empty() {
        return Err(CliError::Usage(String::from("query must not be empty")));
    }

    let result = open_warehouse(cli)?.execute_query(
        &args.query,
        QueryGuardrails {
            max_rows: args.max_rows,
            query_timeout_ms: args.query_timeout_ms,
        },
    )?;
    Ok(CommandOutput::ok(serde_json::to_value(&result)?))
}
