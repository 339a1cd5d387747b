//! `kubetrace params`: List the container manager's filter parameters.

use clap::Args;
use kubetrace_manager::params::PARAM_DESCS;

use crate::output;

/// Arguments for the `params` command.
#[derive(Args, Debug)]
pub struct ParamsArgs {
    /// Print as JSON instead of a table.
    #[arg(long)]
    pub json: bool,
}

/// Executes the `params` command.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn execute(args: &ParamsArgs) -> anyhow::Result<()> {
    if args.json {
        println!("{}", serde_json::to_string_pretty(&PARAM_DESCS)?);
    } else {
        print!("{}", output::param_table(&PARAM_DESCS));
    }
    Ok(())
}
