//! CLI command definitions and dispatch.

pub mod filter;
pub mod params;
pub mod run;
pub mod selector;

use clap::{Parser, Subcommand, ValueEnum};

/// kubetrace: container-aware tracing.
#[derive(Parser, Debug)]
#[command(name = "kubetrace", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Log filter directive (overrides `RUST_LOG`), e.g. `debug` or `kubetrace_manager=trace`.
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Log output format.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per line.
    Json,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Trace the selected containers until interrupted.
    Run(run::RunArgs),
    /// Print the container selector built from the filter flags.
    Selector(selector::SelectorArgs),
    /// List the filter parameters accepted by the container manager.
    Params(params::ParamsArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub async fn execute(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Run(args) => run::execute(args).await,
        Command::Selector(args) => selector::execute(&args),
        Command::Params(args) => params::execute(&args),
    }
}
