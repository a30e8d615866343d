mod cli;
mod commands;
mod logging;
mod settings_file;

use clap::Parser;

use crate::cli::Cli;
use crate::logging::LogDestination;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::initialize(
        LogDestination::from_log_file(cli.log_file.as_deref()),
        cli.verbose,
    );
    commands::execute(cli).await
}
