use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "harvest",
    version,
    about = "Archive Slack channel conversations as partitioned TSV files"
)]
pub struct Cli {
    /// Bot token with channels:history, channels:read and users:read.
    #[arg(long, env = "SLACK_BOT_TOKEN", hide_env_values = true, global = true)]
    pub token: Option<String>,

    /// RON settings file. Defaults to ./harvest.ron when it exists.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Channel registry CSV (channel_id,channel_name_note,backup_enabled).
    #[arg(long, global = true, default_value = "channels.csv")]
    pub registry: PathBuf,

    /// Archive root; overrides `output_dir` from the settings file.
    #[arg(long, global = true)]
    pub output: Option<PathBuf>,

    /// Also write logs to this file.
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Harvest every enabled channel for one day.
    Run(RunArgs),
    /// Harvest a date range, resuming from a checkpoint after interruption.
    Backfill(BackfillArgs),
    /// Print the effective settings, or write them as a starting file.
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Day to harvest (YYYY-MM-DD). Defaults to yesterday in the configured offset.
    #[arg(long)]
    pub date: Option<NaiveDate>,

    /// Restrict the run to these channel ids.
    #[arg(long = "channel", value_name = "ID")]
    pub channels: Vec<String>,
}

#[derive(Debug, Args)]
pub struct BackfillArgs {
    /// First day, inclusive.
    #[arg(long)]
    pub from: NaiveDate,

    /// Last day, inclusive.
    #[arg(long)]
    pub to: NaiveDate,

    #[arg(long, default_value = "backfill_checkpoint.jsonl")]
    pub checkpoint: PathBuf,

    #[arg(long = "channel", value_name = "ID")]
    pub channels: Vec<String>,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[arg(long, value_name = "PATH")]
    pub write: Option<PathBuf>,
}
