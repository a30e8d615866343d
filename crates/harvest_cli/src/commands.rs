use std::path::Path;

use anyhow::{bail, Context, Result};
use engine_logging::{engine_error, engine_info, engine_warn};
use harvest_core::ChannelConfig;
use harvest_engine::{enabled_channels, ChannelOutcome, HarvestEngine, HarvestSettings, RunReport};
use tokio_util::sync::CancellationToken;

use crate::cli::{BackfillArgs, Cli, Command, ConfigArgs, RunArgs};
use crate::settings_file::{load_settings, render_settings, save_settings};

pub(crate) async fn execute(cli: Cli) -> Result<()> {
    let Cli {
        token,
        config,
        registry,
        output,
        command,
        ..
    } = cli;

    let mut settings = load_settings(config.as_deref())?;
    if let Some(output) = output {
        settings.output_dir = output;
    }

    match command {
        Command::Config(args) => show_config(&settings, args),
        Command::Run(args) => {
            let engine = build_engine(token, settings)?;
            let channels = select_channels(&registry, &args.channels)?;
            run(&engine, &channels, args).await
        }
        Command::Backfill(args) => {
            let engine = build_engine(token, settings)?;
            let channels = select_channels(&registry, &args.channels)?;
            backfill(&engine, &channels, args).await
        }
    }
}

fn build_engine(token: Option<String>, settings: HarvestSettings) -> Result<HarvestEngine> {
    let token = token
        .filter(|t| !t.trim().is_empty())
        .context("no bot token: pass --token or set SLACK_BOT_TOKEN")?;
    Ok(HarvestEngine::slack(&token, settings)?)
}

/// Enabled registry rows, optionally narrowed to `only`.
fn select_channels(registry: &Path, only: &[String]) -> Result<Vec<ChannelConfig>> {
    let mut channels = enabled_channels(registry)?;
    if !only.is_empty() {
        for id in only {
            if !channels.iter().any(|c| &c.id == id) {
                engine_warn!("channel {} is not enabled in {:?}; ignoring", id, registry);
            }
        }
        channels.retain(|c| only.contains(&c.id));
    }
    if channels.is_empty() {
        bail!("no channels to harvest in {:?}", registry);
    }
    Ok(channels)
}

/// Cancels the returned token on the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            engine_warn!("interrupt received; stopping after the current step");
            trigger.cancel();
        }
    });
    cancel
}

async fn run(engine: &HarvestEngine, channels: &[ChannelConfig], args: RunArgs) -> Result<()> {
    let date = args.date.unwrap_or_else(|| engine.default_date());
    engine_info!(
        "harvesting {} for UTC{} into {:?}",
        date,
        engine.offset(),
        engine.settings().output_dir
    );

    let cancel = cancel_on_ctrl_c();
    let report = engine.run_day(channels, date, &cancel).await;
    log_report(&report);

    if !report.skipped.is_empty() {
        bail!("run cancelled; {} channels not started", report.skipped.len());
    }
    let hard_failures = report.failed.iter().filter(|f| !f.auth).count();
    if hard_failures > 0 {
        bail!("{} of {} channels failed", hard_failures, channels.len());
    }
    Ok(())
}

fn log_report(report: &RunReport) {
    for harvest in &report.harvested {
        match &harvest.outcome {
            ChannelOutcome::Written { path, rows } => {
                engine_info!("{} ({}): {} rows -> {:?}", harvest.channel_id, harvest.channel_name, rows, path)
            }
            ChannelOutcome::Empty => {
                engine_info!("{} ({}): no messages", harvest.channel_id, harvest.channel_name)
            }
        }
        if !harvest.failed_threads.is_empty() {
            engine_warn!(
                "{}: {} threads could not be fetched: {}",
                harvest.channel_id,
                harvest.failed_threads.len(),
                harvest
                    .failed_threads
                    .iter()
                    .map(|ts| ts.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
    }
    for failure in &report.failed {
        if failure.auth {
            engine_warn!("{}: skipped, bot has no access", failure.channel_id);
        } else {
            engine_error!("{}: {}", failure.channel_id, failure.reason);
        }
    }
}

async fn backfill(engine: &HarvestEngine, channels: &[ChannelConfig], args: BackfillArgs) -> Result<()> {
    if args.from > args.to {
        bail!("--from {} is after --to {}", args.from, args.to);
    }

    let cancel = cancel_on_ctrl_c();
    let report = engine
        .backfill(channels, args.from, args.to, &args.checkpoint, &cancel)
        .await
        .with_context(|| format!("backfill stopped; checkpoint left at {:?}", args.checkpoint))?;

    engine_info!(
        "backfill complete: {} windows ({} resumed, {} processed now), manifest at {:?}",
        report.batch.outputs.len(),
        report.batch.resumed,
        report.batch.processed_now,
        report.manifest_path
    );
    Ok(())
}

fn show_config(settings: &HarvestSettings, args: ConfigArgs) -> Result<()> {
    settings.validate()?;
    match args.write {
        Some(path) => {
            let written = save_settings(&path, settings)?;
            println!("{}", written.display());
        }
        None => println!("{}", render_settings(settings)?),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const REGISTRY: &str = "channel_id,channel_name_note,backup_enabled\n\
C1,general,true\n\
C2,random,false\n\
C3,ops,true\n";

    #[test]
    fn selection_narrows_to_requested_enabled_channels() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("channels.csv");
        fs::write(&path, REGISTRY).unwrap();

        let all = select_channels(&path, &[]).unwrap();
        assert_eq!(all.len(), 2);

        let only = select_channels(&path, &["C3".to_string(), "C2".to_string()]).unwrap();
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].id, "C3");

        assert!(select_channels(&path, &["C2".to_string()]).is_err());
    }

    #[test]
    fn missing_token_is_reported() {
        let err = build_engine(Some("  ".to_string()), HarvestSettings::default())
            .err()
            .unwrap();
        assert!(err.to_string().contains("SLACK_BOT_TOKEN"));
    }
}
