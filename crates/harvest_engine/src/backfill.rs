//! Checkpointed harvest of many (channel, date) windows.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{FixedOffset, NaiveDate};
use engine_logging::{engine_info, engine_warn};
use harvest_core::{ChannelConfig, HarvestWindow};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::batch::{run_checkpointed, BatchError, BatchReport, RecordProcessor};
use crate::channel::{harvest_channel, ChannelError, ChannelOutcome};
use crate::checkpoint::{CheckpointRecord, CheckpointStore};
use crate::persist::AtomicFileWriter;
use crate::source::HarvestContext;
use crate::users::UserNameCache;
use crate::writer::{normalize_text, HarvestWriter};

pub const MANIFEST_FILENAME: &str = "backfill_manifest.tsv";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillRecord {
    pub channel: ChannelConfig,
    pub date: NaiveDate,
}

impl BackfillRecord {
    pub fn key(&self) -> String {
        window_key(&self.channel.id, self.date)
    }
}

pub fn window_key(channel_id: &str, date: NaiveDate) -> String {
    format!("{}/{}", channel_id, date.format("%Y-%m-%d"))
}

/// Every (channel, date) pair, dates ascending (inclusive), channels in
/// registry order within a date.
pub fn plan_backfill(channels: &[ChannelConfig], from: NaiveDate, to: NaiveDate) -> Vec<BackfillRecord> {
    from.iter_days()
        .take_while(|date| *date <= to)
        .flat_map(|date| {
            channels.iter().map(move |channel| BackfillRecord {
                channel: channel.clone(),
                date,
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WindowStatus {
    Written { path: PathBuf, rows: usize },
    Empty,
    /// The source refused or kept failing; the window needs a manual re-run.
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSummary {
    pub key: String,
    pub channel_id: String,
    pub date: String,
    pub status: WindowStatus,
    #[serde(default)]
    pub failed_threads: Vec<String>,
}

impl CheckpointRecord for WindowSummary {
    fn key(&self) -> &str {
        &self.key
    }
}

#[derive(Debug, Clone)]
pub struct BackfillOptions {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub offset: FixedOffset,
    pub checkpoint_every: usize,
    pub channel_spacing: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillReport {
    pub batch: BatchReport<WindowSummary>,
    pub manifest_path: PathBuf,
}

struct WindowProcessor<'a> {
    ctx: HarvestContext<'a>,
    writer: &'a HarvestWriter,
    names: UserNameCache,
    offset: FixedOffset,
    spacing: Duration,
    started: bool,
}

#[async_trait::async_trait]
impl<'a> RecordProcessor for WindowProcessor<'a> {
    type Record = BackfillRecord;
    type Output = WindowSummary;

    fn key(&self, record: &BackfillRecord) -> String {
        record.key()
    }

    async fn process(
        &mut self,
        index: usize,
        record: &BackfillRecord,
    ) -> Result<WindowSummary, BatchError> {
        if self.started && !self.spacing.is_zero() {
            tokio::time::sleep(self.spacing).await;
        }
        self.started = true;

        let key = record.key();
        engine_info!("backfill record {}: {}", index, key);
        let window = HarvestWindow::new(record.channel.id.clone(), record.date, self.offset);
        let (status, failed_threads) =
            match harvest_channel(self.ctx, &record.channel, &window, self.writer, &mut self.names)
                .await
            {
                Ok(harvest) => {
                    let status = match harvest.outcome {
                        ChannelOutcome::Written { path, rows } => WindowStatus::Written { path, rows },
                        ChannelOutcome::Empty => WindowStatus::Empty,
                    };
                    let failed = harvest
                        .failed_threads
                        .iter()
                        .map(|ts| ts.to_string())
                        .collect::<Vec<_>>();
                    (status, failed)
                }
                // Local disk trouble stops the batch; the checkpoint survives.
                Err(ChannelError::Write { source, .. }) => return Err(BatchError::Output(source)),
                Err(err) => {
                    engine_warn!("backfill {}: recording failure and moving on: {}", key, err);
                    (
                        WindowStatus::Failed {
                            reason: err.to_string(),
                        },
                        Vec::new(),
                    )
                }
            };

        Ok(WindowSummary {
            key,
            channel_id: record.channel.id.clone(),
            date: record.date.format("%Y-%m-%d").to_string(),
            status,
            failed_threads,
        })
    }
}

pub fn render_manifest(summaries: &[WindowSummary]) -> String {
    let mut out = String::from("key\tchannel_id\tdate\tstatus\trows\tfailed_threads\tdetail\n");
    for summary in summaries {
        let (status, rows, detail) = match &summary.status {
            WindowStatus::Written { path, rows } => {
                ("written", rows.to_string(), path.display().to_string())
            }
            WindowStatus::Empty => ("empty", "0".to_string(), String::new()),
            WindowStatus::Failed { reason } => ("failed", "0".to_string(), reason.clone()),
        };
        let threads = summary.failed_threads.join(",");
        let line = [
            summary.key.as_str(),
            summary.channel_id.as_str(),
            summary.date.as_str(),
            status,
            rows.as_str(),
            threads.as_str(),
            detail.as_str(),
        ]
        .map(normalize_text)
        .join("\t");
        out.push_str(&line);
        out.push('\n');
    }
    out
}

/// Harvests every window in `[options.from, options.to]` for `channels`,
/// resuming from `store` if an earlier run was interrupted.
pub async fn run_backfill(
    ctx: HarvestContext<'_>,
    channels: &[ChannelConfig],
    options: &BackfillOptions,
    writer: &HarvestWriter,
    store: &CheckpointStore,
    cancel: &CancellationToken,
) -> Result<BackfillReport, BatchError> {
    let records = plan_backfill(channels, options.from, options.to);
    engine_info!(
        "backfill {} to {}: {} windows across {} channels",
        options.from,
        options.to,
        records.len(),
        channels.len()
    );

    let mut processor = WindowProcessor {
        ctx,
        writer,
        names: UserNameCache::new(),
        offset: options.offset,
        spacing: options.channel_spacing,
        started: false,
    };

    let manifest_writer = AtomicFileWriter::new(writer.root().to_path_buf());
    let mut manifest_path = None;
    let batch = run_checkpointed(
        &mut processor,
        &records,
        store,
        options.checkpoint_every,
        cancel,
        |summaries| {
            let path = manifest_writer.write(MANIFEST_FILENAME, render_manifest(summaries).as_bytes())?;
            engine_info!("backfill manifest written to {:?}", path);
            manifest_path = Some(path);
            Ok(())
        },
    )
    .await?;

    Ok(BackfillReport {
        batch,
        manifest_path: manifest_path.unwrap_or_else(|| writer.root().join(MANIFEST_FILENAME)),
    })
}
