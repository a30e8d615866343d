use std::path::PathBuf;
use std::time::Duration;

use chrono::{FixedOffset, NaiveDate};
use engine_logging::{engine_error, engine_info, engine_warn};
use harvest_core::{ChannelConfig, HarvestWindow, MessageTs};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::persist::PersistError;
use crate::retry::call_with_backoff;
use crate::source::HarvestContext;
use crate::threads::expand_threads;
use crate::users::UserNameCache;
use crate::walker::list_all;
use crate::writer::HarvestWriter;
use crate::SourceError;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("listing {channel_id} failed: {source}")]
    Listing {
        channel_id: String,
        #[source]
        source: SourceError,
    },
    #[error("writing {channel_id} failed: {source}")]
    Write {
        channel_id: String,
        #[source]
        source: PersistError,
    },
}

impl ChannelError {
    /// The bot cannot read this channel; the fix is an invite, not a retry.
    pub fn is_auth(&self) -> bool {
        matches!(self, ChannelError::Listing { source, .. } if source.is_auth())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelOutcome {
    Written { path: PathBuf, rows: usize },
    /// Nothing posted in the window; no file written.
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelHarvest {
    pub channel_id: String,
    pub channel_name: String,
    pub outcome: ChannelOutcome,
    pub failed_threads: Vec<MessageTs>,
}

/// Channel name for the output, falling back to the registry label and then
/// to the id when the lookup fails.
pub async fn resolve_channel_name(ctx: HarvestContext<'_>, channel: &ChannelConfig) -> String {
    let operation = format!("conversations.info[{}]", channel.id);
    let source = ctx.source;
    match call_with_backoff(&ctx.pacing.backoff, &ctx.pacing.lookup, &operation, || {
        source.channel_info(&channel.id)
    })
    .await
    {
        Ok(info) => {
            engine_info!(
                "{}: name {} ({})",
                operation,
                info.name,
                if info.is_private { "private" } else { "public" }
            );
            info.name
        }
        Err(err) => {
            engine_warn!("{}: using fallback name: {}", operation, err);
            if channel.label.is_empty() {
                channel.id.clone()
            } else {
                channel.label.clone()
            }
        }
    }
}

/// Harvests one channel for one window: list, expand threads, write.
pub async fn harvest_channel(
    ctx: HarvestContext<'_>,
    channel: &ChannelConfig,
    window: &HarvestWindow,
    writer: &HarvestWriter,
    names: &mut UserNameCache,
) -> Result<ChannelHarvest, ChannelError> {
    let channel_name = resolve_channel_name(ctx, channel).await;

    let top_level = list_all(ctx, window)
        .await
        .map_err(|source| ChannelError::Listing {
            channel_id: channel.id.clone(),
            source,
        })?;

    if top_level.is_empty() {
        engine_info!("no messages in {} on {}; skipping", channel.id, window.date);
        return Ok(ChannelHarvest {
            channel_id: channel.id.clone(),
            channel_name,
            outcome: ChannelOutcome::Empty,
            failed_threads: Vec::new(),
        });
    }

    let expansion = expand_threads(ctx, &channel.id, top_level).await;
    let failed_threads = expansion.failed_threads();

    let written = writer
        .write(ctx, expansion.messages, window, &channel_name, names)
        .await
        .map_err(|source| ChannelError::Write {
            channel_id: channel.id.clone(),
            source,
        })?;

    Ok(ChannelHarvest {
        channel_id: channel.id.clone(),
        channel_name,
        outcome: ChannelOutcome::Written {
            path: written.path,
            rows: written.rows,
        },
        failed_threads,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelFailure {
    pub channel_id: String,
    pub reason: String,
    pub auth: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub harvested: Vec<ChannelHarvest>,
    pub failed: Vec<ChannelFailure>,
    /// Channels not started because the run was cancelled.
    pub skipped: Vec<String>,
}

impl RunReport {
    pub fn failed_thread_count(&self) -> usize {
        self.harvested.iter().map(|h| h.failed_threads.len()).sum()
    }
}

/// Harvests `channels` for `date`, one after another.
///
/// A failing channel is logged and recorded; the run moves on to the next.
/// Cancellation is honoured between channels.
#[allow(clippy::too_many_arguments)]
pub async fn run_channels(
    ctx: HarvestContext<'_>,
    channels: &[ChannelConfig],
    date: NaiveDate,
    offset: FixedOffset,
    writer: &HarvestWriter,
    names: &mut UserNameCache,
    channel_spacing: Duration,
    cancel: &CancellationToken,
) -> RunReport {
    engine_info!("starting harvest of {} channels for {}", channels.len(), date);
    let mut report = RunReport::default();

    for (i, channel) in channels.iter().enumerate() {
        if cancel.is_cancelled() {
            engine_warn!("run cancelled; {} channels not started", channels.len() - i);
            report
                .skipped
                .extend(channels[i..].iter().map(|c| c.id.clone()));
            break;
        }
        if i > 0 && !channel_spacing.is_zero() {
            tokio::time::sleep(channel_spacing).await;
        }

        engine_info!("processing channel {} ({}/{})", channel.id, i + 1, channels.len());
        let window = HarvestWindow::new(channel.id.clone(), date, offset);
        match harvest_channel(ctx, channel, &window, writer, names).await {
            Ok(harvest) => report.harvested.push(harvest),
            Err(err) => {
                let auth = err.is_auth();
                if auth {
                    engine_warn!(
                        "bot cannot read channel {}; skipping. Invite the bot to this channel. ({})",
                        channel.id,
                        err
                    );
                } else {
                    engine_error!("channel {} failed: {}", channel.id, err);
                }
                report.failed.push(ChannelFailure {
                    channel_id: channel.id.clone(),
                    reason: err.to_string(),
                    auth,
                });
            }
        }
    }

    engine_info!(
        "harvest finished: {} ok, {} failed, {} failed threads",
        report.harvested.len(),
        report.failed.len(),
        report.failed_thread_count()
    );
    report
}
