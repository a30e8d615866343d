use std::path::Path;
use std::sync::Arc;

use chrono::{FixedOffset, NaiveDate, Utc};
use harvest_core::{most_recent_completed_day, ChannelConfig};
use tokio_util::sync::CancellationToken;

use crate::backfill::{run_backfill, BackfillOptions, BackfillReport};
use crate::batch::BatchError;
use crate::channel::{run_channels, RunReport};
use crate::checkpoint::CheckpointStore;
use crate::gate::Pacing;
use crate::settings::{HarvestSettings, SettingsError};
use crate::slack::SlackClient;
use crate::source::{HarvestContext, MessageSource};
use crate::users::UserNameCache;
use crate::writer::HarvestWriter;
use crate::SourceError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error("failed to create source client: {0}")]
    Source(#[from] SourceError),
}

/// Owns the source client and everything a run needs around it.
pub struct HarvestEngine {
    source: Arc<dyn MessageSource>,
    pacing: Pacing,
    writer: HarvestWriter,
    settings: HarvestSettings,
    offset: FixedOffset,
}

impl HarvestEngine {
    pub fn new(source: Arc<dyn MessageSource>, settings: HarvestSettings) -> Result<Self, EngineError> {
        settings.validate()?;
        let offset = settings.offset()?;
        Ok(Self {
            source,
            pacing: settings.pacing(),
            writer: HarvestWriter::new(settings.output_dir.clone()),
            settings,
            offset,
        })
    }

    /// Engine backed by the Slack Web API.
    pub fn slack(token: &str, settings: HarvestSettings) -> Result<Self, EngineError> {
        let client = SlackClient::new(settings.source_settings(token))?;
        Self::new(Arc::new(client), settings)
    }

    pub fn settings(&self) -> &HarvestSettings {
        &self.settings
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn context(&self) -> HarvestContext<'_> {
        HarvestContext::new(self.source.as_ref(), &self.pacing)
    }

    /// Yesterday in the configured offset.
    pub fn default_date(&self) -> NaiveDate {
        most_recent_completed_day(Utc::now(), self.offset)
    }

    pub async fn run_day(
        &self,
        channels: &[ChannelConfig],
        date: NaiveDate,
        cancel: &CancellationToken,
    ) -> RunReport {
        let mut names = UserNameCache::new();
        run_channels(
            self.context(),
            channels,
            date,
            self.offset,
            &self.writer,
            &mut names,
            self.settings.channel_spacing(),
            cancel,
        )
        .await
    }

    pub async fn backfill(
        &self,
        channels: &[ChannelConfig],
        from: NaiveDate,
        to: NaiveDate,
        checkpoint: &Path,
        cancel: &CancellationToken,
    ) -> Result<BackfillReport, BatchError> {
        let options = BackfillOptions {
            from,
            to,
            offset: self.offset,
            checkpoint_every: self.settings.checkpoint_every,
            channel_spacing: self.settings.channel_spacing(),
        };
        let store = CheckpointStore::new(checkpoint);
        run_backfill(self.context(), channels, &options, &self.writer, &store, cancel).await
    }
}
