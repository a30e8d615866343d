use std::path::{Path, PathBuf};

use chrono::SecondsFormat;
use engine_logging::{engine_debug, engine_info};
use harvest_core::{HarvestWindow, Message, MessageSet};

use crate::partition::{partition_dir, partition_filename};
use crate::persist::{AtomicFileWriter, PersistError};
use crate::source::HarvestContext;
use crate::users::UserNameCache;

pub const HEADER: [&str; 6] = [
    "timestamp_utc",
    "channel_name",
    "user_id",
    "user_name",
    "text",
    "thread_ts",
];

/// Placeholder for messages without an author.
pub const NO_USER: &str = "N/A";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestRow {
    pub timestamp_utc: String,
    pub channel_name: String,
    pub user_id: String,
    pub user_name: String,
    pub text: String,
    pub thread_ts: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenHarvest {
    pub path: PathBuf,
    pub rows: usize,
}

/// Conversational messages only, oldest first.
pub fn conversational_in_order(messages: MessageSet) -> Vec<Message> {
    messages
        .into_sorted()
        .into_iter()
        .filter(Message::is_conversational)
        .collect()
}

/// Collapse line breaks and tabs so each message is one TSV record.
pub fn normalize_text(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\n' | '\r' | '\t' => ' ',
            other => other,
        })
        .collect()
}

pub fn render_tsv(rows: &[HarvestRow]) -> String {
    let mut out = HEADER.join("\t");
    out.push('\n');
    for row in rows {
        let cells = [
            row.timestamp_utc.as_str(),
            row.channel_name.as_str(),
            row.user_id.as_str(),
            row.user_name.as_str(),
            row.text.as_str(),
            row.thread_ts.as_str(),
        ];
        let cells: Vec<String> = cells.iter().map(|c| normalize_text(c)).collect();
        out.push_str(&cells.join("\t"));
        out.push('\n');
    }
    out
}

/// Writes one harvested window to its partitioned location.
#[derive(Debug, Clone)]
pub struct HarvestWriter {
    root: PathBuf,
}

impl HarvestWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filters, orders and serializes `messages`, resolving author names
    /// through `names`. Re-writing the same window overwrites the file.
    pub async fn write(
        &self,
        ctx: HarvestContext<'_>,
        messages: MessageSet,
        window: &HarvestWindow,
        channel_name: &str,
        names: &mut UserNameCache,
    ) -> Result<WrittenHarvest, PersistError> {
        let ordered = conversational_in_order(messages);
        let mut rows = Vec::with_capacity(ordered.len());
        for message in ordered {
            let (user_id, user_name) = match message.user_id.as_deref() {
                Some(id) => (id.to_string(), names.resolve(ctx, id).await),
                None => (NO_USER.to_string(), NO_USER.to_string()),
            };
            rows.push(HarvestRow {
                timestamp_utc: format_utc(&message),
                channel_name: channel_name.to_string(),
                user_id,
                user_name,
                text: normalize_text(&message.text),
                thread_ts: message
                    .thread_parent
                    .as_ref()
                    .map(|ts| ts.to_string())
                    .unwrap_or_default(),
            });
        }

        let body = render_tsv(&rows);
        let dir = partition_dir(&self.root, window);
        engine_debug!("writing {} rows under {:?}", rows.len(), dir);
        let path = AtomicFileWriter::new(dir).write(&partition_filename(window), body.as_bytes())?;
        engine_info!("saved {} messages to {:?}", rows.len(), path);
        Ok(WrittenHarvest {
            path,
            rows: rows.len(),
        })
    }
}

fn format_utc(message: &Message) -> String {
    message
        .ts
        .to_utc()
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Micros, false))
        .unwrap_or_else(|| message.ts.to_string())
}
