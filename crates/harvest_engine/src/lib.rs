//! Harvest engine: source client, paced fetching, checkpoints and output.
mod backfill;
mod batch;
mod channel;
mod checkpoint;
mod engine;
mod gate;
mod partition;
mod persist;
mod registry;
mod retry;
mod settings;
mod slack;
mod source;
mod threads;
mod types;
mod users;
mod walker;
mod writer;

pub use backfill::{
    plan_backfill, render_manifest, run_backfill, window_key, BackfillOptions, BackfillRecord,
    BackfillReport, WindowStatus, WindowSummary, MANIFEST_FILENAME,
};
pub use batch::{run_checkpointed, BatchError, BatchReport, RecordProcessor};
pub use channel::{
    harvest_channel, resolve_channel_name, run_channels, ChannelError, ChannelFailure,
    ChannelHarvest, ChannelOutcome, RunReport,
};
pub use checkpoint::{CheckpointError, CheckpointRecord, CheckpointStore, Resume};
pub use engine::{EngineError, HarvestEngine};
pub use gate::{Pacing, RateGate};
pub use partition::{partition_dir, partition_filename, partition_path};
pub use persist::{ensure_output_dir, AtomicFileWriter, PersistError};
pub use registry::{enabled_channels, load_registry, parse_registry, RegistryError};
pub use retry::call_with_backoff;
pub use settings::{HarvestSettings, SettingsError};
pub use slack::{classify_api_error, SlackClient, SourceSettings};
pub use source::{HarvestContext, MessageSource};
pub use threads::{expand_threads, ThreadExpansion, ThreadOutcome};
pub use types::{ChannelInfo, FailureKind, MessagePage, SourceError, UserInfo};
pub use users::UserNameCache;
pub use walker::{list_all, PageStats};
pub use writer::{
    conversational_in_order, normalize_text, render_tsv, HarvestRow, HarvestWriter,
    WrittenHarvest, HEADER, NO_USER,
};
