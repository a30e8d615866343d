//! Harvest core: pure domain types, retry policy and the checkpointed batch state machine.
mod backoff;
mod batch;
mod message;
mod pagination;
mod window;

pub use backoff::{BackoffPolicy, FailureClass, RetryDecision};
pub use batch::{update, BatchEffect, BatchMsg, BatchPhase, BatchState};
pub use message::{Message, MessageSet, MessageTs, ParseTsError};
pub use pagination::PageState;
pub use window::{most_recent_completed_day, ChannelConfig, HarvestWindow};
