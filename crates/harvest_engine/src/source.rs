use harvest_core::{HarvestWindow, MessageTs};

use crate::gate::Pacing;
use crate::{ChannelInfo, MessagePage, SourceError, UserInfo};

/// The message API a harvest reads from.
///
/// Every call may fail with [`crate::FailureKind::RateLimited`]; callers go
/// through [`crate::call_with_backoff`] rather than calling these directly.
#[async_trait::async_trait]
pub trait MessageSource: Send + Sync {
    /// One page of top-level messages inside `window`.
    async fn list_history(
        &self,
        window: &HarvestWindow,
        cursor: Option<&str>,
    ) -> Result<MessagePage, SourceError>;

    /// One page of a thread, parent included.
    async fn list_replies(
        &self,
        channel_id: &str,
        thread_ts: &MessageTs,
        cursor: Option<&str>,
    ) -> Result<MessagePage, SourceError>;

    async fn channel_info(&self, channel_id: &str) -> Result<ChannelInfo, SourceError>;

    async fn user_info(&self, user_id: &str) -> Result<UserInfo, SourceError>;
}

/// Source handle plus the pacing rules every call must honour.
#[derive(Clone, Copy)]
pub struct HarvestContext<'a> {
    pub source: &'a dyn MessageSource,
    pub pacing: &'a Pacing,
}

impl<'a> HarvestContext<'a> {
    pub fn new(source: &'a dyn MessageSource, pacing: &'a Pacing) -> Self {
        Self { source, pacing }
    }
}
