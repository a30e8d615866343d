use engine_logging::{engine_error, engine_info};
use harvest_core::{MessageSet, MessageTs};

use crate::source::HarvestContext;
use crate::walker::drain_pages;
use crate::SourceError;

/// Result of fetching one thread: new messages merged, or why it was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadOutcome {
    pub thread_ts: MessageTs,
    pub result: Result<usize, SourceError>,
}

#[derive(Debug, Clone)]
pub struct ThreadExpansion {
    pub messages: MessageSet,
    pub outcomes: Vec<ThreadOutcome>,
}

impl ThreadExpansion {
    pub fn failed(&self) -> impl Iterator<Item = &ThreadOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    pub fn failed_threads(&self) -> Vec<MessageTs> {
        self.failed().map(|o| o.thread_ts.clone()).collect()
    }
}

/// Adds the replies of every thread in `top_level`.
///
/// Best effort: a thread that cannot be fetched is logged, recorded in
/// `outcomes` and skipped. Its partial pages are not merged.
pub async fn expand_threads(
    ctx: HarvestContext<'_>,
    channel_id: &str,
    top_level: MessageSet,
) -> ThreadExpansion {
    let parents = top_level.thread_parents();
    let total = parents.len();
    engine_info!("replies[{}]: {} threads to fetch", channel_id, total);

    let mut messages = top_level;
    let mut outcomes = Vec::with_capacity(total);
    let source = ctx.source;

    for (i, thread_ts) in parents.into_iter().enumerate() {
        let operation = format!("replies[{channel_id}/{thread_ts}]");
        engine_info!("{}: thread {}/{}", operation, i + 1, total);

        let mut thread = MessageSet::new();
        let parent = &thread_ts;
        let fetched = drain_pages(
            ctx,
            &operation,
            move |cursor: Option<String>| async move {
                source
                    .list_replies(channel_id, parent, cursor.as_deref())
                    .await
            },
            &mut thread,
        )
        .await;

        let result = match fetched {
            Ok(_) => Ok(messages.absorb(thread)),
            Err(err) => {
                engine_error!("{}: skipping thread: {}", operation, err);
                Err(err)
            }
        };
        outcomes.push(ThreadOutcome { thread_ts, result });
    }

    let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
    engine_info!(
        "replies[{}]: {} messages including replies, {} threads failed",
        channel_id,
        messages.len(),
        failed
    );
    ThreadExpansion { messages, outcomes }
}
