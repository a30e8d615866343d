use std::collections::HashSet;
use std::future::Future;

use engine_logging::{engine_debug, engine_info, engine_warn};
use harvest_core::{HarvestWindow, MessageSet, PageState};

use crate::retry::call_with_backoff;
use crate::source::HarvestContext;
use crate::{FailureKind, MessagePage, SourceError};

/// Upper bound on pages per walk. A day of one channel is far below this.
pub(crate) const MAX_PAGES: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageStats {
    pub pages: usize,
    pub received: usize,
    pub inserted: usize,
}

/// Requests pages until the cursor runs out, merging each into `into`.
///
/// Spacing between pages comes from the listing gate; a page failure that
/// backoff cannot resolve ends the walk with that error. A cursor handed out
/// twice, or a walk longer than [`MAX_PAGES`], fails with a request error
/// instead of looping.
pub(crate) async fn drain_pages<F, Fut>(
    ctx: HarvestContext<'_>,
    operation: &str,
    mut fetch_page: F,
    into: &mut MessageSet,
) -> Result<PageStats, SourceError>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<MessagePage, SourceError>>,
{
    let mut stats = PageStats::default();
    let mut state = PageState::Start;
    let mut seen: HashSet<String> = HashSet::new();

    while let Some(cursor) = state.next_request() {
        if let Some(cursor) = &cursor {
            if !seen.insert(cursor.clone()) {
                return Err(SourceError::new(
                    FailureKind::Request("cursor_loop".into()),
                    format!("{operation}: cursor {cursor:?} was returned twice"),
                ));
            }
        }
        if stats.pages >= MAX_PAGES {
            return Err(SourceError::new(
                FailureKind::Request("too_many_pages".into()),
                format!("{operation}: still paging after {MAX_PAGES} pages"),
            ));
        }
        engine_debug!("{}: requesting page {} (cursor: {:?})", operation, stats.pages + 1, cursor);
        let page = call_with_backoff(&ctx.pacing.backoff, &ctx.pacing.listing, operation, || {
            fetch_page(cursor.clone())
        })
        .await?;

        if page.has_more && page.next_cursor.as_deref().map_or(true, str::is_empty) {
            engine_warn!("{}: source reported more pages without a cursor", operation);
        }

        stats.pages += 1;
        stats.received += page.messages.len();
        stats.inserted += into.merge(page.messages);
        state = PageState::after_page(page.has_more, page.next_cursor);
    }

    Ok(stats)
}

/// Every top-level message in `window`, deduplicated by identity.
///
/// All or nothing: if any page ultimately fails, the pages already fetched
/// are discarded and the error is returned.
pub async fn list_all(
    ctx: HarvestContext<'_>,
    window: &HarvestWindow,
) -> Result<MessageSet, SourceError> {
    let operation = format!("history[{}@{}]", window.channel_id, window.date);
    engine_info!("{}: fetching top-level messages", operation);

    let source = ctx.source;
    let mut messages = MessageSet::new();
    let stats = drain_pages(
        ctx,
        &operation,
        move |cursor: Option<String>| async move {
            let mut page = source.list_history(window, cursor.as_deref()).await?;
            page.messages.retain(|m| window.contains(&m.ts));
            Ok::<_, SourceError>(page)
        },
        &mut messages,
    )
    .await?;

    engine_info!(
        "{}: {} top-level messages from {} pages ({} duplicates dropped)",
        operation,
        messages.len(),
        stats.pages,
        stats.received - stats.inserted
    );
    Ok(messages)
}
