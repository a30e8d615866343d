/// Cursor state for walking a paginated listing to exhaustion.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PageState {
    #[default]
    Start,
    HasMore(String),
    Done,
}

impl PageState {
    /// Cursor for the next request: `Some(None)` for the first page, `None` once done.
    pub fn next_request(&self) -> Option<Option<String>> {
        match self {
            PageState::Start => Some(None),
            PageState::HasMore(cursor) => Some(Some(cursor.clone())),
            PageState::Done => None,
        }
    }

    /// State after a page reporting `has_more` and `next_cursor`.
    ///
    /// A page that claims more results without a usable cursor ends the walk.
    pub fn after_page(has_more: bool, next_cursor: Option<String>) -> PageState {
        match next_cursor {
            Some(cursor) if has_more && !cursor.is_empty() => PageState::HasMore(cursor),
            _ => PageState::Done,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, PageState::Done)
    }
}
