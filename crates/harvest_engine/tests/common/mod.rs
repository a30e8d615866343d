#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{FixedOffset, NaiveDate};
use harvest_core::{BackoffPolicy, HarvestWindow, Message, MessageTs};
use harvest_engine::{
    ChannelInfo, FailureKind, MessagePage, MessageSource, SourceError, UserInfo,
};

/// 2024-03-01T00:00:00+09:00 as unix seconds.
pub const DAY_START: u64 = 1_709_218_800;

pub fn jst() -> FixedOffset {
    FixedOffset::east_opt(9 * 3600).unwrap()
}

pub fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
}

pub fn window(channel_id: &str) -> HarvestWindow {
    HarvestWindow::new(channel_id, day(), jst())
}

/// Identity `seconds` after the start of [`day`].
pub fn ts(seconds: u64) -> String {
    format!("{}.000100", DAY_START + seconds)
}

pub fn message(channel: &str, seconds: u64, user: &str, text: &str) -> Message {
    Message {
        ts: MessageTs::parse(&ts(seconds)).unwrap(),
        channel_id: channel.to_string(),
        user_id: Some(user.to_string()),
        text: text.to_string(),
        thread_parent: None,
        reply_count: 0,
        kind: "message".to_string(),
        subtype: None,
    }
}

pub fn parent(channel: &str, seconds: u64, user: &str, text: &str, replies: u32) -> Message {
    Message {
        reply_count: replies,
        ..message(channel, seconds, user, text)
    }
}

pub fn reply(channel: &str, seconds: u64, parent_seconds: u64, user: &str, text: &str) -> Message {
    Message {
        thread_parent: Some(MessageTs::parse(&ts(parent_seconds)).unwrap()),
        ..message(channel, seconds, user, text)
    }
}

pub fn page(messages: Vec<Message>, next_cursor: Option<&str>) -> MessagePage {
    MessagePage {
        messages,
        has_more: next_cursor.is_some(),
        next_cursor: next_cursor.map(str::to_string),
    }
}

pub fn fast_backoff(max_attempts: u32) -> BackoffPolicy {
    BackoffPolicy {
        max_attempts,
        default_rate_limit_wait: Duration::from_secs(10),
        max_rate_limit_wait: Duration::from_secs(60),
        transient_wait: Duration::from_millis(1),
    }
}

type Script<T> = VecDeque<Result<T, SourceError>>;

/// In-memory [`MessageSource`] replaying canned responses.
///
/// Each key holds a queue of responses. Calls pop from the front until one
/// response is left, which then repeats. Unscripted listings return an empty
/// final page; unscripted lookups fail with a fatal request error.
#[derive(Default)]
pub struct ScriptedSource {
    history: Mutex<HashMap<(String, Option<String>), Script<MessagePage>>>,
    replies: Mutex<HashMap<(String, String, Option<String>), Script<MessagePage>>>,
    channels: HashMap<String, ChannelInfo>,
    users: HashMap<String, String>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(self, channel: &str, cursor: Option<&str>, response: Result<MessagePage, SourceError>) -> Self {
        self.history
            .lock()
            .unwrap()
            .entry((channel.to_string(), cursor.map(str::to_string)))
            .or_default()
            .push_back(response);
        self
    }

    pub fn replies(
        self,
        channel: &str,
        parent_seconds: u64,
        cursor: Option<&str>,
        response: Result<MessagePage, SourceError>,
    ) -> Self {
        self.replies
            .lock()
            .unwrap()
            .entry((channel.to_string(), ts(parent_seconds), cursor.map(str::to_string)))
            .or_default()
            .push_back(response);
        self
    }

    pub fn channel(mut self, id: &str, name: &str) -> Self {
        self.channels.insert(
            id.to_string(),
            ChannelInfo {
                name: name.to_string(),
                is_private: false,
            },
        );
        self
    }

    pub fn user(mut self, id: &str, name: &str) -> Self {
        self.users.insert(id.to_string(), name.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

fn next<T: Clone>(queue: Option<&mut Script<T>>, fallback: Result<T, SourceError>) -> Result<T, SourceError> {
    match queue {
        Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(fallback),
        Some(queue) => queue.front().cloned().unwrap_or(fallback),
        None => fallback,
    }
}

#[async_trait::async_trait]
impl MessageSource for ScriptedSource {
    async fn list_history(
        &self,
        window: &HarvestWindow,
        cursor: Option<&str>,
    ) -> Result<MessagePage, SourceError> {
        self.record(format!("history {} {:?}", window.channel_id, cursor));
        let key = (window.channel_id.clone(), cursor.map(str::to_string));
        let mut history = self.history.lock().unwrap();
        next(history.get_mut(&key), Ok(MessagePage::default()))
    }

    async fn list_replies(
        &self,
        channel_id: &str,
        thread_ts: &MessageTs,
        cursor: Option<&str>,
    ) -> Result<MessagePage, SourceError> {
        self.record(format!("replies {} {} {:?}", channel_id, thread_ts, cursor));
        let key = (channel_id.to_string(), thread_ts.to_string(), cursor.map(str::to_string));
        let mut replies = self.replies.lock().unwrap();
        next(replies.get_mut(&key), Ok(MessagePage::default()))
    }

    async fn channel_info(&self, channel_id: &str) -> Result<ChannelInfo, SourceError> {
        self.record(format!("channel {channel_id}"));
        self.channels.get(channel_id).cloned().ok_or_else(|| {
            SourceError::new(FailureKind::Auth("channel_not_found".into()), "channel_not_found")
        })
    }

    async fn user_info(&self, user_id: &str) -> Result<UserInfo, SourceError> {
        self.record(format!("user {user_id}"));
        match self.users.get(user_id) {
            Some(name) => Ok(UserInfo {
                id: user_id.to_string(),
                display_name: name.clone(),
            }),
            None => Err(SourceError::new(
                FailureKind::Request("user_not_found".into()),
                "user_not_found",
            )),
        }
    }
}
