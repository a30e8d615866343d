use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

/// Message identity as issued by the source, e.g. `1700000000.000100`.
///
/// Identities are unique within a channel and increase with time, so the
/// ordering compares the seconds and fractional parts numerically rather than
/// lexically (`"99.5"` sorts before `"100.1"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageTs {
    raw: String,
    seconds: u64,
    micros: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid message timestamp {0:?}")]
pub struct ParseTsError(pub String);

impl MessageTs {
    pub fn parse(raw: &str) -> Result<Self, ParseTsError> {
        let invalid = || ParseTsError(raw.to_string());
        let (secs, frac) = raw.split_once('.').unwrap_or((raw, ""));
        if secs.is_empty() || !secs.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        if !frac.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let seconds = secs.parse::<u64>().map_err(|_| invalid())?;

        // Normalise the fraction to microseconds; the source emits six digits.
        let mut micros: u32 = 0;
        for (i, digit) in frac.bytes().take(6).enumerate() {
            micros += u32::from(digit - b'0') * 10u32.pow(5 - i as u32);
        }

        Ok(Self {
            raw: raw.to_string(),
            seconds,
            micros,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn unix_micros(&self) -> i64 {
        (self.seconds as i64)
            .saturating_mul(1_000_000)
            .saturating_add(i64::from(self.micros))
    }

    pub fn to_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.seconds as i64, self.micros * 1_000)
    }
}

impl Ord for MessageTs {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.seconds, self.micros)
            .cmp(&(other.seconds, other.micros))
            .then_with(|| self.raw.cmp(&other.raw))
    }
}

impl PartialOrd for MessageTs {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for MessageTs {
    type Err = ParseTsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for MessageTs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub ts: MessageTs,
    pub channel_id: String,
    /// Absent on system messages.
    pub user_id: Option<String>,
    pub text: String,
    /// Identity of the top-level message this reply belongs to.
    pub thread_parent: Option<MessageTs>,
    pub reply_count: u32,
    pub kind: String,
    pub subtype: Option<String>,
}

impl Message {
    /// Joins, topic changes and other events carry a subtype or a non-message kind.
    pub fn is_conversational(&self) -> bool {
        self.kind == "message" && self.subtype.is_none()
    }

    pub fn starts_thread(&self) -> bool {
        self.thread_parent.is_none() && self.reply_count > 0
    }
}

/// Messages accumulated during one harvest, deduplicated by identity.
///
/// The first message seen for an identity is kept; later copies are ignored.
#[derive(Debug, Clone, Default)]
pub struct MessageSet {
    by_ts: HashMap<MessageTs, Message>,
}

impl MessageSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when the identity was already present.
    pub fn insert(&mut self, message: Message) -> bool {
        if self.by_ts.contains_key(&message.ts) {
            return false;
        }
        self.by_ts.insert(message.ts.clone(), message);
        true
    }

    /// Merges `messages` and returns how many were new.
    pub fn merge<I>(&mut self, messages: I) -> usize
    where
        I: IntoIterator<Item = Message>,
    {
        messages
            .into_iter()
            .map(|message| usize::from(self.insert(message)))
            .sum()
    }

    pub fn absorb(&mut self, other: MessageSet) -> usize {
        self.merge(other.by_ts.into_values())
    }

    pub fn len(&self) -> usize {
        self.by_ts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_ts.is_empty()
    }

    pub fn contains(&self, ts: &MessageTs) -> bool {
        self.by_ts.contains_key(ts)
    }

    pub fn get(&self, ts: &MessageTs) -> Option<&Message> {
        self.by_ts.get(ts)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.by_ts.values()
    }

    /// Identities of top-level messages with replies, oldest first.
    pub fn thread_parents(&self) -> Vec<MessageTs> {
        let mut parents: Vec<MessageTs> = self
            .by_ts
            .values()
            .filter(|m| m.starts_thread())
            .map(|m| m.ts.clone())
            .collect();
        parents.sort();
        parents
    }

    pub fn into_sorted(self) -> Vec<Message> {
        let mut messages: Vec<Message> = self.by_ts.into_values().collect();
        messages.sort_by(|a, b| a.ts.cmp(&b.ts));
        messages
    }
}

impl FromIterator<Message> for MessageSet {
    fn from_iter<I: IntoIterator<Item = Message>>(iter: I) -> Self {
        let mut set = MessageSet::new();
        set.merge(iter);
        set
    }
}
