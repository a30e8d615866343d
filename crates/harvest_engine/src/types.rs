use std::fmt;
use std::time::Duration;

use harvest_core::{FailureClass, Message};

/// One page of a message listing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub has_more: bool,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub name: String,
    pub is_private: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct SourceError {
    pub kind: FailureKind,
    pub message: String,
    /// Advisory wait sent with a rate-limit signal.
    pub retry_after: Option<Duration>,
}

impl SourceError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn rate_limited(retry_after: Option<Duration>) -> Self {
        Self {
            kind: FailureKind::RateLimited,
            message: "ratelimited".to_string(),
            retry_after,
        }
    }

    /// Wraps the last retryable failure once the attempt budget is spent.
    pub fn retries_exhausted(attempts: u32, last: SourceError) -> Self {
        Self::new(
            FailureKind::RetriesExhausted { attempts },
            format!("last failure: {last}"),
        )
    }

    pub fn class(&self) -> FailureClass {
        self.kind.class()
    }

    /// Permission problems that mean the channel should be skipped.
    pub fn is_auth(&self) -> bool {
        matches!(self.kind, FailureKind::Auth(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    RateLimited,
    Transient,
    /// Permission denied, not in channel, bad token.
    Auth(String),
    /// Malformed request or unknown API error code.
    Request(String),
    /// Response body did not match the expected shape.
    Decode,
    RetriesExhausted { attempts: u32 },
}

impl FailureKind {
    pub fn class(&self) -> FailureClass {
        match self {
            FailureKind::RateLimited => FailureClass::RateLimited,
            FailureKind::Transient => FailureClass::Transient,
            FailureKind::Auth(_)
            | FailureKind::Request(_)
            | FailureKind::Decode
            | FailureKind::RetriesExhausted { .. } => FailureClass::Fatal,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::RateLimited => write!(f, "rate limited"),
            FailureKind::Transient => write!(f, "transient error"),
            FailureKind::Auth(code) => write!(f, "not permitted ({code})"),
            FailureKind::Request(code) => write!(f, "bad request ({code})"),
            FailureKind::Decode => write!(f, "undecodable response"),
            FailureKind::RetriesExhausted { attempts } => {
                write!(f, "gave up after {attempts} attempts")
            }
        }
    }
}
