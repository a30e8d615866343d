use std::time::Duration;

use engine_logging::engine_trace;
use harvest_core::{HarvestWindow, Message, MessageTs};
use reqwest::header::{AUTHORIZATION, RETRY_AFTER};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::source::MessageSource;
use crate::{ChannelInfo, FailureKind, MessagePage, SourceError, UserInfo};

#[derive(Debug, Clone)]
pub struct SourceSettings {
    /// Web API root, e.g. `https://slack.com/api`.
    pub base_url: String,
    pub token: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub page_size: u32,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            base_url: "https://slack.com/api".to_string(),
            token: String::new(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            page_size: 200,
        }
    }
}

/// [`MessageSource`] over the Slack Web API.
#[derive(Debug, Clone)]
pub struct SlackClient {
    settings: SourceSettings,
    client: reqwest::Client,
}

impl SlackClient {
    pub fn new(settings: SourceSettings) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| SourceError::new(FailureKind::Request("client".into()), err.to_string()))?;
        Ok(Self { settings, client })
    }

    async fn call<T>(&self, method: &str, params: &[(&str, String)]) -> Result<T, SourceError>
    where
        T: DeserializeOwned + Envelope,
    {
        let endpoint = format!("{}/{}", self.settings.base_url.trim_end_matches('/'), method);
        let url = Url::parse_with_params(&endpoint, params).map_err(|err| {
            SourceError::new(FailureKind::Request("invalid_url".into()), err.to_string())
        })?;
        engine_trace!("GET {}", method);

        let response = self
            .client
            .get(url)
            .header(AUTHORIZATION, format!("Bearer {}", self.settings.token))
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(SourceError::rate_limited(retry_after));
        }
        if !status.is_success() {
            return Err(map_status(status));
        }

        let body = response.bytes().await.map_err(map_reqwest_error)?;
        let payload: T = serde_json::from_slice(&body).map_err(|err| {
            SourceError::new(FailureKind::Decode, format!("{method}: {err}"))
        })?;
        if !payload.ok() {
            let code = payload.error().unwrap_or("unknown_error");
            return Err(classify_api_error(code));
        }
        Ok(payload)
    }
}

#[async_trait::async_trait]
impl MessageSource for SlackClient {
    async fn list_history(
        &self,
        window: &HarvestWindow,
        cursor: Option<&str>,
    ) -> Result<MessagePage, SourceError> {
        let mut params = vec![
            ("channel", window.channel_id.clone()),
            ("oldest", unix_seconds(window.start().timestamp_micros())),
            ("latest", unix_seconds(window.end().timestamp_micros())),
            ("inclusive", "true".to_string()),
            ("limit", self.settings.page_size.to_string()),
        ];
        if let Some(cursor) = cursor {
            params.push(("cursor", cursor.to_string()));
        }
        let payload: ListResponse = self.call("conversations.history", &params).await?;
        payload.into_page(&window.channel_id)
    }

    async fn list_replies(
        &self,
        channel_id: &str,
        thread_ts: &MessageTs,
        cursor: Option<&str>,
    ) -> Result<MessagePage, SourceError> {
        let mut params = vec![
            ("channel", channel_id.to_string()),
            ("ts", thread_ts.to_string()),
            ("limit", self.settings.page_size.to_string()),
        ];
        if let Some(cursor) = cursor {
            params.push(("cursor", cursor.to_string()));
        }
        let payload: ListResponse = self.call("conversations.replies", &params).await?;
        payload.into_page(channel_id)
    }

    async fn channel_info(&self, channel_id: &str) -> Result<ChannelInfo, SourceError> {
        let payload: ChannelInfoResponse = self
            .call("conversations.info", &[("channel", channel_id.to_string())])
            .await?;
        let channel = payload.channel.unwrap_or_default();
        Ok(ChannelInfo {
            name: channel.name.unwrap_or_else(|| channel_id.to_string()),
            is_private: channel.is_private,
        })
    }

    async fn user_info(&self, user_id: &str) -> Result<UserInfo, SourceError> {
        let payload: UserInfoResponse = self
            .call("users.info", &[("user", user_id.to_string())])
            .await?;
        let user = payload.user.unwrap_or_default();
        Ok(UserInfo {
            id: user.id.clone().unwrap_or_else(|| user_id.to_string()),
            display_name: user.display_name().unwrap_or_else(|| user_id.to_string()),
        })
    }
}

/// Maps a Slack `error` code onto the failure taxonomy.
pub fn classify_api_error(code: &str) -> SourceError {
    let kind = match code {
        "ratelimited" | "rate_limited" => return SourceError::rate_limited(None),
        "not_in_channel" | "channel_not_found" | "missing_scope" | "not_authed"
        | "invalid_auth" | "account_inactive" | "token_revoked" | "token_expired"
        | "no_permission" | "access_denied" | "ekm_access_denied" | "team_access_not_granted" => {
            FailureKind::Auth(code.to_string())
        }
        "internal_error" | "fatal_error" | "service_unavailable" | "request_timeout" => {
            FailureKind::Transient
        }
        other => FailureKind::Request(other.to_string()),
    };
    SourceError::new(kind, code)
}

fn map_status(status: StatusCode) -> SourceError {
    let kind = if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        FailureKind::Transient
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        FailureKind::Auth(format!("http_{}", status.as_u16()))
    } else {
        FailureKind::Request(format!("http_{}", status.as_u16()))
    };
    SourceError::new(kind, status.to_string())
}

fn map_reqwest_error(err: reqwest::Error) -> SourceError {
    if err.is_builder() {
        return SourceError::new(FailureKind::Request("builder".into()), err.to_string());
    }
    if err.is_decode() {
        return SourceError::new(FailureKind::Decode, err.to_string());
    }
    // Timeouts, refused connections and dropped bodies are all worth retrying.
    SourceError::new(FailureKind::Transient, err.to_string())
}

fn unix_seconds(micros: i64) -> String {
    format!("{}.{:06}", micros.div_euclid(1_000_000), micros.rem_euclid(1_000_000))
}

/// Common `ok`/`error` fields of every Web API response.
trait Envelope {
    fn ok(&self) -> bool;
    fn error(&self) -> Option<&str>;
}

macro_rules! envelope {
    ($ty:ty) => {
        impl Envelope for $ty {
            fn ok(&self) -> bool {
                self.ok
            }
            fn error(&self) -> Option<&str> {
                self.error.as_deref()
            }
        }
    };
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    messages: Vec<RawMessage>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}
envelope!(ListResponse);

impl ListResponse {
    fn into_page(self, channel_id: &str) -> Result<MessagePage, SourceError> {
        let messages = self
            .messages
            .into_iter()
            .map(|raw| raw.into_message(channel_id))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(MessagePage {
            messages,
            has_more: self.has_more,
            next_cursor: self
                .response_metadata
                .and_then(|meta| meta.next_cursor)
                .filter(|cursor| !cursor.is_empty()),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    subtype: Option<String>,
    ts: String,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thread_ts: Option<String>,
    #[serde(default)]
    reply_count: u32,
}

impl RawMessage {
    fn into_message(self, channel_id: &str) -> Result<Message, SourceError> {
        let decode = |err: harvest_core::ParseTsError| {
            SourceError::new(FailureKind::Decode, err.to_string())
        };
        let ts = MessageTs::parse(&self.ts).map_err(decode)?;
        let thread_parent = match self.thread_ts {
            // A thread parent carries its own ts; only replies point elsewhere.
            Some(raw) if raw != self.ts => Some(MessageTs::parse(&raw).map_err(decode)?),
            _ => None,
        };
        Ok(Message {
            ts,
            channel_id: channel_id.to_string(),
            user_id: self.user.filter(|u| !u.is_empty()),
            text: self.text.unwrap_or_default(),
            thread_parent,
            reply_count: self.reply_count,
            kind: self.kind.unwrap_or_default(),
            subtype: self.subtype,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChannelInfoResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    channel: Option<RawChannel>,
}
envelope!(ChannelInfoResponse);

#[derive(Debug, Default, Deserialize)]
struct RawChannel {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    is_private: bool,
}

#[derive(Debug, Deserialize)]
struct UserInfoResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    user: Option<RawUser>,
}
envelope!(UserInfoResponse);

#[derive(Debug, Default, Deserialize)]
struct RawUser {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    real_name: Option<String>,
    #[serde(default)]
    profile: Option<RawProfile>,
}

#[derive(Debug, Default, Deserialize)]
struct RawProfile {
    #[serde(default)]
    real_name: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
}

impl RawUser {
    fn display_name(&self) -> Option<String> {
        let profile = self.profile.as_ref();
        [
            self.real_name.as_deref(),
            profile.and_then(|p| p.real_name.as_deref()),
            profile.and_then(|p| p.display_name.as_deref()),
            self.name.as_deref(),
        ]
        .into_iter()
        .flatten()
        .find(|name| !name.is_empty())
        .map(str::to_string)
    }
}
