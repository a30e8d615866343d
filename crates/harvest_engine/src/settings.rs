use std::path::PathBuf;
use std::time::Duration;

use chrono::FixedOffset;
use harvest_core::BackoffPolicy;
use serde::{Deserialize, Serialize};

use crate::gate::Pacing;
use crate::slack::SourceSettings;

/// Tunables for a harvest run. Every field has a default, so a settings
/// file only needs the values it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestSettings {
    pub base_url: String,
    pub page_size: u32,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    /// Attempts per call, first one included.
    pub max_attempts: u32,
    /// Wait after a rate-limit signal without a `Retry-After`.
    pub rate_limit_wait_secs: u64,
    /// Upper bound on any rate-limit wait, including `Retry-After`.
    pub max_rate_limit_wait_secs: u64,
    pub transient_wait_secs: u64,
    /// Minimum spacing between history and reply calls. The reply endpoint
    /// is one request per minute for unapproved apps.
    pub call_spacing_secs: u64,
    pub lookup_spacing_ms: u64,
    pub channel_spacing_secs: u64,
    pub checkpoint_every: usize,
    pub output_dir: PathBuf,
    pub utc_offset_hours: i32,
}

impl Default for HarvestSettings {
    fn default() -> Self {
        let source = SourceSettings::default();
        Self {
            base_url: source.base_url,
            page_size: source.page_size,
            connect_timeout_secs: source.connect_timeout.as_secs(),
            request_timeout_secs: source.request_timeout.as_secs(),
            max_attempts: 5,
            rate_limit_wait_secs: 10,
            max_rate_limit_wait_secs: 300,
            transient_wait_secs: 5,
            call_spacing_secs: 60,
            lookup_spacing_ms: 0,
            channel_spacing_secs: 1,
            checkpoint_every: 10,
            output_dir: PathBuf::from("archives"),
            utc_offset_hours: 9,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid settings: {0}")]
pub struct SettingsError(pub String);

impl HarvestSettings {
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: self.max_attempts.max(1),
            default_rate_limit_wait: Duration::from_secs(self.rate_limit_wait_secs),
            max_rate_limit_wait: Duration::from_secs(self.max_rate_limit_wait_secs),
            transient_wait: Duration::from_secs(self.transient_wait_secs),
        }
    }

    pub fn pacing(&self) -> Pacing {
        Pacing::new(
            self.backoff_policy(),
            Duration::from_secs(self.call_spacing_secs),
            Duration::from_millis(self.lookup_spacing_ms),
        )
    }

    pub fn source_settings(&self, token: impl Into<String>) -> SourceSettings {
        SourceSettings {
            base_url: self.base_url.clone(),
            token: token.into(),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            page_size: self.page_size,
        }
    }

    pub fn channel_spacing(&self) -> Duration {
        Duration::from_secs(self.channel_spacing_secs)
    }

    pub fn offset(&self) -> Result<FixedOffset, SettingsError> {
        self.utc_offset_hours
            .checked_mul(3600)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| SettingsError(format!("utc_offset_hours {} out of range", self.utc_offset_hours)))
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        self.offset()?;
        if self.page_size == 0 {
            return Err(SettingsError("page_size must be positive".into()));
        }
        if self.checkpoint_every == 0 {
            return Err(SettingsError("checkpoint_every must be positive".into()));
        }
        if self.rate_limit_wait_secs < 10 {
            return Err(SettingsError("rate_limit_wait_secs must be at least 10".into()));
        }
        if self.max_rate_limit_wait_secs < self.rate_limit_wait_secs {
            return Err(SettingsError(
                "max_rate_limit_wait_secs must not be below rate_limit_wait_secs".into(),
            ));
        }
        Ok(())
    }
}
