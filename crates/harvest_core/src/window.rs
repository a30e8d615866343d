use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Utc};

use crate::MessageTs;

/// A channel from the registry. Read once per run, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub id: String,
    pub label: String,
    pub enabled: bool,
}

/// One channel over one calendar day `[00:00, next 00:00)` in a fixed offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestWindow {
    pub channel_id: String,
    pub date: NaiveDate,
    pub offset: FixedOffset,
}

impl HarvestWindow {
    pub fn new(channel_id: impl Into<String>, date: NaiveDate, offset: FixedOffset) -> Self {
        Self {
            channel_id: channel_id.into(),
            date,
            offset,
        }
    }

    pub fn start(&self) -> DateTime<FixedOffset> {
        let local_midnight = self.date.and_time(NaiveTime::MIN);
        let utc = local_midnight - Duration::seconds(i64::from(self.offset.local_minus_utc()));
        DateTime::from_naive_utc_and_offset(utc, self.offset)
    }

    /// Exclusive upper bound.
    pub fn end(&self) -> DateTime<FixedOffset> {
        self.start() + Duration::days(1)
    }

    pub fn contains(&self, ts: &MessageTs) -> bool {
        let micros = ts.unix_micros();
        micros >= self.start().timestamp_micros() && micros < self.end().timestamp_micros()
    }
}

/// The day before `now` as seen from `offset`.
pub fn most_recent_completed_day(now: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    let local_today = now.with_timezone(&offset).date_naive();
    local_today.pred_opt().unwrap_or(local_today)
}
