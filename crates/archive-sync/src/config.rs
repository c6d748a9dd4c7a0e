use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::http::DEFAULT_API_URL;

pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_RECENT_DAYS: i64 = 30;
pub const DEFAULT_WORK_JITTER: Duration = Duration::from_secs(2);

/// Scheduling knobs shared by every team.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Period between backfill passes after the first.
    pub interval: Duration,
    /// Periodic passes only re-scan this many days back.
    pub recent_days: i64,
    /// Upper bound of the pause before each background work item.
    pub work_jitter: Duration,
    pub api_url: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SYNC_INTERVAL,
            recent_days: DEFAULT_RECENT_DAYS,
            work_jitter: DEFAULT_WORK_JITTER,
            api_url: DEFAULT_API_URL.to_string(),
        }
    }
}

impl SyncConfig {
    /// Watermark floor for a periodic pass starting at `now`.
    pub fn recent_floor(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - chrono::Duration::days(self.recent_days)
    }
}
