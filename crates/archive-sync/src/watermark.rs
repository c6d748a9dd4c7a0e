use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use archive_types::SlackTs;

use crate::error::Result;
use crate::store::Store;

/// Where backfill should resume, per channel id. `None` means the channel
/// has nothing stored above the floor, so its whole history is fetched.
pub type ResumePoints = BTreeMap<String, Option<SlackTs>>;

/// Computes resume points for one team's channels.
///
/// The result is advisory. It only narrows the history scan; a message
/// missed because of clock skew is picked up by a later unfloored pass.
pub struct WatermarkCalculator {
    store: Store,
    team_id: String,
}

impl WatermarkCalculator {
    pub fn new(store: Store, team_id: impl Into<String>) -> Self {
        Self {
            store,
            team_id: team_id.into(),
        }
    }

    /// Earliest stored message per channel newer than `since`, or the
    /// earliest overall without a floor.
    pub async fn for_each_channel(&self, since: Option<DateTime<Utc>>) -> Result<ResumePoints> {
        let floor = since.map(SlackTs::from_datetime);
        let marks = self
            .store
            .first_message_per_channel(&self.team_id, floor)
            .await?;

        debug!(
            team = %self.team_id,
            channels = marks.len(),
            floor = ?floor,
            "Computed channel watermarks"
        );

        Ok(marks
            .into_iter()
            .map(|m| (m.channel_id, m.first_since))
            .collect())
    }
}
