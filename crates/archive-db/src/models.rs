/// Database row types, mapped directly to SQLite rows.
/// JSON columns (icon, profile, topic, ...) are carried as serialized text.
use archive_types::SlackTs;

#[derive(Debug, Clone, PartialEq)]
pub struct TeamRow {
    pub id: String,
    pub name: String,
    pub domain: String,
    pub token: String,
    pub plan: String,
    pub icon: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserRow {
    pub id: String,
    pub team_id: String,
    pub name: String,
    pub deleted: bool,
    pub color: String,
    pub profile: String,
    pub is_bot: bool,
    pub is_admin: bool,
    pub is_owner: bool,
    pub is_primary_owner: bool,
    pub is_restricted: bool,
    pub is_ultra_restricted: bool,
    pub has_files: bool,
    pub presence: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelRow {
    pub id: String,
    pub team_id: String,
    pub name: String,
    pub is_channel: bool,
    pub creator_id: Option<String>,
    pub is_archived: bool,
    pub is_general: bool,
    pub is_group: bool,
    pub is_member: bool,
    pub num_members: i64,
    pub members: String,
    pub topic: String,
    pub purpose: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageRow {
    pub channel_id: String,
    pub user_id: String,
    pub ts: SlackTs,
    pub thread_ts: Option<SlackTs>,
    pub msg: String,
}

/// Earliest stored message of a channel above the floor, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelWatermark {
    pub channel_id: String,
    pub first_since: Option<SlackTs>,
}
