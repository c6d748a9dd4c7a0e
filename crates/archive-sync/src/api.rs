use async_trait::async_trait;

use archive_types::{RemoteBot, RemoteChannel, RemoteMessage, RemotePage, RemoteTeam, RemoteUser, SlackTs};

use crate::error::Result;

/// Page size for the user directory.
pub const USERS_PAGE_LIMIT: u32 = 1000;
/// Page size for the channel listing.
pub const CHANNELS_PAGE_LIMIT: u32 = 100;
/// Page size for channel history.
pub const HISTORY_PAGE_LIMIT: u32 = 200;

/// The chat platform's Web API, one method per endpoint the archive uses.
///
/// Implementations report a throttled request as
/// [`SyncError::RateLimited`](crate::error::SyncError::RateLimited) and a
/// refused one as [`SyncError::Api`](crate::error::SyncError::Api); retrying
/// is left to [`RateLimitedClient`](crate::rate_limit::RateLimitedClient).
#[async_trait]
pub trait SlackApi: Send + Sync {
    async fn team_info(&self) -> Result<RemoteTeam>;

    /// One page of the user directory. Ends when `next_cursor` is empty.
    async fn list_users(&self, cursor: &str, limit: u32) -> Result<RemotePage<RemoteUser>>;

    /// One page of channels, archived ones included. Ends when `next_cursor` is empty.
    async fn list_channels(&self, cursor: &str, limit: u32) -> Result<RemotePage<RemoteChannel>>;

    /// Messages newer than `oldest` (exclusive), or the page `cursor` names
    /// when it is not empty. Ends when `has_more` is false.
    async fn history(
        &self,
        channel: &str,
        oldest: Option<SlackTs>,
        cursor: &str,
        limit: u32,
    ) -> Result<RemotePage<RemoteMessage>>;

    /// One page of a thread. Ends when `has_more` is false.
    async fn replies(
        &self,
        channel: &str,
        thread_ts: SlackTs,
        cursor: &str,
    ) -> Result<RemotePage<RemoteMessage>>;

    /// Join a channel. Joining one the bot is already in succeeds.
    async fn join_channel(&self, channel: &str) -> Result<()>;

    async fn bot_info(&self, bot_id: &str) -> Result<RemoteBot>;
}
