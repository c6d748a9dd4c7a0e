//! Shared data types for the archive: platform payloads, message
//! timestamps, real-time events and credentials.

pub mod events;
pub mod remote;
pub mod ts;

pub use events::LiveEvent;
pub use remote::{RemoteBot, RemoteChannel, RemoteMessage, RemotePage, RemoteTeam, RemoteUser};
pub use ts::SlackTs;

/// Platform error codes that mean the credential itself is unusable, on
/// both the Web API and the real-time stream.
pub const AUTH_ERROR_CODES: &[&str] = &[
    "invalid_auth",
    "account_inactive",
    "token_revoked",
    "token_expired",
    "not_authed",
];

/// One configured workspace credential.
///
/// The OAuth token drives the Web API client; the bot token opens the
/// real-time connection and is what the team row records.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub bot_token: String,
    pub oauth_token: String,
}

impl Credential {
    pub fn new(bot_token: impl Into<String>, oauth_token: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            oauth_token: oauth_token.into(),
        }
    }

    /// Token prefix that is safe to put in logs.
    pub fn redacted(&self) -> String {
        let visible: String = self.bot_token.chars().take(9).collect();
        format!("{}…", visible)
    }
}

// Tokens must never reach the logs through `{:?}`.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("bot_token", &self.redacted())
            .finish_non_exhaustive()
    }
}
