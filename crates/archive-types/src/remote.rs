//! Payloads as the platform Web API and real-time stream deliver them.
//!
//! Fields the archive does not model explicitly are kept where the full
//! payload matters (messages) and dropped elsewhere.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ts::SlackTs;

fn is_false(v: &bool) -> bool {
    !*v
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteTeam {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub plan: String,
    #[serde(default)]
    pub icon: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteUser {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub profile: Value,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub is_owner: bool,
    #[serde(default)]
    pub is_primary_owner: bool,
    #[serde(default)]
    pub is_restricted: bool,
    #[serde(default)]
    pub is_ultra_restricted: bool,
    #[serde(default)]
    pub has_files: bool,
    #[serde(default)]
    pub presence: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteChannel {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_channel: bool,
    #[serde(default)]
    pub creator: String,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default)]
    pub is_general: bool,
    #[serde(default)]
    pub is_group: bool,
    #[serde(default)]
    pub is_member: bool,
    #[serde(default)]
    pub num_members: i64,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub topic: Value,
    #[serde(default)]
    pub purpose: Value,
}

/// A chat message. Everything not named here survives in `extra`, so
/// re-serializing yields the original payload for archival.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteMessage {
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subtype: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub channel: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub bot_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    pub ts: SlackTs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<SlackTs>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub hidden: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RemoteMessage {
    pub fn is_bot_message(&self) -> bool {
        self.subtype == "bot_message" && !self.bot_id.is_empty()
    }

    /// The user part of the message's storage key. Bot messages carry no
    /// user, so their bot id stands in for it.
    pub fn author_id(&self) -> &str {
        if self.is_bot_message() {
            &self.bot_id
        } else {
            &self.user
        }
    }

    /// A thread parent carries its own timestamp as the thread timestamp.
    pub fn is_thread_parent(&self) -> bool {
        self.thread_ts == Some(self.ts)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BotIcons {
    #[serde(default)]
    pub image_36: String,
    #[serde(default)]
    pub image_48: String,
    #[serde(default)]
    pub image_72: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteBot {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub icons: BotIcons,
}

/// One page of a paginated listing.
///
/// Cursor endpoints end when `next_cursor` is empty; history and reply
/// endpoints end when `has_more` is false. A page may be empty and still
/// not be the last one.
#[derive(Debug, Clone)]
pub struct RemotePage<T> {
    pub items: Vec<T>,
    pub next_cursor: String,
    pub has_more: bool,
}

impl<T> RemotePage<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_cursor: String::new(),
            has_more: false,
        }
    }
}
