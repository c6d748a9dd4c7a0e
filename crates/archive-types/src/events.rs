use serde_json::Value;

use crate::remote::{RemoteBot, RemoteChannel, RemoteMessage, RemoteUser};
use crate::AUTH_ERROR_CODES;
use crate::ts::SlackTs;

/// Events received over the real-time connection, reduced to what the
/// archive acts on.
#[derive(Debug, Clone)]
pub enum LiveEvent {
    /// Server greeting after the socket opens
    Hello,

    /// Server asks the client to reconnect
    Goodbye,

    /// A new message, plain or posted by a bot
    Message(RemoteMessage),

    /// An existing message was edited, or its thread metadata changed.
    /// `message` is the embedded, updated original.
    MessageChanged {
        channel: String,
        message: RemoteMessage,
    },

    /// A message was removed
    MessageDeleted {
        channel: String,
        ts: SlackTs,
        /// Author of the removed message, when the platform reports it
        user: Option<String>,
    },

    /// Someone joined a channel; the archive keeps no record of it
    ChannelJoinNotice,

    /// A user joined the team or changed their profile
    UserUpserted(RemoteUser),

    /// A bot integration was added or changed
    BotUpserted(RemoteBot),

    /// The archive's bot was added to a channel
    ChannelJoined(RemoteChannel),

    /// A channel changed its name
    ChannelRenamed { id: String, name: String },

    /// The credential was rejected; the stream will never recover
    InvalidAuth,

    /// Anything else. Carries the event kind for logging.
    Unrecognized(String),
}

impl LiveEvent {
    /// Parse one text frame from the real-time stream.
    ///
    /// Errors only when the frame is not JSON or a recognized kind has a
    /// malformed body; unknown kinds map to [`LiveEvent::Unrecognized`].
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(raw)?;
        Self::from_value(value)
    }

    pub fn from_value(mut value: Value) -> Result<Self, serde_json::Error> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let event = match kind.as_str() {
            "hello" => Self::Hello,
            "goodbye" => Self::Goodbye,
            "message" => Self::from_message(value)?,
            "team_join" | "user_change" => {
                Self::UserUpserted(serde_json::from_value(take(&mut value, "user"))?)
            }
            "bot_added" | "bot_changed" => {
                Self::BotUpserted(serde_json::from_value(take(&mut value, "bot"))?)
            }
            "channel_joined" => {
                Self::ChannelJoined(serde_json::from_value(take(&mut value, "channel"))?)
            }
            "channel_rename" => {
                let channel = take(&mut value, "channel");
                Self::ChannelRenamed {
                    id: str_field(&channel, "id"),
                    name: str_field(&channel, "name"),
                }
            }
            "error" => {
                let msg = value
                    .pointer("/error/msg")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if AUTH_ERROR_CODES.contains(&msg) {
                    Self::InvalidAuth
                } else {
                    Self::Unrecognized(format!("error: {}", msg))
                }
            }
            _ => Self::Unrecognized(kind),
        };

        Ok(event)
    }

    fn from_message(mut value: Value) -> Result<Self, serde_json::Error> {
        let subtype = str_field(&value, "subtype");
        let channel = str_field(&value, "channel");

        let event = match subtype.as_str() {
            "" | "bot_message" => Self::Message(serde_json::from_value(value)?),
            "message_changed" | "message_replied" => {
                let mut message: RemoteMessage = serde_json::from_value(take(&mut value, "message"))?;
                if message.channel.is_empty() {
                    message.channel = channel.clone();
                }
                Self::MessageChanged { channel, message }
            }
            "message_deleted" => {
                let ts = serde_json::from_value(take(&mut value, "deleted_ts"))?;
                let previous = take(&mut value, "previous_message");
                let user = if previous.is_null() {
                    None
                } else {
                    let prev: RemoteMessage = serde_json::from_value(previous)?;
                    Some(prev.author_id().to_string()).filter(|u| !u.is_empty())
                };
                Self::MessageDeleted { channel, ts, user }
            }
            "channel_join" => Self::ChannelJoinNotice,
            other => Self::Unrecognized(format!("message/{}", other)),
        };

        Ok(event)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Hello => "hello",
            Self::Goodbye => "goodbye",
            Self::Message(_) => "message",
            Self::MessageChanged { .. } => "message_changed",
            Self::MessageDeleted { .. } => "message_deleted",
            Self::ChannelJoinNotice => "channel_join",
            Self::UserUpserted(_) => "user",
            Self::BotUpserted(_) => "bot",
            Self::ChannelJoined(_) => "channel_joined",
            Self::ChannelRenamed { .. } => "channel_rename",
            Self::InvalidAuth => "invalid_auth",
            Self::Unrecognized(_) => "unrecognized",
        }
    }
}

fn take(value: &mut Value, key: &str) -> Value {
    value.get_mut(key).map(Value::take).unwrap_or(Value::Null)
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
