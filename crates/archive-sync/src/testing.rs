//! Scripted stand-ins for the platform and the real-time connection.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::time::Instant;

use archive_db::Database;
use archive_db::models::{ChannelRow, MessageRow, TeamRow};
use archive_types::{
    LiveEvent, RemoteBot, RemoteChannel, RemoteMessage, RemotePage, RemoteTeam, RemoteUser, SlackTs,
};

use crate::api::SlackApi;
use crate::error::{Result, SyncError};
use crate::rtm::{RealtimeConnector, RealtimeStream};
use crate::store::Store;

pub fn msg(user: &str, secs: i64) -> RemoteMessage {
    serde_json::from_value(json!({
        "type": "message",
        "user": user,
        "text": format!("hello at {}", secs),
        "ts": SlackTs::from_secs(secs).to_string(),
    }))
    .unwrap()
}

pub fn reply(user: &str, secs: i64, parent: i64) -> RemoteMessage {
    let mut m = msg(user, secs);
    m.thread_ts = Some(SlackTs::from_secs(parent));
    m
}

pub fn thread_parent(user: &str, secs: i64) -> RemoteMessage {
    reply(user, secs, secs)
}

pub fn bot_msg(bot_id: &str, secs: i64) -> RemoteMessage {
    serde_json::from_value(json!({
        "type": "message",
        "subtype": "bot_message",
        "bot_id": bot_id,
        "text": "beep",
        "ts": SlackTs::from_secs(secs).to_string(),
    }))
    .unwrap()
}

pub fn user(id: &str) -> RemoteUser {
    serde_json::from_value(json!({"id": id, "name": id.to_lowercase()})).unwrap()
}

pub fn channel(id: &str, name: &str) -> RemoteChannel {
    serde_json::from_value(json!({"id": id, "name": name, "is_channel": true})).unwrap()
}

pub fn bot(id: &str, name: &str) -> RemoteBot {
    serde_json::from_value(json!({"id": id, "name": name})).unwrap()
}

#[derive(Default)]
struct FakeState {
    team_error: Option<String>,
    user_pages: Vec<Vec<RemoteUser>>,
    channels: Vec<RemoteChannel>,
    history: HashMap<String, Vec<RemoteMessage>>,
    history_errors: HashMap<String, String>,
    replies: HashMap<(String, SlackTs), Vec<Vec<RemoteMessage>>>,
    bots: HashMap<String, RemoteBot>,
    history_page_size: Option<usize>,
    oldest_seen: Vec<(String, Option<SlackTs>)>,
    calls: HashMap<&'static str, usize>,
}

/// In-memory platform. History honors `oldest` (exclusive) and returns the
/// earliest matching messages newest-first, so the next request's `oldest`
/// is the first item of the page.
pub struct FakeSlack {
    team_id: String,
    state: Mutex<FakeState>,
}

impl FakeSlack {
    pub fn new(team_id: &str) -> Self {
        Self {
            team_id: team_id.to_string(),
            state: Mutex::new(FakeState::default()),
        }
    }

    pub fn fail_team_info(&self, code: &str) {
        self.state.lock().unwrap().team_error = Some(code.to_string());
    }

    pub fn add_user_page(&self, users: Vec<RemoteUser>) {
        self.state.lock().unwrap().user_pages.push(users);
    }

    pub fn add_channel(&self, id: &str, name: &str) {
        self.state.lock().unwrap().channels.push(channel(id, name));
    }

    pub fn add_message(&self, channel: &str, message: RemoteMessage) {
        self.state
            .lock()
            .unwrap()
            .history
            .entry(channel.to_string())
            .or_default()
            .push(message);
    }

    pub fn fail_history(&self, channel: &str, code: &str) {
        self.state
            .lock()
            .unwrap()
            .history_errors
            .insert(channel.to_string(), code.to_string());
    }

    /// Reply pages for a thread, returned in order. The platform repeats
    /// the parent at the head of the first page; callers include it if the
    /// test needs that.
    pub fn add_reply_pages(&self, channel: &str, parent: SlackTs, pages: Vec<Vec<RemoteMessage>>) {
        self.state
            .lock()
            .unwrap()
            .replies
            .insert((channel.to_string(), parent), pages);
    }

    pub fn add_bot(&self, bot: RemoteBot) {
        self.state.lock().unwrap().bots.insert(bot.id.clone(), bot);
    }

    pub fn set_history_page_size(&self, size: usize) {
        self.state.lock().unwrap().history_page_size = Some(size);
    }

    pub fn calls(&self, method: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .get(method)
            .copied()
            .unwrap_or(0)
    }

    pub fn history_requests(&self) -> Vec<(String, Option<SlackTs>)> {
        self.state.lock().unwrap().oldest_seen.clone()
    }

    fn record(&self, method: &'static str) {
        *self.state.lock().unwrap().calls.entry(method).or_insert(0) += 1;
    }
}

fn cursor_of(index: usize, total: usize) -> String {
    if index + 1 < total {
        (index + 1).to_string()
    } else {
        String::new()
    }
}

#[async_trait]
impl SlackApi for FakeSlack {
    async fn team_info(&self) -> Result<RemoteTeam> {
        self.record("team.info");
        if let Some(code) = self.state.lock().unwrap().team_error.clone() {
            return Err(SyncError::Api(code));
        }
        Ok(serde_json::from_value(json!({
            "id": self.team_id,
            "name": format!("Team {}", self.team_id),
            "domain": self.team_id.to_lowercase(),
        }))?)
    }

    async fn list_users(&self, cursor: &str, _limit: u32) -> Result<RemotePage<RemoteUser>> {
        self.record("users.list");
        let state = self.state.lock().unwrap();
        let index: usize = cursor.parse().unwrap_or(0);
        let items = state.user_pages.get(index).cloned().unwrap_or_default();
        let next_cursor = cursor_of(index, state.user_pages.len());
        Ok(RemotePage {
            has_more: !next_cursor.is_empty(),
            items,
            next_cursor,
        })
    }

    async fn list_channels(&self, _cursor: &str, _limit: u32) -> Result<RemotePage<RemoteChannel>> {
        self.record("conversations.list");
        Ok(RemotePage::last(self.state.lock().unwrap().channels.clone()))
    }

    async fn history(
        &self,
        channel: &str,
        oldest: Option<SlackTs>,
        _cursor: &str,
        limit: u32,
    ) -> Result<RemotePage<RemoteMessage>> {
        self.record("conversations.history");
        let mut state = self.state.lock().unwrap();
        state.oldest_seen.push((channel.to_string(), oldest));
        if let Some(code) = state.history_errors.get(channel) {
            return Err(SyncError::Api(code.clone()));
        }

        let size = state.history_page_size.unwrap_or(limit as usize);
        let mut matching: Vec<RemoteMessage> = state
            .history
            .get(channel)
            .map(|all| {
                all.iter()
                    .filter(|m| oldest.is_none_or(|o| m.ts > o))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        matching.sort_by_key(|m| m.ts);

        let has_more = matching.len() > size;
        let mut items: Vec<RemoteMessage> = matching.into_iter().take(size).collect();
        items.reverse();

        Ok(RemotePage {
            items,
            next_cursor: String::new(),
            has_more,
        })
    }

    async fn replies(
        &self,
        channel: &str,
        thread_ts: SlackTs,
        cursor: &str,
    ) -> Result<RemotePage<RemoteMessage>> {
        self.record("conversations.replies");
        let state = self.state.lock().unwrap();
        let pages = state
            .replies
            .get(&(channel.to_string(), thread_ts))
            .cloned()
            .unwrap_or_default();
        let index: usize = cursor.parse().unwrap_or(0);
        let items = pages.get(index).cloned().unwrap_or_default();
        let next_cursor = cursor_of(index, pages.len());
        Ok(RemotePage {
            has_more: !next_cursor.is_empty(),
            items,
            next_cursor,
        })
    }

    async fn join_channel(&self, _channel: &str) -> Result<()> {
        self.record("conversations.join");
        Ok(())
    }

    async fn bot_info(&self, bot_id: &str) -> Result<RemoteBot> {
        self.record("bots.info");
        self.state
            .lock()
            .unwrap()
            .bots
            .get(bot_id)
            .cloned()
            .ok_or_else(|| SyncError::Api("bot_not_found".into()))
    }
}

/// One scripted real-time session.
pub enum Session {
    /// Connects, yields the events, then the server closes the socket.
    Events(Vec<LiveEvent>),
    /// The connection attempt itself fails.
    Refused(SyncError),
}

/// Plays back sessions in order. Once they run out, further connection
/// attempts never complete, which parks the merger until it is cancelled.
pub struct FakeConnector {
    sessions: Mutex<VecDeque<Session>>,
    attempts: AtomicUsize,
    attempted_at: Mutex<Vec<Instant>>,
}

impl FakeConnector {
    pub fn new(sessions: Vec<Session>) -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(sessions.into()),
            attempts: AtomicUsize::new(0),
            attempted_at: Mutex::new(Vec::new()),
        })
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Time between consecutive connection attempts.
    pub fn gaps(&self) -> Vec<Duration> {
        let times = self.attempted_at.lock().unwrap();
        times.windows(2).map(|w| w[1] - w[0]).collect()
    }
}

struct ScriptedStream {
    events: VecDeque<LiveEvent>,
}

#[async_trait]
impl RealtimeStream for ScriptedStream {
    async fn next_event(&mut self) -> Result<Option<LiveEvent>> {
        Ok(self.events.pop_front())
    }
}

#[async_trait]
impl RealtimeConnector for FakeConnector {
    async fn connect(&self) -> Result<Box<dyn RealtimeStream>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.attempted_at.lock().unwrap().push(Instant::now());
        let next = self.sessions.lock().unwrap().pop_front();
        match next {
            Some(Session::Events(events)) => Ok(Box::new(ScriptedStream {
                events: events.into(),
            })),
            Some(Session::Refused(err)) => Err(err),
            None => std::future::pending().await,
        }
    }
}

/// In-memory store with a team row for `team_id`.
pub fn seeded_store(team_id: &str) -> Store {
    let db = Database::open_in_memory().unwrap();
    db.upsert_team(&TeamRow {
        id: team_id.to_string(),
        name: format!("Team {}", team_id),
        domain: team_id.to_lowercase(),
        token: "xoxb-test".to_string(),
        plan: String::new(),
        icon: "{}".to_string(),
    })
    .unwrap();
    Store::new(Arc::new(db))
}

pub fn seed_channel(store: &Store, team_id: &str, id: &str, name: &str) {
    store
        .database()
        .upsert_channel(&ChannelRow {
            id: id.to_string(),
            team_id: team_id.to_string(),
            name: name.to_string(),
            is_channel: true,
            creator_id: None,
            is_archived: false,
            is_general: false,
            is_group: false,
            is_member: true,
            num_members: 0,
            members: "[]".to_string(),
            topic: "{}".to_string(),
            purpose: "{}".to_string(),
        })
        .unwrap();
}

pub fn seed_message(store: &Store, channel_id: &str, user_id: &str, secs: i64) {
    let message = msg(user_id, secs);
    store
        .database()
        .upsert_message(&MessageRow {
            channel_id: channel_id.to_string(),
            user_id: user_id.to_string(),
            ts: message.ts,
            thread_ts: None,
            msg: serde_json::to_string(&message).unwrap(),
        })
        .unwrap();
}

pub fn empty_store() -> Store {
    Store::new(Arc::new(Database::open_in_memory().unwrap()))
}
