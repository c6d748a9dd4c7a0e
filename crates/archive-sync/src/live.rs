//! Applies real-time events to the archive while a team is live.
//!
//! The merger owns one connection at a time. When a session ends for any
//! reason other than cancellation or a dead credential it reconnects, and
//! every connection after the first fires the reconnect hook so a fresh
//! backfill can close whatever gap the outage left. Live writes and
//! backfill writes go through the same upserts, so applying an event the
//! backfill also fetched is harmless.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use archive_types::{LiveEvent, RemoteMessage};

use crate::backfill::BotImporter;
use crate::convert;
use crate::error::{Result, SyncError};
use crate::rtm::{RealtimeConnector, RealtimeStream};
use crate::store::Store;
use crate::work_queue::WorkQueue;

const MIN_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergerState {
    Connecting,
    Connected,
    Streaming,
    Reconnecting,
    Terminated,
}

/// Why [`LiveMerger::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergerExit {
    Cancelled,
    /// The credential was rejected. The merger will not come back.
    InvalidAuth,
}

enum SessionEnd {
    Reconnect(String),
    Exit(MergerExit),
}

pub type ReconnectHook = Box<dyn Fn() + Send + Sync>;

pub struct LiveMerger {
    team_id: String,
    connector: Arc<dyn RealtimeConnector>,
    store: Store,
    work: WorkQueue,
    bots: BotImporter,
    on_reconnect: Option<ReconnectHook>,
    cancel: CancellationToken,
    state: MergerState,
    connections: u64,
}

impl LiveMerger {
    pub fn new(
        team_id: impl Into<String>,
        connector: Arc<dyn RealtimeConnector>,
        store: Store,
        work: WorkQueue,
        bots: BotImporter,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            team_id: team_id.into(),
            connector,
            store,
            work,
            bots,
            on_reconnect: None,
            cancel,
            state: MergerState::Connecting,
            connections: 0,
        }
    }

    /// Called once per successful connection after the first.
    pub fn on_reconnect(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_reconnect = Some(Box::new(hook));
        self
    }

    pub fn state(&self) -> MergerState {
        self.state
    }

    /// Successful connections so far.
    pub fn connections(&self) -> u64 {
        self.connections
    }

    pub async fn run(&mut self) -> MergerExit {
        let mut backoff = MIN_BACKOFF;

        loop {
            self.transition(MergerState::Connecting);

            let connected = tokio::select! {
                _ = self.cancel.cancelled() => return self.terminate(MergerExit::Cancelled),
                result = self.connector.connect() => result,
            };

            let mut stream = match connected {
                Ok(stream) => stream,
                Err(e) if e.is_auth() => {
                    warn!(team = %self.team_id, "Real-time credential rejected: {}", e);
                    return self.terminate(MergerExit::InvalidAuth);
                }
                Err(e) => {
                    let delay = match &e {
                        SyncError::RateLimited { retry_after } => *retry_after,
                        _ => backoff,
                    };
                    warn!(
                        team = %self.team_id,
                        delay_ms = delay.as_millis() as u64,
                        "Real-time connect failed: {}",
                        e
                    );
                    self.transition(MergerState::Reconnecting);
                    if !self.pause(delay).await {
                        return self.terminate(MergerExit::Cancelled);
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    continue;
                }
            };

            backoff = MIN_BACKOFF;
            self.transition(MergerState::Connected);
            if self.connections > 0 {
                info!(
                    team = %self.team_id,
                    connection = self.connections,
                    "Reconnected, scheduling resync"
                );
                if let Some(hook) = &self.on_reconnect {
                    hook();
                }
            }
            self.connections += 1;

            match self.stream(stream.as_mut()).await {
                SessionEnd::Exit(exit) => return self.terminate(exit),
                SessionEnd::Reconnect(reason) => {
                    info!(team = %self.team_id, "Real-time session ended: {}", reason);
                    self.transition(MergerState::Reconnecting);
                    if !self.pause(MIN_BACKOFF).await {
                        return self.terminate(MergerExit::Cancelled);
                    }
                }
            }
        }
    }

    async fn stream(&mut self, stream: &mut dyn RealtimeStream) -> SessionEnd {
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => return SessionEnd::Exit(MergerExit::Cancelled),
                next = stream.next_event() => next,
            };

            let event = match next {
                Ok(Some(event)) => event,
                Ok(None) => return SessionEnd::Reconnect("socket closed".into()),
                Err(e) => return SessionEnd::Reconnect(e.to_string()),
            };

            if self.state == MergerState::Connected {
                self.transition(MergerState::Streaming);
            }

            match event {
                LiveEvent::Goodbye => return SessionEnd::Reconnect("server said goodbye".into()),
                LiveEvent::InvalidAuth => {
                    warn!(team = %self.team_id, "Real-time stream reported invalid auth");
                    return SessionEnd::Exit(MergerExit::InvalidAuth);
                }
                event => {
                    let kind = event.kind();
                    if let Err(e) = self.apply(event).await {
                        warn!(team = %self.team_id, event = kind, "Failed to apply event: {}", e);
                    }
                }
            }
        }
    }

    /// Apply one event to the store.
    pub async fn apply(&self, event: LiveEvent) -> Result<()> {
        match event {
            LiveEvent::Hello => debug!(team = %self.team_id, "Real-time hello"),
            LiveEvent::Message(message) => self.store_message("", &message).await?,
            LiveEvent::MessageChanged { channel, message } => {
                self.store_message(&channel, &message).await?
            }
            LiveEvent::MessageDeleted { channel, ts, user } => {
                let removed = self.store.delete_message(&channel, user.as_deref(), ts).await?;
                debug!(channel = %channel, ts = %ts, removed, "Message deleted");
            }
            LiveEvent::ChannelJoinNotice => {}
            LiveEvent::UserUpserted(user) => {
                let row = convert::user_row(&self.team_id, &user)?;
                self.store.upsert_user(row).await?
            }
            LiveEvent::BotUpserted(bot) => {
                let row = convert::bot_user_row(&self.team_id, &bot)?;
                self.store.upsert_bot_user(row).await?
            }
            LiveEvent::ChannelJoined(channel) => {
                let row = convert::channel_row(&self.team_id, &channel)?;
                self.store.upsert_channel(row).await?
            }
            LiveEvent::ChannelRenamed { id, name } => {
                self.store.rename_channel(&self.team_id, &id, &name).await?
            }
            LiveEvent::Unrecognized(kind) => debug!("Ignoring real-time event {}", kind),
            // Session control, handled by the stream loop
            LiveEvent::Goodbye | LiveEvent::InvalidAuth => {}
        }
        Ok(())
    }

    async fn store_message(&self, channel: &str, message: &RemoteMessage) -> Result<()> {
        if message.is_bot_message()
            && !message.bot_id.is_empty()
            && !self.store.user_exists(&message.bot_id).await?
        {
            let bots = self.bots.clone();
            let bot_id = message.bot_id.clone();
            let team_id = self.team_id.clone();
            self.work.submit(format!("bot import {}", bot_id), async move {
                if let Err(e) = bots.ensure(&bot_id).await {
                    warn!(team = %team_id, "Bot import for {} failed: {}", bot_id, e);
                }
            });
        }

        let row = convert::message_row(channel, message)?;
        self.store.upsert_message(row).await
    }

    /// Sleep unless cancelled first. `false` means cancelled.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    fn transition(&mut self, next: MergerState) {
        if self.state != next {
            debug!(team = %self.team_id, from = ?self.state, to = ?next, "Merger state");
            self.state = next;
        }
    }

    fn terminate(&mut self, exit: MergerExit) -> MergerExit {
        self.transition(MergerState::Terminated);
        info!(team = %self.team_id, exit = ?exit, "Live merger stopped");
        exit
    }
}
