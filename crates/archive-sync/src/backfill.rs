//! Historical synchronization for one team.
//!
//! A pass walks team → users → channels → message history, so every stage
//! only references rows an earlier stage already wrote. Rate limits stall a
//! stage but never fail it; storage, auth and cancellation errors end the
//! pass; anything scoped to one record or one channel is logged and skipped.

use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use archive_types::{RemoteMessage, SlackTs};

use crate::api::{CHANNELS_PAGE_LIMIT, HISTORY_PAGE_LIMIT, USERS_PAGE_LIMIT};
use crate::convert;
use crate::error::{Result, SyncError};
use crate::pagination::{HistoryCursor, Paginator, by_cursor, by_has_more, by_oldest};
use crate::rate_limit::RateLimitedClient;
use crate::store::Store;
use crate::watermark::WatermarkCalculator;

/// Counters for one pass, logged when it completes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BackfillStats {
    pub users: usize,
    pub channels: usize,
    pub channels_skipped: usize,
    pub messages: usize,
    pub replies: usize,
    pub skipped_records: usize,
}

/// Creates user rows for bots on first sight.
#[derive(Clone)]
pub struct BotImporter {
    team_id: String,
    client: RateLimitedClient,
    store: Store,
}

impl BotImporter {
    pub fn new(team_id: impl Into<String>, client: RateLimitedClient, store: Store) -> Self {
        Self {
            team_id: team_id.into(),
            client,
            store,
        }
    }

    /// Look the bot up and store it, unless a user row already exists.
    pub async fn ensure(&self, bot_id: &str) -> Result<()> {
        if bot_id.is_empty() || self.store.user_exists(bot_id).await? {
            return Ok(());
        }

        let api = self.client.api();
        let bot = self.client.call("bots.info", || api.bot_info(bot_id)).await?;
        let row = convert::bot_user_row(&self.team_id, &bot)?;
        self.store.upsert_bot_user(row).await?;

        debug!(team = %self.team_id, bot = bot_id, "Imported bot user");
        Ok(())
    }
}

#[derive(Clone)]
pub struct Backfill {
    team_id: String,
    bot_token: String,
    client: RateLimitedClient,
    store: Store,
    bots: BotImporter,
}

impl Backfill {
    pub fn new(
        team_id: impl Into<String>,
        bot_token: impl Into<String>,
        client: RateLimitedClient,
        store: Store,
    ) -> Self {
        let team_id = team_id.into();
        let bots = BotImporter::new(team_id.clone(), client.clone(), store.clone());
        Self {
            team_id,
            bot_token: bot_token.into(),
            client,
            store,
            bots,
        }
    }

    pub fn team_id(&self) -> &str {
        &self.team_id
    }

    pub fn bot_importer(&self) -> &BotImporter {
        &self.bots
    }

    /// Run one full pass. `since` is the watermark floor: `None` resumes
    /// each channel from its earliest stored message (or fetches all of it).
    pub async fn run(&self, since: Option<DateTime<Utc>>) -> Result<BackfillStats> {
        let started = Instant::now();
        info!(team = %self.team_id, since = ?since, "Backfill starting");

        let mut stats = BackfillStats::default();
        self.sync_team().await?;
        self.sync_users(&mut stats).await?;
        self.sync_channels(&mut stats).await?;

        let resume_points = WatermarkCalculator::new(self.store.clone(), self.team_id.clone())
            .for_each_channel(since)
            .await?;

        for (channel, resume) in resume_points {
            match self.sync_channel(&channel, resume, &mut stats).await {
                Ok(()) => {}
                Err(e) if e.aborts_pass() => return Err(e),
                Err(e) => {
                    stats.channels_skipped += 1;
                    warn!(team = %self.team_id, channel = %channel, "Skipping channel: {}", e);
                }
            }
        }

        info!(
            team = %self.team_id,
            users = stats.users,
            channels = stats.channels,
            messages = stats.messages,
            replies = stats.replies,
            skipped = stats.skipped_records,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Backfill complete"
        );
        Ok(stats)
    }

    async fn sync_team(&self) -> Result<()> {
        let api = self.client.api();
        let team = self.client.call("team.info", || api.team_info()).await?;
        if team.id != self.team_id {
            warn!("Credential for {} now reports team {}", self.team_id, team.id);
        }
        self.store
            .upsert_team(convert::team_row(&team, &self.bot_token)?)
            .await
    }

    async fn sync_users(&self, stats: &mut BackfillStats) -> Result<()> {
        let api = self.client.api();
        let mut pages = Paginator::new(&self.client, "users.list", String::new(), |cursor: String| async move {
            api.list_users(&cursor, USERS_PAGE_LIMIT).await.map(by_cursor)
        });

        while let Some(users) = pages.next_page().await? {
            debug!(team = %self.team_id, count = users.len(), "Updating users");
            for user in users {
                let stored = match convert::user_row(&self.team_id, &user) {
                    Ok(row) => self.store.upsert_user(row).await,
                    Err(e) => Err(e),
                };
                if self.skip_invalid("user", &user.id, stored, stats)? {
                    stats.users += 1;
                }
            }
        }
        Ok(())
    }

    async fn sync_channels(&self, stats: &mut BackfillStats) -> Result<()> {
        let api = self.client.api();
        let mut pages = Paginator::new(&self.client, "conversations.list", String::new(), |cursor: String| async move {
            api.list_channels(&cursor, CHANNELS_PAGE_LIMIT).await.map(by_cursor)
        });

        while let Some(channels) = pages.next_page().await? {
            debug!(team = %self.team_id, count = channels.len(), "Updating channels");
            for channel in channels {
                let stored = match convert::channel_row(&self.team_id, &channel) {
                    Ok(row) => self.store.upsert_channel(row).await,
                    Err(e) => Err(e),
                };
                if self.skip_invalid("channel", &channel.id, stored, stats)? {
                    stats.channels += 1;
                }
            }
        }
        Ok(())
    }

    async fn sync_channel(
        &self,
        channel: &str,
        resume: Option<SlackTs>,
        stats: &mut BackfillStats,
    ) -> Result<()> {
        info!(team = %self.team_id, channel, resume = ?resume, "Syncing channel history");

        let api = self.client.api();
        self.client
            .call("conversations.join", || api.join_channel(channel))
            .await?;

        let start = HistoryCursor::after(resume);
        let mut pages = Paginator::new(&self.client, "conversations.history", start, |at: HistoryCursor| async move {
            api.history(channel, at.oldest, &at.cursor, HISTORY_PAGE_LIMIT)
                .await
                .map(|page| by_oldest(page, &at))
        });

        let before = stats.messages + stats.replies;
        while let Some(messages) = pages.next_page().await? {
            for message in messages {
                let stored = self.store_message(channel, &message).await;
                if !self.skip_invalid("message", &message.ts.to_string(), stored, stats)? {
                    continue;
                }
                stats.messages += 1;

                if message.is_thread_parent() {
                    if let Err(e) = self.sync_thread(channel, message.ts, stats).await {
                        if e.aborts_pass() {
                            return Err(e);
                        }
                        warn!(channel, thread = %message.ts, "Thread sync failed: {}", e);
                    }
                }
            }
        }

        debug!(
            channel,
            pages = pages.pages_fetched(),
            stored = stats.messages + stats.replies - before,
            "Channel history synced"
        );
        Ok(())
    }

    async fn sync_thread(&self, channel: &str, parent: SlackTs, stats: &mut BackfillStats) -> Result<()> {
        let api = self.client.api();
        let mut pages = Paginator::new(&self.client, "conversations.replies", String::new(), |cursor: String| async move {
            api.replies(channel, parent, &cursor).await.map(by_has_more)
        });

        while let Some(replies) = pages.next_page().await? {
            for mut reply in replies {
                // Reply pages repeat the parent
                if reply.ts == parent {
                    continue;
                }
                reply.thread_ts.get_or_insert(parent);

                let stored = self.store_message(channel, &reply).await;
                if self.skip_invalid("reply", &reply.ts.to_string(), stored, stats)? {
                    stats.replies += 1;
                }
            }
        }
        Ok(())
    }

    async fn store_message(&self, channel: &str, message: &RemoteMessage) -> Result<()> {
        if message.is_bot_message() {
            match self.bots.ensure(&message.bot_id).await {
                Ok(()) => {}
                Err(e) if e.aborts_pass() => return Err(e),
                // The message is keyed by bot id either way
                Err(e) => warn!(team = %self.team_id, bot = %message.bot_id, "Bot lookup failed: {}", e),
            }
        }
        let row = convert::message_row(channel, message)?;
        self.store.upsert_message(row).await
    }

    /// `Ok(true)` if the record was stored, `Ok(false)` if it was logged
    /// and skipped, `Err` if the failure ends the pass.
    fn skip_invalid(
        &self,
        kind: &str,
        id: &str,
        stored: Result<()>,
        stats: &mut BackfillStats,
    ) -> Result<bool> {
        match stored {
            Ok(()) => Ok(true),
            Err(e) if e.aborts_pass() => Err(e),
            Err(e) => {
                stats.skipped_records += 1;
                match e {
                    SyncError::InvalidRecord(reason) => {
                        warn!(team = %self.team_id, "Skipping {} {}: {}", kind, id, reason)
                    }
                    other => warn!(team = %self.team_id, "Failed to store {} {}: {}", kind, id, other),
                }
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeSlack, bot, bot_msg, empty_store, msg, reply, thread_parent, user};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn backfill(fake: &Arc<FakeSlack>, store: &Store) -> Backfill {
        let client = RateLimitedClient::new(fake.clone(), CancellationToken::new());
        Backfill::new("T1", "xoxb-test", client, store.clone())
    }

    #[tokio::test]
    async fn thread_parent_expands_every_reply_page() {
        let fake = Arc::new(FakeSlack::new("T1"));
        fake.add_channel("C1", "general");
        fake.add_message("C1", thread_parent("U1", 100));

        let parent = SlackTs::from_secs(100);
        let mut first: Vec<_> = (1..=5).map(|i| reply("U2", 100 + i, 100)).collect();
        first.insert(0, thread_parent("U1", 100));
        let second: Vec<_> = (6..=8).map(|i| reply("U3", 100 + i, 100)).collect();
        fake.add_reply_pages("C1", parent, vec![first, second]);

        let store = empty_store();
        let stats = backfill(&fake, &store).run(None).await.unwrap();

        assert_eq!(stats.messages, 1);
        assert_eq!(stats.replies, 8);
        assert_eq!(fake.calls("conversations.replies"), 2);

        let rows = store.database().list_messages("C1").unwrap();
        assert_eq!(rows.len(), 9);
        assert!(rows.iter().all(|r| r.thread_ts == Some(parent)));
    }

    #[tokio::test]
    async fn reply_without_thread_ts_is_tagged_with_its_parent() {
        let fake = Arc::new(FakeSlack::new("T1"));
        fake.add_channel("C1", "general");
        fake.add_message("C1", thread_parent("U1", 50));
        fake.add_reply_pages("C1", SlackTs::from_secs(50), vec![vec![msg("U2", 51)]]);

        let store = empty_store();
        backfill(&fake, &store).run(None).await.unwrap();

        let row = store
            .database()
            .get_message("C1", "U2", SlackTs::from_secs(51))
            .unwrap()
            .expect("reply stored");
        assert_eq!(row.thread_ts, Some(SlackTs::from_secs(50)));
    }

    #[tokio::test]
    async fn repeated_passes_do_not_duplicate_rows() {
        let fake = Arc::new(FakeSlack::new("T1"));
        fake.add_user_page(vec![user("U1"), user("U2")]);
        fake.add_user_page(vec![user("U3")]);
        fake.add_channel("C1", "general");
        fake.add_channel("C2", "random");
        fake.add_message("C1", msg("U1", 10));
        fake.add_message("C1", msg("U2", 20));
        fake.add_message("C2", msg("U3", 30));

        let store = empty_store();
        let sync = backfill(&fake, &store);
        let first = sync.run(None).await.unwrap();
        let second = sync.run(None).await.unwrap();

        assert_eq!(first.users, 3);
        assert_eq!(first.channels, 2);
        assert_eq!(first.messages, 3);
        // Only messages after each channel's earliest stored one come back
        assert_eq!(second.messages, 1);

        let db = store.database();
        assert_eq!(db.count_messages("C1").unwrap(), 2);
        assert_eq!(db.count_messages("C2").unwrap(), 1);
        assert_eq!(db.get_team("T1").unwrap().unwrap().token, "xoxb-test");
    }

    #[tokio::test]
    async fn history_resumes_from_the_watermark() {
        let fake = Arc::new(FakeSlack::new("T1"));
        fake.add_channel("C1", "general");
        for secs in [10, 20, 30] {
            fake.add_message("C1", msg("U1", secs));
        }

        let store = empty_store();
        let sync = backfill(&fake, &store);
        sync.run(None).await.unwrap();

        let floor = DateTime::from_timestamp(15, 0).unwrap();
        sync.run(Some(floor)).await.unwrap();

        let requests = fake.history_requests();
        assert_eq!(requests[0], ("C1".to_string(), None));
        assert_eq!(requests.last().unwrap(), &("C1".to_string(), Some(SlackTs::from_secs(20))));
        assert_eq!(store.database().count_messages("C1").unwrap(), 3);
    }

    #[tokio::test]
    async fn history_walks_multiple_pages_forward() {
        let fake = Arc::new(FakeSlack::new("T1"));
        fake.set_history_page_size(2);
        fake.add_channel("C1", "general");
        for secs in 1..=5 {
            fake.add_message("C1", msg("U1", secs));
        }

        let store = empty_store();
        let stats = backfill(&fake, &store).run(None).await.unwrap();

        assert_eq!(stats.messages, 5);
        assert_eq!(fake.calls("conversations.history"), 3);
        let oldest: Vec<_> = fake.history_requests().into_iter().map(|(_, o)| o).collect();
        assert_eq!(
            oldest,
            vec![None, Some(SlackTs::from_secs(2)), Some(SlackTs::from_secs(4))]
        );
    }

    #[tokio::test]
    async fn bot_messages_import_the_bot_once() {
        let fake = Arc::new(FakeSlack::new("T1"));
        fake.add_channel("C1", "general");
        fake.add_bot(bot("B1", "deploybot"));
        fake.add_message("C1", bot_msg("B1", 10));
        fake.add_message("C1", bot_msg("B1", 11));

        let store = empty_store();
        backfill(&fake, &store).run(None).await.unwrap();

        assert_eq!(fake.calls("bots.info"), 1);
        let bot_user = store.database().get_user("B1").unwrap().expect("bot user");
        assert!(bot_user.is_bot);
        assert_eq!(bot_user.name, "deploybot");
        assert_eq!(store.database().count_messages("C1").unwrap(), 2);
    }

    #[tokio::test]
    async fn unknown_bot_does_not_lose_its_message() {
        let fake = Arc::new(FakeSlack::new("T1"));
        fake.add_channel("C1", "general");
        fake.add_message("C1", bot_msg("B9", 10));

        let store = empty_store();
        let stats = backfill(&fake, &store).run(None).await.unwrap();

        assert_eq!(stats.messages, 1);
        assert_eq!(stats.skipped_records, 0);
        assert_eq!(fake.calls("bots.info"), 1);
        assert!(store.database().get_message("C1", "B9", SlackTs::from_secs(10)).unwrap().is_some());
        assert!(!store.database().user_exists("B9").unwrap());
    }

    #[tokio::test]
    async fn failing_channel_is_skipped() {
        let fake = Arc::new(FakeSlack::new("T1"));
        fake.add_channel("C1", "broken");
        fake.add_channel("C2", "fine");
        fake.fail_history("C1", "channel_not_found");
        fake.add_message("C2", msg("U1", 10));

        let store = empty_store();
        let stats = backfill(&fake, &store).run(None).await.unwrap();

        assert_eq!(stats.channels_skipped, 1);
        assert_eq!(store.database().count_messages("C2").unwrap(), 1);
    }

    #[tokio::test]
    async fn auth_failure_aborts_the_pass() {
        let fake = Arc::new(FakeSlack::new("T1"));
        fake.add_channel("C1", "general");
        fake.fail_history("C1", "token_revoked");

        let err = backfill(&fake, &empty_store()).run(None).await.unwrap_err();
        assert!(err.is_auth());
    }

    #[tokio::test]
    async fn invalid_users_are_skipped() {
        let fake = Arc::new(FakeSlack::new("T1"));
        fake.add_user_page(vec![user("U1"), user(""), user("U2")]);

        let store = empty_store();
        let stats = backfill(&fake, &store).run(None).await.unwrap();

        assert_eq!(stats.users, 2);
        assert_eq!(stats.skipped_records, 1);
        assert!(store.database().user_exists("U2").unwrap());
    }
}
