use std::sync::Arc;

use archive_db::Database;
use archive_db::models::{ChannelRow, ChannelWatermark, MessageRow, TeamRow, UserRow};
use archive_types::SlackTs;

use crate::error::Result;

/// The engine's only write path. Every call runs the blocking database
/// operation off the async runtime.
///
/// Backfill and live ingestion for the same team share one `Store`; the
/// upserts resolve conflicts atomically, so no locking happens here.
#[derive(Clone)]
pub struct Store {
    db: Arc<Database>,
}

impl Store {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        let out = tokio::task::spawn_blocking(move || f(&db)).await?;
        Ok(out?)
    }

    pub async fn upsert_team(&self, row: TeamRow) -> Result<()> {
        self.run(move |db| db.upsert_team(&row)).await
    }

    pub async fn upsert_user(&self, row: UserRow) -> Result<()> {
        self.run(move |db| db.upsert_user(&row)).await
    }

    pub async fn upsert_bot_user(&self, row: UserRow) -> Result<()> {
        self.run(move |db| db.upsert_bot_user(&row)).await
    }

    pub async fn user_exists(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.run(move |db| db.user_exists(&id)).await
    }

    pub async fn upsert_channel(&self, row: ChannelRow) -> Result<()> {
        self.run(move |db| db.upsert_channel(&row)).await
    }

    pub async fn rename_channel(&self, team_id: &str, id: &str, name: &str) -> Result<()> {
        let (team_id, id, name) = (team_id.to_string(), id.to_string(), name.to_string());
        self.run(move |db| db.rename_channel(&team_id, &id, &name)).await
    }

    pub async fn upsert_message(&self, row: MessageRow) -> Result<()> {
        self.run(move |db| db.upsert_message(&row)).await
    }

    /// Best-effort delete; removing nothing is a success.
    pub async fn delete_message(&self, channel_id: &str, user_id: Option<&str>, ts: SlackTs) -> Result<usize> {
        let channel_id = channel_id.to_string();
        let user_id = user_id.map(str::to_string);
        self.run(move |db| db.delete_message(&channel_id, user_id.as_deref(), ts))
            .await
    }

    pub async fn team_has_messages(&self, team_id: &str) -> Result<bool> {
        let team_id = team_id.to_string();
        self.run(move |db| db.team_has_messages(&team_id)).await
    }

    pub async fn first_message_per_channel(
        &self,
        team_id: &str,
        since: Option<SlackTs>,
    ) -> Result<Vec<ChannelWatermark>> {
        let team_id = team_id.to_string();
        self.run(move |db| db.first_message_per_channel(&team_id, since))
            .await
    }
}
