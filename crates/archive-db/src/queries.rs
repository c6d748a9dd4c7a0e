use crate::Database;
use crate::models::{ChannelRow, ChannelWatermark, MessageRow, TeamRow, UserRow};
use anyhow::Result;
use archive_types::SlackTs;
use rusqlite::{Connection, Row, params};

impl Database {
    // -- Teams --

    pub fn upsert_team(&self, team: &TeamRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO teams (id, name, domain, token, plan, icon)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    domain = excluded.domain,
                    token = excluded.token,
                    plan = excluded.plan,
                    icon = excluded.icon",
                params![team.id, team.name, team.domain, team.token, team.plan, team.icon],
            )?;
            Ok(())
        })
    }

    pub fn get_team(&self, id: &str) -> Result<Option<TeamRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, name, domain, token, plan, icon FROM teams WHERE id = ?1",
                [id],
                |row| {
                    Ok(TeamRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        domain: row.get(2)?,
                        token: row.get(3)?,
                        plan: row.get(4)?,
                        icon: row.get(5)?,
                    })
                },
            )
            .optional()
        })
    }

    // -- Users --

    pub fn upsert_user(&self, user: &UserRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, team_id, name, deleted, color, profile, is_bot, is_admin,
                                    is_owner, is_primary_owner, is_restricted, is_ultra_restricted,
                                    has_files, presence)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                 ON CONFLICT(id) DO UPDATE SET
                    team_id = excluded.team_id,
                    name = excluded.name,
                    deleted = excluded.deleted,
                    color = excluded.color,
                    profile = excluded.profile,
                    is_bot = excluded.is_bot,
                    is_admin = excluded.is_admin,
                    is_owner = excluded.is_owner,
                    is_primary_owner = excluded.is_primary_owner,
                    is_restricted = excluded.is_restricted,
                    is_ultra_restricted = excluded.is_ultra_restricted,
                    has_files = excluded.has_files,
                    presence = excluded.presence",
                params![
                    user.id,
                    user.team_id,
                    user.name,
                    user.deleted,
                    user.color,
                    user.profile,
                    user.is_bot,
                    user.is_admin,
                    user.is_owner,
                    user.is_primary_owner,
                    user.is_restricted,
                    user.is_ultra_restricted,
                    user.has_files,
                    user.presence,
                ],
            )?;
            Ok(())
        })
    }

    /// Upsert a bot integration as a user. Only the fields a bot record
    /// knows about are touched on conflict.
    pub fn upsert_bot_user(&self, user: &UserRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, team_id, name, deleted, profile, is_bot)
                 VALUES (?1, ?2, ?3, ?4, ?5, 1)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    deleted = excluded.deleted,
                    profile = excluded.profile",
                params![user.id, user.team_id, user.name, user.deleted, user.profile],
            )?;
            Ok(())
        })
    }

    pub fn user_exists(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found = conn
                .query_row("SELECT 1 FROM users WHERE id = ?1", [id], |_| Ok(()))
                .optional()?;
            Ok(found.is_some())
        })
    }

    pub fn get_user(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, team_id, name, deleted, color, profile, is_bot, is_admin, is_owner,
                        is_primary_owner, is_restricted, is_ultra_restricted, has_files, presence
                 FROM users WHERE id = ?1",
                [id],
                |row| {
                    Ok(UserRow {
                        id: row.get(0)?,
                        team_id: row.get(1)?,
                        name: row.get(2)?,
                        deleted: row.get(3)?,
                        color: row.get(4)?,
                        profile: row.get(5)?,
                        is_bot: row.get(6)?,
                        is_admin: row.get(7)?,
                        is_owner: row.get(8)?,
                        is_primary_owner: row.get(9)?,
                        is_restricted: row.get(10)?,
                        is_ultra_restricted: row.get(11)?,
                        has_files: row.get(12)?,
                        presence: row.get(13)?,
                    })
                },
            )
            .optional()
        })
    }

    // -- Channels --

    pub fn upsert_channel(&self, channel: &ChannelRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO channels (id, team_id, name, is_channel, creator_id, is_archived,
                                       is_general, is_group, is_member, num_members, members,
                                       topic, purpose)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                 ON CONFLICT(id) DO UPDATE SET
                    team_id = excluded.team_id,
                    name = excluded.name,
                    is_channel = excluded.is_channel,
                    creator_id = excluded.creator_id,
                    is_archived = excluded.is_archived,
                    is_general = excluded.is_general,
                    is_group = excluded.is_group,
                    is_member = excluded.is_member,
                    num_members = excluded.num_members,
                    members = excluded.members,
                    topic = excluded.topic,
                    purpose = excluded.purpose",
                params![
                    channel.id,
                    channel.team_id,
                    channel.name,
                    channel.is_channel,
                    channel.creator_id,
                    channel.is_archived,
                    channel.is_general,
                    channel.is_group,
                    channel.is_member,
                    channel.num_members,
                    channel.members,
                    channel.topic,
                    channel.purpose,
                ],
            )?;
            Ok(())
        })
    }

    /// Record a channel's new name, creating a bare row if the channel has
    /// not been seen yet.
    pub fn rename_channel(&self, team_id: &str, id: &str, name: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO channels (id, team_id, name) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET name = excluded.name",
                params![id, team_id, name],
            )?;
            Ok(())
        })
    }

    pub fn get_channel(&self, id: &str) -> Result<Option<ChannelRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, team_id, name, is_channel, creator_id, is_archived, is_general,
                        is_group, is_member, num_members, members, topic, purpose
                 FROM channels WHERE id = ?1",
                [id],
                |row| {
                    Ok(ChannelRow {
                        id: row.get(0)?,
                        team_id: row.get(1)?,
                        name: row.get(2)?,
                        is_channel: row.get(3)?,
                        creator_id: row.get(4)?,
                        is_archived: row.get(5)?,
                        is_general: row.get(6)?,
                        is_group: row.get(7)?,
                        is_member: row.get(8)?,
                        num_members: row.get(9)?,
                        members: row.get(10)?,
                        topic: row.get(11)?,
                        purpose: row.get(12)?,
                    })
                },
            )
            .optional()
        })
    }

    // -- Messages --

    /// Insert a message or replace the stored payload at the same
    /// (channel, user, ts) key.
    pub fn upsert_message(&self, message: &MessageRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO messages (channel_id, user_id, ts, thread_ts, msg)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(channel_id, user_id, ts) DO UPDATE SET
                    thread_ts = excluded.thread_ts,
                    msg = excluded.msg",
                params![
                    message.channel_id,
                    message.user_id,
                    message.ts.as_micros(),
                    message.thread_ts.map(|t| t.as_micros()),
                    message.msg,
                ],
            )?;
            Ok(())
        })
    }

    /// Delete a message. With no user, every row at (channel, ts) goes.
    /// Returns the number of rows removed; zero is not an error.
    pub fn delete_message(&self, channel_id: &str, user_id: Option<&str>, ts: SlackTs) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let removed = conn.execute(
                "DELETE FROM messages
                 WHERE channel_id = ?1 AND ts = ?2 AND (?3 IS NULL OR user_id = ?3)",
                params![channel_id, ts.as_micros(), user_id],
            )?;
            Ok(removed)
        })
    }

    pub fn get_message(&self, channel_id: &str, user_id: &str, ts: SlackTs) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT channel_id, user_id, ts, thread_ts, msg FROM messages
                 WHERE channel_id = ?1 AND user_id = ?2 AND ts = ?3",
                params![channel_id, user_id, ts.as_micros()],
                message_from_row,
            )
            .optional()
        })
    }

    pub fn list_messages(&self, channel_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_messages(conn, channel_id))
    }

    pub fn count_messages(&self, channel_id: &str) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE channel_id = ?1",
                [channel_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    pub fn message_search_text(&self, channel_id: &str, user_id: &str, ts: SlackTs) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT search_text FROM messages
                 WHERE channel_id = ?1 AND user_id = ?2 AND ts = ?3",
                params![channel_id, user_id, ts.as_micros()],
                |row| row.get(0),
            )
            .optional()
        })
    }

    pub fn team_has_messages(&self, team_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM messages m JOIN channels c ON c.id = m.channel_id
                     WHERE c.team_id = ?1 LIMIT 1",
                    [team_id],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    // -- Watermarks --

    /// Earliest stored message per team channel, counting only messages
    /// newer than `since` when given. Every channel of the team appears;
    /// channels with no qualifying message get `None`.
    pub fn first_message_per_channel(
        &self,
        team_id: &str,
        since: Option<SlackTs>,
    ) -> Result<Vec<ChannelWatermark>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, MIN(m.ts)
                 FROM channels c
                 LEFT JOIN messages m
                    ON m.channel_id = c.id AND (?2 IS NULL OR m.ts > ?2)
                 WHERE c.team_id = ?1
                 GROUP BY c.id
                 ORDER BY c.id",
            )?;

            let rows = stmt
                .query_map(params![team_id, since.map(|t| t.as_micros())], |row| {
                    Ok(ChannelWatermark {
                        channel_id: row.get(0)?,
                        first_since: row.get::<_, Option<i64>>(1)?.map(SlackTs::from_micros),
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        channel_id: row.get(0)?,
        user_id: row.get(1)?,
        ts: SlackTs::from_micros(row.get(2)?),
        thread_ts: row.get::<_, Option<i64>>(3)?.map(SlackTs::from_micros),
        msg: row.get(4)?,
    })
}

fn query_messages(conn: &Connection, channel_id: &str) -> Result<Vec<MessageRow>> {
    let mut stmt = conn.prepare(
        "SELECT channel_id, user_id, ts, thread_ts, msg FROM messages
         WHERE channel_id = ?1
         ORDER BY ts, user_id",
    )?;

    let rows = stmt
        .query_map([channel_id], message_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
