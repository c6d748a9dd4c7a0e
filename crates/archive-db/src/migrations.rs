use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

/// Keeps `messages.search_text` in step with the payload: message text
/// first, then attachment titles and links.
const SEARCH_TEXT_EXPR: &str = "trim(
    coalesce(json_extract(NEW.msg, '$.text'), '') || ' ' ||
    coalesce((
        SELECT group_concat(
            coalesce(json_extract(a.value, '$.title'), '') || ' ' ||
            coalesce(json_extract(a.value, '$.title_link'), ''),
            ' ')
        FROM json_each(NEW.msg, '$.attachments') AS a
    ), ''))";

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(&format!(
            "
            BEGIN;

            CREATE TABLE teams (
                id          TEXT PRIMARY KEY,
                name        TEXT NOT NULL DEFAULT '',
                domain      TEXT NOT NULL DEFAULT '',
                token       TEXT NOT NULL DEFAULT '',
                is_disabled INTEGER NOT NULL DEFAULT 0,
                is_hidden   INTEGER NOT NULL DEFAULT 0,
                plan        TEXT NOT NULL DEFAULT '',
                icon        TEXT NOT NULL DEFAULT '{{}}'
            );

            CREATE TABLE users (
                id                  TEXT PRIMARY KEY,
                team_id             TEXT NOT NULL REFERENCES teams(id),
                name                TEXT NOT NULL DEFAULT '',
                deleted             INTEGER NOT NULL DEFAULT 0,
                color               TEXT NOT NULL DEFAULT '',
                profile             TEXT NOT NULL DEFAULT '{{}}',
                is_bot              INTEGER NOT NULL DEFAULT 0,
                is_admin            INTEGER NOT NULL DEFAULT 0,
                is_owner            INTEGER NOT NULL DEFAULT 0,
                is_primary_owner    INTEGER NOT NULL DEFAULT 0,
                is_restricted       INTEGER NOT NULL DEFAULT 0,
                is_ultra_restricted INTEGER NOT NULL DEFAULT 0,
                has_files           INTEGER NOT NULL DEFAULT 0,
                presence            TEXT NOT NULL DEFAULT ''
            );

            CREATE INDEX idx_users_team ON users(team_id);

            CREATE TABLE channels (
                id          TEXT PRIMARY KEY,
                team_id     TEXT NOT NULL REFERENCES teams(id),
                name        TEXT NOT NULL,
                is_channel  INTEGER NOT NULL DEFAULT 0,
                creator_id  TEXT,
                is_archived INTEGER NOT NULL DEFAULT 0,
                is_general  INTEGER NOT NULL DEFAULT 0,
                is_group    INTEGER NOT NULL DEFAULT 0,
                is_member   INTEGER NOT NULL DEFAULT 0,
                num_members INTEGER NOT NULL DEFAULT 0,
                members     TEXT NOT NULL DEFAULT '[]',
                topic       TEXT NOT NULL DEFAULT '{{}}',
                purpose     TEXT NOT NULL DEFAULT '{{}}'
            );

            CREATE INDEX idx_channels_team ON channels(team_id);

            -- user_id is the author or, for bot posts, the bot id
            CREATE TABLE messages (
                channel_id  TEXT NOT NULL REFERENCES channels(id),
                user_id     TEXT NOT NULL,
                ts          INTEGER NOT NULL,
                thread_ts   INTEGER,
                msg         TEXT NOT NULL,
                search_text TEXT NOT NULL DEFAULT '',
                PRIMARY KEY (channel_id, user_id, ts)
            );

            CREATE INDEX idx_messages_channel_ts ON messages(channel_id, ts);
            CREATE INDEX idx_messages_thread ON messages(channel_id, thread_ts);

            CREATE TRIGGER messages_search_insert AFTER INSERT ON messages
            BEGIN
                UPDATE messages SET search_text = {expr} WHERE rowid = NEW.rowid;
            END;

            CREATE TRIGGER messages_search_update AFTER UPDATE OF msg ON messages
            BEGIN
                UPDATE messages SET search_text = {expr} WHERE rowid = NEW.rowid;
            END;

            INSERT INTO schema_version (version) VALUES (1);

            COMMIT;
            ",
            expr = SEARCH_TEXT_EXPR
        ))?;
    }

    info!("Database migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, 1);

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('teams', 'users', 'channels', 'messages')",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(tables, 4);
    }
}
