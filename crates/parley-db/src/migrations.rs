use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id                  TEXT PRIMARY KEY,
            username            TEXT NOT NULL UNIQUE,
            email               TEXT NOT NULL UNIQUE,
            password_hash       TEXT NOT NULL,
            password_salt       TEXT NOT NULL,
            password_iterations INTEGER NOT NULL,
            public_key          TEXT,
            created_at          TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sessions (
            token       TEXT PRIMARY KEY,
            user_id     TEXT NOT NULL REFERENCES users(id),
            created_at  TEXT NOT NULL,
            last_seen   TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_sessions_last_seen
            ON sessions(last_seen);

        CREATE TABLE IF NOT EXISTS channels (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            created_by  TEXT NOT NULL REFERENCES users(id),
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS channel_members (
            channel_id  TEXT NOT NULL REFERENCES channels(id),
            user_id     TEXT NOT NULL REFERENCES users(id),
            joined_at   TEXT NOT NULL,
            PRIMARY KEY (channel_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_channel_members_user
            ON channel_members(user_id);

        -- Exactly one of recipient_id / channel_id is set.
        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            sender_id       TEXT NOT NULL REFERENCES users(id),
            recipient_id    TEXT REFERENCES users(id),
            channel_id      TEXT REFERENCES channels(id),
            content         TEXT NOT NULL,
            encrypted       INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL,
            CHECK ((recipient_id IS NULL) <> (channel_id IS NULL))
        );

        CREATE INDEX IF NOT EXISTS idx_messages_direct
            ON messages(sender_id, recipient_id, created_at);

        CREATE INDEX IF NOT EXISTS idx_messages_channel
            ON messages(channel_id, created_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
