use anyhow::Result;
use rusqlite::{Connection, Row, params};

use crate::Database;
use crate::models::{ChannelRow, MessageRow, SessionRow, UserRow};

const USER_COLUMNS: &str = "id, username, email, password_hash, password_salt, \
     password_iterations, public_key, created_at";

const MESSAGE_COLUMNS: &str =
    "id, sender_id, recipient_id, channel_id, content, encrypted, created_at";

impl Database {
    // -- Users --

    pub fn create_user(&self, user: &UserRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, email, password_hash, password_salt,
                                    password_iterations, public_key, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    user.id,
                    user.username,
                    user.email,
                    user.password_hash,
                    user.password_salt,
                    user.password_iterations,
                    user.public_key,
                    user.created_at,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    /// Replace the stored password verifier (used when upgrading the work factor).
    pub fn update_user_password(
        &self,
        id: &str,
        hash: &str,
        salt: &str,
        iterations: u32,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET password_hash = ?1, password_salt = ?2, password_iterations = ?3
                 WHERE id = ?4",
                params![hash, salt, iterations, id],
            )?;
            Ok(())
        })
    }

    /// Returns false when no such user exists.
    pub fn set_user_public_key(&self, id: &str, public_key: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE users SET public_key = ?1 WHERE id = ?2",
                params![public_key, id],
            )?;
            Ok(updated > 0)
        })
    }

    /// `None` when the user is unknown or has not uploaded a key.
    pub fn get_user_public_key(&self, id: &str) -> Result<Option<String>> {
        Ok(self.get_user_by_id(id)?.and_then(|user| user.public_key))
    }

    // -- Sessions --

    pub fn insert_session(&self, session: &SessionRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (token, user_id, created_at, last_seen) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![session.token, session.user_id, session.created_at, session.last_seen],
            )?;
            Ok(())
        })
    }

    pub fn get_session(&self, token: &str) -> Result<Option<SessionRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT token, user_id, created_at, last_seen FROM sessions WHERE token = ?1",
                    [token],
                    |row| {
                        Ok(SessionRow {
                            token: row.get(0)?,
                            user_id: row.get(1)?,
                            created_at: row.get(2)?,
                            last_seen: row.get(3)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn touch_session(&self, token: &str, last_seen: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE sessions SET last_seen = ?1 WHERE token = ?2",
                params![last_seen, token],
            )?;
            Ok(())
        })
    }

    pub fn delete_session(&self, token: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM sessions WHERE token = ?1", [token])?;
            Ok(())
        })
    }

    /// Delete sessions idle since before `cutoff`. Returns how many went.
    pub fn purge_sessions_idle_since(&self, cutoff: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let purged = conn.execute("DELETE FROM sessions WHERE last_seen < ?1", [cutoff])?;
            Ok(purged)
        })
    }

    // -- Messages --

    pub fn insert_direct_message(&self, message: &MessageRow) -> Result<()> {
        self.with_conn(|conn| insert_message(conn, message))
    }

    /// Insert a channel message only if the sender is currently a member.
    /// The check and the insert share one lock hold. Returns false when the
    /// sender is not a member.
    pub fn insert_channel_message(&self, message: &MessageRow) -> Result<bool> {
        let Some(channel_id) = message.channel_id.as_deref() else {
            anyhow::bail!("channel message without channel_id");
        };
        self.with_conn(|conn| {
            if !query_is_member(conn, channel_id, &message.sender_id)? {
                return Ok(false);
            }
            insert_message(conn, message)?;
            Ok(true)
        })
    }

    /// Both directions of a one-to-one conversation, newest first.
    pub fn get_messages_between(
        &self,
        user_a: &str,
        user_b: &str,
        limit: u32,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE (sender_id = ?1 AND recipient_id = ?2)
                    OR (sender_id = ?2 AND recipient_id = ?1)
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?3"
            ))?;
            let rows = stmt
                .query_map(params![user_a, user_b, limit], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_channel_messages(&self, channel_id: &str, limit: u32) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE channel_id = ?1
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?2"
            ))?;
            let rows = stmt
                .query_map(params![channel_id, limit], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Everything a user can see: their direct messages in either direction
    /// plus traffic in channels they currently belong to.
    pub fn get_recent_messages(&self, user_id: &str, limit: u32) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE sender_id = ?1
                    OR recipient_id = ?1
                    OR channel_id IN (SELECT channel_id FROM channel_members WHERE user_id = ?1)
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?2"
            ))?;
            let rows = stmt
                .query_map(params![user_id, limit], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Channels --

    /// Create the channel and its member list in one transaction.
    pub fn create_channel(&self, channel: &ChannelRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO channels (id, name, description, created_by, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    channel.id,
                    channel.name,
                    channel.description,
                    channel.created_by,
                    channel.created_at,
                ],
            )?;
            for member in &channel.members {
                tx.execute(
                    "INSERT INTO channel_members (channel_id, user_id, joined_at) \
                     VALUES (?1, ?2, ?3)",
                    params![channel.id, member, channel.created_at],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_channel(&self, channel_id: &str) -> Result<Option<ChannelRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, name, description, created_by, created_at \
                     FROM channels WHERE id = ?1",
                    [channel_id],
                    channel_from_row,
                )
                .optional()?;
            match row {
                Some(mut channel) => {
                    channel.members = query_members(conn, &channel.id)?;
                    Ok(Some(channel))
                }
                None => Ok(None),
            }
        })
    }

    /// Channels the user belongs to, newest first, members populated.
    pub fn get_user_channels(&self, user_id: &str) -> Result<Vec<ChannelRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.name, c.description, c.created_by, c.created_at
                 FROM channels c
                 JOIN channel_members cm ON c.id = cm.channel_id
                 WHERE cm.user_id = ?1
                 ORDER BY c.created_at DESC, c.rowid DESC",
            )?;
            let mut channels = stmt
                .query_map([user_id], channel_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            for channel in &mut channels {
                channel.members = query_members(conn, &channel.id)?;
            }
            Ok(channels)
        })
    }

    pub fn is_channel_member(&self, channel_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| query_is_member(conn, channel_id, user_id))
    }

    /// Returns false when the user was already a member.
    pub fn add_channel_member(
        &self,
        channel_id: &str,
        user_id: &str,
        joined_at: &str,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO channel_members (channel_id, user_id, joined_at)
                 VALUES (?1, ?2, ?3)",
                params![channel_id, user_id, joined_at],
            )?;
            Ok(inserted > 0)
        })
    }

    /// Returns false when the user was not a member.
    pub fn remove_channel_member(&self, channel_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM channel_members WHERE channel_id = ?1 AND user_id = ?2",
                params![channel_id, user_id],
            )?;
            Ok(removed > 0)
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    // `column` is always one of our own literals, never caller input.
    let mut stmt = conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = ?1"))?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                email: row.get(2)?,
                password_hash: row.get(3)?,
                password_salt: row.get(4)?,
                password_iterations: row.get(5)?,
                public_key: row.get(6)?,
                created_at: row.get(7)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn insert_message(conn: &Connection, message: &MessageRow) -> Result<()> {
    conn.execute(
        "INSERT INTO messages \
         (id, sender_id, recipient_id, channel_id, content, encrypted, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            message.id,
            message.sender_id,
            message.recipient_id,
            message.channel_id,
            message.content,
            message.encrypted,
            message.created_at,
        ],
    )?;
    Ok(())
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        recipient_id: row.get(2)?,
        channel_id: row.get(3)?,
        content: row.get(4)?,
        encrypted: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn channel_from_row(row: &Row<'_>) -> rusqlite::Result<ChannelRow> {
    Ok(ChannelRow {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        created_by: row.get(3)?,
        created_at: row.get(4)?,
        members: Vec::new(),
    })
}

fn query_members(conn: &Connection, channel_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT user_id FROM channel_members WHERE channel_id = ?1 ORDER BY joined_at, rowid",
    )?;
    let members = stmt
        .query_map([channel_id], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(members)
}

fn query_is_member(conn: &Connection, channel_id: &str, user_id: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM channel_members WHERE channel_id = ?1 AND user_id = ?2",
            [channel_id, user_id],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
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
