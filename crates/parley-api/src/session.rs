//! Opaque bearer tokens with a sliding idle window.
//!
//! Live sessions sit in a sharded [`DashMap`], so unrelated tokens never
//! contend. An optional [`SessionStore`] receives every write and serves
//! cache misses, which lets sessions outlive a server restart.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, warn};

use parley_db::models::SessionRow;
use parley_db::{Database, format_timestamp, parse_timestamp};
use parley_types::error::ActionError;

pub const TOKEN_BYTES: usize = 32;
pub const DEFAULT_IDLE_DAYS: i64 = 7;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// The authenticated caller of a protected action.
#[derive(Clone)]
pub struct Caller {
    pub user_id: String,
    pub token: String,
}

impl std::fmt::Debug for Caller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Caller")
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

/// Durable backing for the registry. Calls may block.
pub trait SessionStore: Send + Sync {
    fn save(&self, token: &str, record: &SessionRecord) -> Result<()>;
    fn load(&self, token: &str) -> Result<Option<SessionRecord>>;
    fn touch(&self, token: &str, last_seen: DateTime<Utc>) -> Result<()>;
    fn remove(&self, token: &str) -> Result<()>;
    fn purge_idle_since(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

impl SessionStore for Database {
    fn save(&self, token: &str, record: &SessionRecord) -> Result<()> {
        self.insert_session(&SessionRow {
            token: token.to_string(),
            user_id: record.user_id.clone(),
            created_at: format_timestamp(record.created_at),
            last_seen: format_timestamp(record.last_seen),
        })
    }

    fn load(&self, token: &str) -> Result<Option<SessionRecord>> {
        Ok(self.get_session(token)?.map(|row| SessionRecord {
            user_id: row.user_id,
            created_at: parse_timestamp(&row.created_at),
            last_seen: parse_timestamp(&row.last_seen),
        }))
    }

    fn touch(&self, token: &str, last_seen: DateTime<Utc>) -> Result<()> {
        self.touch_session(token, &format_timestamp(last_seen))
    }

    fn remove(&self, token: &str) -> Result<()> {
        self.delete_session(token)
    }

    fn purge_idle_since(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.purge_sessions_idle_since(&format_timestamp(cutoff))
    }
}

pub struct SessionRegistry {
    sessions: DashMap<String, SessionRecord>,
    idle: Duration,
    store: Option<Arc<dyn SessionStore>>,
}

impl SessionRegistry {
    /// In-memory only.
    pub fn new(idle: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            idle,
            store: None,
        }
    }

    pub fn with_store(idle: Duration, store: Arc<dyn SessionStore>) -> Self {
        Self {
            store: Some(store),
            ..Self::new(idle)
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Issue a fresh token bound to `user_id`.
    pub fn create(&self, user_id: &str) -> Result<String, ActionError> {
        let bytes = parley_crypto::random_bytes::<TOKEN_BYTES>().map_err(anyhow::Error::from)?;
        let token = hex::encode(bytes);
        let now = Utc::now();
        let record = SessionRecord {
            user_id: user_id.to_string(),
            created_at: now,
            last_seen: now,
        };

        if let Some(store) = &self.store {
            store.save(&token, &record)?;
        }
        self.sessions.insert(token.clone(), record);
        debug!("Session issued for user {}", user_id);
        Ok(token)
    }

    pub fn validate(&self, token: &str) -> Result<String, ActionError> {
        self.validate_at(token, Utc::now())
    }

    /// Resolve `token` to its user as of `now`, refreshing last activity.
    /// Stale tokens are evicted and rejected.
    pub fn validate_at(&self, token: &str, now: DateTime<Utc>) -> Result<String, ActionError> {
        let cached = self.sessions.get_mut(token).map(|mut entry| {
            if self.is_stale(&entry, now) {
                None
            } else {
                entry.last_seen = entry.last_seen.max(now);
                Some(entry.user_id.clone())
            }
        });

        match cached {
            Some(Some(user_id)) => {
                if let Some(store) = &self.store {
                    store.touch(token, now)?;
                }
                Ok(user_id)
            }
            Some(None) => {
                self.evict(token);
                Err(ActionError::InvalidSession)
            }
            None => self.validate_from_store(token, now),
        }
    }

    fn validate_from_store(&self, token: &str, now: DateTime<Utc>) -> Result<String, ActionError> {
        let Some(store) = &self.store else {
            return Err(ActionError::InvalidSession);
        };
        // The vacant slot holds the shard until the record is cached, so a
        // concurrent revoke cannot land between the load and the insert.
        let slot = match self.sessions.entry(token.to_string()) {
            Entry::Vacant(slot) => slot,
            Entry::Occupied(cached) => {
                // Cached by a concurrent lookup.
                drop(cached);
                return self.validate_at(token, now);
            }
        };
        let Some(mut record) = store.load(token)? else {
            return Err(ActionError::InvalidSession);
        };
        if self.is_stale(&record, now) {
            drop(slot);
            self.evict(token);
            return Err(ActionError::InvalidSession);
        }

        record.last_seen = record.last_seen.max(now);
        store.touch(token, record.last_seen)?;
        let user_id = record.user_id.clone();
        slot.insert(record);
        Ok(user_id)
    }

    /// Idempotent.
    pub fn revoke(&self, token: &str) -> Result<(), ActionError> {
        // Held across the store delete; see `validate_from_store`.
        let entry = self.sessions.entry(token.to_string());
        if let Some(store) = &self.store {
            store.remove(token)?;
        }
        if let Entry::Occupied(cached) = entry {
            cached.remove();
        }
        Ok(())
    }

    pub fn purge_expired(&self) -> Result<usize, ActionError> {
        self.purge_expired_at(Utc::now())
    }

    /// Drop every session idle past the window as of `now`.
    pub fn purge_expired_at(&self, now: DateTime<Utc>) -> Result<usize, ActionError> {
        let before = self.sessions.len();
        self.sessions.retain(|_, record| !self.is_stale(record, now));
        let in_memory = before.saturating_sub(self.sessions.len());

        match &self.store {
            Some(store) => {
                let stored = store.purge_idle_since(now - self.idle)?;
                Ok(in_memory.max(stored))
            }
            None => Ok(in_memory),
        }
    }

    fn is_stale(&self, record: &SessionRecord, now: DateTime<Utc>) -> bool {
        now - record.last_seen > self.idle
    }

    fn evict(&self, token: &str) {
        self.sessions.remove(token);
        if let Some(store) = &self.store {
            if let Err(e) = store.remove(token) {
                warn!("Failed to evict stale session: {}", e);
            }
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(Duration::days(DEFAULT_IDLE_DAYS))
    }
}
