pub mod auth;
pub mod channels;
pub mod keys;
pub mod messages;
pub mod session;
pub mod users;

use std::sync::Arc;

use tracing::error;

use parley_crypto::PasswordHasher;
use parley_db::Database;
use parley_types::error::ActionError;

use crate::session::SessionRegistry;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub sessions: SessionRegistry,
    pub hasher: PasswordHasher,
}

impl AppStateInner {
    /// State whose session registry writes through to `db`.
    pub fn new(db: Arc<Database>, idle: chrono::Duration, hasher: PasswordHasher) -> Self {
        Self {
            sessions: SessionRegistry::with_store(idle, db.clone()),
            db,
            hasher,
        }
    }
}

/// Run blocking work (SQLite, PBKDF2) off the async runtime.
pub async fn blocking<F, T>(state: &AppState, f: F) -> Result<T, ActionError>
where
    F: FnOnce(&AppStateInner) -> Result<T, ActionError> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ActionError::Internal(e.into())
        })?
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub(crate) fn require_non_empty(value: &str, what: &str) -> Result<(), ActionError> {
    if value.trim().is_empty() {
        return Err(ActionError::validation(format!("{what} cannot be empty")));
    }
    Ok(())
}
