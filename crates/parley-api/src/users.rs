use parley_types::api::{FindUserRequest, Reply};
use parley_types::error::ActionError;
use parley_types::models::User;

use crate::session::Caller;
use crate::{AppState, blocking};

/// Resolve a username to its public profile.
pub async fn find_user(
    state: &AppState,
    _caller: Caller,
    req: FindUserRequest,
) -> Result<Reply, ActionError> {
    blocking(state, move |s| {
        let row = s
            .db
            .get_user_by_username(&req.username)?
            .ok_or(ActionError::NotFound("User"))?;
        Ok(Reply::User(User::from(row)))
    })
    .await
}
