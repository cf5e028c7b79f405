use chrono::Utc;
use tracing::{info, warn};

use parley_crypto::password::{DIGEST_LEN, SALT_LEN};
use parley_crypto::{PasswordHasher, PasswordRecord};
use parley_db::models::UserRow;
use parley_db::{format_timestamp, is_unique_violation};
use parley_types::api::{LoginRequest, RegisterRequest, Reply};
use parley_types::error::ActionError;
use parley_types::models::User;

use crate::session::Caller;
use crate::{AppState, blocking, new_id, require_non_empty};

pub const MAX_USERNAME_LEN: usize = 32;

pub async fn register(state: &AppState, req: RegisterRequest) -> Result<Reply, ActionError> {
    // Validate input
    require_non_empty(&req.username, "username")?;
    require_non_empty(&req.email, "email")?;
    require_non_empty(&req.password, "password")?;
    if req.username.chars().count() > MAX_USERNAME_LEN {
        return Err(ActionError::validation(format!(
            "username must be at most {MAX_USERNAME_LEN} characters"
        )));
    }
    if !req.email.contains('@') {
        return Err(ActionError::validation("invalid email address"));
    }

    let user = blocking(state, move |s| {
        if s.db.get_user_by_username(&req.username)?.is_some() {
            return Err(ActionError::UsernameTaken);
        }
        if s.db.get_user_by_email(&req.email)?.is_some() {
            return Err(ActionError::EmailTaken);
        }

        let record = s.hasher.hash(&req.password).map_err(anyhow::Error::from)?;
        let row = UserRow {
            id: new_id(),
            username: req.username,
            email: req.email,
            password_hash: record.digest_base64(),
            password_salt: record.salt_base64(),
            password_iterations: record.iterations,
            public_key: None,
            created_at: format_timestamp(Utc::now()),
        };

        match s.db.create_user(&row) {
            Ok(()) => Ok(User::from(row)),
            // Lost a race with a concurrent registration.
            Err(e) if is_unique_violation(&e) => {
                if s.db.get_user_by_username(&row.username)?.is_some() {
                    Err(ActionError::UsernameTaken)
                } else {
                    Err(ActionError::EmailTaken)
                }
            }
            Err(e) => Err(e.into()),
        }
    })
    .await?;

    let token = issue_session(state, &user.id).await?;
    info!("User registered: {}", user.username);
    Ok(Reply::Auth { token, user })
}

pub async fn login(state: &AppState, req: LoginRequest) -> Result<Reply, ActionError> {
    let user = blocking(state, move |s| {
        let Some(row) = s.db.get_user_by_username(&req.username)? else {
            // Burn the same PBKDF2 work so unknown usernames aren't distinguishable by timing.
            let decoy = PasswordRecord {
                digest: vec![0; DIGEST_LEN],
                salt: vec![0; SALT_LEN],
                iterations: s.hasher.iterations(),
            };
            PasswordHasher::verify(&req.password, &decoy);
            return Err(ActionError::InvalidCredentials);
        };

        let record = PasswordRecord::from_base64(
            &row.password_hash,
            &row.password_salt,
            row.password_iterations,
        )
        .map_err(anyhow::Error::from)?;

        if !PasswordHasher::verify(&req.password, &record) {
            return Err(ActionError::InvalidCredentials);
        }

        if s.hasher.needs_rehash(&record) {
            let upgraded = s
                .hasher
                .hash(&req.password)
                .map_err(anyhow::Error::from)
                .and_then(|new| {
                    s.db.update_user_password(
                        &row.id,
                        &new.digest_base64(),
                        &new.salt_base64(),
                        new.iterations,
                    )
                });
            if let Err(e) = upgraded {
                warn!("Password rehash failed for {}: {}", row.username, e);
            }
        }

        Ok(User::from(row))
    })
    .await?;

    let token = issue_session(state, &user.id).await?;
    info!("User logged in: {}", user.username);
    Ok(Reply::Auth { token, user })
}

pub async fn logout(state: &AppState, caller: Caller) -> Result<Reply, ActionError> {
    let user_id = caller.user_id.clone();
    blocking(state, move |s| s.sessions.revoke(&caller.token)).await?;
    info!("User logged out: {}", user_id);
    Ok(Reply::Empty)
}

async fn issue_session(state: &AppState, user_id: &str) -> Result<String, ActionError> {
    let user_id = user_id.to_string();
    blocking(state, move |s| s.sessions.create(&user_id)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{register as register_user, state};

    fn registration(username: &str, email: &str) -> RegisterRequest {
        RegisterRequest {
            username: username.into(),
            email: email.into(),
            password: "pw1".into(),
        }
    }

    #[tokio::test]
    async fn register_issues_a_working_session() {
        let state = state();
        let Reply::Auth { token, user } =
            register(&state, registration("alice", "a@x.com")).await.unwrap()
        else {
            panic!("expected auth reply");
        };
        assert_eq!(user.username, "alice");
        assert_eq!(state.sessions.validate(&token).unwrap(), user.id);
    }

    #[tokio::test]
    async fn duplicate_username_and_email_rejected() {
        let state = state();
        register(&state, registration("alice", "a@x.com")).await.unwrap();

        let err = register(&state, registration("alice", "other@x.com"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Username already exists");

        let err = register(&state, registration("alicia", "a@x.com"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Email already exists");
    }

    #[tokio::test]
    async fn registration_input_is_validated() {
        let state = state();
        for req in [
            registration("", "a@x.com"),
            registration("alice", "not-an-email"),
            registration(&"x".repeat(MAX_USERNAME_LEN + 1), "a@x.com"),
            RegisterRequest {
                password: String::new(),
                ..registration("alice", "a@x.com")
            },
        ] {
            assert!(matches!(
                register(&state, req).await,
                Err(ActionError::Validation(_))
            ));
        }
    }

    #[tokio::test]
    async fn login_checks_the_password() {
        let state = state();
        register_user(&state, "alice").await;

        let ok = login(
            &state,
            LoginRequest {
                username: "alice".into(),
                password: "alice-pw".into(),
            },
        )
        .await;
        assert!(matches!(ok, Ok(Reply::Auth { .. })));

        let wrong = login(
            &state,
            LoginRequest {
                username: "alice".into(),
                password: "nope".into(),
            },
        )
        .await
        .unwrap_err();
        assert_eq!(wrong.to_string(), "Invalid username or password");
    }

    #[tokio::test]
    async fn unknown_user_gets_the_same_error() {
        let err = login(
            &state(),
            LoginRequest {
                username: "ghost".into(),
                password: "pw".into(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ActionError::InvalidCredentials));
    }

    #[tokio::test]
    async fn each_login_gets_its_own_token() {
        let state = state();
        let (first, _) = register_user(&state, "alice").await;
        let Reply::Auth { token, .. } = login(
            &state,
            LoginRequest {
                username: "alice".into(),
                password: "alice-pw".into(),
            },
        )
        .await
        .unwrap() else {
            panic!("expected auth reply");
        };
        assert_ne!(first.token, token);
        assert!(state.sessions.validate(&first.token).is_ok());
    }

    #[tokio::test]
    async fn logout_revokes_only_that_token() {
        let state = state();
        let (caller, _) = register_user(&state, "alice").await;
        let token = caller.token.clone();

        logout(&state, caller).await.unwrap();
        assert!(matches!(
            state.sessions.validate(&token),
            Err(ActionError::InvalidSession)
        ));
    }
}
