use tracing::info;

use parley_crypto::PublicKey;
use parley_types::api::{GetPublicKeyRequest, Reply, SetPublicKeyRequest};
use parley_types::error::ActionError;

use crate::session::Caller;
use crate::{AppState, blocking};

/// Attach the caller's RSA public key. Only well-formed keys of at least
/// 2048 bits are accepted; the normalized SPKI PEM is what gets stored.
pub async fn set_public_key(
    state: &AppState,
    caller: Caller,
    req: SetPublicKeyRequest,
) -> Result<Reply, ActionError> {
    let pem = PublicKey::from_pem(&req.public_key)
        .and_then(|key| key.to_pem())
        .map_err(|_| ActionError::InvalidPublicKey)?;

    let user_id = caller.user_id;
    blocking(state, move |s| {
        if !s.db.set_user_public_key(&user_id, &pem)? {
            return Err(ActionError::NotFound("User"));
        }
        info!("Public key updated for user {}", user_id);
        Ok(())
    })
    .await?;

    Ok(Reply::Empty)
}

pub async fn get_public_key(
    state: &AppState,
    _caller: Caller,
    req: GetPublicKeyRequest,
) -> Result<Reply, ActionError> {
    blocking(state, move |s| {
        let public_key = s
            .db
            .get_user_public_key(&req.user_id)?
            .ok_or(ActionError::NotFound("Public key"))?;
        Ok(Reply::PublicKey {
            user_id: req.user_id,
            public_key,
        })
    })
    .await
}
