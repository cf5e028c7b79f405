use tracing::{debug, error, warn};

use parley_api::session::Caller;
use parley_api::{AppState, auth, blocking, channels, keys, messages, users};
use parley_types::api::{Action, ActionKind, Reply};
use parley_types::error::{ActionError, ErrorKind};
use parley_types::wire::{WireRequest, WireResponse};

/// Resolves one request to its handler. Stateless per call; sessions and
/// storage live in [`AppState`].
#[derive(Clone)]
pub struct ActionDispatcher {
    state: AppState,
}

impl ActionDispatcher {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Always produces a response; failures become `{success: false, error}`.
    pub async fn dispatch(&self, request: WireRequest) -> WireResponse {
        let action = request.action.clone();

        let outcome = self
            .try_dispatch(request)
            .await
            .and_then(|reply| WireResponse::ok(reply).map_err(|e| ActionError::Internal(e.into())));

        match outcome {
            Ok(response) => {
                debug!("{} ok", action);
                response
            }
            Err(err) => {
                match err.kind() {
                    ErrorKind::Internal => error!("{} failed: {}", action, internal_detail(&err)),
                    ErrorKind::Protocol => warn!("{} rejected: {:?}", action, err),
                    _ => debug!("{} rejected: {}", action, err),
                }
                WireResponse::failure(&err)
            }
        }
    }

    async fn try_dispatch(&self, mut request: WireRequest) -> Result<Reply, ActionError> {
        let kind: ActionKind = request.action.parse()?;

        // Authenticate before touching the payload so unauthenticated
        // requests never reach a handler.
        let caller = if kind.requires_auth() {
            Some(self.authenticate(request.token.take()).await?)
        } else {
            None
        };

        let action = Action::decode(kind, request.payload()?)?;
        self.run(action, caller).await
    }

    async fn authenticate(&self, token: Option<String>) -> Result<Caller, ActionError> {
        let token = token
            .filter(|t| !t.is_empty())
            .ok_or(ActionError::AuthenticationRequired)?;

        let lookup = token.clone();
        let user_id = blocking(&self.state, move |s| s.sessions.validate(&lookup)).await?;
        Ok(Caller { user_id, token })
    }

    async fn run(&self, action: Action, caller: Option<Caller>) -> Result<Reply, ActionError> {
        let state = &self.state;
        match action {
            Action::Register(req) => auth::register(state, req).await,
            Action::Login(req) => auth::login(state, req).await,
            Action::Logout => auth::logout(state, required(caller)?).await,
            Action::SendMessage(req) => messages::send_message(state, required(caller)?, req).await,
            Action::SendChannelMessage(req) => {
                messages::send_channel_message(state, required(caller)?, req).await
            }
            Action::GetMessages(req) => messages::get_messages(state, required(caller)?, req).await,
            Action::GetChannelMessages(req) => {
                messages::get_channel_messages(state, required(caller)?, req).await
            }
            Action::GetRecentMessages(req) => {
                messages::get_recent_messages(state, required(caller)?, req).await
            }
            Action::CreateChannel(req) => {
                channels::create_channel(state, required(caller)?, req).await
            }
            Action::GetUserChannels => channels::get_user_channels(state, required(caller)?).await,
            Action::AddUserToChannel(req) => {
                channels::add_user_to_channel(state, required(caller)?, req).await
            }
            Action::RemoveUserFromChannel(req) => {
                channels::remove_user_from_channel(state, required(caller)?, req).await
            }
            Action::SetPublicKey(req) => keys::set_public_key(state, required(caller)?, req).await,
            Action::GetPublicKey(req) => keys::get_public_key(state, required(caller)?, req).await,
            Action::FindUser(req) => users::find_user(state, required(caller)?, req).await,
        }
    }
}

fn required(caller: Option<Caller>) -> Result<Caller, ActionError> {
    caller.ok_or(ActionError::AuthenticationRequired)
}

fn internal_detail(err: &ActionError) -> String {
    match err {
        ActionError::Internal(source) => format!("{:#}", source),
        other => other.to_string(),
    }
}
