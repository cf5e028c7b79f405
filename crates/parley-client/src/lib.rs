//! Client side of the Parley protocol.
//!
//! [`ProtocolClient`] holds one connection and performs one action at a time:
//! each call frames a request, waits for the matching response line and
//! returns a typed result. Direct messages can optionally be sealed into a
//! hybrid envelope for the recipient before they leave the process.

pub mod config;
pub mod error;
pub mod session;

pub use config::ClientConfig;
pub use error::ClientError;
pub use session::CachedSession;

use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::Framed;
use tracing::{debug, info};

use parley_crypto::hybrid;
use parley_crypto::{KeyManager, PublicKey};
use parley_gateway::WireCodec;
use parley_types::api::{
    ActionKind, ChannelMemberRequest, ChannelMessageRequest, CreateChannelRequest,
    FindUserRequest, GetChannelMessagesRequest, GetMessagesRequest, GetPublicKeyRequest,
    LoginRequest, RecentMessagesRequest, RegisterRequest, SendMessageRequest, SetPublicKeyRequest,
    DEFAULT_LIMIT,
};
use parley_types::models::{Channel, Message, User};
use parley_types::wire::{WireRequest, WireResponse};

/// The socket plus whether a reply is still in flight for a request whose
/// caller stopped waiting.
struct Connection {
    framed: Framed<TcpStream, WireCodec<WireResponse>>,
    owed: bool,
}

impl Connection {
    async fn next_response(&mut self) -> Result<WireResponse, ClientError> {
        match self.framed.next().await {
            Some(frame) => frame?.map_err(ClientError::protocol),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "server closed the connection",
            )
            .into()),
        }
    }
}

pub struct ProtocolClient {
    conn: tokio::sync::Mutex<Connection>,
    session: Mutex<Option<CachedSession>>,
    keys: Option<Arc<KeyManager>>,
    /// Recipient public keys, by user id.
    public_keys: DashMap<String, PublicKey>,
}

impl ProtocolClient {
    pub async fn connect(config: &ClientConfig) -> Result<Self, ClientError> {
        Self::connect_to(config.addr(), config.max_frame_bytes).await
    }

    pub async fn connect_to(
        addr: impl ToSocketAddrs,
        max_frame_bytes: usize,
    ) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        info!("Connected to {}", stream.peer_addr()?);
        let framed = Framed::new(stream, WireCodec::new(max_frame_bytes));
        Ok(Self {
            conn: tokio::sync::Mutex::new(Connection {
                framed,
                owed: false,
            }),
            session: Mutex::new(None),
            keys: None,
            public_keys: DashMap::new(),
        })
    }

    /// Attach this identity's keypair, needed to open encrypted messages.
    pub fn with_keys(mut self, keys: Arc<KeyManager>) -> Self {
        self.keys = Some(keys);
        self
    }

    // -- Session --

    /// The current login, suitable for [`CachedSession::save`].
    pub fn session(&self) -> Option<CachedSession> {
        self.lock_session().clone()
    }

    pub fn current_user(&self) -> Option<User> {
        self.lock_session().as_ref().map(|s| s.user.clone())
    }

    /// Reuse a cached login. The server still has the final say on the token.
    pub fn resume(&self, cached: CachedSession) -> Result<(), ClientError> {
        if cached.is_stale() {
            return Err(ClientError::NotAuthenticated);
        }
        *self.lock_session() = Some(cached);
        Ok(())
    }

    fn lock_session(&self) -> std::sync::MutexGuard<'_, Option<CachedSession>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn token(&self) -> Result<String, ClientError> {
        self.lock_session()
            .as_ref()
            .map(|s| s.token.clone())
            .ok_or(ClientError::NotAuthenticated)
    }

    // -- Transport --

    /// Send one request and wait for its response. Requests on one client
    /// are serialized, so responses always pair with their request, even
    /// when an earlier call was dropped mid-flight.
    pub async fn request(&self, request: WireRequest) -> Result<WireResponse, ClientError> {
        let mut conn = self.conn.lock().await;
        if conn.owed {
            let stale = conn.next_response().await;
            debug!("Discarded reply to an abandoned request: ok={}", stale.is_ok());
            conn.owed = false;
        }

        // Once fed, the frame goes out with the next flush even if this
        // future is dropped, so the reply is owed from here on.
        conn.framed.feed(&request).await?;
        conn.owed = true;
        SinkExt::<&WireRequest>::flush(&mut conn.framed).await?;

        let response = conn.next_response().await?;
        conn.owed = false;
        drop(conn);

        if !response.success {
            let reason = response
                .error
                .unwrap_or_else(|| "request failed".to_string());
            debug!("{} rejected: {}", request.action, reason);
            return Err(ClientError::Rejected(reason));
        }
        Ok(response)
    }

    async fn call<P: Serialize>(
        &self,
        kind: ActionKind,
        payload: Option<&P>,
    ) -> Result<WireResponse, ClientError> {
        let mut request = WireRequest::new(kind);
        if kind.requires_auth() {
            request = request.with_token(self.token()?);
        }
        if let Some(payload) = payload {
            request = request.with_data(payload).map_err(ClientError::protocol)?;
        }

        let response = self.request(request).await;
        if matches!(&response, Err(ClientError::Rejected(msg)) if msg == "Invalid session") {
            *self.lock_session() = None;
        } else if response.is_ok() && kind.requires_auth() {
            if let Some(session) = self.lock_session().as_mut() {
                session.touch();
            }
        }
        response
    }

    async fn call_for<P: Serialize, T: DeserializeOwned>(
        &self,
        kind: ActionKind,
        payload: &P,
        field: &str,
    ) -> Result<T, ClientError> {
        let mut response = self.call(kind, Some(payload)).await?;
        take(&mut response, field)
    }

    // -- Auth --

    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<User, ClientError> {
        let req = RegisterRequest {
            username: username.into(),
            email: email.into(),
            password: password.into(),
        };
        let response = self.call(ActionKind::Register, Some(&req)).await?;
        self.start_session(response)
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<User, ClientError> {
        let req = LoginRequest {
            username: username.into(),
            password: password.into(),
        };
        let response = self.call(ActionKind::Login, Some(&req)).await?;
        self.start_session(response)
    }

    fn start_session(&self, mut response: WireResponse) -> Result<User, ClientError> {
        let token: String = take(&mut response, "token")?;
        let user: User = take(&mut response, "user")?;
        info!("Logged in as {}", user.username);
        *self.lock_session() = Some(CachedSession::new(token, user.clone()));
        Ok(user)
    }

    pub async fn logout(&self) -> Result<(), ClientError> {
        self.call::<()>(ActionKind::Logout, None).await?;
        *self.lock_session() = None;
        Ok(())
    }

    // -- Messages --

    pub async fn send_message(&self, to: &str, content: &str) -> Result<Message, ClientError> {
        self.send_direct(to, content.to_string(), false).await
    }

    /// Seal `plaintext` for `to` and send it. The server only sees the envelope.
    pub async fn send_encrypted_message(
        &self,
        to: &str,
        plaintext: &str,
    ) -> Result<Message, ClientError> {
        let recipient = self.get_public_key(to).await?;
        let envelope = hybrid::seal_text(plaintext, &recipient)?;
        self.send_direct(to, envelope, true).await
    }

    async fn send_direct(
        &self,
        to: &str,
        content: String,
        encrypted: bool,
    ) -> Result<Message, ClientError> {
        let req = SendMessageRequest {
            to: to.into(),
            content,
            encrypted,
        };
        self.call_for(ActionKind::SendMessage, &req, "message").await
    }

    /// Readable text of `message`, opening the envelope when it is encrypted.
    pub fn decrypt_message(&self, message: &Message) -> Result<String, ClientError> {
        if !message.encrypted {
            return Ok(message.content.clone());
        }
        let keys = self.keys.as_deref().ok_or(ClientError::Crypto(
            parley_crypto::CryptoError::DecryptionFailed,
        ))?;
        Ok(hybrid::open_text(&message.content, keys)?)
    }

    pub async fn send_channel_message(
        &self,
        channel_id: &str,
        content: &str,
    ) -> Result<Message, ClientError> {
        let req = ChannelMessageRequest {
            channel_id: channel_id.into(),
            content: content.into(),
            encrypted: false,
        };
        self.call_for(ActionKind::SendChannelMessage, &req, "message")
            .await
    }

    pub async fn get_messages(
        &self,
        other_user_id: &str,
        limit: Option<u32>,
    ) -> Result<Vec<Message>, ClientError> {
        let req = GetMessagesRequest {
            other_user_id: other_user_id.into(),
            limit: limit.unwrap_or(DEFAULT_LIMIT),
        };
        self.call_for(ActionKind::GetMessages, &req, "messages").await
    }

    pub async fn get_channel_messages(
        &self,
        channel_id: &str,
        limit: Option<u32>,
    ) -> Result<Vec<Message>, ClientError> {
        let req = GetChannelMessagesRequest {
            channel_id: channel_id.into(),
            limit: limit.unwrap_or(DEFAULT_LIMIT),
        };
        self.call_for(ActionKind::GetChannelMessages, &req, "messages")
            .await
    }

    pub async fn get_recent_messages(
        &self,
        limit: Option<u32>,
    ) -> Result<Vec<Message>, ClientError> {
        let req = RecentMessagesRequest {
            limit: limit.unwrap_or(DEFAULT_LIMIT),
        };
        self.call_for(ActionKind::GetRecentMessages, &req, "messages")
            .await
    }

    // -- Channels --

    pub async fn create_channel(
        &self,
        name: &str,
        description: &str,
        members: &[String],
    ) -> Result<Channel, ClientError> {
        let req = CreateChannelRequest {
            name: name.into(),
            description: description.into(),
            members: members.to_vec(),
        };
        self.call_for(ActionKind::CreateChannel, &req, "channel").await
    }

    pub async fn get_user_channels(&self) -> Result<Vec<Channel>, ClientError> {
        let mut response = self.call::<()>(ActionKind::GetUserChannels, None).await?;
        take(&mut response, "channels")
    }

    pub async fn add_user_to_channel(
        &self,
        channel_id: &str,
        user_id: &str,
    ) -> Result<(), ClientError> {
        let req = ChannelMemberRequest {
            channel_id: channel_id.into(),
            user_id: user_id.into(),
        };
        self.call(ActionKind::AddUserToChannel, Some(&req)).await?;
        Ok(())
    }

    pub async fn remove_user_from_channel(
        &self,
        channel_id: &str,
        user_id: &str,
    ) -> Result<(), ClientError> {
        let req = ChannelMemberRequest {
            channel_id: channel_id.into(),
            user_id: user_id.into(),
        };
        self.call(ActionKind::RemoveUserFromChannel, Some(&req))
            .await?;
        Ok(())
    }

    // -- Keys & directory --

    /// Upload this client's public key so others can send it encrypted messages.
    pub async fn publish_public_key(&self) -> Result<(), ClientError> {
        let keys = self.keys.as_deref().ok_or(ClientError::Crypto(
            parley_crypto::CryptoError::InvalidKey,
        ))?;
        let req = SetPublicKeyRequest {
            public_key: keys.public_key_pem()?,
        };
        self.call(ActionKind::SetPublicKey, Some(&req)).await?;
        Ok(())
    }

    /// Fetch (and cache) another user's public key.
    pub async fn get_public_key(&self, user_id: &str) -> Result<PublicKey, ClientError> {
        if let Some(key) = self.public_keys.get(user_id) {
            return Ok(key.clone());
        }
        let req = GetPublicKeyRequest {
            user_id: user_id.into(),
        };
        let pem: String = self
            .call_for(ActionKind::GetPublicKey, &req, "public_key")
            .await?;
        let key = PublicKey::from_pem(&pem)?;
        self.public_keys.insert(user_id.to_string(), key.clone());
        Ok(key)
    }

    pub async fn find_user(&self, username: &str) -> Result<User, ClientError> {
        let req = FindUserRequest {
            username: username.into(),
        };
        self.call_for(ActionKind::FindUser, &req, "user").await
    }
}

fn take<T: DeserializeOwned>(response: &mut WireResponse, field: &str) -> Result<T, ClientError> {
    response
        .take(field)
        .map_err(|e| ClientError::Protocol(format!("field `{}`: {}", field, e)))
}
