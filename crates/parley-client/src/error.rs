use thiserror::Error;

use parley_crypto::CryptoError;
use parley_gateway::TransportError;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The connection failed or was closed. Reconnect before retrying.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The server answered with something we could not interpret.
    #[error("unexpected response: {0}")]
    Protocol(String),

    /// The server processed the request and said no.
    #[error("{0}")]
    Rejected(String),

    #[error("not authenticated")]
    NotAuthenticated,

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

impl ClientError {
    pub(crate) fn protocol(detail: impl std::fmt::Display) -> Self {
        Self::Protocol(detail.to_string())
    }

    /// The server's rejection text, if this is a rejection.
    pub fn rejection(&self) -> Option<&str> {
        match self {
            Self::Rejected(msg) => Some(msg),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        Self::Transport(TransportError::Io(e))
    }
}
