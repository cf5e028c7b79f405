//! Typed business errors for action handling.
//!
//! Internal logic matches on [`ActionError`] variants; the wire only ever sees
//! the `Display` text, so storage and crypto details stay server-side.

use thiserror::Error;

/// Coarse classification used by callers deciding whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or unknown action / payload. Fatal to the exchange only.
    Protocol,
    /// Missing, invalid or expired session.
    Authentication,
    /// Business-rule rejection (duplicates, membership, bad input).
    Validation,
    /// Key parsing or decryption failure.
    Crypto,
    /// Storage or other server-side failure.
    Internal,
}

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("Unknown action")]
    UnknownAction,

    /// The detail is for server logs; the wire text stays generic.
    #[error("Invalid request format")]
    InvalidRequest(String),

    #[error("Authentication required")]
    AuthenticationRequired,

    #[error("Invalid session")]
    InvalidSession,

    /// Deliberately identical for unknown usernames and wrong passwords.
    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Username already exists")]
    UsernameTaken,

    #[error("Email already exists")]
    EmailTaken,

    #[error("user is not a member of this channel")]
    NotChannelMember,

    #[error("user is already a member of this channel")]
    AlreadyChannelMember,

    #[error("the channel creator cannot be removed")]
    CreatorRemoval,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Validation(String),

    #[error("Invalid public key")]
    InvalidPublicKey,

    #[error("Internal server error")]
    Internal(#[source] anyhow::Error),
}

impl ActionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownAction | Self::InvalidRequest(_) => ErrorKind::Protocol,
            Self::AuthenticationRequired | Self::InvalidSession | Self::InvalidCredentials => {
                ErrorKind::Authentication
            }
            Self::UsernameTaken
            | Self::EmailTaken
            | Self::NotChannelMember
            | Self::AlreadyChannelMember
            | Self::CreatorRemoval
            | Self::NotFound(_)
            | Self::Validation(_) => ErrorKind::Validation,
            Self::InvalidPublicKey => ErrorKind::Crypto,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Only server-side failures are worth retrying unchanged.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Internal
    }

    pub fn invalid_request(detail: impl std::fmt::Display) -> Self {
        Self::InvalidRequest(detail.to_string())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

impl From<anyhow::Error> for ActionError {
    fn from(e: anyhow::Error) -> Self {
        Self::Internal(e)
    }
}
