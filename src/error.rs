//! Error types shared by every layer of the chat core.

use thiserror::Error;

use crate::common::MessageStatus;

#[derive(Error, Debug)]
pub enum ChatError {
    /// Channel negotiation failed or timed out.
    #[error("connection error: {0}")]
    Connection(String),

    /// A write was attempted while the channel is not open.
    #[error("channel is not open")]
    ChannelNotOpen,

    /// An outgoing frame could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An inbound payload was not a well-formed frame.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// A delivery status tried to move backwards.
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: MessageStatus,
        to: MessageStatus,
    },

    /// Outgoing text was empty after trimming.
    #[error("message text is empty")]
    EmptyInput,

    #[error("a receive handler is already registered")]
    HandlerAlreadyRegistered,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("session error: {0}")]
    Session(String),

    #[error("IO error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, ChatError>;

impl From<std::io::Error> for ChatError {
    fn from(err: std::io::Error) -> Self {
        ChatError::Io(err.to_string())
    }
}
