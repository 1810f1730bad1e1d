//! JSON framing for everything that crosses the channel.
//!
//! A chat message travels as the bare message object; receipts are wrapped
//! in a `{"receipt": {...}}` envelope so peers that only understand messages
//! reject them as malformed instead of misreading them.

use serde::{Deserialize, Serialize};

use crate::error::{ChatError, Result};

use super::types::{Message, Receipt};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Frame {
    Message(Message),
    Receipt(ReceiptEnvelope),
}

/// `{"receipt": {...}}` and nothing else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReceiptEnvelope {
    pub receipt: Receipt,
}

impl From<Message> for Frame {
    fn from(message: Message) -> Self {
        Frame::Message(message)
    }
}

impl From<Receipt> for Frame {
    fn from(receipt: Receipt) -> Self {
        Frame::Receipt(ReceiptEnvelope { receipt })
    }
}

pub fn encode(frame: &Frame) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(frame)?)
}

pub fn encode_message(message: &Message) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(message)?)
}

/// Strictly decodes a payload: it must parse as a frame and carry the
/// identifying fields a message or receipt cannot do without.
pub fn decode(payload: &[u8]) -> Result<Frame> {
    let frame: Frame = serde_json::from_slice(payload)
        .map_err(|err| ChatError::MalformedPayload(err.to_string()))?;
    validate(&frame)?;
    Ok(frame)
}

pub fn decode_message(payload: &[u8]) -> Result<Message> {
    match decode(payload)? {
        Frame::Message(message) => Ok(message),
        Frame::Receipt(_) => Err(ChatError::MalformedPayload(
            "expected a message, found a receipt".to_string(),
        )),
    }
}

fn validate(frame: &Frame) -> Result<()> {
    match frame {
        Frame::Message(message) => {
            require_non_empty("id", message.id().as_str())?;
            require_non_empty("senderId", message.sender_id())?;
            require_non_empty("conversationId", message.conversation_id())?;
            if message.timestamp() < 0 {
                return Err(ChatError::MalformedPayload(format!(
                    "negative timestamp {}",
                    message.timestamp()
                )));
            }
        }
        Frame::Receipt(ReceiptEnvelope { receipt }) => {
            require_non_empty("messageId", receipt.message_id.as_str())?;
            require_non_empty("conversationId", &receipt.conversation_id)?;
        }
    }
    Ok(())
}

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ChatError::MalformedPayload(format!("`{field}` is empty")));
    }
    Ok(())
}
