use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Identifier of a message, unique within its conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn generate() -> Self {
        Self(format!("msg_{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for MessageId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Delivery status as observed by the message's author.
///
/// Variants are declared in lifecycle order so `Ord` matches "further along".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
        }
    }

    fn from_repr(value: u8) -> Self {
        match value {
            0 => MessageStatus::Sent,
            1 => MessageStatus::Delivered,
            _ => MessageStatus::Read,
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status slot that can advance while the message is shared with snapshots.
struct StatusCell(AtomicU8);

impl StatusCell {
    fn new(status: MessageStatus) -> Self {
        Self(AtomicU8::new(status as u8))
    }

    fn get(&self) -> MessageStatus {
        MessageStatus::from_repr(self.0.load(Ordering::Acquire))
    }

    fn set(&self, status: MessageStatus) {
        self.0.store(status as u8, Ordering::Release);
    }
}

impl Clone for StatusCell {
    fn clone(&self) -> Self {
        Self::new(self.get())
    }
}

impl PartialEq for StatusCell {
    fn eq(&self, other: &Self) -> bool {
        self.get() == other.get()
    }
}

impl Eq for StatusCell {}

impl fmt::Debug for StatusCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.get(), f)
    }
}

impl Serialize for StatusCell {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.get().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for StatusCell {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        MessageStatus::deserialize(deserializer).map(Self::new)
    }
}

/// A chat message.
///
/// `id`, `text`, `timestamp` and `sender_id` are fixed at construction; only
/// the status moves, and only through the delivery rules in
/// [`crate::chat::delivery`]. A stored message is shared with every snapshot
/// that contains it, so a status change is visible through all of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Message {
    id: MessageId,
    text: String,
    /// Milliseconds since the Unix epoch.
    timestamp: i64,
    sender_id: String,
    conversation_id: String,
    status: StatusCell,
}

impl Message {
    pub fn new(
        id: MessageId,
        text: impl Into<String>,
        timestamp: i64,
        sender_id: impl Into<String>,
        conversation_id: impl Into<String>,
        status: MessageStatus,
    ) -> Self {
        Self {
            id,
            text: text.into(),
            timestamp,
            sender_id: sender_id.into(),
            conversation_id: conversation_id.into(),
            status: StatusCell::new(status),
        }
    }

    /// A freshly authored local message in the `Sent` state.
    pub fn outgoing(
        text: impl Into<String>,
        timestamp: i64,
        sender_id: impl Into<String>,
        conversation_id: impl Into<String>,
    ) -> Self {
        Self::new(
            MessageId::generate(),
            text,
            timestamp,
            sender_id,
            conversation_id,
            MessageStatus::Sent,
        )
    }

    pub fn id(&self) -> &MessageId {
        &self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn status(&self) -> MessageStatus {
        self.status.get()
    }

    pub fn is_from(&self, sender_id: &str) -> bool {
        self.sender_id == sender_id
    }

    pub(crate) fn set_status(&self, status: MessageStatus) {
        self.status.set(status);
    }
}

/// Acknowledgement that a peer reached `status` for one of our messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Receipt {
    pub message_id: MessageId,
    pub conversation_id: String,
    pub status: MessageStatus,
}

/// Hands out per-sender timestamps that never repeat or go backwards.
#[derive(Debug, Default)]
pub struct MessageClock {
    last: i64,
}

impl MessageClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self) -> i64 {
        self.observe(Utc::now().timestamp_millis())
    }

    fn observe(&mut self, now: i64) -> i64 {
        self.last = now.max(self.last + 1);
        self.last
    }
}
