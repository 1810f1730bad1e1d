use crate::error::ChatError;

use super::types::MessageId;

/// Work queued for a conversation's single writer.
///
/// Channel callbacks and background send tasks never touch the store
/// directly; they post one of these and the view model applies it.
#[derive(Debug)]
pub enum ConversationEvent {
    /// Raw payload read from the channel.
    Inbound(Vec<u8>),
    /// Local stand-in for a delivery acknowledgement fired.
    DeliveryTimerElapsed(MessageId),
    /// Forwarding an outgoing message failed.
    SendFailed {
        message_id: MessageId,
        error: ChatError,
    },
}
