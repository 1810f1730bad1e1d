//! Delivery status lifecycle: `Sent -> Delivered -> Read`, forward only.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::common::{ConversationEvent, MessageId, MessageStatus};
use crate::error::{ChatError, Result};

/// Outcome of applying a status to a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Advanced {
        from: MessageStatus,
        to: MessageStatus,
    },
    /// The message already had that status.
    Unchanged,
}

/// Checks moving from `current` to `next`.
///
/// Re-applying the current status is a no-op; any backwards move is
/// rejected. Forward moves may skip a stage (a read receipt can arrive
/// before the delivery one).
pub fn transition(current: MessageStatus, next: MessageStatus) -> Result<Transition> {
    if next == current {
        Ok(Transition::Unchanged)
    } else if next > current {
        Ok(Transition::Advanced {
            from: current,
            to: next,
        })
    } else {
        Err(ChatError::InvalidTransition {
            from: current,
            to: next,
        })
    }
}

/// How an outgoing message earns `Delivered`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DeliveryConfirmation {
    /// Assume delivery a fixed delay after the write succeeded.
    LocalTimer { delay_ms: u64 },
    /// Wait for the peer to send back a receipt.
    PeerReceipt,
}

impl Default for DeliveryConfirmation {
    fn default() -> Self {
        DeliveryConfirmation::LocalTimer { delay_ms: 1000 }
    }
}

impl DeliveryConfirmation {
    pub fn local_timer(&self) -> Option<Duration> {
        match self {
            DeliveryConfirmation::LocalTimer { delay_ms } => Some(Duration::from_millis(*delay_ms)),
            DeliveryConfirmation::PeerReceipt => None,
        }
    }

    pub fn uses_receipts(&self) -> bool {
        matches!(self, DeliveryConfirmation::PeerReceipt)
    }
}

/// Posts `DeliveryTimerElapsed` for `message_id` once `delay` has passed.
pub(crate) async fn confirm_after(
    delay: Duration,
    message_id: MessageId,
    events: mpsc::UnboundedSender<ConversationEvent>,
) {
    tokio::time::sleep(delay).await;
    if events
        .send(ConversationEvent::DeliveryTimerElapsed(message_id))
        .is_err()
    {
        log::debug!("Conversation gone before delivery timer fired");
    }
}
