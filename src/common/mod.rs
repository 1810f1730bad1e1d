pub mod codec;
pub mod events;
pub mod types;

pub use codec::Frame;
pub use events::ConversationEvent;
pub use types::{Message, MessageClock, MessageId, MessageStatus, Receipt};
