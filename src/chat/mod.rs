pub mod conversation;
pub mod delivery;
pub mod screening;
pub mod store;
pub mod summary;

pub use conversation::{Conversation, ConversationUpdate, ConversationViewModel};
pub use delivery::{DeliveryConfirmation, Transition};
pub use screening::{Flag, Misconduct, Screener};
pub use store::{MessageStore, Snapshot};
pub use summary::{ConversationSummary, format_relative};
