pub mod behavior;
pub mod client;
pub mod memory;
pub mod pipe;
pub mod session;
pub mod supervisor;
pub mod transport;

pub use client::GossipConnector;
pub use memory::MemoryConnector;
pub use pipe::{Connector, Pipe};
pub use session::{ChannelSender, ChannelSession, ChannelState};
pub use supervisor::{BackoffPolicy, SupervisedConnector};
