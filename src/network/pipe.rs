use std::future::Future;

use tokio::sync::{mpsc, oneshot};

use crate::config::ChannelConfig;
use crate::error::Result;

/// Both ends of a negotiated data pipe, as seen by the local side.
///
/// Dropping `outbound` tells the far side we are done; `inbound` yielding
/// `None` means the far side or the transport went away.
#[derive(Debug)]
pub struct Pipe {
    pub outbound: mpsc::Sender<Vec<u8>>,
    pub inbound: mpsc::Receiver<Vec<u8>>,
    /// Payloads the link accepted from `outbound` but never put on the wire,
    /// handed back in write order once the link has ended.
    pub unsent: Option<oneshot::Receiver<Vec<Vec<u8>>>>,
}

impl Pipe {
    pub fn new(outbound: mpsc::Sender<Vec<u8>>, inbound: mpsc::Receiver<Vec<u8>>) -> Self {
        Self {
            outbound,
            inbound,
            unsent: None,
        }
    }

    pub fn with_unsent(mut self, unsent: oneshot::Receiver<Vec<Vec<u8>>>) -> Self {
        self.unsent = Some(unsent);
        self
    }
}

/// Negotiates a [`Pipe`] for one conversation.
pub trait Connector: Send + Sync {
    fn connect(&self, config: &ChannelConfig) -> impl Future<Output = Result<Pipe>> + Send;
}
