//! In-process pipes: two connectors whose pipes are wired to each other.
//!
//! Used for local mode and tests; negotiation is instant.

use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc;

use crate::config::ChannelConfig;
use crate::error::{ChatError, Result};

use super::pipe::{Connector, Pipe};

pub struct MemoryConnector {
    pipe: Mutex<Option<Pipe>>,
}

impl MemoryConnector {
    fn new(pipe: Pipe) -> Self {
        Self {
            pipe: Mutex::new(Some(pipe)),
        }
    }
}

/// Builds two connectors; whatever one side writes, the other reads.
pub fn pair(capacity: usize) -> (MemoryConnector, MemoryConnector) {
    let (a_tx, b_rx) = mpsc::channel(capacity.max(1));
    let (b_tx, a_rx) = mpsc::channel(capacity.max(1));
    (
        MemoryConnector::new(Pipe::new(a_tx, a_rx)),
        MemoryConnector::new(Pipe::new(b_tx, b_rx)),
    )
}

impl Connector for MemoryConnector {
    async fn connect(&self, config: &ChannelConfig) -> Result<Pipe> {
        let pipe = self
            .pipe
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        pipe.ok_or_else(|| {
            ChatError::Connection(format!(
                "in-memory pipe for `{}` was already claimed",
                config.label
            ))
        })
    }
}
