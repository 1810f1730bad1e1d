//! A conversation's channel session: `Idle -> Connecting -> Open -> Closed`.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::common::codec::{self, Frame};
use crate::common::{Message, Receipt};
use crate::config::ChannelConfig;
use crate::error::{ChatError, Result};

use super::pipe::Connector;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Connecting,
    Open,
    Closed,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ChannelState::Idle => "idle",
            ChannelState::Connecting => "connecting",
            ChannelState::Open => "open",
            ChannelState::Closed => "closed",
        };
        f.write_str(label)
    }
}

/// Exclusive owner of one conversation's data pipe.
pub struct ChannelSession {
    label: String,
    state: Arc<watch::Sender<ChannelState>>,
    outbound: Option<mpsc::Sender<Vec<u8>>>,
    inbound: Option<mpsc::Receiver<Vec<u8>>>,
    receive_task: Option<JoinHandle<()>>,
}

impl ChannelSession {
    pub fn new(label: impl Into<String>) -> Self {
        let (state, _) = watch::channel(ChannelState::Idle);
        Self {
            label: label.into(),
            state: Arc::new(state),
            outbound: None,
            inbound: None,
            receive_task: None,
        }
    }

    /// Negotiates a pipe through `connector` and returns an open session.
    pub async fn open<C: Connector>(connector: &C, config: &ChannelConfig) -> Result<Self> {
        let mut session = Self::new(config.label.clone());
        session.connect(connector, config).await?;
        Ok(session)
    }

    /// Drives an idle session through negotiation, bounded by
    /// `config.negotiation_timeout`. Any failure leaves the session closed.
    pub async fn connect<C: Connector>(
        &mut self,
        connector: &C,
        config: &ChannelConfig,
    ) -> Result<()> {
        let current = self.state();
        if current != ChannelState::Idle {
            return Err(ChatError::Connection(format!(
                "channel `{}` cannot connect from state {current}",
                self.label
            )));
        }

        self.set_state(ChannelState::Connecting);
        log::info!(
            "Negotiating channel `{}` ({} discovery servers)",
            self.label,
            config.discovery_servers.len()
        );

        let outcome = tokio::time::timeout(config.negotiation_timeout, connector.connect(config)).await;
        match outcome {
            Ok(Ok(pipe)) => {
                self.outbound = Some(pipe.outbound);
                self.inbound = Some(pipe.inbound);
                self.set_state(ChannelState::Open);
                log::info!("Channel `{}` open", self.label);
                Ok(())
            }
            Ok(Err(err)) => {
                self.set_state(ChannelState::Closed);
                log::warn!("Channel `{}` negotiation failed: {err}", self.label);
                Err(match err {
                    ChatError::Connection(_) => err,
                    other => ChatError::Connection(other.to_string()),
                })
            }
            Err(_) => {
                self.set_state(ChannelState::Closed);
                log::warn!(
                    "Channel `{}` negotiation timed out after {:?}",
                    self.label,
                    config.negotiation_timeout
                );
                Err(ChatError::Connection(format!(
                    "negotiation timed out after {:?}",
                    config.negotiation_timeout
                )))
            }
        }
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    /// A cloneable write handle, usable from spawned tasks.
    pub fn sender(&self) -> ChannelSender {
        ChannelSender {
            outbound: self.outbound.clone(),
            state: self.state.subscribe(),
        }
    }

    pub async fn send(&self, message: &Message) -> Result<()> {
        self.sender().send(message).await
    }

    /// Registers the callback invoked once per inbound payload, in arrival
    /// order. The pipe ending closes the session.
    pub fn on_receive<F>(&mut self, mut handler: F) -> Result<()>
    where
        F: FnMut(Vec<u8>) + Send + 'static,
    {
        let Some(mut inbound) = self.inbound.take() else {
            return Err(match self.state() {
                ChannelState::Open => ChatError::HandlerAlreadyRegistered,
                _ => ChatError::ChannelNotOpen,
            });
        };

        let state = Arc::clone(&self.state);
        let label = self.label.clone();
        self.receive_task = Some(tokio::spawn(async move {
            while let Some(payload) = inbound.recv().await {
                handler(payload);
            }
            let closed_now = state.send_if_modified(|current| {
                if *current == ChannelState::Closed {
                    false
                } else {
                    *current = ChannelState::Closed;
                    true
                }
            });
            if closed_now {
                log::warn!("Channel `{label}` pipe ended; session closed");
            }
        }));
        Ok(())
    }

    /// Releases the pipe. Safe to call any number of times.
    pub fn close(&mut self) {
        if self.state() == ChannelState::Closed && self.outbound.is_none() {
            log::debug!("Channel `{}` already closed", self.label);
            return;
        }
        self.set_state(ChannelState::Closed);
        self.outbound = None;
        self.inbound = None;
        if let Some(task) = self.receive_task.take() {
            task.abort();
        }
        log::info!("Channel `{}` closed", self.label);
    }

    fn set_state(&self, next: ChannelState) {
        self.state.send_replace(next);
    }
}

impl Drop for ChannelSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for ChannelSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSession")
            .field("label", &self.label)
            .field("state", &self.state())
            .finish()
    }
}

/// Write half of a session.
///
/// Refuses to write once the owning session leaves `Open`, even while
/// clones of the underlying sender are still alive.
#[derive(Debug, Clone)]
pub struct ChannelSender {
    outbound: Option<mpsc::Sender<Vec<u8>>>,
    state: watch::Receiver<ChannelState>,
}

impl ChannelSender {
    pub async fn send(&self, message: &Message) -> Result<()> {
        self.ensure_open()?;
        let payload = codec::encode_message(message)?;
        self.write(payload).await
    }

    pub async fn send_receipt(&self, receipt: Receipt) -> Result<()> {
        self.ensure_open()?;
        let payload = codec::encode(&Frame::from(receipt))?;
        self.write(payload).await
    }

    pub fn is_open(&self) -> bool {
        self.outbound.is_some() && *self.state.borrow() == ChannelState::Open
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(ChatError::ChannelNotOpen)
        }
    }

    async fn write(&self, payload: Vec<u8>) -> Result<()> {
        let outbound = self.outbound.as_ref().ok_or(ChatError::ChannelNotOpen)?;
        outbound
            .send(payload)
            .await
            .map_err(|_| ChatError::ChannelNotOpen)
    }
}

#[cfg(test)]
mod tests {
    use std::future;
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::common::{MessageId, MessageStatus};
    use crate::network::memory;
    use crate::network::pipe::Pipe;

    struct NeverConnects;

    impl Connector for NeverConnects {
        async fn connect(&self, _config: &ChannelConfig) -> Result<Pipe> {
            future::pending().await
        }
    }

    struct Refuses;

    impl Connector for Refuses {
        async fn connect(&self, _config: &ChannelConfig) -> Result<Pipe> {
            Err(ChatError::Connection("no route".to_string()))
        }
    }

    fn config() -> ChannelConfig {
        let mut config = ChannelConfig::new("conv1");
        config.negotiation_timeout = Duration::from_millis(200);
        config
    }

    fn message(id: &str) -> Message {
        Message::new(
            MessageId::from(id),
            "hi",
            1,
            "student-1",
            "conv1",
            MessageStatus::Sent,
        )
    }

    #[tokio::test]
    async fn open_reaches_open_state() {
        let (local, _remote) = memory::pair(8);
        let session = ChannelSession::open(&local, &config()).await.unwrap();
        assert_eq!(session.state(), ChannelState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn negotiation_times_out() {
        let err = ChannelSession::open(&NeverConnects, &config())
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Connection(_)));
    }

    #[tokio::test]
    async fn refused_negotiation_closes_session() {
        let mut session = ChannelSession::new("conv1");
        let err = session.connect(&Refuses, &config()).await.unwrap_err();
        assert!(matches!(err, ChatError::Connection(_)));
        assert_eq!(session.state(), ChannelState::Closed);
    }

    #[tokio::test]
    async fn send_before_open_is_rejected() {
        let session = ChannelSession::new("conv1");
        let err = session.send(&message("m1")).await.unwrap_err();
        assert!(matches!(err, ChatError::ChannelNotOpen));
    }

    #[tokio::test]
    async fn payloads_arrive_in_order() {
        let (a, b) = memory::pair(8);
        let sender = ChannelSession::open(&a, &config()).await.unwrap();
        let mut receiver = ChannelSession::open(&b, &config()).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        receiver
            .on_receive(move |payload| {
                let _ = tx.send(payload);
            })
            .unwrap();

        sender.send(&message("m1")).await.unwrap();
        sender.send(&message("m2")).await.unwrap();

        let first = codec::decode_message(&rx.recv().await.unwrap()).unwrap();
        let second = codec::decode_message(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(first.id().as_str(), "m1");
        assert_eq!(second.id().as_str(), "m2");
    }

    #[tokio::test]
    async fn second_handler_is_refused() {
        let (a, _b) = memory::pair(8);
        let mut session = ChannelSession::open(&a, &config()).await.unwrap();
        session.on_receive(|_| {}).unwrap();
        let err = session.on_receive(|_| {}).unwrap_err();
        assert!(matches!(err, ChatError::HandlerAlreadyRegistered));
    }

    #[tokio::test]
    async fn close_twice_is_noop() {
        let (a, _b) = memory::pair(8);
        let mut session = ChannelSession::open(&a, &config()).await.unwrap();
        session.close();
        session.close();
        assert_eq!(session.state(), ChannelState::Closed);

        let err = session.send(&message("m1")).await.unwrap_err();
        assert!(matches!(err, ChatError::ChannelNotOpen));
    }

    #[tokio::test]
    async fn sender_clone_stops_after_close() {
        let (a, _b) = memory::pair(8);
        let mut session = ChannelSession::open(&a, &config()).await.unwrap();
        let sender = session.sender();
        session.close();
        assert!(!sender.is_open());
        assert!(matches!(
            sender.send(&message("m1")).await,
            Err(ChatError::ChannelNotOpen)
        ));
    }

    #[tokio::test]
    async fn remote_close_closes_local_session() {
        let (a, b) = memory::pair(8);
        let mut local = ChannelSession::open(&a, &config()).await.unwrap();
        let mut remote = ChannelSession::open(&b, &config()).await.unwrap();

        let seen = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&seen);
        local
            .on_receive(move |_| *counter.lock().unwrap() += 1)
            .unwrap();
        let mut state = local.watch_state();

        remote.close();
        state
            .wait_for(|s| *s == ChannelState::Closed)
            .await
            .unwrap();
        assert_eq!(local.state(), ChannelState::Closed);
        assert_eq!(*seen.lock().unwrap(), 0);
    }
}
