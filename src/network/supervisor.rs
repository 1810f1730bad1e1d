//! Keeps a pipe alive across transient link loss.
//!
//! [`SupervisedConnector`] negotiates the first link like the connector it
//! wraps. After that a background task owns the real link: when it drops,
//! the task reconnects with exponential backoff, queues whatever the session
//! writes in the meantime and replays it in order once the link is back. The
//! session above only ever sees one long-lived pipe.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::config::ChannelConfig;
use crate::error::Result;

use super::pipe::{Connector, Pipe};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
    pub replay_limit: usize,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
            max_attempts: Some(10),
            replay_limit: 256,
        }
    }
}

impl BackoffPolicy {
    /// Wait before reconnect attempt number `attempt` (zero based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }

    fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

pub struct SupervisedConnector<C> {
    inner: Arc<C>,
    policy: BackoffPolicy,
}

impl<C> SupervisedConnector<C>
where
    C: Connector + 'static,
{
    pub fn new(inner: C, policy: BackoffPolicy) -> Self {
        Self {
            inner: Arc::new(inner),
            policy,
        }
    }
}

impl<C> Connector for SupervisedConnector<C>
where
    C: Connector + 'static,
{
    async fn connect(&self, config: &ChannelConfig) -> Result<Pipe> {
        let link = self.inner.connect(config).await?;

        let (outbound, from_session) = mpsc::channel(config.capacity);
        let (to_session, inbound) = mpsc::channel(config.capacity);

        let supervisor = Supervisor {
            inner: Arc::clone(&self.inner),
            config: config.clone(),
            policy: self.policy.clone(),
            from_session,
            to_session,
            backlog: VecDeque::new(),
        };
        tokio::spawn(supervisor.run(link));

        Ok(Pipe::new(outbound, inbound))
    }
}

struct Supervisor<C> {
    inner: Arc<C>,
    config: ChannelConfig,
    policy: BackoffPolicy,
    from_session: mpsc::Receiver<Vec<u8>>,
    to_session: mpsc::Sender<Vec<u8>>,
    backlog: VecDeque<Vec<u8>>,
}

enum LinkEnd {
    Lost,
    SessionGone,
}

impl<C: Connector> Supervisor<C> {
    async fn run(mut self, mut link: Pipe) {
        loop {
            if let LinkEnd::SessionGone = self.relay(&mut link).await {
                log::debug!("Supervisor for `{}` stopping: session closed", self.config.label);
                return;
            }

            log::warn!("Link for `{}` lost; reconnecting", self.config.label);
            self.reclaim(&mut link).await;
            match self.reconnect().await {
                Some(fresh) => link = fresh,
                None => return,
            }
        }
    }

    /// Pumps payloads both ways until the link or the session goes away.
    async fn relay(&mut self, link: &mut Pipe) -> LinkEnd {
        if !self.replay(link).await {
            return LinkEnd::Lost;
        }
        loop {
            tokio::select! {
                payload = self.from_session.recv() => {
                    let Some(payload) = payload else {
                        return LinkEnd::SessionGone;
                    };
                    if let Err(mpsc::error::SendError(payload)) = link.outbound.send(payload).await {
                        self.backlog.push_front(payload);
                        return LinkEnd::Lost;
                    }
                }
                payload = link.inbound.recv() => {
                    let Some(payload) = payload else {
                        return LinkEnd::Lost;
                    };
                    if self.to_session.send(payload).await.is_err() {
                        return LinkEnd::SessionGone;
                    }
                }
            }
        }
    }

    /// Takes back what the lost link accepted but never published. Those
    /// payloads are older than anything already queued.
    async fn reclaim(&mut self, link: &mut Pipe) {
        let Some(unsent) = link.unsent.take() else {
            return;
        };
        let payloads = match tokio::time::timeout(self.config.negotiation_timeout, unsent).await {
            Ok(Ok(payloads)) => payloads,
            _ => return,
        };
        if !payloads.is_empty() {
            log::info!(
                "Recovered {} unpublished payloads on `{}`",
                payloads.len(),
                self.config.label
            );
        }
        for payload in payloads.into_iter().rev() {
            self.backlog.push_front(payload);
        }
        while self.backlog.len() > self.policy.replay_limit {
            self.backlog.pop_front();
        }
    }

    /// Flushes the backlog oldest first. Returns `false` if the link died
    /// part way; the unsent remainder stays queued.
    async fn replay(&mut self, link: &Pipe) -> bool {
        if !self.backlog.is_empty() {
            log::info!(
                "Replaying {} queued payloads on `{}`",
                self.backlog.len(),
                self.config.label
            );
        }
        while let Some(payload) = self.backlog.pop_front() {
            if let Err(mpsc::error::SendError(payload)) = link.outbound.send(payload).await {
                self.backlog.push_front(payload);
                return false;
            }
        }
        true
    }

    /// Retries the inner connector until it succeeds or the policy gives up.
    /// Writes arriving while disconnected are queued.
    async fn reconnect(&mut self) -> Option<Pipe> {
        let mut attempt = 0u32;
        loop {
            if self.policy.exhausted(attempt) {
                log::error!(
                    "Giving up on `{}` after {attempt} reconnect attempts",
                    self.config.label
                );
                return None;
            }

            let delay = self.policy.delay_for(attempt);
            let sleep = tokio::time::sleep(delay);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    payload = self.from_session.recv() => match payload {
                        Some(payload) => self.enqueue(payload),
                        None => return None,
                    },
                    () = &mut sleep => break,
                }
            }

            let outcome =
                tokio::time::timeout(self.config.negotiation_timeout, self.inner.connect(&self.config))
                    .await;
            match outcome {
                Ok(Ok(link)) => {
                    log::info!(
                        "Link for `{}` re-established after {} attempts",
                        self.config.label,
                        attempt + 1
                    );
                    return Some(link);
                }
                Ok(Err(err)) => {
                    log::warn!("Reconnect attempt {} for `{}` failed: {err}", attempt + 1, self.config.label);
                }
                Err(_) => {
                    log::warn!(
                        "Reconnect attempt {} for `{}` timed out",
                        attempt + 1,
                        self.config.label
                    );
                }
            }
            attempt += 1;
        }
    }

    fn enqueue(&mut self, payload: Vec<u8>) {
        if self.policy.replay_limit == 0 {
            log::warn!("Dropping payload for `{}`: replay disabled", self.config.label);
            return;
        }
        if self.backlog.len() >= self.policy.replay_limit {
            self.backlog.pop_front();
            log::warn!(
                "Replay queue for `{}` full; dropped oldest payload",
                self.config.label
            );
        }
        self.backlog.push_back(payload);
    }
}
