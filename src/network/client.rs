//! Peer-to-peer pipe: a libp2p swarm whose gossipsub topic is the
//! conversation's data channel.

use std::collections::HashSet;

use futures::StreamExt;
use libp2p::gossipsub::{self, IdentTopic, PublishError};
use libp2p::multiaddr::Protocol;
use libp2p::swarm::{Config as SwarmConfig, SwarmEvent};
use libp2p::{Multiaddr, PeerId, Swarm, identity, mdns};
use tokio::sync::{mpsc, oneshot};

use crate::config::ChannelConfig;
use crate::error::{ChatError, Result};

use super::behavior::{ChatBehavior, ChatBehaviorEvent, build_behavior};
use super::pipe::{Connector, Pipe};
use super::transport::build_transport;

/// Negotiates by dialling the configured discovery servers (and anything
/// mDNS finds) until a peer subscribes to the conversation topic.
///
/// Every negotiation uses a fresh identity.
#[derive(Debug, Default)]
pub struct GossipConnector;

impl GossipConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for GossipConnector {
    async fn connect(&self, config: &ChannelConfig) -> Result<Pipe> {
        let local_key = identity::Keypair::generate_ed25519();
        let local_peer_id = PeerId::from(local_key.public());
        log::info!("Local PeerID: {local_peer_id}");

        let transport = build_transport(&local_key)?;
        let (behavior, topic) = build_behavior(&local_key, local_peer_id, &config.label)?;
        let mut swarm = Swarm::new(
            transport,
            behavior,
            local_peer_id,
            SwarmConfig::with_tokio_executor(),
        );

        let listen_addr: Multiaddr = config.listen_addr.parse().map_err(|err| {
            ChatError::Connection(format!("invalid listen address `{}`: {err}", config.listen_addr))
        })?;
        swarm
            .listen_on(listen_addr)
            .map_err(|err| ChatError::Connection(format!("listen: {err}")))?;

        dial_discovery_servers(&mut swarm, &config.discovery_servers);

        let remote = await_subscriber(&mut swarm, &topic).await;
        log::info!("Peer {remote} joined `{}`", config.label);

        let (outbound, from_session) = mpsc::channel(config.capacity);
        let (to_session, inbound) = mpsc::channel(config.capacity);
        let (unsent_tx, unsent_rx) = oneshot::channel();
        let link = PeerLink {
            swarm,
            topic,
            subscribers: Subscribers::new(remote),
            from_session,
            to_session,
            unsent: unsent_tx,
        };
        tokio::spawn(link.run());

        Ok(Pipe::new(outbound, inbound).with_unsent(unsent_rx))
    }
}

fn dial_discovery_servers(swarm: &mut Swarm<ChatBehavior>, servers: &[String]) {
    if servers.is_empty() {
        log::warn!("No discovery servers configured; relying on mDNS");
        return;
    }
    for entry in servers {
        let addr: Multiaddr = match entry.parse() {
            Ok(addr) => addr,
            Err(err) => {
                log::warn!("Invalid multiaddr `{entry}`: {err}");
                continue;
            }
        };
        if let Some(Protocol::P2p(peer_id)) = addr.iter().last() {
            swarm.behaviour_mut().gossipsub.add_explicit_peer(&peer_id);
        }
        if let Err(err) = swarm.dial(addr.clone()) {
            log::warn!("Failed to dial discovery server {addr}: {err}");
        }
    }
}

/// Runs the swarm until some peer subscribes to `topic`. The caller bounds
/// the wait.
async fn await_subscriber(swarm: &mut Swarm<ChatBehavior>, topic: &IdentTopic) -> PeerId {
    let wanted = topic.hash();
    loop {
        match swarm.select_next_some().await {
            SwarmEvent::Behaviour(ChatBehaviorEvent::Gossipsub(gossipsub::Event::Subscribed {
                peer_id,
                topic,
            })) if topic == wanted => return peer_id,
            SwarmEvent::Behaviour(ChatBehaviorEvent::Mdns(event)) => {
                track_mdns(swarm, event);
            }
            SwarmEvent::NewListenAddr { address, .. } => {
                log::info!("Listening on {address}");
            }
            SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
                log::warn!("Dial to {peer_id:?} failed: {error}");
            }
            _ => {}
        }
    }
}

fn track_mdns(swarm: &mut Swarm<ChatBehavior>, event: mdns::Event) {
    match event {
        mdns::Event::Discovered(list) => {
            for (peer_id, _) in list {
                log::debug!("mDNS discovered {peer_id}");
                swarm.behaviour_mut().gossipsub.add_explicit_peer(&peer_id);
            }
        }
        mdns::Event::Expired(list) => {
            for (peer_id, _) in list {
                log::debug!("mDNS expired {peer_id}");
                swarm
                    .behaviour_mut()
                    .gossipsub
                    .remove_explicit_peer(&peer_id);
            }
        }
    }
}

/// Peers currently subscribed to the conversation topic.
#[derive(Debug)]
struct Subscribers(HashSet<PeerId>);

impl Subscribers {
    fn new(first: PeerId) -> Self {
        Self(HashSet::from([first]))
    }

    fn join(&mut self, peer_id: PeerId) {
        self.0.insert(peer_id);
    }

    /// Returns `true` once nobody is left.
    fn leave(&mut self, peer_id: &PeerId) -> bool {
        self.0.remove(peer_id);
        self.0.is_empty()
    }
}

/// Why a [`PeerLink`] stopped.
enum LinkExit {
    SessionGone,
    /// The link is unusable; carries the payload that failed to publish.
    Lost(Option<Vec<u8>>),
}

/// Owns the swarm after negotiation and bridges it to the session's pipe.
///
/// The link ends when the last subscriber leaves or a publish fails, so a
/// supervisor above can reconnect and replay whatever came back on `unsent`.
struct PeerLink {
    swarm: Swarm<ChatBehavior>,
    topic: IdentTopic,
    subscribers: Subscribers,
    from_session: mpsc::Receiver<Vec<u8>>,
    to_session: mpsc::Sender<Vec<u8>>,
    unsent: oneshot::Sender<Vec<Vec<u8>>>,
}

impl PeerLink {
    async fn run(mut self) {
        log::info!("Peer link for {} started", self.topic);
        let exit = loop {
            tokio::select! {
                payload = self.from_session.recv() => {
                    let Some(payload) = payload else {
                        break LinkExit::SessionGone;
                    };
                    if let Err(payload) = self.publish(payload) {
                        break LinkExit::Lost(Some(payload));
                    }
                }
                event = self.swarm.select_next_some() => {
                    if let Some(exit) = self.handle_swarm_event(event).await {
                        break exit;
                    }
                }
            }
        };

        match exit {
            LinkExit::SessionGone => log::info!("Peer link for {} stopped", self.topic),
            LinkExit::Lost(failed) => {
                log::warn!("Peer link for {} lost", self.topic);
                self.hand_back(failed);
            }
        }
    }

    /// Returns the failed payload plus everything still queued behind it.
    fn hand_back(mut self, failed: Option<Vec<u8>>) {
        let mut unsent: Vec<Vec<u8>> = failed.into_iter().collect();
        while let Ok(payload) = self.from_session.try_recv() {
            unsent.push(payload);
        }
        if !unsent.is_empty() {
            log::info!("Handing back {} unpublished payloads", unsent.len());
        }
        let _ = self.unsent.send(unsent);
    }

    /// Gives the payload back when gossipsub could not take it.
    fn publish(&mut self, payload: Vec<u8>) -> std::result::Result<(), Vec<u8>> {
        match self
            .swarm
            .behaviour_mut()
            .gossipsub
            .publish(self.topic.clone(), payload.clone())
        {
            Ok(_) => Ok(()),
            Err(PublishError::Duplicate) => {
                log::debug!("Dropping duplicate publish on {}", self.topic);
                Ok(())
            }
            Err(err) => {
                log::warn!("Publish error on {}: {err:?}", self.topic);
                Err(payload)
            }
        }
    }

    /// Returns why the link must stop, if it must.
    async fn handle_swarm_event(&mut self, event: SwarmEvent<ChatBehaviorEvent>) -> Option<LinkExit> {
        match event {
            SwarmEvent::Behaviour(ChatBehaviorEvent::Gossipsub(gossipsub::Event::Message {
                message,
                ..
            })) => {
                if message.topic == self.topic.hash()
                    && self.to_session.send(message.data).await.is_err()
                {
                    return Some(LinkExit::SessionGone);
                }
            }
            SwarmEvent::Behaviour(ChatBehaviorEvent::Gossipsub(gossipsub::Event::Subscribed {
                peer_id,
                topic,
            })) if topic == self.topic.hash() => {
                log::info!("Peer {peer_id} joined {}", self.topic);
                self.subscribers.join(peer_id);
            }
            SwarmEvent::Behaviour(ChatBehaviorEvent::Gossipsub(gossipsub::Event::Unsubscribed {
                peer_id,
                topic,
            })) if topic == self.topic.hash() => {
                log::info!("Peer {peer_id} left {}", self.topic);
                if self.subscribers.leave(&peer_id) {
                    return Some(LinkExit::Lost(None));
                }
            }
            SwarmEvent::Behaviour(ChatBehaviorEvent::Mdns(event)) => {
                track_mdns(&mut self.swarm, event);
            }
            SwarmEvent::ConnectionClosed {
                peer_id,
                num_established,
                cause,
                ..
            } => {
                log::debug!("Connection to {peer_id} closed: {cause:?}");
                if num_established == 0 && self.subscribers.leave(&peer_id) {
                    return Some(LinkExit::Lost(None));
                }
            }
            _ => {}
        }
        None
    }
}
