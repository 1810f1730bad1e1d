use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use libp2p::gossipsub::{self, IdentTopic};
use libp2p::mdns;
use libp2p::swarm::NetworkBehaviour;
use libp2p::{PeerId, identity};

use crate::error::{ChatError, Result};

const TOPIC_PREFIX: &str = "counsel-chat";

#[derive(NetworkBehaviour)]
pub struct ChatBehavior {
    pub gossipsub: gossipsub::Behaviour,
    pub mdns: mdns::tokio::Behaviour,
}

/// Gossipsub topic carrying one conversation's frames.
pub fn conversation_topic(label: &str) -> IdentTopic {
    IdentTopic::new(format!("{TOPIC_PREFIX}/{label}"))
}

pub fn build_behavior(
    local_key: &identity::Keypair,
    local_peer_id: PeerId,
    label: &str,
) -> Result<(ChatBehavior, IdentTopic)> {
    // Content addressing: the same frame relayed twice is delivered once.
    let message_id_fn = |message: &gossipsub::Message| {
        let mut hasher = DefaultHasher::new();
        message.data.hash(&mut hasher);
        message.source.hash(&mut hasher);
        gossipsub::MessageId::from(hasher.finish().to_string())
    };

    let gossipsub_config = gossipsub::ConfigBuilder::default()
        .heartbeat_interval(Duration::from_secs(5))
        .validation_mode(gossipsub::ValidationMode::Strict)
        .message_id_fn(message_id_fn)
        .build()
        .map_err(|err| ChatError::Connection(format!("gossipsub config: {err}")))?;

    let mut gossipsub = gossipsub::Behaviour::new(
        gossipsub::MessageAuthenticity::Signed(local_key.clone()),
        gossipsub_config,
    )
    .map_err(|err| ChatError::Connection(format!("gossipsub: {err}")))?;

    let topic = conversation_topic(label);
    gossipsub
        .subscribe(&topic)
        .map_err(|err| ChatError::Connection(format!("subscribe {topic}: {err}")))?;

    let mdns = mdns::tokio::Behaviour::new(mdns::Config::default(), local_peer_id)?;

    Ok((ChatBehavior { gossipsub, mdns }, topic))
}
