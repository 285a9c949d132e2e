//! Transport shim consumed by the RC layer.
//!
//! Production transports (real sockets, authenticated links) are out of
//! scope for this crate and are the embedder's responsibility; what's
//! shipped here is `SimTransport`, an in-process mesh over
//! `tokio::sync::mpsc` channels used by the test suite and benchmarks to
//! drive the protocol end-to-end, grounded on the teacher's
//! `NetworkNode`/`PeerDiscovery`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use rand::Rng;
use tokio::sync::mpsc;

use crate::wire::NodeId;
use crate::{BroadcastError, Result};

/// What the RC layer needs from the network: fan-out sends and a fixed
/// neighbor list. `node_id_of` exists so a transport that multiplexes many
/// peers over one physical link can tell the RC layer who actually sent a
/// given message; `SimTransport` already tags each delivery with the
/// sender's id at the channel level, so its default implementation is the
/// identity.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `bytes` to `peer`. Must only be called with a `peer` from
    /// [`Transport::neighbors`].
    async fn send_to(&self, peer: NodeId, bytes: Vec<u8>) -> Result<()>;

    /// The fixed set of directly connected peers.
    fn neighbors(&self) -> &[NodeId];

    /// Authenticated identity of the sender behind a lower-level peer handle.
    fn node_id_of(&self, peer: NodeId) -> NodeId {
        peer
    }
}

/// Shared registry backing an in-process simulated network: one inbound
/// channel per registered node, addressed by `NodeId`.
pub struct SimNetwork {
    senders: DashMap<NodeId, mpsc::UnboundedSender<(NodeId, Vec<u8>)>>,
}

impl SimNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            senders: DashMap::new(),
        })
    }

    /// Register `node_id` and obtain its inbound mailbox. Must be called
    /// exactly once per node before any peer can reach it.
    pub fn register(&self, node_id: NodeId) -> mpsc::UnboundedReceiver<(NodeId, Vec<u8>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.insert(node_id, tx);
        rx
    }
}

/// One node's view of a [`SimNetwork`]: its own id, its neighbor list, and
/// the `U[min_delay, max_delay]` per-packet delay from §4.A.
pub struct SimTransport {
    node_id: NodeId,
    neighbors: Vec<NodeId>,
    network: Arc<SimNetwork>,
    min_delay: f64,
    max_delay: f64,
}

impl SimTransport {
    pub fn new(
        node_id: NodeId,
        neighbors: Vec<NodeId>,
        network: Arc<SimNetwork>,
        min_delay: f64,
        max_delay: f64,
    ) -> Self {
        Self {
            node_id,
            neighbors,
            network,
            min_delay,
            max_delay,
        }
    }

    fn sample_delay(&self) -> Duration {
        let secs = if self.max_delay > self.min_delay {
            rand::thread_rng().gen_range(self.min_delay..=self.max_delay)
        } else {
            self.min_delay
        };
        Duration::from_secs_f64(secs.max(0.0))
    }
}

#[async_trait]
impl Transport for SimTransport {
    async fn send_to(&self, peer: NodeId, bytes: Vec<u8>) -> Result<()> {
        tokio::time::sleep(self.sample_delay()).await;
        let sender = self
            .network
            .senders
            .get(&peer)
            .ok_or(BroadcastError::UnknownPeer(peer))?;
        sender
            .send((self.node_id, bytes))
            .map_err(|_| BroadcastError::TransportSend {
                peer,
                reason: "peer mailbox closed".to_string(),
            })
    }

    fn neighbors(&self) -> &[NodeId] {
        &self.neighbors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_to_registered_peer() {
        let network = SimNetwork::new();
        let mut rx0 = network.register(0);
        let _rx1 = network.register(1);

        let transport = SimTransport::new(1, vec![0], network, 0.0, 0.0);
        transport.send_to(0, b"hi".to_vec()).await.unwrap();

        let (sender, bytes) = rx0.recv().await.unwrap();
        assert_eq!(sender, 1);
        assert_eq!(bytes, b"hi");
    }

    #[tokio::test]
    async fn send_to_unregistered_peer_errors() {
        let network = SimNetwork::new();
        let _rx0 = network.register(0);
        let transport = SimTransport::new(0, vec![9], network, 0.0, 0.0);
        let result = transport.send_to(9, b"hi".to_vec()).await;
        assert!(matches!(result, Err(BroadcastError::UnknownPeer(9))));
    }
}
