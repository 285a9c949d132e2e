//! `ProcessNode`: the single-mailbox cooperative actor that owns one
//! process's RC/BRB/RCO engine stack and exposes the application interface.
//!
//! Grounded on the design notes' "model each process as a cooperatively
//! scheduled actor with one mailbox", realized with the same
//! `Arc<...>`-held-state-driven-by-`async fn`s shape as the teacher's
//! `gossip::protocol::GossipProtocol`.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::brb::BrbEngine;
use crate::byzantine::Behavior;
use crate::config::Config;
use crate::rc::RcEngine;
use crate::rco::RcoEngine;
use crate::transport::Transport;
use crate::wire::{Content, NodeId};
use crate::Deliver;

/// A minimal [`Deliver`] sink that just records every delivery it sees, in
/// order. Used as the application layer in tests and as the default RC/BRB
/// sink when composing an engine stack in isolation.
pub struct DeliverSink {
    delivered: Mutex<Vec<(NodeId, Content)>>,
    notify: tokio::sync::Notify,
}

impl DeliverSink {
    pub fn new() -> Self {
        Self {
            delivered: Mutex::new(Vec::new()),
            notify: tokio::sync::Notify::new(),
        }
    }

    /// All deliveries observed so far, in delivery order.
    pub fn snapshot(&self) -> Vec<(NodeId, Content)> {
        self.delivered.lock().clone()
    }

    /// Wait (with a timeout) until at least `n` deliveries have been
    /// observed. Returns `false` on timeout.
    pub async fn wait_for_count(&self, n: usize, timeout: std::time::Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.delivered.lock().len() >= n {
                return true;
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let _ = tokio::time::timeout(remaining, self.notify.notified()).await;
        }
    }
}

impl Default for DeliverSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Deliver for DeliverSink {
    async fn deliver(&self, origin: NodeId, content: Content) {
        self.delivered.lock().push((origin, content));
        self.notify.notify_waiters();
    }
}

/// One process: its RC/BRB/RCO engines, wired together, plus the mailbox
/// loop that feeds inbound transport traffic into RC.
pub struct ProcessNode {
    pub node_id: NodeId,
    pub config: Arc<Config>,
    pub rc: Arc<RcEngine>,
    pub brb: Arc<BrbEngine>,
    pub rco: Arc<RcoEngine>,
    pub app: Arc<DeliverSink>,
}

impl ProcessNode {
    pub fn new(node_id: NodeId, config: Arc<Config>, transport: Arc<dyn Transport>) -> Arc<Self> {
        let rc = RcEngine::new(node_id, config.clone(), transport);
        let brb = BrbEngine::new(node_id, config.clone(), rc.clone());
        rc.set_up(brb.clone());
        let rco = RcoEngine::new(node_id, config.clone(), brb.clone());
        brb.set_up(rco.clone());
        let app = Arc::new(DeliverSink::new());
        rco.set_up(app.clone());

        Arc::new(Self {
            node_id,
            config,
            rc,
            brb,
            rco,
            app,
        })
    }

    /// Spawn the mailbox-draining task: every inbound `(sender, bytes)` pair
    /// is handed to the RC layer, one at a time, on its own task. This is
    /// the process's only long-lived task; outbound sends are separate
    /// detached tasks spawned by the engines themselves and never block
    /// this loop.
    pub fn spawn_mailbox_loop(
        self: &Arc<Self>,
        mut inbound: mpsc::UnboundedReceiver<(NodeId, Vec<u8>)>,
    ) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            while let Some((sender, bytes)) = inbound.recv().await {
                this.rc.on_receive(sender, bytes).await;
            }
        })
    }

    /// Run whatever startup-time Byzantine behavior this process is
    /// configured with (currently only `collude`, which forges ECHO/READY
    /// before any real traffic arrives).
    pub async fn run_startup_behaviors(&self) {
        if matches!(self.config.behavior, Behavior::Collude) {
            self.brb.attempt_collusion().await;
        }
    }

    pub async fn rc_broadcast(&self, content: Content) {
        self.rc.rc_broadcast(content).await;
    }

    pub async fn brb_broadcast(&self, content: Content) {
        self.brb.brb_broadcast(content).await;
    }

    pub async fn rco_broadcast(&self, content: Content) {
        self.rco.rco_broadcast(content).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{SimNetwork, SimTransport};
    use std::time::Duration;

    fn test_config(n: usize, f: usize) -> Arc<Config> {
        Arc::new(Config {
            n,
            f,
            min_delay: 0.0,
            max_delay: 0.0,
            ..Config::default()
        })
    }

    fn build_cluster(n: usize, f: usize) -> Vec<Arc<ProcessNode>> {
        let network = SimNetwork::new();
        let mut receivers = Vec::new();
        for id in 0..n as u32 {
            receivers.push(network.register(id));
        }
        let all: Vec<NodeId> = (0..n as u32).collect();
        let mut nodes = Vec::new();
        for (id, rx) in (0..n as u32).zip(receivers) {
            let neighbors: Vec<NodeId> = all.iter().copied().filter(|&x| x != id).collect();
            let transport = Arc::new(SimTransport::new(id, neighbors, network.clone(), 0.0, 0.0));
            let node = ProcessNode::new(id, test_config(n, f), transport);
            node.spawn_mailbox_loop(rx);
            nodes.push(node);
        }
        nodes
    }

    #[tokio::test]
    async fn rco_broadcast_reaches_every_process() {
        let nodes = build_cluster(4, 1);
        nodes[0].rco_broadcast(b"hello".to_vec()).await;

        for node in &nodes {
            assert!(node.app.wait_for_count(1, Duration::from_secs(1)).await);
            assert_eq!(node.app.snapshot(), vec![(0, b"hello".to_vec())]);
        }
    }
}
