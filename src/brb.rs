//! Bracha's BRB: three-phase SEND/ECHO/READY reliable broadcast layered on
//! RC. Grounded directly on `bracha_algorithm.py`, including the MBD.11
//! reduced-message-set optimization, echo amplification, and single-hop-send.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use rand::seq::SliceRandom;

use crate::byzantine::{self, Behavior};
use crate::config::{Algorithm, Config};
use crate::rc::RcEngine;
use crate::wire::{
    content_display, decode_tagged, BroadcastKey, BrbPayload, BrbTag, Content, NodeId, BRB_MSG_ID,
};
use crate::Deliver;

/// Per-key BRB bookkeeping, one record per `(origin, content)`.
#[derive(Default)]
pub struct BrbKeyState {
    echos: HashSet<NodeId>,
    readys: HashSet<NodeId>,
    sent_echo: bool,
    sent_ready: bool,
    delivered: bool,
}

/// One process's BRB engine.
pub struct BrbEngine {
    node_id: NodeId,
    config: Arc<Config>,
    rc: Arc<RcEngine>,
    up: OnceLock<Arc<dyn Deliver>>,
    state: DashMap<BroadcastKey, BrbKeyState>,
}

impl BrbEngine {
    pub fn new(node_id: NodeId, config: Arc<Config>, rc: Arc<RcEngine>) -> Arc<Self> {
        Arc::new(Self {
            node_id,
            config,
            rc,
            up: OnceLock::new(),
            state: DashMap::new(),
        })
    }

    /// Wire the layer above (RCO in the full stack, a test sink in
    /// isolation). Must be called once before any traffic flows.
    pub fn set_up(&self, up: Arc<dyn Deliver>) {
        let _ = self.up.set(up);
    }

    /// Originate a new BRB broadcast: send SEND to the whole graph (via RC),
    /// subject to the `limited_broadcast`/`opt_single_hop_send` overrides.
    pub async fn brb_broadcast(&self, content: Content) {
        let payload = BrbPayload::new(BrbTag::Send, self.node_id, content);

        if matches!(self.config.behavior, Behavior::LimitedBroadcast) {
            let mut rng = rand::thread_rng();
            let chosen: Vec<NodeId> = self
                .rc
                .neighbors()
                .choose_multiple(&mut rng, self.config.limited_neighbors)
                .copied()
                .collect();
            tracing::debug!(
                node = self.node_id,
                chosen = ?chosen,
                "limited_broadcast: sending SEND only to a subset of neighbors"
            );
            let encoded = payload.encode();
            self.rc.mark_self_delivered(self.node_id, &encoded);
            self.rc.send_direct(&chosen, self.node_id, encoded);
            self.handle_send(payload).await;
            return;
        }

        if self.config.opt_single_hop_send {
            let encoded = payload.encode();
            self.rc.mark_self_delivered(self.node_id, &encoded);
            self.rc
                .send_direct(self.rc.neighbors(), self.node_id, encoded);
            self.handle_send(payload).await;
            return;
        }

        self.rc.rc_broadcast(payload.encode()).await;
    }

    /// Receive content RC delivered to us, from RC-layer sender `rc_origin`;
    /// interpret as a `BrbPayload`. `rc_origin` is the node that actually
    /// performed the RC-broadcast carrying this ECHO/READY/SEND — distinct
    /// from `payload.origin`, the BRB broadcaster the message is *about*.
    pub async fn on_rc_deliver(&self, rc_origin: NodeId, content: Content) {
        let Some(payload) = decode_tagged::<BrbPayload>(&content, BRB_MSG_ID) else {
            tracing::debug!(
                node = self.node_id,
                "RC delivered a non-BRB payload; no BRB action defined, dropping"
            );
            return;
        };

        if matches!(self.config.behavior, Behavior::Collude) {
            self.support_forgery_if_applicable(&payload).await;
        }

        match payload.tag {
            BrbTag::Send => self.handle_send(payload).await,
            BrbTag::Echo => self.handle_echo(payload, rc_origin).await,
            BrbTag::Ready => self.handle_ready(payload, rc_origin).await,
        }
    }

    /// At startup, a colluding node forges ECHO/READY for a fabricated
    /// message attributed to a random victim, without ever having seen a
    /// real SEND for it.
    pub async fn attempt_collusion(&self) {
        if !matches!(self.config.behavior, Behavior::Collude) {
            return;
        }
        let victim = byzantine::random_victim(self.node_id, self.config.n);
        let content = byzantine::forged_content(victim);
        tracing::warn!(node = self.node_id, victim, "collude: forging ECHO/READY at startup");
        self.send_echo(victim, content.clone()).await;
        self.send_ready(victim, content).await;
    }

    async fn support_forgery_if_applicable(&self, payload: &BrbPayload) {
        if !byzantine::is_forged(&payload.content) {
            return;
        }
        match payload.tag {
            BrbTag::Send => {
                let already = self.mark_sent_echo(payload.key());
                if !already {
                    self.send_echo(payload.origin, payload.content.clone()).await;
                }
            }
            BrbTag::Echo | BrbTag::Ready => {
                let already = self.mark_sent_ready(payload.key());
                if !already {
                    self.send_ready(payload.origin, payload.content.clone()).await;
                }
            }
        }
    }

    fn mark_sent_echo(&self, key: BroadcastKey) -> bool {
        let mut entry = self.state.entry(key).or_default();
        let already = entry.sent_echo;
        entry.sent_echo = true;
        already
    }

    fn mark_sent_ready(&self, key: BroadcastKey) -> bool {
        let mut entry = self.state.entry(key).or_default();
        let already = entry.sent_ready;
        entry.sent_ready = true;
        already
    }

    async fn handle_send(&self, payload: BrbPayload) {
        if !self.should_generate_echo(payload.origin) {
            return;
        }
        let already = self.mark_sent_echo(payload.key());
        if already {
            return;
        }
        self.send_echo(payload.origin, payload.content).await;
    }

    async fn handle_echo(&self, payload: BrbPayload, sender: NodeId) {
        let key = payload.key();
        let echo_count = {
            let mut entry = self.state.entry(key.clone()).or_default();
            entry.echos.insert(sender);
            entry.echos.len()
        };

        let echo_threshold = echo_send_threshold(self.config.n, self.config.f);

        if self.config.opt_echo_amplification {
            let sent_echo = self.state.entry(key.clone()).or_default().sent_echo;
            if echo_count >= self.config.f + 1
                && !sent_echo
                && self.should_generate_echo(payload.origin)
            {
                self.mark_sent_echo(key.clone());
                self.send_echo(payload.origin, payload.content.clone()).await;
            }
        }

        let sent_ready = self.state.entry(key).or_default().sent_ready;
        if echo_count >= echo_threshold
            && !sent_ready
            && self.should_generate_ready(payload.origin)
        {
            self.send_ready(payload.origin, payload.content).await;
        }
    }

    async fn handle_ready(&self, payload: BrbPayload, sender: NodeId) {
        let key = payload.key();
        let ready_count = {
            let mut entry = self.state.entry(key.clone()).or_default();
            entry.readys.insert(sender);
            entry.readys.len()
        };
        let sent_ready = self.state.entry(key.clone()).or_default().sent_ready;

        if ready_count >= self.config.f + 1
            && !sent_ready
            && self.should_generate_ready(payload.origin)
        {
            self.send_ready(payload.origin, payload.content.clone()).await;
        }

        if ready_count >= 2 * self.config.f + 1 {
            let should_deliver = {
                let mut entry = self.state.entry(key).or_default();
                if entry.delivered {
                    false
                } else {
                    entry.delivered = true;
                    true
                }
            };
            if should_deliver {
                self.log_deliver(payload.origin, &payload.content);
                if let Some(up) = self.up.get() {
                    up.deliver(payload.origin, payload.content.clone()).await;
                }
            }
        }
    }

    async fn send_echo(&self, origin: NodeId, content: Content) {
        let echo = BrbPayload::new(BrbTag::Echo, origin, content);
        self.rc.rc_broadcast(echo.encode()).await;
    }

    async fn send_ready(&self, origin: NodeId, content: Content) {
        let already = self.mark_sent_ready((origin, content.clone()));
        if already {
            return;
        }
        let ready = BrbPayload::new(BrbTag::Ready, origin, content);
        self.rc.rc_broadcast(ready.encode()).await;
    }

    /// MBD.11: when `opt_reduced_messages` is set, only a subset of `3f+1`
    /// (for READY) or the majority threshold plus `f` (for ECHO) nodes,
    /// chosen by circular suffix starting right after `broadcaster`, ever
    /// generate that message kind. Every node still generates it when the
    /// optimization is off.
    fn should_generate_echo(&self, broadcaster: NodeId) -> bool {
        if !self.config.opt_reduced_messages {
            return true;
        }
        let count = echo_send_threshold(self.config.n, self.config.f) + self.config.f;
        circular_suffix(broadcaster, self.config.n)
            .take(count)
            .any(|id| id == self.node_id)
    }

    fn should_generate_ready(&self, broadcaster: NodeId) -> bool {
        if !self.config.opt_reduced_messages {
            return true;
        }
        let count = 3 * self.config.f + 1;
        circular_suffix(broadcaster, self.config.n)
            .take(count)
            .any(|id| id == self.node_id)
    }

    fn log_deliver(&self, origin: NodeId, content: &Content) {
        if self.config.should_log(1, Algorithm::Bracha) {
            tracing::info!(
                "[BRB-DELIVER] Node {}: Delivered message from {}: \"{}\"",
                self.node_id,
                origin,
                content_display(content)
            );
        }
    }
}

#[async_trait::async_trait]
impl Deliver for BrbEngine {
    async fn deliver(&self, rc_origin: NodeId, content: Content) {
        self.on_rc_deliver(rc_origin, content).await;
    }
}

/// `ceil((n+f+1)/2)`, the majority threshold at which a node sends READY
/// having only seen ECHOes.
fn echo_send_threshold(n: usize, f: usize) -> usize {
    (n + f + 1).div_ceil(2)
}

/// `broadcaster+1, broadcaster+2, ..., mod n`, the order MBD.11 walks to
/// pick which nodes generate reduced message sets.
fn circular_suffix(broadcaster: NodeId, n: usize) -> impl Iterator<Item = NodeId> {
    (1..=n as u32).map(move |offset| (broadcaster + offset) % n as u32)
}
