//! Byzantine behavior policy hooks.
//!
//! The reference implementation wires each misbehavior directly into the
//! happy path with scattered `if self.byzantine_behavior == "..."` checks.
//! Here the behavior lives in one enum and is only ever consulted at the
//! handful of seams the design notes call out (RC receive, BRB
//! broadcast/deliver, RCO broadcast/deliver) rather than threaded through
//! every branch of the protocol.
//!
//! This replaces the teacher's passive `ByzantineFaultDetector` (which only
//! observed and reported faults after the fact). Here the responsibility is
//! inverted: a process *exhibits* one behavior, it doesn't detect others'.

use rand::Rng;

use crate::wire::NodeId;

/// A single process's Byzantine behavior, selected at construction time and
/// fixed for the process's lifetime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Behavior {
    /// Honest participant.
    #[default]
    None,
    /// RC: drop every incoming packet without relaying or delivering it.
    NoRelay,
    /// RC: on every received packet, additionally emit a forged packet
    /// claiming to originate from a random other node.
    ForgeSender,
    /// BRB: `brb_broadcast` only reaches a small fixed-size subset of
    /// neighbors instead of the whole graph.
    LimitedBroadcast,
    /// BRB: at startup, forge ECHO/READY for a fabricated message, and
    /// without applying thresholds, echo/ready any BRB message that already
    /// carries a forged marker.
    Collude,
    /// RCO: every BRB-delivered payload is discarded instead of entering
    /// the pending set.
    RcoDropMessages,
    /// RCO: the vector-clock tag attached to outgoing broadcasts is
    /// inflated, making recipients perceive false causal dependencies.
    VcInflation,
    /// RCO: the vector-clock tag attached to outgoing broadcasts is zeroed,
    /// discarding real causal dependencies.
    VcDeflation,
}

impl Behavior {
    /// Parse the reference implementation's `BYZANTINE_BEHAVIOR` environment
    /// variable values.
    pub fn parse(value: &str) -> Self {
        match value {
            "no_relay" => Behavior::NoRelay,
            "forge_sender" => Behavior::ForgeSender,
            "limited_broadcast" => Behavior::LimitedBroadcast,
            "collude" => Behavior::Collude,
            "rco_drop_messages" => Behavior::RcoDropMessages,
            "vc_inflation" => Behavior::VcInflation,
            "vc_deflation" => Behavior::VcDeflation,
            _ => Behavior::None,
        }
    }
}

/// Pick a random node other than `self_id` out of `[0, n)`, the way
/// `_attempt_forgery`/`_attempt_bracha_forgery` pick a forgery victim.
pub fn random_victim(self_id: NodeId, n: usize) -> NodeId {
    if n <= 1 {
        return self_id;
    }
    let mut rng = rand::thread_rng();
    loop {
        let candidate = rng.gen_range(0..n as u32);
        if candidate != self_id {
            return candidate;
        }
    }
}

/// Build the fabricated content a forged message carries, tagged so other
/// colluding nodes can recognize it.
pub fn forged_content(victim: NodeId) -> Vec<u8> {
    format!("FORGED-Message-from-{victim}").into_bytes()
}

/// Whether `content` carries the forged-message marker.
pub fn is_forged(content: &[u8]) -> bool {
    String::from_utf8_lossy(content).contains("FORGED-")
}
