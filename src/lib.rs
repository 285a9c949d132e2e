//! Byzantine-Tolerant Layered Broadcast Stack
//!
//! A static set of `N` processes connected over a fixed undirected graph,
//! up to `f` of which may be Byzantine, is given three stacked broadcast
//! abstractions:
//!
//! - **RC** ([`rc`]): Dolev's unforgeable authenticated broadcast over a
//!   `(2f+1)`-connected graph with only authenticated point-to-point links.
//! - **BRB** ([`brb`]): Bracha's three-phase SEND/ECHO/READY reliable
//!   broadcast, layered on top of RC.
//! - **RCO** ([`rco`]): vector-clock causal delivery, layered on top of BRB.
//!
//! # Architecture
//!
//! ```text
//!   application  ──▶  RCO  ──▶  BRB  ──▶  RC  ──▶  transport
//!                  ◀─rcoDeliver  ◀─brbDeliver  ◀─rcDeliver
//! ```
//!
//! Each process is modeled as a single cooperatively-scheduled actor
//! ([`node::ProcessNode`]) with one mailbox; all upcalls and local state
//! transitions run on that one task.

pub mod brb;
pub mod byzantine;
pub mod config;
pub mod node;
pub mod rc;
pub mod rco;
pub mod transport;
pub mod wire;

pub use brb::BrbEngine;
pub use byzantine::Behavior;
pub use config::{Algorithm, Config, DebugAlgorithm};
pub use node::{DeliverSink, ProcessNode};
pub use rc::RcEngine;
pub use rco::RcoEngine;
pub use transport::{SimNetwork, SimTransport, Transport};
pub use wire::{BroadcastKey, Content, NodeId};

use thiserror::Error;

/// Crate version, for interop/diagnostics.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum number of Byzantine processes a cluster of `total_nodes` can
/// tolerate while keeping `n >= 3f+1`.
pub fn max_byzantine_tolerance(total_nodes: usize) -> usize {
    total_nodes.saturating_sub(1) / 3
}

/// Errors surfaced by this crate. Per the error-handling policy, Byzantine-
/// induced anomalies and malformed inner payloads are *not* represented
/// here — they are absorbed at the protocol layer and only ever observed
/// through `tracing` logs. This enum covers configuration mistakes and
/// transport-level failures only.
#[derive(Debug, Error)]
pub enum BroadcastError {
    /// Configuration failed validation at startup.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A send to a peer failed at the transport layer.
    #[error("transport send to node {peer} failed: {reason}")]
    TransportSend {
        /// Destination that could not be reached.
        peer: NodeId,
        /// Underlying transport failure.
        reason: String,
    },

    /// A send was attempted to a node outside the configured neighbor set.
    #[error("node {0} is not a neighbor")]
    UnknownPeer(NodeId),
}

/// Result type for fallible operations in this crate.
pub type Result<T> = std::result::Result<T, BroadcastError>;

/// A type that consumes broadcast deliveries from the layer below it.
///
/// RC delivers into BRB, BRB delivers into RCO, RCO delivers into the
/// application. Each layer above implements `Deliver` to receive that
/// upcall; this is the sum-typed-seam wiring from the design notes,
/// realized as a small trait object rather than scattered callbacks.
#[async_trait::async_trait]
pub trait Deliver: Send + Sync {
    /// Consume a delivered `(origin, content)` pair from the layer below.
    async fn deliver(&self, origin: NodeId, content: Content);
}
