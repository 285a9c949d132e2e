//! Wire frames for the three layers.
//!
//! Each layer defines one payload type, encoded with `bincode` the way the
//! teacher crate encodes its command-log entries and snapshots. Layers are
//! opaque to each other: RC's `content` carries raw bytes that happen to be
//! a `bincode`-encoded `BrbPayload`, and BRB's `content` carries raw bytes
//! that happen to be a `bincode`-encoded `RcoPayload`. Numeric `msg_id` tags
//! (4/5/6) are kept as leading bytes so a layer can tell "not mine" apart
//! from "corrupt" without risking a misparse of unrelated bytes.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Process identifier; indexes directly into vector clocks and neighbor lists.
pub type NodeId = u32;

/// Opaque application payload.
pub type Content = Vec<u8>;

/// Identity of one broadcast instance: who originated it, and what it says.
pub type BroadcastKey = (NodeId, Content);

/// RC layer numeric tag.
pub const RC_MSG_ID: u8 = 4;
/// BRB layer numeric tag.
pub const BRB_MSG_ID: u8 = 5;
/// RCO layer numeric tag.
pub const RCO_MSG_ID: u8 = 6;

/// A Dolev RC packet as it travels link-to-link.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RcPacket {
    pub msg_id: u8,
    pub origin: NodeId,
    pub content: Content,
    pub path: Vec<NodeId>,
}

impl RcPacket {
    pub fn new(origin: NodeId, content: Content, path: Vec<NodeId>) -> Self {
        Self {
            msg_id: RC_MSG_ID,
            origin,
            content,
            path,
        }
    }

    pub fn key(&self) -> BroadcastKey {
        (self.origin, self.content.clone())
    }
}

/// The three phases of Bracha's protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrbTag {
    Send,
    Echo,
    Ready,
}

/// A Bracha BRB payload, carried as RC's opaque content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrbPayload {
    pub msg_id: u8,
    pub tag: BrbTag,
    pub origin: NodeId,
    pub content: Content,
}

impl BrbPayload {
    pub fn new(tag: BrbTag, origin: NodeId, content: Content) -> Self {
        Self {
            msg_id: BRB_MSG_ID,
            tag,
            origin,
            content,
        }
    }

    pub fn key(&self) -> BroadcastKey {
        (self.origin, self.content.clone())
    }

    pub fn encode(&self) -> Content {
        bincode::serialize(self).expect("BrbPayload always serializes")
    }
}

/// An RCO payload, carried as BRB's opaque content.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RcoPayload {
    pub msg_id: u8,
    pub origin: NodeId,
    pub content: Content,
    pub vc_tag: Vec<u64>,
}

impl RcoPayload {
    pub fn new(origin: NodeId, content: Content, vc_tag: Vec<u64>) -> Self {
        Self {
            msg_id: RCO_MSG_ID,
            origin,
            content,
            vc_tag,
        }
    }

    pub fn encode(&self) -> Content {
        bincode::serialize(self).expect("RcoPayload always serializes")
    }
}

/// Decode `bytes` as `T`, but only if the leading byte matches `expected_msg_id`.
///
/// A layer that receives content it doesn't own (e.g. BRB content that isn't
/// actually a `BrbPayload`) should see that as "not for me", not risk a
/// `bincode` misparse of unrelated bytes into a structurally-valid-looking
/// value. Returning `None` here is the typed fallback the design notes call
/// for, in place of a thrown parse exception.
pub fn decode_tagged<T: DeserializeOwned>(bytes: &[u8], expected_msg_id: u8) -> Option<T> {
    if bytes.first().copied() != Some(expected_msg_id) {
        return None;
    }
    bincode::deserialize(bytes).ok()
}

/// Render content the way the reference implementation's f-strings do, for
/// the contractual `[*-DELIVER]` log lines.
pub fn content_display(content: &[u8]) -> std::borrow::Cow<'_, str> {
    String::from_utf8_lossy(content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rc_packet_round_trips() {
        let packet = RcPacket::new(3, b"hello".to_vec(), vec![1, 2]);
        let bytes = bincode::serialize(&packet).unwrap();
        let decoded: RcPacket = decode_tagged(&bytes, RC_MSG_ID).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn brb_payload_rejects_wrong_tag() {
        let payload = BrbPayload::new(BrbTag::Echo, 1, b"x".to_vec());
        let bytes = payload.encode();
        let decoded: Option<BrbPayload> = decode_tagged(&bytes, RCO_MSG_ID);
        assert!(decoded.is_none());
    }

    #[test]
    fn decode_tagged_rejects_empty_input() {
        let decoded: Option<RcPacket> = decode_tagged(&[], RC_MSG_ID);
        assert!(decoded.is_none());
    }
}
