//! Receive side of the link: decode, validate, deduplicate.
//!
//! A frame whose acknowledgement was lost is retransmitted with the same
//! sequence number, so the receiver can see one packet several times.
//! [`LinkReceiver`] remembers the last [`DEDUP_WINDOW`] accepted sequence
//! numbers per node and reports repeats as [`Received::Duplicate`] so they
//! are never counted or acted on twice.
//!
//! Malformed frames are dropped silently with a counter increment.

use std::collections::{HashMap, VecDeque};

use drishti_types::{DecodeError, Packet};
use tracing::debug;

use crate::codec;

/// Recently accepted sequence numbers remembered per node.
pub const DEDUP_WINDOW: usize = 16;

/// Classification of one received frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// First sighting of this packet; act on it.
    Accepted(Packet),
    /// Retransmission of a packet already accepted.
    Duplicate(Packet),
    /// Wrong length or checksum; discarded.
    Dropped(DecodeError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    pub accepted: u64,
    pub duplicates: u64,
    pub dropped: u64,
}

#[derive(Debug, Default)]
pub struct LinkReceiver {
    recent: HashMap<u8, VecDeque<u16>>,
    stats: ReceiverStats,
}

impl LinkReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode and classify one raw frame.
    pub fn accept(&mut self, bytes: &[u8]) -> Received {
        let packet = match codec::decode(bytes) {
            Ok(packet) => packet,
            Err(e) => {
                self.stats.dropped += 1;
                debug!(error = %e, len = bytes.len(), "dropping malformed frame");
                return Received::Dropped(e);
            }
        };

        let recent = self.recent.entry(packet.node_id).or_default();
        if recent.contains(&packet.sequence) {
            self.stats.duplicates += 1;
            debug!(
                node_id = packet.node_id,
                sequence = packet.sequence,
                "duplicate frame"
            );
            return Received::Duplicate(packet);
        }

        if recent.len() == DEDUP_WINDOW {
            recent.pop_front();
        }
        recent.push_back(packet.sequence);
        self.stats.accepted += 1;
        Received::Accepted(packet)
    }

    pub fn stats(&self) -> ReceiverStats {
        self.stats
    }

    /// Forget a node's history, e.g. after it reboots and restarts its
    /// sequence numbers.
    pub fn forget(&mut self, node_id: u8) {
        self.recent.remove(&node_id);
    }
}
