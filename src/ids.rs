//! Totally ordered operation identifiers and the id types that key vertices and peers.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Unique identifier for a vertex: a GUID string.
pub type VertexId = String;

/// Identifier for a peer (a GUID string, stable for the process's lifetime).
pub type PeerId = String;

/// A Lamport-clock operation identifier: `(counter, peerId)`, totally
/// ordered by counter then lexicographically by peer id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpId {
    pub counter: u64,
    pub peer_id: PeerId,
}

impl OpId {
    pub fn new(counter: u64, peer_id: impl Into<PeerId>) -> Self {
        Self {
            counter,
            peer_id: peer_id.into(),
        }
    }
}

impl PartialOrd for OpId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OpId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.counter
            .cmp(&other.counter)
            .then_with(|| self.peer_id.cmp(&other.peer_id))
    }
}

/// Per-peer Lamport-like clock (design note 9: a field of the engine
/// instance, never a global).
#[derive(Debug, Clone, Default)]
pub struct LamportClock {
    counter: u64,
}

impl LamportClock {
    pub fn new() -> Self {
        Self { counter: 0 }
    }

    /// Observe a counter seen from a remote op: a plain max-update, so the
    /// clock never falls behind the highest counter it has witnessed. Local
    /// generation instead goes through `tick`, which advances unconditionally.
    pub fn observe(&mut self, seen: u64) {
        self.counter = self.counter.max(seen);
    }

    /// Allocate the next local counter value, advancing the clock past it.
    pub fn tick(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }

    pub fn current(&self) -> u64 {
        self.counter
    }
}
