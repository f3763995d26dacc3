//! Layer 0: Time primitives
//!
//! EventTime: event-carried seconds. Every event brings its own timestamp;
//! the engine never substitutes arrival time for it, because arrival order
//! and event order disagree on a gossip network.
//!
//! Stamp = EventTime + attribution, the comparison unit for all
//! last-writer-wins decisions.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::identity::IdentityKey;

/// Seconds since the epoch, as carried by the event itself.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventTime(pub u64);

impl EventTime {
    pub fn new(secs: u64) -> Self {
        Self(secs)
    }

    pub fn secs(&self) -> u64 {
        self.0
    }
}

/// EventTime + author: what you compare for LWW.
///
/// The author tiebreak makes ordering total, so merges converge regardless
/// of arrival order.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stamp {
    pub at: EventTime,
    pub by: IdentityKey,
}

impl Stamp {
    pub fn new(at: EventTime, by: IdentityKey) -> Self {
        Self { at, by }
    }
}

impl PartialOrd for Stamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Stamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.at
            .cmp(&other.at)
            .then_with(|| self.by.cmp(&other.by)) // deterministic tiebreak
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamp_orders_by_time_then_author() {
        let a = IdentityKey::from_bytes([1; 32]);
        let b = IdentityKey::from_bytes([2; 32]);

        assert!(Stamp::new(EventTime(10), b) < Stamp::new(EventTime(11), a));
        assert!(Stamp::new(EventTime(10), a) < Stamp::new(EventTime(10), b));
    }
}
