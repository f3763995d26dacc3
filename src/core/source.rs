//! Layer 3: Source precedence and the sourced register
//!
//! Three disjoint origins feed every collection. They are not equally
//! trusted: signed network events outrank locally authored pending state,
//! which outranks polled mirror data.
//!
//! Sourced<T> is the merge primitive for scalar fields - LWW extended with
//! a source rank that dominates the timestamp.

use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use super::time::Stamp;

/// A merge primitive for replicated fields.
///
/// Properties:
/// - Commutative: join(a, b) == join(b, a)
/// - Associative: join(join(a, b), c) == join(a, join(b, c))
/// - Idempotent: join(a, a) == a
pub trait Register: Sized {
    /// Merge two states into one that includes information from both.
    fn join(&self, other: &Self) -> Self;
}

/// Where a value came from. Variant order is precedence order.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// Polled from the centralized mirror API.
    External,
    /// Authored locally, not yet confirmed on the network.
    Local,
    /// A signed event observed on the network.
    Network,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::External => "external",
            Self::Local => "local",
            Self::Network => "network",
        }
    }
}

/// Source-ranked last-writer-wins register.
///
/// Higher source rank wins outright; within a rank, the later stamp wins.
/// Stamp includes the author, so ordering is total and merges converge.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Sourced<T> {
    pub value: T,
    pub source: Source,
    pub stamp: Stamp,
}

impl<T> Sourced<T> {
    pub fn new(value: T, source: Source, stamp: Stamp) -> Self {
        Self {
            value,
            source,
            stamp,
        }
    }
}

impl<T: Clone> Register for Sourced<T> {
    fn join(&self, other: &Self) -> Self {
        if (self.source, &self.stamp) >= (other.source, &other.stamp) {
            self.clone()
        } else {
            other.clone()
        }
    }
}

impl<T: PartialEq> PartialEq for Sourced<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value && self.source == other.source && self.stamp == other.stamp
    }
}

impl<T: Eq> Eq for Sourced<T> {}

#[cfg(test)]
pub mod laws {
    use super::*;

    /// Verify register laws: associativity, commutativity, idempotence.
    pub fn check_register_laws<T: Register + PartialEq + Clone + Debug>(a: T, b: T, c: T) {
        // Idempotence
        assert_eq!(a.join(&a), a, "idempotence failed for {a:?}");

        // Commutativity
        assert_eq!(
            a.join(&b),
            b.join(&a),
            "commutativity failed for {a:?} and {b:?}"
        );

        // Associativity
        assert_eq!(
            a.join(&b).join(&c),
            a.join(&b.join(&c)),
            "associativity failed for {a:?}, {b:?}, {c:?}"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::identity::IdentityKey;
    use crate::core::time::EventTime;

    fn stamp(secs: u64, actor: u8) -> Stamp {
        Stamp::new(EventTime(secs), IdentityKey::from_bytes([actor; 32]))
    }

    #[test]
    fn network_outranks_newer_external() {
        let net = Sourced::new("a", Source::Network, stamp(10, 1));
        let ext = Sourced::new("b", Source::External, stamp(99, 2));
        assert_eq!(net.join(&ext).value, "a");
        assert_eq!(ext.join(&net).value, "a");
    }

    #[test]
    fn within_rank_later_stamp_wins() {
        let old = Sourced::new("old", Source::Network, stamp(10, 1));
        let new = Sourced::new("new", Source::Network, stamp(20, 1));
        assert_eq!(old.join(&new).value, "new");
    }

    #[test]
    fn register_laws_hold() {
        laws::check_register_laws(
            Sourced::new(1u32, Source::External, stamp(5, 3)),
            Sourced::new(2u32, Source::Local, stamp(3, 1)),
            Sourced::new(3u32, Source::Network, stamp(1, 2)),
        );
    }
}
