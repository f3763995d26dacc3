//! Layer 6: Tombstone
//!
//! Terminal, sticky deletion marker for a record. A tombstone is itself a
//! record: it survives re-delivery of older non-deletion events for the
//! same id permanently.

use serde::{Deserialize, Serialize};

use super::record::RecordId;
use super::time::Stamp;

/// Sticky deletion marker.
///
/// Merge: keep later deletion stamp. Stickiness is structural - the store
/// entry enum has no transition out of the tombstoned variant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    pub id: RecordId,
    pub deleted: Stamp,
    pub reason: Option<String>,
}

impl Tombstone {
    pub fn new(id: RecordId, deleted: Stamp, reason: Option<String>) -> Self {
        Self {
            id,
            deleted,
            reason,
        }
    }

    /// Merge: keep later deletion stamp.
    pub fn join(a: &Self, b: &Self) -> Self {
        debug_assert_eq!(a.id, b.id, "join requires same id");
        if a.deleted >= b.deleted {
            a.clone()
        } else {
            b.clone()
        }
    }
}
