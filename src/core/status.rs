//! Layer 4: Status state machine
//!
//! A record's status is the one field that does not follow plain field
//! precedence. Network delivery is unordered, so transitions are gated on
//! the event's own timestamp: an older status event arriving late must not
//! regress state. Once any network status event has applied, the network is
//! authoritative and polled-source status is ignored for that record.
//!
//! Deletion is handled one layer up (store entries go tombstoned, sticky);
//! this module only tracks live-record status.

use serde::{Deserialize, Serialize};

use super::domain::{Phase, ResourceKind};
use super::error::EventError;
use super::time::Stamp;

/// Live-record status plus the bookkeeping the transition rules need.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTrack {
    pub phase: Phase,
    /// Stamp of the last applied network transition. None until one applies.
    transitioned: Option<Stamp>,
    /// True once a network status event has been applied; polled updates
    /// are ignored from then on.
    authoritative: bool,
}

impl StatusTrack {
    /// State established by a create event: open, no transitions yet.
    pub fn open() -> Self {
        Self {
            phase: Phase::Open,
            transitioned: None,
            authoritative: false,
        }
    }

    /// State adopted from a polled record that has no network history yet.
    pub fn from_external(phase: Phase) -> Self {
        Self {
            phase,
            transitioned: None,
            authoritative: false,
        }
    }

    pub fn is_authoritative(&self) -> bool {
        self.authoritative
    }

    pub fn transitioned(&self) -> Option<&Stamp> {
        self.transitioned.as_ref()
    }

    /// Apply a network status event.
    ///
    /// Returns Ok(true) if the transition applied, Ok(false) if it was
    /// dropped as older than (or a duplicate of) the last applied one.
    pub fn apply_network(
        &mut self,
        phase: Phase,
        stamp: Stamp,
        kind: ResourceKind,
    ) -> Result<bool, EventError> {
        if !phase.valid_for(kind) {
            return Err(EventError::MergedUnsupported {
                kind: kind.as_str(),
            });
        }
        if let Some(prev) = &self.transitioned
            && stamp <= *prev
        {
            return Ok(false);
        }
        self.phase = phase;
        self.transitioned = Some(stamp);
        self.authoritative = true;
        Ok(true)
    }

    /// Apply a polled-source status snapshot.
    ///
    /// Only honored while no network status event has been observed.
    pub fn apply_external(&mut self, phase: Phase) -> bool {
        if self.authoritative {
            return false;
        }
        let changed = self.phase != phase;
        self.phase = phase;
        changed
    }

    /// Merge two tracks for the same logical record (cross-source collapse).
    ///
    /// Authoritative beats non-authoritative; between two authoritative
    /// tracks the later transition wins. Between two non-authoritative
    /// tracks the choice is arbitrary but must be deterministic, so the
    /// higher phase ordinal is kept.
    pub fn join(a: &Self, b: &Self) -> Self {
        match (a.authoritative, b.authoritative) {
            (true, false) => a.clone(),
            (false, true) => b.clone(),
            (true, true) => {
                if a.transitioned >= b.transitioned {
                    a.clone()
                } else {
                    b.clone()
                }
            }
            (false, false) => {
                if (a.phase as u8) >= (b.phase as u8) {
                    a.clone()
                } else {
                    b.clone()
                }
            }
        }
    }
}

impl Default for StatusTrack {
    fn default() -> Self {
        Self::open()
    }
}
