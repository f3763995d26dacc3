//! Layer 8: The Record
//!
//! One logical entity (repository, issue, patch, discussion, commit) as the
//! engine stores it: a stable identifier, immutable provenance, sourced
//! mutable fields, and the status track. Records from different sources
//! collapse into one when they share an id, an external number, or a
//! content fingerprint.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::container::ContainerRef;
use super::domain::{Phase, ResourceKind};
use super::error::EventError;
use super::identity::IdentityKey;
use super::permission::Contributors;
use super::source::{Register, Sourced};
use super::status::StatusTrack;
use super::time::Stamp;

/// Stable record identifier.
///
/// Classification is by shape, applied once at parse: 64 lowercase hex
/// chars is a network event id, all-digits is an externally sourced numeric
/// id, anything else non-empty is a locally generated draft id.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RecordId {
    Event(String),
    Local(String),
    External(u64),
}

impl RecordId {
    pub fn parse(s: &str) -> Result<Self, EventError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(EventError::InvalidRecordId {
                raw: s.to_string(),
                reason: "empty".into(),
            });
        }
        if s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
            return Ok(Self::Event(s.to_string()));
        }
        if s.bytes().all(|b| b.is_ascii_digit()) {
            let n = s.parse::<u64>().map_err(|_| EventError::InvalidRecordId {
                raw: s.to_string(),
                reason: "numeric id out of range".into(),
            })?;
            return Ok(Self::External(n));
        }
        Ok(Self::Local(s.to_string()))
    }

    /// Generate a fresh draft id for a locally authored record.
    pub fn generate_local() -> Self {
        Self::Local(format!("local-{}", Uuid::new_v4().simple()))
    }

    /// Canonical string form - the store key within a collection.
    pub fn canonical(&self) -> String {
        match self {
            Self::Event(hex) => hex.clone(),
            Self::Local(s) => s.clone(),
            Self::External(n) => n.to_string(),
        }
    }

    pub fn is_network(&self) -> bool {
        matches!(self, Self::Event(_))
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Event(hex) => write!(f, "RecordId::Event({hex})"),
            Self::Local(s) => write!(f, "RecordId::Local({s})"),
            Self::External(n) => write!(f, "RecordId::External({n})"),
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

impl TryFrom<String> for RecordId {
    type Error = EventError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        RecordId::parse(&s)
    }
}

impl From<RecordId> for String {
    fn from(id: RecordId) -> String {
        id.canonical()
    }
}

/// Human-facing display sequence number, assigned once, never reassigned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeqNo(pub u64);

impl fmt::Display for SeqNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Content fingerprint for cross-source collapse when no shared id exists.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

/// Kind-specific payload extras.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Detail {
    Repository {
        clone_urls: Sourced<Vec<String>>,
        web_urls: Sourced<Vec<String>>,
        contributors: Sourced<Contributors>,
    },
    Issue,
    Patch {
        base_branch: Sourced<Option<String>>,
    },
    Discussion,
    Commit {
        commit_id: Option<String>,
    },
}

impl Detail {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Repository { .. } => ResourceKind::Repository,
            Self::Issue => ResourceKind::Issue,
            Self::Patch { .. } => ResourceKind::Patch,
            Self::Discussion => ResourceKind::Discussion,
            Self::Commit { .. } => ResourceKind::Commit,
        }
    }

    /// Per-field join. Mismatched variants cannot occur within one
    /// collection; the left side is kept if they somehow do.
    pub fn join(a: &Self, b: &Self) -> Self {
        match (a, b) {
            (
                Self::Repository {
                    clone_urls: ca,
                    web_urls: wa,
                    contributors: ma,
                },
                Self::Repository {
                    clone_urls: cb,
                    web_urls: wb,
                    contributors: mb,
                },
            ) => Self::Repository {
                clone_urls: ca.join(cb),
                web_urls: wa.join(wb),
                contributors: ma.join(mb),
            },
            (Self::Patch { base_branch: ba }, Self::Patch { base_branch: bb }) => Self::Patch {
                base_branch: ba.join(bb),
            },
            (Self::Commit { commit_id: ca }, Self::Commit { commit_id: cb }) => Self::Commit {
                commit_id: ca.clone().or_else(|| cb.clone()),
            },
            _ => {
                debug_assert_eq!(a.kind(), b.kind(), "join requires same kind");
                a.clone()
            }
        }
    }
}

/// Mutable record fields, each a sourced register.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub title: Sourced<String>,
    pub body: Sourced<String>,
    pub detail: Detail,
}

impl Payload {
    pub fn join(a: &Self, b: &Self) -> Self {
        Self {
            title: a.title.join(&b.title),
            body: a.body.join(&b.body),
            detail: Detail::join(&a.detail, &b.detail),
        }
    }
}

/// The record: immutable provenance + sourced fields + status track.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub container: ContainerRef,
    pub author: IdentityKey,
    pub created: Stamp,
    pub payload: Payload,
    pub status: StatusTrack,
    /// Numeric id assigned by the polled API, if this entity exists there.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub external_number: Option<u64>,
    /// Display sequence number. Assigned once; never reassigned.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub seq: Option<SeqNo>,
    /// Set when this record's number collides with an externally sourced
    /// one; both keep their numbers and surface the flag instead.
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub seq_conflict: bool,
    /// Draft id this record absorbed during cross-source collapse, kept so
    /// optimistic UI references can be remapped.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub supersedes: Option<RecordId>,
}

impl Record {
    pub fn kind(&self) -> ResourceKind {
        self.payload.detail.kind()
    }

    pub fn title(&self) -> &str {
        &self.payload.title.value
    }

    pub fn body(&self) -> &str {
        &self.payload.body.value
    }

    pub fn phase(&self) -> Phase {
        self.status.phase
    }

    /// Content fingerprint over the identity-bearing fields.
    ///
    /// Deliberately excludes mutable body text: two sources describing the
    /// same entity agree on author, original title, and creation time.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut h = Sha256::new();
        h.update(self.kind().as_str().as_bytes());
        h.update([0]);
        h.update(self.author.as_bytes());
        h.update([0]);
        h.update(self.payload.title.value.as_bytes());
        h.update([0]);
        h.update(self.created.at.secs().to_string().as_bytes());
        Fingerprint(h.finalize().into())
    }

    /// Collapse `other` into this record (same logical entity).
    ///
    /// `self` keeps its identity; fields and status merge, and the earliest
    /// creation stamp wins as provenance. Sequence numbers are assigned
    /// once: an already present number is never replaced.
    pub fn absorb(&mut self, other: Record) {
        self.payload = Payload::join(&self.payload, &other.payload);
        self.status = StatusTrack::join(&self.status, &other.status);
        if other.created < self.created {
            self.created = other.created;
        }
        if self.external_number.is_none() {
            self.external_number = other.external_number;
        }
        if self.seq.is_none() {
            self.seq = other.seq;
        }
        self.seq_conflict |= other.seq_conflict;
        if self.supersedes.is_none() {
            self.supersedes = match other.id {
                RecordId::Local(_) => Some(other.id),
                _ => other.supersedes,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_id_classification() {
        let hex = "a".repeat(64);
        assert!(matches!(RecordId::parse(&hex).unwrap(), RecordId::Event(_)));
        assert_eq!(RecordId::parse("17").unwrap(), RecordId::External(17));
        assert!(matches!(
            RecordId::parse("local-1").unwrap(),
            RecordId::Local(_)
        ));
        assert!(RecordId::parse("  ").is_err());
    }

    #[test]
    fn record_id_canonical_roundtrip() {
        for raw in [&"b".repeat(64), "42", "local-abc"] {
            let id = RecordId::parse(raw).unwrap();
            assert_eq!(RecordId::parse(&id.canonical()).unwrap(), id);
        }
    }

    #[test]
    fn generated_local_ids_are_distinct() {
        assert_ne!(RecordId::generate_local(), RecordId::generate_local());
    }
}
