//! Core domain types for the sync engine (Layers 0-12)
//!
//! Module hierarchy follows type dependency order:
//! - time: event-carried timestamps (Layer 0)
//! - identity: IdentityKey, entity resolution (Layer 1)
//! - domain: ResourceKind, Phase (Layer 2)
//! - source: Source precedence, Sourced<T> register (Layer 3)
//! - status: StatusTrack state machine (Layer 4)
//! - container: ContainerRef + ownership guard (Layer 5)
//! - tombstone: sticky deletion marker (Layer 6)
//! - permission: roles, weighted contributors (Layer 7)
//! - record: Record, RecordId, payloads (Layer 8)
//! - event: ingestion normalization into RecordPatch (Layer 9)
//! - collection: canonical per-scope state (Layer 10)
//! - sequence: display number assignment (Layer 11)
//! - profile: profiles + display projection (Layer 12)

pub mod collection;
pub mod container;
pub mod domain;
pub mod error;
pub mod event;
pub mod identity;
pub mod permission;
pub mod profile;
pub mod record;
pub mod sequence;
pub mod source;
pub mod status;
pub mod time;
pub mod tombstone;

pub use collection::{ApplyOutcome, Collection, RecordEntry};
pub use container::{ContainerRef, RepoName, RESERVED_OWNERS, vet_container, vet_owner};
pub use domain::{Phase, ResourceKind};
pub use error::{
    CoreError, EventError, GuardError, IdentityError, PermissionError, RangeError,
};
pub use event::{
    EventAction, EventId, LocalDraft, NetworkEvent, PatchFields, PolledRecord, RecordPatch,
    WirePayload,
};
pub use identity::{ENCODED_HRP, IdentityKey, resolve};
pub use permission::{
    Contributors, ContributorEntry, MaintainerTier, Role, RoleTag, Weight, require_role,
};
pub use profile::{Profile, ProfileDirectory, display_label};
pub use record::{Detail, Fingerprint, Payload, Record, RecordId, SeqNo};
pub use sequence::{SeqReport, fill_missing, next_seq};
pub use source::{Register, Source, Sourced};
pub use status::StatusTrack;
pub use time::{EventTime, Stamp};
pub use tombstone::Tombstone;
