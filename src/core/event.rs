//! Layer 9: Ingestion events
//!
//! Everything entering the engine is normalized here, once, into a
//! [`RecordPatch`]. Three producers exist: signed network events (push
//! subscription), externally numbered records (poll), and locally authored
//! drafts. Legacy wire payloads are resolved to the structured form at this
//! boundary and never re-sniffed downstream.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::container::ContainerRef;
use super::domain::{Phase, ResourceKind};
use super::error::EventError;
use super::identity::IdentityKey;
use super::permission::Contributors;
use super::record::{Detail, Payload, Record, RecordId};
use super::source::{Source, Sourced};
use super::status::StatusTrack;
use super::time::{EventTime, Stamp};
use super::tombstone::Tombstone;

/// Network event identifier - 64 lowercase hex chars.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    pub fn parse(s: &str) -> Result<Self, EventError> {
        if s.len() != 64 {
            return Err(EventError::InvalidEventId {
                raw: s.to_string(),
                reason: format!("must be 64 hex chars (got {})", s.len()),
            });
        }
        if !s
            .bytes()
            .all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
        {
            return Err(EventError::InvalidEventId {
                raw: s.to_string(),
                reason: "must be lowercase hex".into(),
            });
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EventId({})", self.0)
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a network event does.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum EventAction {
    /// Create the record if it does not exist. Creation is not a status
    /// transition: on an existing record only the fields merge.
    Announce,
    /// Field edit of an existing record.
    Edit,
    /// Dedicated status transition.
    Status { phase: Phase },
    /// Deletion marker - tombstones the record unconditionally.
    Remove { reason: Option<String> },
}

/// Field values carried by an event, all optional.
///
/// Unknown keys are rejected so the untagged wire decode falls through to
/// the legacy arm instead of silently matching a legacy tag map here.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PatchFields {
    pub title: Option<String>,
    pub body: Option<String>,
    /// Inline status, as legacy combined edit+status events carry it.
    pub status: Option<Phase>,
    pub clone_urls: Option<Vec<String>>,
    pub web_urls: Option<Vec<String>>,
    pub base_branch: Option<String>,
    pub contributors: Option<Contributors>,
    pub commit_id: Option<String>,
    pub external_number: Option<u64>,
}

/// Wire payload: structured, or the legacy tag map.
///
/// Resolved exactly once at ingestion; nothing downstream sees `Legacy`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WirePayload {
    Structured(PatchFields),
    Legacy(Value),
}

impl WirePayload {
    pub fn resolve(self) -> Result<PatchFields, EventError> {
        match self {
            Self::Structured(fields) => Ok(fields),
            Self::Legacy(value) => resolve_legacy(&value),
        }
    }
}

fn resolve_legacy(value: &Value) -> Result<PatchFields, EventError> {
    let map = value.as_object().ok_or_else(|| EventError::MalformedLegacy {
        reason: "payload is not an object".into(),
    })?;

    let mut fields = PatchFields::default();
    if let Some(v) = map.get("subjectTag") {
        fields.title = Some(string_field(v, "subjectTag")?);
    }
    if let Some(v) = map.get("contentTag") {
        fields.body = Some(string_field(v, "contentTag")?);
    }
    if let Some(v) = map.get("statusTag") {
        fields.status = Some(Phase::parse(&string_field(v, "statusTag")?)?);
    }
    if let Some(v) = map.get("numberTag") {
        fields.external_number = v.as_u64();
    }
    Ok(fields)
}

fn string_field(value: &Value, key: &str) -> Result<String, EventError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| EventError::MalformedLegacy {
            reason: format!("`{key}` is not a string"),
        })
}

/// A signed event as delivered by the push subscription, container still
/// unresolved. Duplicate delivery of the same id must be tolerated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NetworkEvent {
    pub id: EventId,
    pub author: IdentityKey,
    pub at: EventTime,
    /// Opaque owner entity reference; resolved through the guard.
    pub owner_entity: String,
    pub repo: String,
    pub kind: ResourceKind,
    pub action: EventAction,
    /// The record this event addresses. None on announce (the event id
    /// becomes the record id).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub target: Option<RecordId>,
    /// Echo of the local draft id this event confirms, if any.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub client_ref: Option<String>,
    pub payload: WirePayload,
}

impl NetworkEvent {
    /// Record id this event addresses.
    pub fn record_id(&self) -> RecordId {
        self.target
            .clone()
            .unwrap_or_else(|| RecordId::Event(self.id.as_str().to_string()))
    }
}

/// An externally numbered record as returned by the poll collaborator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PolledRecord {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: String,
    /// Raw status string from the mirror API.
    pub state: String,
    /// The mirror rarely knows the network identity of the author.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub author: Option<IdentityKey>,
    pub created_secs: u64,
}

/// A locally authored record, pending network confirmation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocalDraft {
    pub kind: ResourceKind,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub base_branch: Option<String>,
}

/// The normalized unit of merge: one change to one record.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordPatch {
    pub id: RecordId,
    pub kind: ResourceKind,
    pub source: Source,
    pub author: IdentityKey,
    pub at: EventTime,
    /// Create the record if missing (fields only when it exists).
    pub establish: bool,
    pub fields: PatchFields,
    /// Requested status transition (network) or snapshot (external).
    pub status: Option<Phase>,
    /// Tombstone the record. Sticky; ignores timestamps.
    pub tombstone: Option<Option<String>>,
    /// Draft id this patch supersedes (network confirmation of a local
    /// pending record).
    pub supersedes: Option<RecordId>,
}

impl RecordPatch {
    pub fn stamp(&self) -> Stamp {
        Stamp::new(self.at, self.author)
    }

    /// Normalize a network event. The caller has already vetted the
    /// container; this validates payload and status against the kind.
    pub fn from_network(event: NetworkEvent) -> Result<Self, EventError> {
        let id = event.record_id();
        let fields = event.payload.resolve()?;

        let (establish, status, tombstone) = match &event.action {
            EventAction::Announce => (true, fields.status, None),
            EventAction::Edit => (false, fields.status, None),
            EventAction::Status { phase } => (false, Some(*phase), None),
            EventAction::Remove { reason } => (false, None, Some(reason.clone())),
        };

        if let Some(phase) = status
            && !phase.valid_for(event.kind)
        {
            return Err(EventError::MergedUnsupported {
                kind: event.kind.as_str(),
            });
        }

        let supersedes = match &event.client_ref {
            Some(client) => {
                let client_id = RecordId::parse(client)?;
                (client_id != id).then_some(client_id)
            }
            None => None,
        };

        Ok(Self {
            id,
            kind: event.kind,
            source: Source::Network,
            author: event.author,
            at: event.at,
            establish,
            fields,
            status,
            tombstone,
            supersedes,
        })
    }

    /// Normalize a polled record. `owner` stands in for the author when the
    /// mirror does not know the network identity.
    pub fn from_polled(
        polled: PolledRecord,
        kind: ResourceKind,
        owner: IdentityKey,
    ) -> Result<Self, EventError> {
        let phase = Phase::parse(&polled.state)?;
        if !phase.valid_for(kind) {
            return Err(EventError::MergedUnsupported {
                kind: kind.as_str(),
            });
        }
        Ok(Self {
            id: RecordId::External(polled.number),
            kind,
            source: Source::External,
            author: polled.author.unwrap_or(owner),
            at: EventTime(polled.created_secs),
            establish: true,
            fields: PatchFields {
                title: Some(polled.title),
                body: Some(polled.body),
                external_number: Some(polled.number),
                ..PatchFields::default()
            },
            status: Some(phase),
            tombstone: None,
            supersedes: None,
        })
    }

    /// Normalize a local draft into an optimistic pending patch.
    pub fn from_draft(draft: LocalDraft, author: IdentityKey, at: EventTime) -> Self {
        Self {
            id: RecordId::generate_local(),
            kind: draft.kind,
            source: Source::Local,
            author,
            at,
            establish: true,
            fields: PatchFields {
                title: Some(draft.title),
                body: Some(draft.body),
                base_branch: draft.base_branch,
                ..PatchFields::default()
            },
            status: None,
            tombstone: None,
            supersedes: None,
        }
    }

    /// Build a fresh record from an establishing patch.
    ///
    /// Fields the patch does not carry are stamped at the floor (lowest
    /// source, time zero) so any real write beats the default regardless of
    /// arrival order - a status event materializing a skeleton ahead of its
    /// create must not shadow the create's field values.
    pub fn materialize(&self, container: &ContainerRef) -> Record {
        let stamp = self.stamp();
        let floor = Stamp::new(EventTime(0), self.author);
        let carried = |provided: bool| -> (Source, Stamp) {
            if provided {
                (self.source, stamp.clone())
            } else {
                (Source::External, floor.clone())
            }
        };

        let title = {
            let (source, at) = carried(self.fields.title.is_some());
            Sourced::new(self.fields.title.clone().unwrap_or_default(), source, at)
        };
        let body = {
            let (source, at) = carried(self.fields.body.is_some());
            Sourced::new(self.fields.body.clone().unwrap_or_default(), source, at)
        };

        let detail = match self.kind {
            ResourceKind::Repository => {
                let (clone_source, clone_at) = carried(self.fields.clone_urls.is_some());
                let (web_source, web_at) = carried(self.fields.web_urls.is_some());
                let (list_source, list_at) = carried(self.fields.contributors.is_some());
                Detail::Repository {
                    clone_urls: Sourced::new(
                        self.fields.clone_urls.clone().unwrap_or_default(),
                        clone_source,
                        clone_at,
                    ),
                    web_urls: Sourced::new(
                        self.fields.web_urls.clone().unwrap_or_default(),
                        web_source,
                        web_at,
                    ),
                    contributors: Sourced::new(
                        self.fields
                            .contributors
                            .clone()
                            .unwrap_or_else(|| Contributors::solo(container.owner)),
                        list_source,
                        list_at,
                    ),
                }
            }
            ResourceKind::Issue => Detail::Issue,
            ResourceKind::Patch => {
                let (source, at) = carried(self.fields.base_branch.is_some());
                Detail::Patch {
                    base_branch: Sourced::new(self.fields.base_branch.clone(), source, at),
                }
            }
            ResourceKind::Discussion => Detail::Discussion,
            ResourceKind::Commit => Detail::Commit {
                commit_id: self.fields.commit_id.clone(),
            },
        };

        let status = match (self.source, self.status) {
            (Source::External, Some(phase)) => StatusTrack::from_external(phase),
            (_, Some(phase)) => {
                let mut track = StatusTrack::open();
                // Validated against the kind at normalization.
                let _ = track.apply_network(phase, stamp.clone(), self.kind);
                track
            }
            (_, None) => StatusTrack::open(),
        };

        Record {
            id: self.id.clone(),
            container: container.clone(),
            author: self.author,
            created: stamp.clone(),
            payload: Payload {
                title,
                body,
                detail,
            },
            status,
            external_number: self.fields.external_number,
            seq: None,
            seq_conflict: false,
            supersedes: self.supersedes.clone(),
        }
    }

    /// Build the tombstone this patch carries, if any.
    pub fn tombstone_marker(&self) -> Option<Tombstone> {
        self.tombstone
            .as_ref()
            .map(|reason| Tombstone::new(self.id.clone(), self.stamp(), reason.clone()))
    }
}
