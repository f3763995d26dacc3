//! Collaborator seams: the three external parties the engine talks to.
//!
//! All of them are opaque to the engine. The push subscription delivers
//! signed events (duplicates and arbitrary order included); the poll client
//! pulls externally numbered records from the centralized mirror; the
//! publisher signs and ships locally constructed records. The engine shapes
//! payloads and merges results - it never signs and never rate-limits.

use std::time::Duration;

use thiserror::Error;

use crate::core::container::ContainerRef;
use crate::core::domain::ResourceKind;
use crate::core::event::{EventAction, EventId, PatchFields, PolledRecord};
use crate::core::identity::IdentityKey;
use crate::core::record::RecordId;
use crate::core::time::EventTime;
use crate::engine::intake::EventSink;
use crate::error::{Effect, Transience};

/// What a subscription should deliver.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubscriptionFilter {
    /// Container owners of interest. Empty means all.
    pub owners: Vec<IdentityKey>,
    /// Resource kinds of interest. Empty means all.
    pub kinds: Vec<ResourceKind>,
}

/// Subscription setup failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("subscription failed: {reason}")]
pub struct SubscribeError {
    pub reason: String,
}

/// Push delivery of matching network events.
///
/// Callback ordering across endpoints is not guaranteed and the same event
/// id may be delivered more than once; the merge path is idempotent, so
/// implementations need not deduplicate.
pub trait PushSubscription: Send + Sync {
    fn subscribe(&self, filter: SubscriptionFilter, sink: EventSink) -> Result<(), SubscribeError>;
}

/// Poll failure. Timeouts are retryable and must leave the store untouched;
/// the caller keeps serving cached data.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PollError {
    #[error("poll timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },
    #[error("poll upstream failed: {reason}")]
    Upstream { reason: String },
}

impl PollError {
    pub fn transience(&self) -> Transience {
        match self {
            Self::Timeout { .. } => Transience::Retryable,
            Self::Upstream { .. } => Transience::Unknown,
        }
    }

    pub fn effect(&self) -> Effect {
        // A failed poll merges nothing.
        Effect::None
    }
}

/// Pull of externally numbered records for one container scope.
pub trait PollClient: Send + Sync {
    fn fetch(
        &self,
        container: &ContainerRef,
        kind: ResourceKind,
        timeout: Duration,
    ) -> Result<Vec<PolledRecord>, PollError>;
}

/// A constructed record handed to the signing/publish collaborator.
#[derive(Clone, Debug, PartialEq)]
pub struct PublishRequest {
    pub container: ContainerRef,
    pub kind: ResourceKind,
    pub action: EventAction,
    /// Record the event addresses, when it is not a fresh announce.
    pub target: Option<RecordId>,
    /// Local draft id the published event should confirm.
    pub client_ref: Option<String>,
    pub fields: PatchFields,
    pub at: EventTime,
}

/// Publish failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("signing rejected: {reason}")]
    Signing { reason: String },
    #[error("publish failed: {reason}")]
    Relay { reason: String },
}

impl PublishError {
    pub fn transience(&self) -> Transience {
        match self {
            Self::Signing { .. } => Transience::Permanent,
            Self::Relay { .. } => Transience::Retryable,
        }
    }

    pub fn effect(&self) -> Effect {
        // The event may or may not have reached the network.
        Effect::Unknown
    }
}

/// Signs and publishes a shaped record, returning the network event id.
pub trait Publisher: Send + Sync {
    fn publish(&self, request: &PublishRequest) -> Result<EventId, PublishError>;
}
