#![forbid(unsafe_code)]

pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod store;
pub mod telemetry;

pub use config::Config;
pub use error::{Effect, Error, Transience};
pub type Result<T> = std::result::Result<T, Error>;

// Re-export core types at crate root for convenience
pub use crate::core::{
    Collection, ContainerRef, Contributors, ContributorEntry, CoreError, Detail, EventAction,
    EventId, EventTime, IdentityKey, LocalDraft, MaintainerTier, NetworkEvent, PatchFields, Payload,
    Phase, PolledRecord, Profile, ProfileDirectory, Record, RecordEntry, RecordId, RecordPatch,
    RepoName, ResourceKind, Role, SeqNo, Source, Sourced, Stamp, StatusTrack, Tombstone, Weight,
    WirePayload, display_label, resolve, vet_container, vet_owner,
};
pub use crate::engine::sources::{
    PollClient, PollError, PublishError, PublishRequest, Publisher, PushSubscription,
    SubscribeError, SubscriptionFilter,
};
pub use crate::engine::intake::{EventSink, Intake};
pub use crate::engine::{IngestReport, ReconciliationEngine, SubmitReceipt};
pub use crate::store::kv::{KeyValue, KvError, MemoryKv};
pub use crate::store::{MergeReport, PersistOutcome, RecordStore, ScopeKey, StoreError};
