//! Record store: the single persistent collection abstraction.
//!
//! Every page-level cache the UI used to improvise is replaced by this one
//! store, keyed by (container, kind). Callers never touch raw storage keys.
//!
//! Merges are idempotent, id-for-id, and all-or-nothing: the batch is
//! vetted completely before the first entry mutates. Persistence goes
//! through the key-value collaborator and degrades on quota exhaustion by
//! re-persisting without large bodies - in-memory state is never dropped.

pub mod kv;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::collection::Collection;
use crate::core::container::ContainerRef;
use crate::core::domain::ResourceKind;
use crate::core::event::RecordPatch;
use crate::core::record::{Record, RecordId, SeqNo};
use crate::core::sequence;
use crate::error::{Effect, Transience};
use self::kv::{KeyValue, KvError};

/// Bump when the snapshot layout changes; stale snapshots are discarded and
/// rebuilt from the network rather than misread.
const SNAPSHOT_SCHEMA: u32 = 1;

/// Storage scope: one collection per (container, kind).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ScopeKey {
    pub container: ContainerRef,
    pub kind: ResourceKind,
}

impl ScopeKey {
    pub fn new(container: ContainerRef, kind: ResourceKind) -> Self {
        Self { container, kind }
    }

    fn storage_key(&self) -> String {
        format!(
            "records/{}/{}/{}",
            self.container.owner.to_hex(),
            self.container.name,
            self.kind.as_str()
        )
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.container, self.kind.as_str())
    }
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    schema: u32,
    collection: Collection,
}

/// How the post-merge persist went.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PersistOutcome {
    Stored,
    /// Quota forced a snapshot without record bodies.
    Degraded,
    /// Even the degraded snapshot failed; state is in memory only.
    InMemoryOnly,
}

/// What one merge call did.
#[derive(Clone, Debug, PartialEq)]
pub struct MergeReport {
    pub inserted: usize,
    pub updated: usize,
    pub suppressed: usize,
    pub dropped_stale: usize,
    pub collapsed: usize,
    pub assigned: Vec<(RecordId, SeqNo)>,
    pub seq_conflicts: Vec<SeqNo>,
    pub persisted: PersistOutcome,
}

impl MergeReport {
    pub fn changed(&self) -> bool {
        self.inserted + self.updated + self.suppressed + self.collapsed > 0
            || !self.assigned.is_empty()
    }
}

/// Merge refusal. The batch was rejected before any entry mutated.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("merge rejected: {reason}")]
    Rejected { reason: String },
}

impl StoreError {
    pub fn transience(&self) -> Transience {
        Transience::Permanent
    }

    pub fn effect(&self) -> Effect {
        // All-or-nothing: a rejected merge touched nothing.
        Effect::None
    }
}

/// The per-browser record store.
///
/// One mutex per scope serializes read-modify-write merges; different
/// scopes proceed independently. The key-value backend has its own short
/// lock, never held across a scope's critical section boundary waiting on
/// anything remote.
pub struct RecordStore {
    kv: Mutex<Box<dyn KeyValue>>,
    scopes: RwLock<BTreeMap<ScopeKey, Arc<Mutex<Collection>>>>,
    /// Bodies larger than this are omitted from degraded snapshots.
    persist_body_ceiling: usize,
}

impl RecordStore {
    pub fn new(kv: Box<dyn KeyValue>, persist_body_ceiling: usize) -> Self {
        Self {
            kv: Mutex::new(kv),
            scopes: RwLock::new(BTreeMap::new()),
            persist_body_ceiling,
        }
    }

    /// Live records for a scope, ordered by display number then creation.
    pub fn get(&self, scope: &ScopeKey) -> Vec<Record> {
        let cell = self.scope_cell(scope);
        let collection = cell.lock().expect("scope lock poisoned");
        let mut records: Vec<Record> = collection.iter_live().cloned().collect();
        records.sort_by(|a, b| {
            a.seq
                .cmp(&b.seq)
                .then_with(|| a.created.cmp(&b.created))
                .then_with(|| a.id.cmp(&b.id))
        });
        records
    }

    /// One record by id, if live.
    pub fn get_record(&self, scope: &ScopeKey, id: &RecordId) -> Option<Record> {
        let cell = self.scope_cell(scope);
        let collection = cell.lock().expect("scope lock poisoned");
        collection.get(id).cloned()
    }

    /// Merge a vetted batch of patches into a scope.
    ///
    /// Idempotent: merging the same batch twice leaves the same state as
    /// merging it once. All-or-nothing: validation happens before the first
    /// entry mutates, and application itself is infallible.
    pub fn merge(
        &self,
        scope: &ScopeKey,
        patches: &[RecordPatch],
    ) -> Result<MergeReport, StoreError> {
        for patch in patches {
            if patch.kind != scope.kind {
                return Err(StoreError::Rejected {
                    reason: format!(
                        "patch {} is a {}, scope holds {}",
                        patch.id,
                        patch.kind.as_str(),
                        scope.kind.as_str()
                    ),
                });
            }
            if let Some(phase) = patch.status
                && !phase.valid_for(patch.kind)
            {
                return Err(StoreError::Rejected {
                    reason: format!("patch {} carries an invalid status", patch.id),
                });
            }
        }

        let cell = self.scope_cell(scope);
        let mut collection = cell.lock().expect("scope lock poisoned");

        let mut outcome = crate::core::collection::ApplyOutcome::default();
        for patch in patches {
            outcome.absorb(collection.apply(patch, &scope.container));
        }
        let seq = sequence::fill_missing(&mut collection);

        let persisted = self.persist(scope, &collection);
        drop(collection);

        let report = MergeReport {
            inserted: outcome.inserted,
            updated: outcome.updated,
            suppressed: outcome.suppressed,
            dropped_stale: outcome.dropped_stale,
            collapsed: outcome.collapsed,
            assigned: seq.assigned,
            seq_conflicts: seq.conflicts,
            persisted,
        };
        tracing::debug!(
            scope = %scope,
            inserted = report.inserted,
            updated = report.updated,
            suppressed = report.suppressed,
            dropped = report.dropped_stale,
            "merge applied"
        );
        Ok(report)
    }

    fn scope_cell(&self, scope: &ScopeKey) -> Arc<Mutex<Collection>> {
        if let Some(cell) = self.scopes.read().expect("scope map poisoned").get(scope) {
            return Arc::clone(cell);
        }
        let hydrated = self.hydrate(scope);
        let mut scopes = self.scopes.write().expect("scope map poisoned");
        Arc::clone(
            scopes
                .entry(scope.clone())
                .or_insert_with(|| Arc::new(Mutex::new(hydrated))),
        )
    }

    fn hydrate(&self, scope: &ScopeKey) -> Collection {
        let raw = {
            let kv = self.kv.lock().expect("kv lock poisoned");
            kv.get(&scope.storage_key())
        };
        let Some(raw) = raw else {
            return Collection::new();
        };
        match serde_json::from_str::<Snapshot>(&raw) {
            Ok(snapshot) if snapshot.schema == SNAPSHOT_SCHEMA => snapshot.collection,
            Ok(snapshot) => {
                tracing::warn!(
                    scope = %scope,
                    schema = snapshot.schema,
                    "discarding snapshot with stale schema"
                );
                Collection::new()
            }
            Err(err) => {
                tracing::warn!(scope = %scope, %err, "discarding unreadable snapshot");
                Collection::new()
            }
        }
    }

    fn persist(&self, scope: &ScopeKey, collection: &Collection) -> PersistOutcome {
        let key = scope.storage_key();
        match self.try_persist(&key, collection) {
            Ok(()) => PersistOutcome::Stored,
            Err(KvError::QuotaExceeded) => {
                let slim = slim_copy(collection, self.persist_body_ceiling);
                match self.try_persist(&key, &slim) {
                    Ok(()) => {
                        tracing::warn!(scope = %scope, "quota exceeded, persisted without large bodies");
                        PersistOutcome::Degraded
                    }
                    Err(err) => {
                        tracing::warn!(scope = %scope, %err, "persist failed, state in memory only");
                        PersistOutcome::InMemoryOnly
                    }
                }
            }
            Err(err) => {
                tracing::warn!(scope = %scope, %err, "persist failed, state in memory only");
                PersistOutcome::InMemoryOnly
            }
        }
    }

    fn try_persist(&self, key: &str, collection: &Collection) -> Result<(), KvError> {
        let snapshot = Snapshot {
            schema: SNAPSHOT_SCHEMA,
            collection: collection.clone(),
        };
        let json = serde_json::to_string(&snapshot).map_err(|err| KvError::Backend {
            reason: err.to_string(),
        })?;
        let mut kv = self.kv.lock().expect("kv lock poisoned");
        kv.set(key, &json)
    }
}

/// Copy of the collection with oversized bodies dropped, for degraded
/// persistence. The full bodies stay in memory.
fn slim_copy(collection: &Collection, body_ceiling: usize) -> Collection {
    let mut slim = collection.clone();
    for record in slim.iter_live_mut() {
        if record.payload.body.value.len() > body_ceiling {
            record.payload.body.value = String::new();
        }
    }
    slim
}
