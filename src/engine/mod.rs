//! Reconciliation engine: the one merge path every page shares.
//!
//! Three event streams (local authored edits, push subscription, poll)
//! converge here into the record store under the at-most-one-writer-per-
//! scope rule. Guards and permission checks run before anything mutates;
//! anomalous events (well-formed, unknown container) are absorbed and
//! logged, never surfaced as user-visible failures.
//!
//! Locking model: the store serializes read-modify-write per (container,
//! kind) scope. The engine never holds a scope lock across network I/O -
//! polls and publishes happen outside the critical section.

pub mod intake;
pub mod sources;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::config::Config;
use crate::core::container::{self, ContainerRef};
use crate::core::domain::{Phase, ResourceKind};
use crate::core::error::{GuardError, IdentityError};
use crate::core::event::{
    EventAction, EventId, LocalDraft, NetworkEvent, PatchFields, RecordPatch,
};
use crate::core::identity::{self, IdentityKey};
use crate::core::permission::{self, Contributors, ContributorEntry, Role};
use crate::core::profile::{self, Profile, ProfileDirectory};
use crate::core::record::{Record, RecordId};
use crate::core::source::Source;
use crate::core::time::EventTime;
use crate::store::kv::KeyValue;
use crate::store::{MergeReport, RecordStore, ScopeKey};
use crate::Result;
use self::intake::Intake;
use self::sources::{
    PollClient, PublishRequest, Publisher, PushSubscription, SubscribeError, SubscriptionFilter,
};

/// What one ingest pass did.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub merged: Vec<(ScopeKey, MergeReport)>,
    /// Events dropped as noise: unresolvable container or malformed payload.
    pub anomalies: usize,
}

/// Outcome of submitting a local draft.
#[derive(Debug)]
pub struct SubmitReceipt {
    /// The optimistic pending record, already merged and numbered.
    pub record: Record,
    /// Set when the publish collaborator accepted the event. None means the
    /// record stays local-pending; the network confirmation collapses it
    /// later once a relay accepts a retry.
    pub event_id: Option<EventId>,
}

pub struct ReconciliationEngine {
    store: RecordStore,
    poll: Box<dyn PollClient>,
    publisher: Box<dyn Publisher>,
    profiles: RwLock<ProfileDirectory>,
    known: RwLock<BTreeSet<IdentityKey>>,
    config: Config,
}

impl ReconciliationEngine {
    pub fn new(
        kv: Box<dyn KeyValue>,
        poll: Box<dyn PollClient>,
        publisher: Box<dyn Publisher>,
        config: Config,
    ) -> Self {
        let store = RecordStore::new(kv, config.limits.persist_body_max_bytes);
        Self {
            store,
            poll,
            publisher,
            profiles: RwLock::new(ProfileDirectory::new()),
            known: RwLock::new(BTreeSet::new()),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // =========================================================================
    // Identity
    // =========================================================================

    /// Record that an identity exists (feeds legacy prefix resolution).
    pub fn note_identity(&self, key: IdentityKey) {
        self.known.write().expect("known set poisoned").insert(key);
    }

    /// Merge profile metadata for an identity (newer stamp wins).
    pub fn note_profile(&self, key: IdentityKey, profile: Profile) {
        self.note_identity(key);
        self.profiles
            .write()
            .expect("profile directory poisoned")
            .upsert(key, profile);
    }

    /// Canonicalize an opaque entity reference.
    pub fn resolve_entity(&self, raw: &str) -> std::result::Result<IdentityKey, IdentityError> {
        let known = self.known.read().expect("known set poisoned");
        identity::resolve(raw, &known)
    }

    /// Human-readable label for an identity.
    pub fn display(&self, key: Option<&IdentityKey>, fallback: &str) -> String {
        let profiles = self.profiles.read().expect("profile directory poisoned");
        profile::display_label(key, &profiles, fallback)
    }

    // =========================================================================
    // Guard
    // =========================================================================

    /// The single choke point turning untrusted (owner, name) strings into
    /// a store key. Every mutating entry point calls this or receives an
    /// already-vetted [`ContainerRef`].
    pub fn vet(&self, owner_entity: &str, name: &str) -> std::result::Result<ContainerRef, GuardError> {
        let known = self.known.read().expect("known set poisoned");
        container::vet_container(owner_entity, name, &known, &self.config.reserved_owners)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Live records for a scope, tombstones suppressed, numbers filled.
    pub fn load(&self, scope: &ScopeKey) -> Vec<Record> {
        self.store.get(scope)
    }

    pub fn load_record(&self, scope: &ScopeKey, id: &RecordId) -> Option<Record> {
        self.store.get_record(scope, id)
    }

    /// Effective role of an identity against a container.
    pub fn role_of(&self, container: &ContainerRef, key: &IdentityKey) -> Role {
        self.contributors_for(container)
            .role_of(key, self.config.maintainer_tier)
    }

    // =========================================================================
    // Network ingestion
    // =========================================================================

    /// Merge a batch of push-delivered events.
    ///
    /// Events that cannot be attributed to a resolvable container, or whose
    /// payload fails normalization, are dropped and logged; they never
    /// abort their siblings.
    pub fn ingest(&self, events: Vec<NetworkEvent>) -> IngestReport {
        let mut report = IngestReport::default();
        let mut grouped: BTreeMap<ScopeKey, Vec<RecordPatch>> = BTreeMap::new();

        for event in events {
            self.note_identity(event.author);

            let container = match self.vet(&event.owner_entity, &event.repo) {
                Ok(container) => container,
                Err(err) => {
                    tracing::warn!(event = %event.id, %err, "dropping event for unresolvable container");
                    report.anomalies += 1;
                    continue;
                }
            };
            let kind = event.kind;
            let patch = match RecordPatch::from_network(event) {
                Ok(patch) => patch,
                Err(err) => {
                    tracing::warn!(%err, "dropping malformed event");
                    report.anomalies += 1;
                    continue;
                }
            };
            grouped
                .entry(ScopeKey::new(container, kind))
                .or_default()
                .push(patch);
        }

        for (scope, patches) in grouped {
            match self.store.merge(&scope, &patches) {
                Ok(merge) => report.merged.push((scope, merge)),
                Err(err) => {
                    // Patches were vetted above; a rejection here is noise,
                    // not a caller mistake.
                    tracing::warn!(scope = %scope, %err, "merge rejected during ingest");
                    report.anomalies += patches.len();
                }
            }
        }
        report
    }

    /// Pull the centralized mirror for one scope and merge the result.
    ///
    /// On timeout the store is untouched and the error is retryable; the
    /// caller keeps showing cached data.
    pub fn refresh(&self, scope: &ScopeKey) -> Result<MergeReport> {
        let timeout = Duration::from_millis(self.config.poll.timeout_ms);
        // Network I/O first, store lock later: no lock spans the poll.
        let polled = self.poll.fetch(&scope.container, scope.kind, timeout)?;

        let mut patches = Vec::with_capacity(polled.len());
        for record in polled {
            match RecordPatch::from_polled(record, scope.kind, scope.container.owner) {
                Ok(patch) => patches.push(patch),
                Err(err) => {
                    tracing::warn!(scope = %scope, %err, "dropping malformed polled record");
                }
            }
        }
        Ok(self.store.merge(scope, &patches)?)
    }

    // =========================================================================
    // Local writes
    // =========================================================================

    /// Create a record: optimistic local merge, then publish.
    ///
    /// The pending record is visible immediately; the network announce
    /// carrying its draft id collapses into it on confirmation.
    pub fn submit(
        &self,
        scope: &ScopeKey,
        draft: LocalDraft,
        author: IdentityKey,
        at: EventTime,
    ) -> Result<SubmitReceipt> {
        if draft.kind != scope.kind {
            return Err(crate::store::StoreError::Rejected {
                reason: format!(
                    "draft is a {}, scope holds {}",
                    draft.kind.as_str(),
                    scope.kind.as_str()
                ),
            }
            .into());
        }
        let contributors = self.contributors_for(&scope.container);
        permission::require_role(
            &author,
            &contributors,
            self.config.maintainer_tier,
            min_submit_role(draft.kind),
        )?;

        let patch = RecordPatch::from_draft(draft.clone(), author, at);
        let local_id = patch.id.clone();
        self.store.merge(scope, &[patch])?;

        let request = PublishRequest {
            container: scope.container.clone(),
            kind: scope.kind,
            action: EventAction::Announce,
            target: None,
            client_ref: Some(local_id.canonical()),
            fields: PatchFields {
                title: Some(draft.title),
                body: Some(draft.body),
                base_branch: draft.base_branch,
                ..PatchFields::default()
            },
            at,
        };
        let event_id = match self.publisher.publish(&request) {
            Ok(id) => Some(id),
            Err(err) => {
                tracing::warn!(scope = %scope, %err, "publish failed, record stays local-pending");
                None
            }
        };

        let record = self
            .store
            .get_record(scope, &local_id)
            .ok_or_else(|| crate::store::StoreError::Rejected {
                reason: "pending record vanished after merge".into(),
            })?;
        Ok(SubmitReceipt { record, event_id })
    }

    /// Transition a record's status.
    ///
    /// Allowed for the record's author and for maintainers and up. The
    /// event is published first; once signed and accepted it IS a network
    /// event, so the merge carries network precedence. A failed publish
    /// merges as local-pending instead.
    pub fn set_status(
        &self,
        scope: &ScopeKey,
        id: &RecordId,
        phase: Phase,
        actor: IdentityKey,
        at: EventTime,
    ) -> Result<MergeReport> {
        let record = self.require_record(scope, id)?;
        self.require_author_or_maintainer(scope, &record, &actor)?;

        let source = self.publish_as_source(PublishRequest {
            container: scope.container.clone(),
            kind: scope.kind,
            action: EventAction::Status { phase },
            target: Some(id.clone()),
            client_ref: None,
            fields: PatchFields::default(),
            at,
        });
        let patch = RecordPatch {
            id: id.clone(),
            kind: scope.kind,
            source,
            author: actor,
            at,
            establish: false,
            fields: PatchFields::default(),
            status: Some(phase),
            tombstone: None,
            supersedes: None,
        };
        Ok(self.store.merge(scope, &[patch])?)
    }

    /// Tombstone a record. Sticky: nothing revives it afterwards.
    pub fn remove_record(
        &self,
        scope: &ScopeKey,
        id: &RecordId,
        actor: IdentityKey,
        at: EventTime,
        reason: Option<String>,
    ) -> Result<MergeReport> {
        let record = self.require_record(scope, id)?;
        self.require_author_or_maintainer(scope, &record, &actor)?;

        let source = self.publish_as_source(PublishRequest {
            container: scope.container.clone(),
            kind: scope.kind,
            action: EventAction::Remove {
                reason: reason.clone(),
            },
            target: Some(id.clone()),
            client_ref: None,
            fields: PatchFields::default(),
            at,
        });
        let patch = RecordPatch {
            id: id.clone(),
            kind: scope.kind,
            source,
            author: actor,
            at,
            establish: false,
            fields: PatchFields::default(),
            status: None,
            tombstone: Some(reason),
            supersedes: None,
        };
        Ok(self.store.merge(scope, &[patch])?)
    }

    /// Add or update a contributor entry. Owner-only; the last-owner guard
    /// lives in the list mutation itself and fails without partial update.
    pub fn set_contributor(
        &self,
        container: &ContainerRef,
        actor: IdentityKey,
        target: IdentityKey,
        entry: ContributorEntry,
        at: EventTime,
    ) -> Result<MergeReport> {
        let mut list = self.require_owner(container, &actor)?;
        list.set_entry(target, entry)?;
        self.note_identity(target);
        self.apply_contributors(container, actor, list, at)
    }

    /// Remove a contributor. Owner-only; guarded against removing the last
    /// owner, including the caller removing themselves.
    pub fn remove_contributor(
        &self,
        container: &ContainerRef,
        actor: IdentityKey,
        target: &IdentityKey,
        at: EventTime,
    ) -> Result<MergeReport> {
        let mut list = self.require_owner(container, &actor)?;
        list.remove(target)?;
        self.apply_contributors(container, actor, list, at)
    }

    // =========================================================================
    // Subscription wiring
    // =========================================================================

    /// Spawn the intake worker and register it with a push subscription.
    pub fn attach(
        self: &Arc<Self>,
        subscription: &dyn PushSubscription,
        filter: SubscriptionFilter,
    ) -> std::result::Result<Intake, SubscribeError> {
        let intake = Intake::spawn(Arc::clone(self));
        subscription.subscribe(filter, intake.sink())?;
        Ok(intake)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Contributor list of a container: taken from its repository record,
    /// or owner-only when none has been observed yet.
    fn contributors_for(&self, container: &ContainerRef) -> Contributors {
        let scope = ScopeKey::new(container.clone(), ResourceKind::Repository);
        self.store
            .get(&scope)
            .into_iter()
            .next()
            .and_then(|record| match record.payload.detail {
                crate::core::record::Detail::Repository { contributors, .. } => {
                    Some(contributors.value)
                }
                _ => None,
            })
            .unwrap_or_else(|| Contributors::solo(container.owner))
    }

    fn require_record(&self, scope: &ScopeKey, id: &RecordId) -> Result<Record> {
        self.store
            .get_record(scope, id)
            .ok_or_else(|| {
                crate::store::StoreError::Rejected {
                    reason: format!("record {id} not found in {scope}"),
                }
                .into()
            })
    }

    fn require_author_or_maintainer(
        &self,
        scope: &ScopeKey,
        record: &Record,
        actor: &IdentityKey,
    ) -> Result<()> {
        if record.author == *actor {
            return Ok(());
        }
        let contributors = self.contributors_for(&scope.container);
        permission::require_role(
            actor,
            &contributors,
            self.config.maintainer_tier,
            Role::Maintainer,
        )?;
        Ok(())
    }

    fn require_owner(
        &self,
        container: &ContainerRef,
        actor: &IdentityKey,
    ) -> Result<Contributors> {
        let contributors = self.contributors_for(container);
        permission::require_role(
            actor,
            &contributors,
            self.config.maintainer_tier,
            Role::Owner,
        )?;
        Ok(contributors)
    }

    fn apply_contributors(
        &self,
        container: &ContainerRef,
        actor: IdentityKey,
        list: Contributors,
        at: EventTime,
    ) -> Result<MergeReport> {
        let scope = ScopeKey::new(container.clone(), ResourceKind::Repository);
        let repo_id = self
            .store
            .get(&scope)
            .into_iter()
            .next()
            .map(|record| record.id)
            .ok_or_else(|| crate::store::StoreError::Rejected {
                reason: format!("no repository record for {container}"),
            })?;

        let fields = PatchFields {
            contributors: Some(list),
            ..PatchFields::default()
        };
        let source = self.publish_as_source(PublishRequest {
            container: container.clone(),
            kind: ResourceKind::Repository,
            action: EventAction::Edit,
            target: Some(repo_id.clone()),
            client_ref: None,
            fields: fields.clone(),
            at,
        });
        let patch = RecordPatch {
            id: repo_id,
            kind: ResourceKind::Repository,
            source,
            author: actor,
            at,
            establish: false,
            fields,
            status: None,
            tombstone: None,
            supersedes: None,
        };
        Ok(self.store.merge(&scope, &[patch])?)
    }

    /// Publish, then pick the merge source for the mirroring local patch: a
    /// signed, accepted event is a network event; a failed publish leaves
    /// the change local-pending until a retry or relay echo confirms it.
    fn publish_as_source(&self, request: PublishRequest) -> Source {
        match self.publisher.publish(&request) {
            Ok(_) => Source::Network,
            Err(err) => {
                tracing::warn!(%err, "publish failed, applying as local-pending");
                Source::Local
            }
        }
    }
}

fn min_submit_role(kind: ResourceKind) -> Role {
    match kind {
        // Announcing the repository itself is an owner act; everything else
        // is open to any resolvable identity.
        ResourceKind::Repository => Role::Owner,
        _ => Role::None,
    }
}

