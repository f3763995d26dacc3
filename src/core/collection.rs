//! Layer 10: The collection
//!
//! Canonical per-(container, kind) state: every record id maps to either a
//! live record or a tombstone. Patch application is deterministic and
//! infallible - all validation happens at normalization, so a batch can be
//! vetted completely before the first entry mutates (all-or-nothing merges).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::container::ContainerRef;
use super::event::RecordPatch;
use super::record::{Detail, Record, RecordId};
use super::source::{Register, Source, Sourced};
use super::tombstone::Tombstone;

/// Entry stored by canonical record id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RecordEntry {
    Live(Box<Record>),
    Tombstoned(Tombstone),
}

/// Counters describing what one apply pass changed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub inserted: usize,
    pub updated: usize,
    /// Records newly suppressed by a tombstone.
    pub suppressed: usize,
    /// Patches dropped without effect (older status, tombstoned target,
    /// duplicate delivery).
    pub dropped_stale: usize,
    /// Cross-source collapses performed.
    pub collapsed: usize,
}

impl ApplyOutcome {
    pub fn absorb(&mut self, other: ApplyOutcome) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.suppressed += other.suppressed;
        self.dropped_stale += other.dropped_stale;
        self.collapsed += other.collapsed;
    }
}

/// Canonical state for one (container, kind) scope.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    entries: BTreeMap<String, RecordEntry>,
}

impl Collection {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn get(&self, id: &RecordId) -> Option<&Record> {
        match self.entries.get(&id.canonical()) {
            Some(RecordEntry::Live(record)) => Some(record.as_ref()),
            _ => None,
        }
    }

    pub fn is_tombstoned(&self, id: &RecordId) -> bool {
        matches!(
            self.entries.get(&id.canonical()),
            Some(RecordEntry::Tombstoned(_))
        )
    }

    pub fn iter_live(&self) -> impl Iterator<Item = &Record> {
        self.entries.values().filter_map(|entry| match entry {
            RecordEntry::Live(record) => Some(record.as_ref()),
            _ => None,
        })
    }

    pub fn iter_live_mut(&mut self) -> impl Iterator<Item = &mut Record> {
        self.entries.values_mut().filter_map(|entry| match entry {
            RecordEntry::Live(record) => Some(record.as_mut()),
            _ => None,
        })
    }

    pub fn live_count(&self) -> usize {
        self.iter_live().count()
    }

    pub fn tombstone_count(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| matches!(entry, RecordEntry::Tombstoned(_)))
            .count()
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Apply one normalized patch.
    ///
    /// Infallible: everything rejectable was rejected when the patch was
    /// normalized, so a vetted batch can never half-apply.
    pub fn apply(&mut self, patch: &RecordPatch, container: &ContainerRef) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::default();
        let key = patch.id.canonical();

        if let Some(marker) = patch.tombstone_marker() {
            self.apply_tombstone(key, marker, &mut outcome);
            return outcome;
        }

        match self.entries.get_mut(&key) {
            // Sticky: nothing moves a record out of the tombstoned state,
            // not even a newer-stamped create. Re-deliveries land here.
            Some(RecordEntry::Tombstoned(_)) => {
                outcome.dropped_stale += 1;
            }
            Some(RecordEntry::Live(record)) => {
                let changed = apply_to_record(record, patch);
                if changed {
                    outcome.updated += 1;
                } else {
                    outcome.dropped_stale += 1;
                }
            }
            None => {
                // Status/edit arriving ahead of its create is normal on a
                // gossip network: materialize a skeleton; the create merges
                // into it later.
                let record = patch.materialize(container);
                self.entries
                    .insert(key, RecordEntry::Live(Box::new(record)));
                outcome.inserted += 1;
            }
        }

        if let Some(superseded) = &patch.supersedes {
            outcome.collapsed += self.collapse_ids(&patch.id, superseded);
        }
        outcome.collapsed += self.collapse_duplicates(&patch.id);

        outcome
    }

    fn apply_tombstone(&mut self, key: String, marker: Tombstone, outcome: &mut ApplyOutcome) {
        match self.entries.get_mut(&key) {
            Some(RecordEntry::Tombstoned(existing)) => {
                *existing = Tombstone::join(existing, &marker);
                outcome.dropped_stale += 1;
            }
            Some(entry @ RecordEntry::Live(_)) => {
                *entry = RecordEntry::Tombstoned(marker);
                outcome.suppressed += 1;
            }
            None => {
                // Tombstone ahead of the record it deletes: keep it so the
                // suppression holds when older events are re-delivered.
                self.entries.insert(key, RecordEntry::Tombstoned(marker));
                outcome.suppressed += 1;
            }
        }
    }

    /// Collapse `loser` into `survivor` (network confirmation of a local
    /// pending record). Returns the number of collapses performed (0 or 1).
    fn collapse_ids(&mut self, survivor: &RecordId, loser: &RecordId) -> usize {
        if survivor == loser {
            return 0;
        }
        let absorbed = match self.entries.remove(&loser.canonical()) {
            Some(RecordEntry::Live(record)) => record,
            Some(tombstoned) => {
                // A tombstoned loser stays tombstoned; never drop the marker.
                self.entries.insert(loser.canonical(), tombstoned);
                return 0;
            }
            None => return 0,
        };
        match self.entries.get_mut(&survivor.canonical()) {
            Some(RecordEntry::Live(record)) => {
                record.absorb(*absorbed);
                1
            }
            _ => {
                // Survivor vanished between apply and collapse; put the
                // absorbed record back rather than losing state.
                self.entries
                    .insert(loser.canonical(), RecordEntry::Live(absorbed));
                0
            }
        }
    }

    /// Collapse records that represent the same logical entity as `id`:
    /// same external number, or same content fingerprint. The surviving id
    /// is the highest-precedence one (network > local > external).
    fn collapse_duplicates(&mut self, id: &RecordId) -> usize {
        let Some(anchor) = self.get(id) else {
            return 0;
        };
        let number = anchor.external_number;
        let fingerprint = anchor.fingerprint();

        let duplicate = self
            .iter_live()
            .filter(|r| r.id != *id)
            .find(|r| {
                (number.is_some() && r.external_number == number)
                    || r.fingerprint() == fingerprint
            })
            .map(|r| r.id.clone());

        let Some(other) = duplicate else {
            return 0;
        };
        let (survivor, loser) = if id_rank(id) >= id_rank(&other) {
            (id.clone(), other)
        } else {
            (other, id.clone())
        };
        self.collapse_ids(&survivor, &loser)
    }
}

fn id_rank(id: &RecordId) -> u8 {
    match id {
        RecordId::Event(_) => 2,
        RecordId::Local(_) => 1,
        RecordId::External(_) => 0,
    }
}

/// Merge a patch into an existing live record. Returns true if anything
/// changed.
fn apply_to_record(record: &mut Record, patch: &RecordPatch) -> bool {
    let stamp = patch.stamp();
    let before_payload = record.payload.clone();
    let before_status = record.status.clone();
    let before_external = record.external_number;

    if let Some(title) = &patch.fields.title {
        let incoming = Sourced::new(title.clone(), patch.source, stamp.clone());
        record.payload.title = record.payload.title.join(&incoming);
    }
    if let Some(body) = &patch.fields.body {
        let incoming = Sourced::new(body.clone(), patch.source, stamp.clone());
        record.payload.body = record.payload.body.join(&incoming);
    }
    apply_detail(&mut record.payload.detail, patch, &stamp);

    // Creation is not a status transition: a network announce for an
    // existing record merges fields only. An external snapshot is not a
    // creation though - each poll restates the mirror's current status and
    // applies until the network becomes authoritative.
    if let Some(phase) = patch.status {
        match patch.source {
            Source::External => {
                record.status.apply_external(phase);
            }
            _ if patch.establish => {}
            // Validated against the kind at normalization; cannot fail here.
            _ => {
                let _ = record.status.apply_network(phase, stamp.clone(), patch.kind);
            }
        }
    }

    if record.external_number.is_none() {
        record.external_number = patch.fields.external_number;
    }

    record.payload != before_payload
        || record.status != before_status
        || record.external_number != before_external
}

fn apply_detail(detail: &mut Detail, patch: &RecordPatch, stamp: &super::time::Stamp) {
    match detail {
        Detail::Repository {
            clone_urls,
            web_urls,
            contributors,
        } => {
            if let Some(urls) = &patch.fields.clone_urls {
                *clone_urls = clone_urls.join(&Sourced::new(urls.clone(), patch.source, stamp.clone()));
            }
            if let Some(urls) = &patch.fields.web_urls {
                *web_urls = web_urls.join(&Sourced::new(urls.clone(), patch.source, stamp.clone()));
            }
            if let Some(list) = &patch.fields.contributors {
                *contributors =
                    contributors.join(&Sourced::new(list.clone(), patch.source, stamp.clone()));
            }
        }
        Detail::Patch { base_branch } => {
            if let Some(branch) = &patch.fields.base_branch {
                *base_branch = base_branch.join(&Sourced::new(
                    Some(branch.clone()),
                    patch.source,
                    stamp.clone(),
                ));
            }
        }
        Detail::Commit { commit_id } => {
            if commit_id.is_none() {
                *commit_id = patch.fields.commit_id.clone();
            }
        }
        Detail::Issue | Detail::Discussion => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::container::RepoName;
    use crate::core::domain::{Phase, ResourceKind};
    use crate::core::event::PatchFields;
    use crate::core::identity::IdentityKey;
    use crate::core::time::EventTime;

    fn key(fill: u8) -> IdentityKey {
        IdentityKey::from_bytes([fill; 32])
    }

    fn container() -> ContainerRef {
        ContainerRef::new(key(1), RepoName::parse("tools").unwrap())
    }

    fn issue_patch(id: &str, title: &str, at: u64, source: Source) -> RecordPatch {
        RecordPatch {
            id: RecordId::parse(id).unwrap(),
            kind: ResourceKind::Issue,
            source,
            author: key(2),
            at: EventTime(at),
            establish: true,
            fields: PatchFields {
                title: Some(title.into()),
                ..PatchFields::default()
            },
            status: None,
            tombstone: None,
            supersedes: None,
        }
    }

    fn status_patch(id: &str, phase: Phase, at: u64) -> RecordPatch {
        RecordPatch {
            id: RecordId::parse(id).unwrap(),
            kind: ResourceKind::Issue,
            source: Source::Network,
            author: key(2),
            at: EventTime(at),
            establish: false,
            fields: PatchFields::default(),
            status: Some(phase),
            tombstone: None,
            supersedes: None,
        }
    }

    fn tombstone_patch(id: &str, at: u64) -> RecordPatch {
        RecordPatch {
            id: RecordId::parse(id).unwrap(),
            kind: ResourceKind::Issue,
            source: Source::Network,
            author: key(2),
            at: EventTime(at),
            establish: false,
            fields: PatchFields::default(),
            status: None,
            tombstone: Some(None),
            supersedes: None,
        }
    }

    #[test]
    fn establish_then_reapply_is_idempotent() {
        let mut a = Collection::new();
        let patch = issue_patch("local-1", "Fix bug", 10, Source::Local);
        a.apply(&patch, &container());
        let snapshot = a.clone();
        a.apply(&patch, &container());
        assert_eq!(a, snapshot);
    }

    #[test]
    fn status_before_create_converges() {
        let c = container();
        let id = "local-9";

        let mut early_status = Collection::new();
        early_status.apply(&status_patch(id, Phase::Closed, 20), &c);
        early_status.apply(&issue_patch(id, "Late create", 10, Source::Network), &c);

        let mut normal = Collection::new();
        normal.apply(&issue_patch(id, "Late create", 10, Source::Network), &c);
        normal.apply(&status_patch(id, Phase::Closed, 20), &c);

        let a = early_status.get(&RecordId::parse(id).unwrap()).unwrap();
        let b = normal.get(&RecordId::parse(id).unwrap()).unwrap();
        assert_eq!(a.phase(), Phase::Closed);
        assert_eq!(a.phase(), b.phase());
        assert_eq!(a.title(), b.title());
    }

    #[test]
    fn tombstone_is_sticky_against_any_later_event() {
        let c = container();
        let mut coll = Collection::new();
        coll.apply(&issue_patch("local-1", "Doomed", 10, Source::Network), &c);
        coll.apply(&tombstone_patch("local-1", 20), &c);

        // Older create re-delivered, newer edit, newer status: all dropped.
        coll.apply(&issue_patch("local-1", "Doomed", 10, Source::Network), &c);
        coll.apply(&status_patch("local-1", Phase::Open, 99), &c);

        let id = RecordId::parse("local-1").unwrap();
        assert!(coll.is_tombstoned(&id));
        assert_eq!(coll.live_count(), 0);
    }

    #[test]
    fn tombstone_ahead_of_record_suppresses_it() {
        let c = container();
        let mut coll = Collection::new();
        coll.apply(&tombstone_patch("local-5", 30), &c);
        coll.apply(&issue_patch("local-5", "Never shown", 10, Source::Network), &c);
        assert!(coll.is_tombstoned(&RecordId::parse("local-5").unwrap()));
        assert_eq!(coll.live_count(), 0);
    }

    #[test]
    fn external_number_collapse_prefers_network_id() {
        let c = container();
        let mut coll = Collection::new();

        let mut ext = issue_patch("7", "Typo", 5, Source::External);
        ext.fields.external_number = Some(7);
        coll.apply(&ext, &c);

        let event_hex = "c".repeat(64);
        let mut net = issue_patch(&event_hex, "Typo fixed", 9, Source::Network);
        net.fields.external_number = Some(7);
        let outcome = coll.apply(&net, &c);

        assert_eq!(outcome.collapsed, 1);
        assert_eq!(coll.live_count(), 1);
        let survivor = coll.get(&RecordId::parse(&event_hex).unwrap()).unwrap();
        assert_eq!(survivor.external_number, Some(7));
        assert_eq!(survivor.title(), "Typo fixed");
    }
}
