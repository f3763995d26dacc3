//! Layer 11: Display sequence assignment
//!
//! Human-facing numbers for records that arrive without one. Per-scope
//! monotonic: max(existing) + 1, absent numbers treated as 0. A number is
//! assigned once and never reassigned; when an externally numbered record
//! later collides with an assigned number, both keep their numbers and the
//! collision is flagged instead - renumbering would break outstanding
//! links.

use std::collections::BTreeMap;

use super::collection::Collection;
use super::record::{RecordId, SeqNo};

/// Next free display number for a scope: max(existing) + 1.
pub fn next_seq(existing: impl Iterator<Item = Option<SeqNo>>) -> SeqNo {
    SeqNo(existing.flatten().map(|s| s.0).max().unwrap_or(0) + 1)
}

/// Assignments performed by one numbering pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SeqReport {
    pub assigned: Vec<(RecordId, SeqNo)>,
    /// Numbers held by more than one live record after this pass.
    pub conflicts: Vec<SeqNo>,
}

/// Number every unnumbered live record in the collection.
///
/// Externally numbered records adopt their external number. The rest are
/// assigned max+1 in deterministic order (creation stamp, then id), so
/// re-running the pass over the same state assigns the same numbers.
/// Already-assigned numbers are never touched.
pub fn fill_missing(collection: &mut Collection) -> SeqReport {
    let mut report = SeqReport::default();

    // External numbers first: they are fixed by the remote scheme.
    for record in collection.iter_live_mut() {
        if record.seq.is_none()
            && let Some(number) = record.external_number
        {
            record.seq = Some(SeqNo(number));
            report.assigned.push((record.id.clone(), SeqNo(number)));
        }
    }

    let mut unnumbered: Vec<(RecordId, _)> = collection
        .iter_live()
        .filter(|r| r.seq.is_none())
        .map(|r| (r.id.clone(), r.created.clone()))
        .collect();
    unnumbered.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

    let mut next = next_seq(collection.iter_live().map(|r| r.seq));
    for (id, _) in unnumbered {
        if let Some(record) = collection.iter_live_mut().find(|r| r.id == id) {
            record.seq = Some(next);
            report.assigned.push((id, next));
            next = SeqNo(next.0 + 1);
        }
    }

    report.conflicts = flag_conflicts(collection);
    report
}

/// Flag every live record whose number is shared with another live record.
/// Numbers stay as they are; only the flag and the report change.
fn flag_conflicts(collection: &mut Collection) -> Vec<SeqNo> {
    let mut by_number: BTreeMap<SeqNo, usize> = BTreeMap::new();
    for record in collection.iter_live() {
        if let Some(seq) = record.seq {
            *by_number.entry(seq).or_default() += 1;
        }
    }
    let duplicated: Vec<SeqNo> = by_number
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(seq, _)| seq)
        .collect();

    for record in collection.iter_live_mut() {
        if let Some(seq) = record.seq
            && duplicated.contains(&seq)
        {
            record.seq_conflict = true;
        }
    }
    duplicated
}
