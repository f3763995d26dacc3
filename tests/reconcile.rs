//! Reconciliation scenarios: idempotence, ordering convergence, tombstone
//! stickiness, cross-source field precedence, and sequence stability.

mod fixtures;

use fixtures::{EventBuilder, event_hex, harness, issue_scope, key, polled_issue};
use serde_json::json;
use weft::{Phase, PollError, RecordId, SeqNo, Source};

#[test]
fn ingesting_the_same_batch_twice_is_a_noop() {
    let h = harness();
    let owner = key(1);
    let scope = issue_scope(owner, "tools");

    let batch = vec![
        EventBuilder::new('a', owner, "tools", key(2))
            .at(10)
            .announce("First")
            .build(),
        EventBuilder::new('b', owner, "tools", key(2))
            .at(20)
            .announce("Second")
            .build(),
    ];

    let first = h.engine.ingest(batch.clone());
    assert_eq!(first.anomalies, 0);
    let records = h.engine.load(&scope);
    assert_eq!(records.len(), 2);

    let second = h.engine.ingest(batch);
    assert_eq!(second.anomalies, 0);
    for (_, merge) in &second.merged {
        assert!(!merge.changed(), "duplicate delivery must merge to a no-op");
    }
    assert_eq!(h.engine.load(&scope), records);
}

#[test]
fn status_events_converge_regardless_of_arrival_order() {
    let owner = key(1);
    let author = key(2);
    let target = event_hex('a');

    let announce = EventBuilder::new('a', owner, "tools", author)
        .at(1)
        .announce("Flaky test")
        .build();
    let closed = EventBuilder::new('c', owner, "tools", author)
        .at(200)
        .status(Phase::Closed)
        .target(&target)
        .build();
    let opened = EventBuilder::new('d', owner, "tools", author)
        .at(100)
        .status(Phase::Open)
        .target(&target)
        .build();

    for batch in [
        vec![announce.clone(), closed.clone(), opened.clone()],
        vec![announce.clone(), opened.clone(), closed.clone()],
        vec![opened.clone(), closed.clone(), announce.clone()],
    ] {
        let h = harness();
        let scope = issue_scope(owner, "tools");
        h.engine.ingest(batch);
        let records = h.engine.load(&scope);
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].phase(),
            Phase::Closed,
            "timestamp-max must win over arrival order"
        );
    }
}

#[test]
fn tombstone_survives_redelivery_of_older_events() {
    let h = harness();
    let owner = key(1);
    let author = key(2);
    let scope = issue_scope(owner, "tools");
    let target = event_hex('a');

    let announce = EventBuilder::new('a', owner, "tools", author)
        .at(10)
        .announce("Doomed")
        .build();
    h.engine.ingest(vec![announce.clone()]);

    let remove = EventBuilder::new('e', owner, "tools", author)
        .at(50)
        .remove()
        .target(&target)
        .build();
    h.engine.ingest(vec![remove]);
    assert!(h.engine.load(&scope).is_empty());

    // Unordered redelivery: the old announce and even a newer status event
    // must not revive the record.
    let late_status = EventBuilder::new('f', owner, "tools", author)
        .at(999)
        .status(Phase::Open)
        .target(&target)
        .build();
    h.engine.ingest(vec![announce, late_status]);
    assert!(
        h.engine.load(&scope).is_empty(),
        "tombstoned records stay suppressed permanently"
    );
}

#[test]
fn network_event_overrides_local_pending_fields_and_status() {
    // Local pending issue, then a legacy network event for the same id with
    // a new title and closed status.
    let h = harness();
    let owner = key(1);
    let author = key(2);
    let scope = issue_scope(owner, "tools");

    let receipt = h
        .engine
        .submit(
            &scope,
            weft::LocalDraft {
                kind: weft::ResourceKind::Issue,
                title: "Fix bug".into(),
                body: String::new(),
                base_branch: None,
            },
            author,
            weft::EventTime(5),
        )
        .unwrap();
    let local_id = receipt.record.id.canonical();

    let network = EventBuilder::new('b', owner, "tools", author)
        .at(100)
        .legacy(json!({
            "subjectTag": "Fix bug (v2)",
            "statusTag": "closed",
        }))
        .target(&local_id)
        .build();
    h.engine.ingest(vec![network]);

    let records = h.engine.load(&scope);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].title(), "Fix bug (v2)", "network wins the field conflict");
    assert_eq!(records[0].phase(), Phase::Closed);
}

#[test]
fn polled_status_yields_to_network_and_older_network_is_dropped() {
    // Poll returns issue #7, a network close@50 arrives, then an older
    // open@10 straggles in: closed must hold.
    let h = harness();
    let owner = key(1);
    let author = key(2);
    let scope = issue_scope(owner, "tools");

    h.poll.push(Ok(vec![polled_issue(7, "Typo", "open", 5)]));
    h.engine.refresh(&scope).unwrap();
    let records = h.engine.load(&scope);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].phase(), Phase::Open);
    assert_eq!(records[0].seq, Some(SeqNo(7)), "external number is the display number");

    let close = EventBuilder::new('c', owner, "tools", author)
        .at(50)
        .status(Phase::Closed)
        .target("7")
        .build();
    h.engine.ingest(vec![close]);

    let stale_open = EventBuilder::new('d', owner, "tools", author)
        .at(10)
        .status(Phase::Open)
        .target("7")
        .build();
    h.engine.ingest(vec![stale_open]);

    let records = h.engine.load(&scope);
    assert_eq!(records[0].phase(), Phase::Closed, "older network status is dropped");

    // A later poll still reporting open is no longer authoritative.
    h.poll.push(Ok(vec![polled_issue(7, "Typo", "open", 5)]));
    h.engine.refresh(&scope).unwrap();
    assert_eq!(h.engine.load(&scope)[0].phase(), Phase::Closed);
}

#[test]
fn poll_timeout_is_retryable_and_leaves_store_untouched() {
    let h = harness();
    let owner = key(1);
    let author = key(2);
    let scope = issue_scope(owner, "tools");

    h.engine.ingest(vec![
        EventBuilder::new('a', owner, "tools", author)
            .at(10)
            .announce("Cached")
            .build(),
    ]);
    let before = h.engine.load(&scope);

    h.poll.push(Err(PollError::Timeout { elapsed_ms: 7000 }));
    let err = h.engine.refresh(&scope).unwrap_err();
    assert!(err.transience().is_retryable());
    assert_eq!(h.engine.load(&scope), before, "reads degrade to cached data");
}

#[test]
fn sequence_numbers_are_stable_across_unrelated_merges() {
    let h = harness();
    let owner = key(1);
    let author = key(2);
    let scope = issue_scope(owner, "tools");

    h.engine.ingest(vec![
        EventBuilder::new('a', owner, "tools", author)
            .at(10)
            .announce("First")
            .build(),
    ]);
    let first = &h.engine.load(&scope)[0];
    let (first_id, first_seq) = (first.id.clone(), first.seq);
    assert_eq!(first_seq, Some(SeqNo(1)));

    // Merge an unrelated batch; the original keeps its number.
    h.engine.ingest(vec![
        EventBuilder::new('b', owner, "tools", author)
            .at(20)
            .announce("Unrelated")
            .build(),
    ]);
    let records = h.engine.load(&scope);
    let first_again = records.iter().find(|r| r.id == first_id).unwrap();
    assert_eq!(first_again.seq, first_seq);

    let second = records.iter().find(|r| r.id != first_id).unwrap();
    assert_eq!(second.seq, Some(SeqNo(2)));
}

#[test]
fn anomalous_events_are_absorbed_not_fatal() {
    let h = harness();
    let owner = key(1);
    let author = key(2);
    let scope = issue_scope(owner, "tools");

    let good = EventBuilder::new('a', owner, "tools", author)
        .at(10)
        .announce("Good")
        .build();
    // Reserved (hostname-shaped) owner: unattributable, dropped, logged.
    let bad = EventBuilder::new('b', owner, "tools", author)
        .at(10)
        .announce("Bad")
        .owner_entity("github.com")
        .build();

    let report = h.engine.ingest(vec![bad, good]);
    assert_eq!(report.anomalies, 1);
    let records = h.engine.load(&scope);
    assert_eq!(records.len(), 1, "siblings of an anomalous event still merge");
    assert_eq!(records[0].title(), "Good");
}

#[test]
fn local_draft_collapses_into_network_confirmation() {
    let h = harness();
    let owner = key(1);
    let author = key(2);
    let scope = issue_scope(owner, "tools");
    h.engine.note_identity(owner);

    let receipt = h
        .engine
        .submit(
            &scope,
            weft::LocalDraft {
                kind: weft::ResourceKind::Issue,
                title: "Pending".into(),
                body: String::new(),
                base_branch: None,
            },
            author,
            weft::EventTime(10),
        )
        .unwrap();
    assert!(receipt.event_id.is_some());
    let local_id = receipt.record.id.clone();
    assert!(matches!(local_id, RecordId::Local(_)));

    // The network announce confirming the draft arrives.
    let confirm = EventBuilder::new('9', owner, "tools", author)
        .at(12)
        .announce("Pending")
        .client_ref(&local_id.canonical())
        .build();
    h.engine.ingest(vec![confirm]);

    let records = h.engine.load(&scope);
    assert_eq!(records.len(), 1, "pending and confirmed must collapse");
    assert!(records[0].id.is_network());
    assert_eq!(records[0].supersedes, Some(local_id));
    assert_eq!(records[0].payload.title.source, Source::Network);
}
