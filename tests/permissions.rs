//! Permission gating and the ownership guard at the engine boundary.

mod fixtures;

use fixtures::{EventBuilder, container, harness, key};
use weft::core::error::{GuardError, PermissionError};
use weft::{
    ContributorEntry, CoreError, Error, EventTime, Phase, ResourceKind, Role, ScopeKey, Weight,
};

/// Announce a repository so the container has a contributor list.
fn seed_repo(h: &fixtures::Harness, owner: weft::IdentityKey, repo: &str) {
    let event = EventBuilder::new('1', owner, repo, owner)
        .kind(ResourceKind::Repository)
        .at(1)
        .announce(repo)
        .build();
    let report = h.engine.ingest(vec![event]);
    assert_eq!(report.anomalies, 0);
}

#[test]
fn guard_rejects_reserved_and_hostname_owners() {
    let h = harness();
    assert!(matches!(
        h.engine.vet("github.com", "tools"),
        Err(GuardError::ReservedOwner { .. })
    ));
    assert!(matches!(
        h.engine.vet("forge.example.org", "tools"),
        Err(GuardError::HostnameOwner { .. })
    ));
    assert!(matches!(
        h.engine.vet("nonsense", "tools"),
        Err(GuardError::UnresolvedOwner(_))
    ));
}

#[test]
fn repository_announce_requires_ownership() {
    let h = harness();
    let owner = key(1);
    let stranger = key(9);
    seed_repo(&h, owner, "tools");
    let scope = ScopeKey::new(container(owner, "tools"), ResourceKind::Repository);

    let err = h
        .engine
        .submit(
            &scope,
            weft::LocalDraft {
                kind: ResourceKind::Repository,
                title: "tools".into(),
                body: String::new(),
                base_branch: None,
            },
            stranger,
            EventTime(5),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Core(CoreError::Permission(PermissionError::Denied { .. }))
    ));
}

#[test]
fn status_change_needs_author_or_maintainer() {
    let h = harness();
    let owner = key(1);
    let author = key(2);
    let stranger = key(9);
    seed_repo(&h, owner, "tools");
    let scope = ScopeKey::new(container(owner, "tools"), ResourceKind::Issue);

    let announce = EventBuilder::new('a', owner, "tools", author)
        .at(10)
        .announce("Close me")
        .build();
    h.engine.ingest(vec![announce]);
    let id = h.engine.load(&scope)[0].id.clone();

    let err = h
        .engine
        .set_status(&scope, &id, Phase::Closed, stranger, EventTime(20))
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Core(CoreError::Permission(PermissionError::Denied { .. }))
    ));
    assert_eq!(h.engine.load(&scope)[0].phase(), Phase::Open);

    // The record's own author may close it without any list entry.
    h.engine
        .set_status(&scope, &id, Phase::Closed, author, EventTime(21))
        .unwrap();
    assert_eq!(h.engine.load(&scope)[0].phase(), Phase::Closed);
}

#[test]
fn contributor_weights_map_to_roles() {
    let h = harness();
    let owner = key(1);
    seed_repo(&h, owner, "tools");
    let c = container(owner, "tools");

    h.engine
        .set_contributor(
            &c,
            owner,
            key(3),
            ContributorEntry::weighted(Weight::new(70).unwrap()),
            EventTime(5),
        )
        .unwrap();
    h.engine
        .set_contributor(
            &c,
            owner,
            key(4),
            ContributorEntry::weighted(Weight::new(10).unwrap()),
            EventTime(6),
        )
        .unwrap();

    assert_eq!(h.engine.role_of(&c, &owner), Role::Owner);
    assert_eq!(h.engine.role_of(&c, &key(3)), Role::Maintainer);
    assert_eq!(h.engine.role_of(&c, &key(4)), Role::Contributor);
    assert_eq!(h.engine.role_of(&c, &key(9)), Role::None);
}

#[test]
fn last_owner_cannot_remove_themselves() {
    let h = harness();
    let owner = key(1);
    seed_repo(&h, owner, "tools");
    let c = container(owner, "tools");

    h.engine
        .set_contributor(
            &c,
            owner,
            key(3),
            ContributorEntry::weighted(Weight::new(70).unwrap()),
            EventTime(5),
        )
        .unwrap();
    let before = h.engine.role_of(&c, &owner);

    let err = h
        .engine
        .remove_contributor(&c, owner, &owner, EventTime(6))
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Core(CoreError::Permission(PermissionError::LastOwner))
    ));
    assert_eq!(h.engine.role_of(&c, &owner), before, "failed guard leaves the list unchanged");
    assert_eq!(h.engine.role_of(&c, &key(3)), Role::Maintainer);
}

#[test]
fn ownership_transfers_before_departure() {
    let h = harness();
    let owner = key(1);
    let successor = key(2);
    seed_repo(&h, owner, "tools");
    let c = container(owner, "tools");

    h.engine
        .set_contributor(
            &c,
            owner,
            successor,
            ContributorEntry::weighted(Weight::OWNER),
            EventTime(5),
        )
        .unwrap();
    h.engine
        .remove_contributor(&c, owner, &owner, EventTime(6))
        .unwrap();

    assert_eq!(h.engine.role_of(&c, &successor), Role::Owner);
    assert_eq!(h.engine.role_of(&c, &owner), Role::None);

    // The new sole owner is now guarded too.
    let err = h
        .engine
        .remove_contributor(&c, successor, &successor, EventTime(7))
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Core(CoreError::Permission(PermissionError::LastOwner))
    ));
}

#[test]
fn non_owner_cannot_edit_contributors() {
    let h = harness();
    let owner = key(1);
    let stranger = key(9);
    seed_repo(&h, owner, "tools");
    let c = container(owner, "tools");

    let err = h
        .engine
        .set_contributor(
            &c,
            stranger,
            stranger,
            ContributorEntry::weighted(Weight::OWNER),
            EventTime(5),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Core(CoreError::Permission(PermissionError::Denied { .. }))
    ));
}
