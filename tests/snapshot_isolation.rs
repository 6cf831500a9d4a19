//! Tests for snapshot isolation and deferred change replay.
//!
//! These tests verify:
//! 1. No change from the change source is visible while any lease is held
//! 2. Deferred changes replay in receipt order after the last release
//! 3. Leases are shared: several holders, across threads
//! 4. Replay order matches immediate application for any change sequence

use meld::{
    ChangeRecord, Conference, Domain, DomainConfig, Presence, Receipt, StreamEvent, SubjectKind,
};
use proptest::prelude::*;
use serde_json::json;
use std::sync::{Arc, Barrier};
use std::thread;

fn conference(id: &str, name: &str) -> ChangeRecord {
    ChangeRecord::payload(
        id,
        SubjectKind::Conference,
        json!({"name": name, "location": "X", "start": "2022-01-01"}),
    )
}

// =============================================================================
// SINGLE-THREADED ISOLATION
// =============================================================================

#[test]
fn test_no_external_change_while_leased() {
    let domain = Domain::load(DomainConfig::default(), vec![conference("c1", "v0")]).unwrap();
    let state = domain.state();
    let c1 = state.get::<Conference>("c1").unwrap();

    for i in 1..=10 {
        let receipt = domain.receive(conference("c1", &format!("v{}", i))).unwrap();
        assert_eq!(receipt, Receipt::Buffered { position: i });
    }
    domain
        .receive(ChangeRecord::deletion("c1", SubjectKind::Conference))
        .unwrap();

    assert_eq!(c1.fields().unwrap().name, "v0");
    assert!(!c1.deleted());
    assert_eq!(c1.version(), 1);

    let summary = state.release().unwrap();
    assert_eq!(summary.replayed, 11);

    // Last payload wins, then the deletion keeps it
    assert!(c1.deleted());
    assert_eq!(c1.fields().unwrap().name, "v10");
    assert_eq!(c1.version(), 12);
}

#[test]
fn test_shared_lease_counts() {
    let domain = Domain::new(DomainConfig::default());

    let a = domain.state();
    let b = domain.state();
    let c = domain.state();
    assert_ne!(a.lease_id(), b.lease_id());
    assert_eq!(domain.lease_count(), 3);

    domain.receive(conference("c1", "One")).unwrap();

    drop(b);
    assert_eq!(domain.pending_len(), 1);
    a.release().unwrap();
    assert_eq!(domain.pending_len(), 1);
    let summary = c.release().unwrap();
    assert_eq!(summary.replayed, 1);
    assert_eq!(domain.pending_len(), 0);
    assert_eq!(domain.lease_count(), 0);
}

#[test]
fn test_replayed_creations_reach_streams_in_order() {
    let domain = Domain::new(DomainConfig::default());
    let state = domain.state();
    let stream = state.all::<Conference>();

    for id in ["b", "a", "c"] {
        domain.receive(conference(id, id)).unwrap();
    }
    assert!(stream.try_iter().next().is_none());

    state.release().unwrap();

    let ids: Vec<String> = stream
        .try_iter()
        .map(|event| match event {
            StreamEvent::Added(subject) => subject.id().to_string(),
            other => panic!("Expected Added, got {:?}", other),
        })
        .collect();
    assert_eq!(ids, vec!["b", "a", "c"]);
}

#[test]
fn test_new_lease_after_replay_sees_everything() {
    let domain = Domain::new(DomainConfig::default());
    {
        let _state = domain.state();
        domain.receive(conference("c1", "One")).unwrap();
        domain.receive(conference("c2", "Two")).unwrap();
    }

    let state = domain.state();
    let names: Vec<String> = ["c1", "c2"]
        .iter()
        .map(|id| state.get::<Conference>(*id).unwrap().fields().unwrap().name)
        .collect();
    assert_eq!(names, vec!["One", "Two"]);
}

// =============================================================================
// CONCURRENT ISOLATION
// =============================================================================

#[test]
fn test_reader_thread_sees_stable_view() {
    let domain = Domain::load(DomainConfig::default(), vec![conference("c1", "v0")]).unwrap();
    let leased = Arc::new(Barrier::new(2));
    let written = Arc::new(Barrier::new(2));

    let reader = {
        let domain = domain.clone();
        let leased = Arc::clone(&leased);
        let written = Arc::clone(&written);
        thread::spawn(move || {
            let state = domain.state();
            let c1 = state.get::<Conference>("c1").unwrap();
            leased.wait();
            written.wait();
            let name = c1.fields().unwrap().name;
            state.release().unwrap();
            name
        })
    };

    leased.wait();
    for i in 1..=100 {
        domain.receive(conference("c1", &format!("v{}", i))).unwrap();
    }
    written.wait();

    assert_eq!(reader.join().unwrap(), "v0");
    let c1 = domain.state().get::<Conference>("c1").unwrap();
    assert_eq!(c1.fields().unwrap().name, "v100");
}

#[test]
fn test_concurrent_leases_and_feed() {
    let domain = Domain::new(DomainConfig::default());
    let (sender, receiver) = crossbeam_channel::unbounded();
    let feed = domain.attach_feed(receiver).unwrap();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let domain = domain.clone();
            thread::spawn(move || {
                for _ in 0..50 {
                    let state = domain.state();
                    let c = state.get::<Conference>("c").unwrap();
                    let before = c.version();
                    let seen = c.fields();
                    assert_eq!(c.fields(), seen);
                    assert!(c.version() >= before);
                }
            })
        })
        .collect();

    for i in 0..200 {
        sender.send(conference("c", &format!("v{}", i))).unwrap();
    }
    drop(sender);

    for reader in readers {
        reader.join().unwrap();
    }
    feed.join().unwrap();

    assert_eq!(domain.lease_count(), 0);
    assert_eq!(domain.pending_len(), 0);
    let c = domain.state().get::<Conference>("c").unwrap();
    assert_eq!(c.fields().unwrap().name, "v199");
    assert_eq!(domain.stats().changes_applied, 200);
}

// =============================================================================
// REPLAY ORDER PROPERTY
// =============================================================================

fn record_for(slot: usize, name: &str, delete: bool) -> ChangeRecord {
    let id = format!("c{}", slot);
    if delete {
        ChangeRecord::deletion(id, SubjectKind::Conference)
    } else {
        conference(&id, name)
    }
}

fn observe(domain: &Domain) -> Vec<(Presence, Option<String>)> {
    let state = domain.state();
    (0..3)
        .map(|slot| {
            let subject = state.get::<Conference>(format!("c{}", slot)).unwrap();
            (subject.presence(), subject.fields().map(|c| c.name))
        })
        .collect()
}

proptest! {
    #[test]
    fn deferred_replay_matches_immediate_application(
        changes in prop::collection::vec((0usize..3, "[a-z]{1,8}", any::<bool>()), 0..40)
    ) {
        let immediate = Domain::new(DomainConfig::default());
        for (slot, name, delete) in &changes {
            immediate.receive(record_for(*slot, name, *delete)).unwrap();
        }

        let deferred = Domain::new(DomainConfig::default());
        let state = deferred.state();
        for (slot, name, delete) in &changes {
            let receipt = deferred.receive(record_for(*slot, name, *delete)).unwrap();
            let is_buffered = matches!(receipt, Receipt::Buffered { .. });
            prop_assert!(is_buffered);
        }
        state.release().unwrap();

        prop_assert_eq!(observe(&immediate), observe(&deferred));
    }
}
