//! Error handling and edge case tests.

use meld::{
    ChangeRecord, Conference, Domain, DomainConfig, DomainError, DropReason, Speaker,
    StreamEvent, SubjectKind, SubscriptionConfig,
};
use serde_json::json;

fn conference(id: &str, name: &str) -> ChangeRecord {
    ChangeRecord::payload(
        id,
        SubjectKind::Conference,
        json!({"name": name, "location": "X", "start": "2022-01-01"}),
    )
}

// --- Decode Errors ---

#[test]
fn test_decode_failure_leaves_subject_untouched() {
    let domain = Domain::load(DomainConfig::default(), vec![conference("c1", "Conf1")]).unwrap();
    let c1 = domain.state().get::<Conference>("c1").unwrap();

    // Valid name, malformed start: nothing may be applied
    let result = domain.receive(ChangeRecord::payload(
        "c1",
        SubjectKind::Conference,
        json!({"name": "Half", "location": "Y", "start": "yesterday"}),
    ));

    assert!(matches!(result, Err(DomainError::Decode { .. })));
    let fields = c1.fields().unwrap();
    assert_eq!(fields.name, "Conf1");
    assert_eq!(fields.location, "X");
    assert_eq!(c1.version(), 1);
}

#[test]
fn test_decode_failure_for_new_id_registers_nothing() {
    let domain = Domain::new(DomainConfig::default());

    let result = domain.receive(ChangeRecord::payload(
        "c1",
        SubjectKind::Conference,
        json!({"location": "X"}),
    ));
    assert!(matches!(result, Err(DomainError::Decode { .. })));

    let stats = domain.stats();
    assert_eq!(stats.live_subjects + stats.absent_subjects + stats.deleted_subjects, 0);
    assert_eq!(stats.changes_rejected, 1);
}

#[test]
fn test_decode_error_names_subject() {
    let domain = Domain::new(DomainConfig::default());

    let err = domain
        .receive(ChangeRecord::payload("s1", SubjectKind::Speaker, json!({"name": 42})))
        .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("Speaker"), "message was {}", message);
    assert!(message.contains("s1"), "message was {}", message);
}

// --- Kind Errors ---

#[test]
fn test_get_with_wrong_kind() {
    let domain = Domain::load(DomainConfig::default(), vec![conference("c1", "Conf1")]).unwrap();
    let state = domain.state();

    let result = state.get::<Speaker>("c1");
    assert!(matches!(
        result,
        Err(DomainError::TypeMismatch {
            requested: SubjectKind::Speaker,
            registered: SubjectKind::Conference,
            ..
        })
    ));

    // The conference is unaffected
    assert!(!state.get::<Conference>("c1").unwrap().deleted());
}

#[test]
fn test_tombstone_fixes_kind() {
    let domain = Domain::new(DomainConfig::default());
    let state = domain.state();
    state.get::<Conference>("x").unwrap();
    state.release().unwrap();

    let result = domain.receive(ChangeRecord::payload(
        "x",
        SubjectKind::Speaker,
        json!({"name": "Ada"}),
    ));
    assert!(matches!(result, Err(DomainError::TypeMismatch { .. })));
}

#[test]
fn test_insert_with_wrong_kind() {
    let domain = Domain::load(DomainConfig::default(), vec![conference("c1", "Conf1")]).unwrap();
    let state = domain.state();

    let result = state.insert(
        "c1",
        Speaker {
            name: "Ada".to_string(),
            affiliation: None,
            conference: None,
        },
    );
    assert!(matches!(result, Err(DomainError::TypeMismatch { .. })));
}

// --- Wire Form Errors ---

#[test]
fn test_invalid_wire_records() {
    let cases = vec![
        json!("c1"),
        json!({"name": "no id"}),
        json!({"@id": "c1", "@type": "Workshop"}),
        json!({"@id": "c1", "@type": 7}),
        json!({"@id": "c1", "@type": "Conference", "@deleted": "yes"}),
    ];

    for case in cases {
        let result = ChangeRecord::from_json(&case);
        assert!(
            matches!(result, Err(DomainError::InvalidRecord(_))),
            "accepted {}",
            case
        );
    }
}

#[test]
fn test_batch_not_an_array() {
    let result = ChangeRecord::batch_from_slice(b"{\"@id\": \"c1\"}", None);
    assert!(matches!(result, Err(DomainError::Serialization(_))));
}

// --- Local Write Errors ---

#[test]
fn test_local_writes_after_deletion() {
    let domain = Domain::load(DomainConfig::default(), vec![conference("c1", "Conf1")]).unwrap();
    let state = domain.state();
    let c1 = state.get::<Conference>("c1").unwrap();

    assert!(c1.delete());
    assert!(!c1.delete());

    let result = c1.update(|c| c.name = "Zombie".to_string());
    assert!(matches!(result, Err(DomainError::SubjectDeleted(_))));

    let result = state.insert("c1", c1.fields().unwrap());
    assert!(matches!(result, Err(DomainError::SubjectDeleted(_))));
}

#[test]
fn test_update_of_tombstone() {
    let domain = Domain::new(DomainConfig::default());
    let ghost = domain.state().get::<Conference>("ghost").unwrap();

    let result = ghost.update(|c| c.name = "Boo".to_string());
    assert!(matches!(result, Err(DomainError::NotPopulated(_))));
    assert!(matches!(ghost.encode(), Err(DomainError::NotPopulated(_))));
}

#[test]
fn test_payload_after_deletion_is_ignored() {
    let domain = Domain::load(
        DomainConfig::default(),
        vec![
            conference("c1", "Conf1"),
            ChangeRecord::deletion("c1", SubjectKind::Conference),
        ],
    )
    .unwrap();

    domain.receive(conference("c1", "Back")).unwrap();

    let c1 = domain.state().get::<Conference>("c1").unwrap();
    assert!(c1.deleted());
    assert_eq!(c1.fields().unwrap().name, "Conf1");
    assert_eq!(domain.stats().changes_ignored, 1);
}

// --- Subscription Errors ---

#[test]
fn test_initial_enumeration_larger_than_buffer() {
    let batch: Vec<_> = (0..5)
        .map(|i| conference(&format!("c{}", i), "Many"))
        .collect();
    let domain = Domain::load(DomainConfig::default(), batch).unwrap();

    let stream = domain
        .state()
        .all_with::<Conference>(&SubscriptionConfig { buffer_size: 3 });

    // Existing subjects never overflow the buffer
    assert!(!stream.is_closed());
    assert_eq!(stream.try_iter().count(), 5);

    // Later subjects still get the full buffer
    for i in 5..8 {
        domain.receive(conference(&format!("c{}", i), "Later")).unwrap();
    }
    assert_eq!(stream.try_iter().count(), 3);
    assert!(!stream.is_closed());
    assert_eq!(domain.stats().subscriptions, 1);
}

#[test]
fn test_slow_subscriber_dropped_on_publish() {
    let domain = Domain::new(DomainConfig {
        stream_buffer_size: 1,
        ..Default::default()
    });
    let stream = domain.state().all::<Conference>();

    domain.receive(conference("c1", "One")).unwrap();
    domain.receive(conference("c2", "Two")).unwrap();

    assert!(matches!(stream.recv(), Ok(StreamEvent::Added(_))));
    assert!(matches!(
        stream.recv(),
        Err(DomainError::SubscriptionDropped(DropReason::BufferOverflow))
    ));
    assert_eq!(domain.stats().subscriptions, 0);
}

#[test]
fn test_dropped_domain_closes_streams() {
    let domain = Domain::new(DomainConfig::default());
    let stream = domain.state().all::<Conference>();
    drop(domain);

    assert!(matches!(
        stream.recv(),
        Ok(StreamEvent::Dropped {
            reason: DropReason::DomainClosed
        })
    ));
    assert!(stream.recv().is_err());
}
