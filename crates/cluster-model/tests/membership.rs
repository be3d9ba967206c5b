//! Membership reconciliation and gateway queries

use std::sync::Arc;

use assert_matches::assert_matches;
use proven_cluster_model::{
    ClusterCoordinator, ClusterStateSnapshot, DispatchOutcome, Error, InstanceKey,
};
use proven_cluster_model_mock::{NotificationBuilder, RecordingTransport, ts};

fn coordinator() -> ClusterCoordinator<RecordingTransport> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    ClusterCoordinator::new(Arc::new(RecordingTransport::new()))
}

fn key(key: &str) -> InstanceKey {
    InstanceKey::from(key)
}

fn snapshot(members: &[&str]) -> ClusterStateSnapshot {
    ClusterStateSnapshot::from_members(
        members
            .iter()
            .map(|member| (*member, Some(format!("ws://{member}:8000")))),
    )
}

#[test]
fn test_duplicate_join_keeps_single_node() {
    let mut cluster = coordinator();

    assert!(cluster.process_join(&key("a")));
    let entity_id = cluster.find_by_instance_key(&key("a")).unwrap().entity_id();
    cluster.set_connection_url(&key("a"), "ws://a:8000").unwrap();

    assert!(!cluster.process_join(&key("a")));

    assert_eq!(cluster.len(), 1);
    let node = cluster.find_by_instance_key(&key("a")).unwrap();
    assert_eq!(node.entity_id(), entity_id);
    assert_eq!(node.connection_url(), Some("ws://a:8000"));
}

#[test]
fn test_leave_for_unknown_key_is_noop() {
    let mut cluster = coordinator();

    assert!(!cluster.process_leave(&key("nonexistent"), ts(10)));

    assert!(cluster.is_empty());
}

#[test]
fn test_leave_is_idempotent() {
    let mut cluster = coordinator();
    cluster.process_join(&key("a"));

    assert!(cluster.process_leave(&key("a"), ts(10)));
    assert!(!cluster.process_leave(&key("a"), ts(20)));

    let node = cluster.find_by_instance_key(&key("a")).unwrap();
    assert_eq!(node.stop_time(), Some(ts(10)));
}

#[test]
fn test_reconciliation_three_way_diff() {
    let mut cluster = coordinator();
    cluster.reconcile_membership(&snapshot(&["a", "b", "c"]), ts(1));
    cluster.process_leave(&key("c"), ts(5));

    let b_id = cluster.find_by_instance_key(&key("b")).unwrap().entity_id();
    let c_id = cluster.find_by_instance_key(&key("c")).unwrap().entity_id();

    let change = cluster.reconcile_membership(&snapshot(&["b", "c", "d"]), ts(10));

    assert_eq!(change.stopped, vec![key("a")]);
    assert_eq!(change.added, vec![key("d")]);

    let a = cluster.find_by_instance_key(&key("a")).unwrap();
    assert_eq!(a.stop_time(), Some(ts(10)));

    let b = cluster.find_by_instance_key(&key("b")).unwrap();
    assert_eq!(b.entity_id(), b_id);
    assert_eq!(b.stop_time(), None);

    let c = cluster.find_by_instance_key(&key("c")).unwrap();
    assert_eq!(c.entity_id(), c_id);
    assert_eq!(c.stop_time(), Some(ts(5)));

    let d = cluster.find_by_instance_key(&key("d")).unwrap();
    assert!(!d.is_stopped());
    assert_eq!(d.connection_url(), Some("ws://d:8000"));
}

#[test]
fn test_reconciliation_with_same_snapshot_changes_nothing() {
    let mut cluster = coordinator();
    cluster.reconcile_membership(&snapshot(&["a", "b"]), ts(1));

    let change = cluster.reconcile_membership(&snapshot(&["a", "b"]), ts(2));

    assert!(change.is_empty());
    assert_eq!(cluster.len(), 2);
}

#[test]
fn test_rekey_preserves_identity() {
    let mut cluster = coordinator();
    let entity_id = cluster.start("ws://gw1:8000").unwrap();

    cluster.adopt_instance_key(key("abc")).unwrap();

    let node = cluster.find_by_instance_key(&key("abc")).unwrap();
    assert_eq!(node.entity_id(), entity_id);
    assert_eq!(node.instance_key(), &key("abc"));
    assert!(
        cluster
            .find_by_instance_key(&InstanceKey::unassigned())
            .is_none()
    );

    assert_matches!(
        cluster.adopt_instance_key(key("other")),
        Err(Error::KeyNotFound { .. })
    );
}

#[test]
fn test_sorted_nodes_live_first_then_earliest_stop() {
    let mut cluster = coordinator();
    cluster.reconcile_membership(
        &ClusterStateSnapshot::from_members([
            ("late", Some("ws://x".to_string())),
            ("live", Some("ws://x".to_string())),
            ("early", Some("ws://x".to_string())),
            ("nourl", None),
            ("other", Some("ws://a".to_string())),
        ]),
        ts(1),
    );
    cluster.process_leave(&key("late"), ts(100));
    cluster.process_leave(&key("early"), ts(50));

    let order: Vec<&str> = cluster
        .sorted_nodes()
        .iter()
        .map(|node| node.instance_key().as_str())
        .collect();

    assert_eq!(order, vec!["other", "live", "early", "late", "nourl"]);
    assert_eq!(
        cluster
            .find_by_connection_url("ws://x")
            .unwrap()
            .instance_key(),
        &key("live")
    );
}

#[test]
fn test_membership_notifications() {
    let mut cluster = coordinator();

    assert!(cluster.dispatch(&NotificationBuilder::joined("a")).is_applied());
    assert!(cluster.dispatch(&NotificationBuilder::joined("a")).is_applied());
    assert!(cluster.dispatch(&NotificationBuilder::left("a", 30)).is_applied());

    assert_eq!(cluster.len(), 1);
    assert_eq!(
        cluster.find_by_instance_key(&key("a")).unwrap().stop_time(),
        Some(ts(30))
    );

    let outcome = cluster.dispatch(
        &NotificationBuilder::raw("member-joined", "a")
            .without_instance_key()
            .build(),
    );
    assert_matches!(
        outcome,
        DispatchOutcome::Dropped(Error::MalformedNotification { .. })
    );
}
