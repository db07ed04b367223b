//! Unit tests for presence tracking and reconciliation

use voicerank::presence::{PresenceEntry, PresenceTracker};
use voicerank::Platform;

#[test]
fn test_join_and_leave() {
    let tracker = PresenceTracker::new(Platform::Discord);

    assert!(tracker.join(PresenceEntry::new("1", "Anna")));
    assert!(!tracker.join(PresenceEntry::new("1", "Anna")));
    assert!(tracker.contains("1"));

    assert!(tracker.leave("1"));
    assert!(!tracker.leave("1"));
    assert!(tracker.is_empty());
}

/// Leaves arrive with connection ids; the user goes with the last session
#[test]
fn test_session_leave() {
    let tracker = PresenceTracker::new(Platform::Teamspeak);
    tracker.join(PresenceEntry::new("uid-a", "Anna").with_session("11"));
    tracker.join(PresenceEntry::new("uid-a", "Anna").with_session("12"));

    assert_eq!(tracker.user_for_session("12").as_deref(), Some("uid-a"));
    assert_eq!(tracker.leave_session("11"), None);
    assert!(tracker.contains("uid-a"));
    assert_eq!(tracker.leave_session("12").as_deref(), Some("uid-a"));
    assert!(!tracker.contains("uid-a"));
    assert_eq!(tracker.leave_session("99"), None);
}

#[test]
fn test_reconcile_diff() {
    let tracker = PresenceTracker::new(Platform::Discord);
    tracker.join(PresenceEntry::new("1", "Anna"));
    tracker.join(PresenceEntry::new("2", "Ben"));

    let diff = tracker.reconcile(vec![PresenceEntry::new("2", "Ben"), PresenceEntry::new("3", "Cem")]);

    assert_eq!(diff.added, vec!["3".to_string()]);
    assert_eq!(diff.removed, vec!["1".to_string()]);
    assert_eq!(tracker.ids(), vec!["2".to_string(), "3".to_string()]);
}

/// Reconciling twice against the same snapshot changes nothing the second time
#[test]
fn test_reconcile_fixed_point() {
    let tracker = PresenceTracker::new(Platform::Discord);
    let snapshot = vec![PresenceEntry::new("1", "Anna"), PresenceEntry::new("2", "Ben")];

    tracker.reconcile(snapshot.clone());
    let before = tracker.snapshot();
    let diff = tracker.reconcile(snapshot);

    assert!(diff.is_empty());
    assert_eq!(tracker.snapshot(), before);
}

#[test]
fn test_clones_share_state() {
    let tracker = PresenceTracker::new(Platform::Discord);
    let reader = tracker.clone();

    tracker.join(PresenceEntry::new("1", "Anna"));
    assert_eq!(reader.len(), 1);
    assert_eq!(reader.snapshot().users.get("1").map(String::as_str), Some("Anna"));
}
