//! Unit tests for the reconnect delay policy

use std::time::Duration;
use voicerank::adapters::ReconnectBackoff;

#[test]
fn test_default_schedule() {
    let mut backoff = ReconnectBackoff::new(
        Duration::from_secs(30),
        Duration::from_secs(300),
        Duration::from_secs(300),
    );

    let delays: Vec<u64> = (0..6).map(|_| backoff.next_delay().as_secs()).collect();
    assert_eq!(delays, vec![30, 60, 120, 240, 300, 300]);
}

/// Bans wait a fixed time and leave the exponential state alone
#[test]
fn test_banned_wait_is_fixed() {
    let mut backoff = ReconnectBackoff::new(
        Duration::from_secs(30),
        Duration::from_secs(300),
        Duration::from_secs(600),
    );
    backoff.next_delay();

    assert_eq!(backoff.banned_delay(), Duration::from_secs(600));
    assert_eq!(backoff.banned_delay(), Duration::from_secs(600));
    assert_eq!(backoff.failures(), 1);
    assert_eq!(backoff.next_delay(), Duration::from_secs(60));
}

#[test]
fn test_success_resets() {
    let mut backoff = ReconnectBackoff::new(
        Duration::from_secs(1),
        Duration::from_secs(8),
        Duration::from_secs(8),
    );
    for _ in 0..10 {
        backoff.next_delay();
    }
    backoff.reset();

    assert_eq!(backoff.failures(), 0);
    assert_eq!(backoff.next_delay(), Duration::from_secs(1));
}

#[test]
fn test_ceiling_below_floor_is_raised() {
    let mut backoff = ReconnectBackoff::new(
        Duration::from_secs(10),
        Duration::from_secs(5),
        Duration::from_secs(5),
    );
    assert_eq!(backoff.next_delay(), Duration::from_secs(10));
    assert_eq!(backoff.next_delay(), Duration::from_secs(10));
}
