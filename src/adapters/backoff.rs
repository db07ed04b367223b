//! Reconnect delay policy.

use std::time::Duration;

/// Exponential reconnect delay between a floor and a ceiling.
///
/// Every consecutive failure doubles the delay until the ceiling is reached. A
/// successful connection resets it to the floor. Bans use a separate fixed wait that
/// neither grows nor touches the exponential state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectBackoff {
    floor: Duration,
    ceiling: Duration,
    banned_wait: Duration,
    current: Duration,
    failures: u32,
}

impl ReconnectBackoff {
    pub fn new(floor: Duration, ceiling: Duration, banned_wait: Duration) -> Self {
        let ceiling = ceiling.max(floor);
        Self {
            floor,
            ceiling,
            banned_wait,
            current: floor,
            failures: 0,
        }
    }

    /// Delay to wait after a failure; advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.ceiling);
        self.failures = self.failures.saturating_add(1);
        delay
    }

    /// Fixed wait after a ban.
    pub fn banned_delay(&self) -> Duration {
        self.banned_wait
    }

    /// Back to the floor after a successful connection.
    pub fn reset(&mut self) {
        self.current = self.floor;
        self.failures = 0;
    }

    /// Consecutive failures since the last reset.
    pub fn failures(&self) -> u32 {
        self.failures
    }
}
