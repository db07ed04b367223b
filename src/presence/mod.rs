//! Per-platform presence tracking.

pub mod tracker;

pub use tracker::{PresenceEntry, PresenceSnapshot, PresenceTracker, ReconcileDiff};
