//! VoiceRank - voice presence ranking for Discord and TeamSpeak
//!
//! Tracks who is present in voice on both platforms, credits presence time once per
//! tick, turns accumulated minutes into levels and seasonal divisions, and keeps each
//! platform's role or server group assignment in line with the stored ranks. A small
//! command bus lets an external service ask the adapters to act on its behalf.

pub mod adapters;
pub mod bus;
pub mod orchestrator;
pub mod platform;
pub mod presence;
pub mod ranks;
pub mod storage;

// Re-export commonly used types
pub use adapters::{AdapterError, PlatformAdapter};
pub use bus::{BusMedium, CommandClient, CommandResponder, MemoryMedium};
pub use orchestrator::Orchestrator;
pub use platform::Platform;
pub use presence::PresenceTracker;
pub use ranks::{RankEngine, RankThresholds};
pub use storage::{AccrualStore, AppConfig, Database};
