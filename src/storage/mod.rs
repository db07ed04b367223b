//! Storage module for database, counters and configuration.

pub mod accrual;
pub mod config;
pub mod database;
pub mod heatmap;
pub mod identity;
pub(crate) mod queries;
pub mod reset;
pub mod schema;
pub mod streak;

pub use accrual::{AccrualStore, PlatformIds, TimeCounters, UsageSample};
pub use config::{AppConfig, BusBackend, ConfigError};
pub use database::{Database, DatabaseError};
pub use heatmap::{HeatmapCell, TimeOfDay};
pub use identity::IdentityRecord;
pub use reset::{ResetPeriod, ResetWatermark};
pub use streak::LoginStreak;
