//! Voice server adapter over the ServerQuery interface.

pub mod adapter;
pub mod client;
pub mod query;
pub mod reputation;

pub use adapter::TeamspeakAdapter;
pub use client::{ConnectSettings, QueryClient, QueryError};
pub use query::{ClientEvent, Command, LeaveReason, QueryRecord};
pub use reputation::{ReputationChecker, ReputationError, ReputationReport};
