//! Platform adapters.
//!
//! Each adapter owns one network session to one chat platform, feeds a
//! [`PresenceTracker`] from that session's events and exposes the group/role and
//! channel primitives the rank correction and command bus need.

pub mod backoff;
pub mod discord;
pub mod teamspeak;
pub mod worker;

use crate::platform::Platform;
use crate::presence::PresenceTracker;
use crate::ranks::RankGroups;
use thiserror::Error;

pub use backoff::ReconnectBackoff;
pub use worker::{RankWorker, WorkItem, WorkQueue};

/// Errors from adapter operations.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("Not connected")]
    NotConnected,

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Invalid identifier: {0}")]
    InvalidId(String),

    #[error("Not configured: {0}")]
    NotConfigured(String),

    #[error("Platform rejected request: {0}")]
    Rejected(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<crate::storage::DatabaseError> for AdapterError {
    fn from(e: crate::storage::DatabaseError) -> Self {
        AdapterError::Storage(e.to_string())
    }
}

/// Group/role and channel primitives of one platform session.
pub trait PlatformAdapter: Send + Sync + 'static {
    /// Platform this adapter talks to.
    fn platform(&self) -> Platform;

    /// Live presence set fed by this adapter.
    fn presence(&self) -> &PresenceTracker;

    /// Rank group ids configured for this platform.
    fn rank_groups(&self) -> &RankGroups;

    /// Group or role ids the user currently holds.
    fn member_groups(
        &self,
        platform_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<u64>, AdapterError>> + Send;

    /// Grant a group or role.
    fn add_group(
        &self,
        platform_id: &str,
        group_id: u64,
    ) -> impl std::future::Future<Output = Result<(), AdapterError>> + Send;

    /// Revoke a group or role.
    fn remove_group(
        &self,
        platform_id: &str,
        group_id: u64,
    ) -> impl std::future::Future<Output = Result<(), AdapterError>> + Send;

    /// Create a permanent channel owned by the user, returning its id.
    fn create_owned_channel(
        &self,
        platform_id: &str,
        name: &str,
    ) -> impl std::future::Future<Output = Result<u64, AdapterError>> + Send;

    /// Move a channel under the apex parent.
    fn relocate_channel(
        &self,
        channel_id: u64,
    ) -> impl std::future::Future<Output = Result<(), AdapterError>> + Send;

    /// Deliver a private text message.
    fn send_direct_message(
        &self,
        platform_id: &str,
        text: &str,
    ) -> impl std::future::Future<Output = Result<(), AdapterError>> + Send;

    /// Group or role that protects a member from being moved, if configured.
    fn move_block_group(&self) -> Option<u64>;
}
