//! Recording mock platform adapter.
//!
//! Keeps group membership in memory and logs every platform call so tests can assert
//! on what the rank correction and the command responder asked for.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use voicerank::adapters::{AdapterError, PlatformAdapter};
use voicerank::presence::{PresenceEntry, PresenceTracker};
use voicerank::ranks::RankGroups;
use voicerank::Platform;

/// Group id of level `n` in [`mock_groups`].
pub fn level_group(level: u8) -> u64 {
    100 + level as u64
}

/// Group id of division `n` in [`mock_groups`].
pub fn division_group(division: u8) -> u64 {
    200 + division as u64
}

pub const MOVE_BLOCK_GROUP: u64 = 900;

/// Levels 1..=25 map to groups 101..=125, divisions 1..=6 to 201..=206.
pub fn mock_groups() -> RankGroups {
    RankGroups {
        levels: (1..=25).map(level_group).collect(),
        divisions: (1..=6).map(division_group).collect(),
    }
}

/// In-memory adapter for one platform.
pub struct MockAdapter {
    platform: Platform,
    tracker: PresenceTracker,
    groups: RankGroups,
    members: Mutex<HashMap<String, Vec<u64>>>,
    /// Users the platform does not know
    missing: Mutex<HashSet<String>>,
    /// Groups the platform refuses to grant
    refused: Mutex<HashSet<u64>>,
    calls: Mutex<Vec<String>>,
    messages: Mutex<Vec<(String, String)>>,
    next_channel: AtomicU64,
}

impl MockAdapter {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            tracker: PresenceTracker::new(platform),
            groups: mock_groups(),
            members: Mutex::new(HashMap::new()),
            missing: Mutex::new(HashSet::new()),
            refused: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
            messages: Mutex::new(Vec::new()),
            next_channel: AtomicU64::new(5000),
        }
    }

    /// Put a user in voice.
    pub fn join(&self, platform_id: &str, name: &str) {
        self.tracker.join(PresenceEntry::new(platform_id, name));
    }

    pub fn leave(&self, platform_id: &str) {
        self.tracker.leave(platform_id);
    }

    /// Set the groups a user currently holds.
    pub fn set_groups(&self, platform_id: &str, groups: Vec<u64>) {
        self.members
            .lock()
            .unwrap()
            .insert(platform_id.to_string(), groups);
    }

    pub fn groups_of(&self, platform_id: &str) -> Vec<u64> {
        let mut groups = self
            .members
            .lock()
            .unwrap()
            .get(platform_id)
            .cloned()
            .unwrap_or_default();
        groups.sort();
        groups
    }

    /// Make every call for this user fail as if they left the platform.
    pub fn forget(&self, platform_id: &str) {
        self.missing.lock().unwrap().insert(platform_id.to_string());
    }

    /// Make granting `group_id` fail, e.g. for a role above the bot's own.
    pub fn refuse_group(&self, group_id: u64) {
        self.refused.lock().unwrap().insert(group_id);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn check_known(&self, platform_id: &str) -> Result<(), AdapterError> {
        if self.missing.lock().unwrap().contains(platform_id) {
            return Err(AdapterError::UserNotFound(platform_id.to_string()));
        }
        Ok(())
    }
}

impl PlatformAdapter for MockAdapter {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn presence(&self) -> &PresenceTracker {
        &self.tracker
    }

    fn rank_groups(&self) -> &RankGroups {
        &self.groups
    }

    async fn member_groups(&self, platform_id: &str) -> Result<Vec<u64>, AdapterError> {
        self.check_known(platform_id)?;
        Ok(self.groups_of(platform_id))
    }

    async fn add_group(&self, platform_id: &str, group_id: u64) -> Result<(), AdapterError> {
        self.check_known(platform_id)?;
        if self.refused.lock().unwrap().contains(&group_id) {
            return Err(AdapterError::Rejected(format!("missing permission for {}", group_id)));
        }
        self.record(format!("add {} {}", platform_id, group_id));
        let mut members = self.members.lock().unwrap();
        let groups = members.entry(platform_id.to_string()).or_default();
        if !groups.contains(&group_id) {
            groups.push(group_id);
        }
        Ok(())
    }

    async fn remove_group(&self, platform_id: &str, group_id: u64) -> Result<(), AdapterError> {
        self.check_known(platform_id)?;
        self.record(format!("remove {} {}", platform_id, group_id));
        if let Some(groups) = self.members.lock().unwrap().get_mut(platform_id) {
            groups.retain(|g| *g != group_id);
        }
        Ok(())
    }

    async fn create_owned_channel(&self, platform_id: &str, name: &str) -> Result<u64, AdapterError> {
        self.check_known(platform_id)?;
        self.record(format!("channel {} {}", platform_id, name));
        Ok(self.next_channel.fetch_add(1, Ordering::SeqCst))
    }

    async fn relocate_channel(&self, channel_id: u64) -> Result<(), AdapterError> {
        self.record(format!("relocate {}", channel_id));
        Ok(())
    }

    async fn send_direct_message(&self, platform_id: &str, text: &str) -> Result<(), AdapterError> {
        self.check_known(platform_id)?;
        self.messages
            .lock()
            .unwrap()
            .push((platform_id.to_string(), text.to_string()));
        Ok(())
    }

    fn move_block_group(&self) -> Option<u64> {
        Some(MOVE_BLOCK_GROUP)
    }
}
