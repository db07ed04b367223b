//! Gateway platform adapter.
//!
//! Voice presence is derived from a cache of voice states that the gateway keeps
//! current. The scan task reconciles the tracker against that cache, which also
//! covers events missed while the session was down.

use super::gateway::{GatewayConnection, GatewayError};
use super::model::{
    snowflake, GatewayEvent, GuildCreate, Member, VoiceState, AUDIT_MEMBER_MOVE,
    GATEWAY_INTENTS,
};
use super::rest::RestClient;
use crate::adapters::{AdapterError, PlatformAdapter, WorkQueue};
use crate::platform::Platform;
use crate::presence::{PresenceEntry, PresenceTracker};
use crate::ranks::RankGroups;
use crate::storage::config::DiscordSettings;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;

/// Time the audit log needs to show a move.
const MOVE_AUDIT_DELAY: Duration = Duration::from_secs(2);

/// Audit entries inspected when attributing a move.
const MOVE_AUDIT_LIMIT: u32 = 5;

/// What a voice state update means for presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceTransition {
    Joined { channel_id: u64 },
    Left { channel_id: u64 },
    Moved { from: u64, to: u64 },
    Unchanged,
}

/// Classify a change of a user's voice channel.
pub fn classify_transition(previous: Option<u64>, current: Option<u64>) -> VoiceTransition {
    match (previous, current) {
        (None, Some(channel_id)) => VoiceTransition::Joined { channel_id },
        (Some(channel_id), None) => VoiceTransition::Left { channel_id },
        (Some(from), Some(to)) if from != to => VoiceTransition::Moved { from, to },
        _ => VoiceTransition::Unchanged,
    }
}

/// Cached member facts needed for filtering and move attribution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberInfo {
    pub name: String,
    pub roles: Vec<u64>,
    pub bot: bool,
}

impl From<&Member> for MemberInfo {
    fn from(member: &Member) -> Self {
        Self {
            name: member.display_name(),
            roles: member.role_ids(),
            bot: member.is_bot(),
        }
    }
}

#[derive(Debug, Default)]
struct GuildCache {
    /// User id to current voice channel
    voice: HashMap<u64, u64>,
    members: HashMap<u64, MemberInfo>,
}

/// Build presence entries from the voice cache.
///
/// Bots, members of the excluded role and members the cache knows nothing about but
/// their id are filtered the same way joins are.
pub fn voice_entries(
    voice: &HashMap<u64, u64>,
    members: &HashMap<u64, MemberInfo>,
    excluded_role: Option<u64>,
) -> Vec<PresenceEntry> {
    let mut entries: Vec<PresenceEntry> = voice
        .keys()
        .filter_map(|user_id| {
            let info = members.get(user_id);
            if !is_trackable(info, excluded_role) {
                return None;
            }
            let name = info.map(|i| i.name.clone()).unwrap_or_default();
            Some(PresenceEntry::new(user_id.to_string(), name))
        })
        .collect();
    entries.sort_by(|a, b| a.user_id.cmp(&b.user_id));
    entries
}

fn is_trackable(info: Option<&MemberInfo>, excluded_role: Option<u64>) -> bool {
    match info {
        Some(info) => {
            !info.bot && !excluded_role.is_some_and(|excluded| info.roles.contains(&excluded))
        }
        None => true,
    }
}

/// Whether a move made by `actor` has to be undone.
pub fn should_revert(actor: Option<&MemberInfo>, self_id: u64, actor_id: u64, elevated: &[u64]) -> bool {
    if actor_id == self_id {
        return false;
    }
    match actor {
        Some(actor) => !actor.bot && !actor.roles.iter().any(|role| elevated.contains(role)),
        None => true,
    }
}

/// Gateway platform adapter.
pub struct DiscordAdapter {
    settings: DiscordSettings,
    token: String,
    rest: RestClient,
    tracker: PresenceTracker,
    queue: WorkQueue,
    cache: RwLock<GuildCache>,
    self_id: AtomicU64,
    defaults_assigned: AtomicBool,
}

impl DiscordAdapter {
    pub fn new(settings: DiscordSettings, token: String, queue: WorkQueue) -> Result<Self, AdapterError> {
        let rest = RestClient::new(&settings.api_base, &token)
            .map_err(|e| AdapterError::Connection(e.to_string()))?;

        Ok(Self {
            settings,
            token,
            rest,
            tracker: PresenceTracker::new(Platform::Discord),
            queue,
            cache: RwLock::new(GuildCache::default()),
            self_id: AtomicU64::new(0),
            defaults_assigned: AtomicBool::new(false),
        })
    }

    pub fn settings(&self) -> &DiscordSettings {
        &self.settings
    }

    /// Keep a gateway session open until shutdown, retrying failures forever.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        while !*shutdown.borrow() {
            let delay = match self.run_session(&mut shutdown).await {
                Ok(()) => break,
                Err(e) => {
                    let delay = e.retry_delay();
                    tracing::warn!("Gateway session ended ({}), retrying in {}s", e, delay.as_secs());
                    delay
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }
        tracing::info!("Discord adapter stopped");
    }

    async fn run_session(
        self: &Arc<Self>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), GatewayError> {
        let mut connection =
            GatewayConnection::connect(&self.settings.gateway_url, &self.token, GATEWAY_INTENTS).await?;
        tracing::info!("Connected to the Discord gateway");

        let scan_every = Duration::from_secs(self.settings.scan_interval_secs.max(1));
        let mut scan = tokio::time::interval_at(tokio::time::Instant::now() + scan_every, scan_every);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        connection.close().await;
                        return Ok(());
                    }
                }
                _ = scan.tick() => self.scan(),
                event = connection.next_event() => self.handle_event(event?),
            }
        }
    }

    /// Reconcile presence with the voice cache.
    pub fn scan(&self) {
        let entries = {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            voice_entries(&cache.voice, &cache.members, self.settings.excluded_role_id)
        };
        let diff = self.tracker.reconcile(entries);
        for platform_id in diff.added {
            self.queue.check_ranks(platform_id);
        }
    }

    /// Apply one gateway event.
    pub fn handle_event(self: &Arc<Self>, event: GatewayEvent) {
        match event {
            GatewayEvent::Ready(ready) => {
                if let Some(id) = snowflake(&ready.user.id) {
                    self.self_id.store(id, Ordering::Relaxed);
                }
            }
            GatewayEvent::GuildCreate(guild) => {
                if snowflake(&guild.id) != Some(self.settings.guild_id) {
                    return;
                }
                self.load_guild(&guild);
                self.scan();
                if !self.defaults_assigned.swap(true, Ordering::Relaxed) {
                    self.spawn_default_roles();
                }
            }
            GatewayEvent::VoiceStateUpdate(state) => self.handle_voice_state(state),
            GatewayEvent::GuildMemberAdd(added) => {
                if snowflake(&added.guild_id) != Some(self.settings.guild_id) {
                    return;
                }
                let Some(user_id) = added.member.user_id() else {
                    return;
                };
                self.remember_member(user_id, &added.member);
                if !added.member.is_bot() {
                    self.spawn_new_member_role(user_id);
                }
            }
            GatewayEvent::GuildMemberUpdate(updated) => {
                if let Some(user_id) = updated.member.user_id() {
                    self.remember_member(user_id, &updated.member);
                }
            }
            GatewayEvent::GuildMemberRemove(removed) => {
                if let Some(user_id) = snowflake(&removed.user.id) {
                    let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
                    cache.members.remove(&user_id);
                }
            }
            GatewayEvent::Other(_) => {}
        }
    }

    fn load_guild(&self, guild: &GuildCreate) {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        for member in &guild.members {
            if let Some(user_id) = member.user_id() {
                cache.members.insert(user_id, MemberInfo::from(member));
            }
        }
        cache.voice = guild
            .voice_states
            .iter()
            .filter_map(|state| {
                let user_id = snowflake(&state.user_id)?;
                let channel_id = state.channel_id.as_deref().and_then(snowflake)?;
                Some((user_id, channel_id))
            })
            .collect();
        tracing::debug!("Guild cache loaded: {} in voice", cache.voice.len());
    }

    fn remember_member(&self, user_id: u64, member: &Member) {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        cache.members.insert(user_id, MemberInfo::from(member));
    }

    fn handle_voice_state(self: &Arc<Self>, state: VoiceState) {
        if let Some(guild_id) = state.guild_id.as_deref() {
            if snowflake(guild_id) != Some(self.settings.guild_id) {
                return;
            }
        }
        let Some(user_id) = snowflake(&state.user_id) else {
            return;
        };
        let current = state.channel_id.as_deref().and_then(snowflake);

        let (previous, info) = {
            let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(member) = &state.member {
                cache.members.insert(user_id, MemberInfo::from(member));
            }
            let previous = match current {
                Some(channel_id) => cache.voice.insert(user_id, channel_id),
                None => cache.voice.remove(&user_id),
            };
            (previous, cache.members.get(&user_id).cloned())
        };

        match classify_transition(previous, current) {
            VoiceTransition::Joined { .. } => {
                if !is_trackable(info.as_ref(), self.settings.excluded_role_id) {
                    return;
                }
                let name = info.map(|i| i.name).unwrap_or_default();
                let platform_id = user_id.to_string();
                if self.tracker.join(PresenceEntry::new(&platform_id, name)) {
                    self.queue.check_ranks(platform_id);
                }
            }
            VoiceTransition::Left { .. } => {
                self.tracker.leave(&user_id.to_string());
            }
            VoiceTransition::Moved { from, to } => {
                let shielded = self
                    .settings
                    .move_block_role_id
                    .is_some_and(|role| info.as_ref().is_some_and(|i| i.roles.contains(&role)));
                if shielded {
                    self.spawn_move_revert(user_id, from, to);
                }
            }
            VoiceTransition::Unchanged => {}
        }
    }

    fn spawn_move_revert(self: &Arc<Self>, user_id: u64, from: u64, to: u64) {
        let adapter = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = adapter.revert_move(user_id, from, to).await {
                tracing::warn!("Could not revert move of {}: {}", user_id, e);
            }
        });
    }

    /// Move a shielded member back unless they moved themselves or an elevated member moved them.
    async fn revert_move(&self, user_id: u64, from: u64, to: u64) -> Result<(), AdapterError> {
        tokio::time::sleep(MOVE_AUDIT_DELAY).await;

        let entries = self
            .rest
            .audit_log(self.settings.guild_id, AUDIT_MEMBER_MOVE, MOVE_AUDIT_LIMIT)
            .await?;
        let actor_id = entries
            .iter()
            .find(|entry| {
                entry
                    .options
                    .as_ref()
                    .and_then(|o| o.channel_id.as_deref())
                    .and_then(snowflake)
                    == Some(to)
            })
            .and_then(|entry| entry.user_id.as_deref())
            .and_then(snowflake);

        // Self moves leave no audit entry
        let Some(actor_id) = actor_id else {
            return Ok(());
        };

        let actor = {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            cache.members.get(&actor_id).cloned()
        };
        let actor = match actor {
            Some(actor) => Some(actor),
            None => self
                .rest
                .get_member(self.settings.guild_id, actor_id)
                .await
                .ok()
                .map(|member| MemberInfo::from(&member)),
        };

        let self_id = self.self_id.load(Ordering::Relaxed);
        if !should_revert(actor.as_ref(), self_id, actor_id, &self.settings.elevated_role_ids) {
            return Ok(());
        }

        self.rest
            .move_member(self.settings.guild_id, user_id, from)
            .await?;
        tracing::info!("Reverted move of shielded member {} by {}", user_id, actor_id);
        Ok(())
    }

    fn spawn_new_member_role(self: &Arc<Self>, user_id: u64) {
        let Some(role) = self.settings.groups.level_group(1) else {
            return;
        };
        let adapter = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = adapter.rest.add_role(adapter.settings.guild_id, user_id, role).await {
                tracing::warn!("Could not give level role to new member {}: {}", user_id, e);
            }
        });
    }

    fn spawn_default_roles(self: &Arc<Self>) {
        let adapter = Arc::clone(self);
        tokio::spawn(async move {
            match adapter.assign_default_roles().await {
                Ok(count) => tracing::info!("Assigned default roles to {} members", count),
                Err(e) => tracing::warn!("Default role assignment failed: {}", e),
            }
        });
    }

    /// Give level 1 and division 1 to every member holding no role of that category.
    pub async fn assign_default_roles(&self) -> Result<usize, AdapterError> {
        let groups = &self.settings.groups;
        let members = self.rest.list_members(self.settings.guild_id).await?;

        let mut updated = 0;
        for member in &members {
            let Some(user_id) = member.user_id() else {
                continue;
            };
            let info = MemberInfo::from(member);
            if !is_trackable(Some(&info), self.settings.excluded_role_id) {
                continue;
            }

            let missing = default_roles_missing(&info.roles, groups);
            for role in &missing {
                if let Err(e) = self.rest.add_role(self.settings.guild_id, user_id, *role).await {
                    tracing::warn!("Default role {} for {} failed: {}", role, user_id, e);
                }
            }
            if !missing.is_empty() {
                updated += 1;
            }
        }
        Ok(updated)
    }

    fn user_id(platform_id: &str) -> Result<u64, AdapterError> {
        snowflake(platform_id).ok_or_else(|| AdapterError::InvalidId(platform_id.to_string()))
    }
}

/// Default roles a member lacks: level 1 without any level role, division 1 without any
/// division role.
pub fn default_roles_missing(roles: &[u64], groups: &RankGroups) -> Vec<u64> {
    let mut missing = Vec::new();
    if !roles.iter().any(|r| groups.levels.contains(r)) {
        missing.extend(groups.level_group(1));
    }
    if !roles.iter().any(|r| groups.divisions.contains(r)) {
        missing.extend(groups.division_group(1));
    }
    missing
}

impl PlatformAdapter for DiscordAdapter {
    fn platform(&self) -> Platform {
        Platform::Discord
    }

    fn presence(&self) -> &PresenceTracker {
        &self.tracker
    }

    fn rank_groups(&self) -> &RankGroups {
        &self.settings.groups
    }

    async fn member_groups(&self, platform_id: &str) -> Result<Vec<u64>, AdapterError> {
        let user_id = Self::user_id(platform_id)?;
        let member = self.rest.get_member(self.settings.guild_id, user_id).await?;
        Ok(member.role_ids())
    }

    async fn add_group(&self, platform_id: &str, group_id: u64) -> Result<(), AdapterError> {
        let user_id = Self::user_id(platform_id)?;
        self.rest
            .add_role(self.settings.guild_id, user_id, group_id)
            .await?;
        Ok(())
    }

    async fn remove_group(&self, platform_id: &str, group_id: u64) -> Result<(), AdapterError> {
        let user_id = Self::user_id(platform_id)?;
        self.rest
            .remove_role(self.settings.guild_id, user_id, group_id)
            .await?;
        Ok(())
    }

    async fn create_owned_channel(&self, platform_id: &str, name: &str) -> Result<u64, AdapterError> {
        let user_id = Self::user_id(platform_id)?;
        let channel_id = self
            .rest
            .create_voice_channel(
                self.settings.guild_id,
                name,
                self.settings.parent_channel_id,
                user_id,
            )
            .await?;
        tracing::info!("Created Discord channel {} for {}", channel_id, platform_id);
        Ok(channel_id)
    }

    async fn relocate_channel(&self, channel_id: u64) -> Result<(), AdapterError> {
        let parent = self
            .settings
            .apex_parent_channel_id
            .ok_or_else(|| AdapterError::NotConfigured("apex_parent_channel_id".to_string()))?;
        self.rest.set_channel_parent(channel_id, parent).await?;
        Ok(())
    }

    async fn send_direct_message(&self, platform_id: &str, text: &str) -> Result<(), AdapterError> {
        let user_id = Self::user_id(platform_id)?;
        self.rest.send_dm(user_id, text).await?;
        Ok(())
    }

    fn move_block_group(&self) -> Option<u64> {
        self.settings.move_block_role_id
    }
}
