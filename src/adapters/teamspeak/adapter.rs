//! Voice server adapter.
//!
//! Two query sessions are kept: the event session is owned by [`TeamspeakAdapter::run`]
//! and blocks on server notifications, the command session serves group, channel and
//! message calls from the workers and the command responder.

use super::client::{ConnectSettings, QueryClient, QueryError};
use super::query::{
    ClientEvent, Command, Notification, QueryRecord, STATUS_CHANNEL_NAME_IN_USE,
    STATUS_DUPLICATE_ENTRY,
};
use super::reputation::ReputationChecker;
use crate::adapters::{AdapterError, PlatformAdapter, ReconnectBackoff, WorkQueue};
use crate::platform::Platform;
use crate::presence::{PresenceEntry, PresenceTracker};
use crate::ranks::RankGroups;
use crate::storage::config::TeamspeakSettings;
use crate::storage::AccrualStore;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};

/// Deadline for connecting and for each command reply.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Renames tried after a channel name collision.
const CHANNEL_NAME_RETRIES: usize = 3;

/// Kick from the server.
const KICK_REASON_SERVER: u32 = 5;

/// Private text message.
const TARGET_MODE_CLIENT: u32 = 1;

impl From<QueryError> for AdapterError {
    fn from(e: QueryError) -> Self {
        if e.is_connection() {
            AdapterError::Connection(e.to_string())
        } else {
            AdapterError::Rejected(e.to_string())
        }
    }
}

/// Lazily opened session for request/response commands.
///
/// A broken session is reopened once per command before the error surfaces.
struct CommandSession {
    settings: ConnectSettings,
    client: Mutex<Option<QueryClient>>,
}

impl CommandSession {
    fn new(settings: ConnectSettings) -> Self {
        Self {
            settings,
            client: Mutex::new(None),
        }
    }

    async fn exec(&self, command: &Command) -> Result<Vec<QueryRecord>, QueryError> {
        let mut guard = self.client.lock().await;
        let mut retried = false;
        loop {
            if guard.is_none() {
                *guard = Some(QueryClient::open(&self.settings).await?);
            }
            let Some(client) = guard.as_mut() else {
                return Err(QueryError::Closed);
            };

            match client.exec(command).await {
                Err(e) if e.is_connection() && !retried => {
                    tracing::debug!("Command session lost ({}), reopening", e);
                    *guard = None;
                    retried = true;
                }
                result => return result,
            }
        }
    }

    async fn close(&self) {
        if let Some(client) = self.client.lock().await.take() {
            client.quit().await;
        }
    }
}

/// Build a presence entry from a `clientlist -uid -groups` record.
///
/// Query clients and members of the excluded group yield `None`.
pub fn entry_from_listing(record: &QueryRecord, excluded_group: Option<u64>) -> Option<PresenceEntry> {
    if record.get("client_type").unwrap_or("0") != "0" {
        return None;
    }
    if is_excluded(&record.get_id_list("client_servergroups"), excluded_group) {
        return None;
    }

    let unique_id = record.get("client_unique_identifier")?;
    let clid = record.get("clid")?;
    Some(
        PresenceEntry::new(unique_id, record.get("client_nickname").unwrap_or_default())
            .with_session(clid),
    )
}

fn is_excluded(groups: &[u64], excluded_group: Option<u64>) -> bool {
    excluded_group.is_some_and(|excluded| groups.contains(&excluded))
}

/// Name to try for the given collision attempt.
fn channel_name_candidate(name: &str, attempt: usize) -> String {
    if attempt == 0 {
        return name.to_string();
    }
    let suffix = uuid::Uuid::new_v4().as_u128() % 1_000_000;
    format!("{} ({:06})", name, suffix)
}

enum SessionStep {
    Shutdown { sender_gone: bool },
    Event(Result<Result<Notification, QueryError>, tokio::time::error::Elapsed>),
}

/// Voice server platform adapter.
pub struct TeamspeakAdapter {
    settings: TeamspeakSettings,
    connect: ConnectSettings,
    tracker: PresenceTracker,
    queue: WorkQueue,
    store: AccrualStore,
    reputation: Option<ReputationChecker>,
    commands: CommandSession,
}

impl TeamspeakAdapter {
    pub fn new(
        settings: TeamspeakSettings,
        password: String,
        store: AccrualStore,
        queue: WorkQueue,
        reputation: Option<ReputationChecker>,
    ) -> Self {
        let connect = ConnectSettings {
            host: settings.host.clone(),
            port: settings.port,
            username: settings.username.clone(),
            password,
            server_id: settings.server_id,
            command_timeout: COMMAND_TIMEOUT,
        };

        Self {
            commands: CommandSession::new(connect.clone()),
            connect,
            settings,
            tracker: PresenceTracker::new(Platform::Teamspeak),
            queue,
            store,
            reputation,
        }
    }

    pub fn settings(&self) -> &TeamspeakSettings {
        &self.settings
    }

    /// Keep an event session open until shutdown.
    ///
    /// Failures reconnect with exponential backoff; a ban waits the fixed banned delay.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = ReconnectBackoff::new(
            Duration::from_secs(self.settings.reconnect_floor_secs),
            Duration::from_secs(self.settings.reconnect_ceiling_secs),
            Duration::from_secs(self.settings.banned_wait_secs),
        );

        while !*shutdown.borrow() {
            let delay = match self.run_session(&mut backoff, &mut shutdown).await {
                Ok(()) => break,
                Err(e) if e.is_banned() => {
                    tracing::error!("TeamSpeak query client banned: {}", e);
                    backoff.banned_delay()
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        "TeamSpeak session failed ({}), reconnecting in {}s",
                        e,
                        delay.as_secs()
                    );
                    delay
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        self.commands.close().await;
        tracing::info!("TeamSpeak adapter stopped");
    }

    /// One connected session. `Ok` means shutdown was requested.
    async fn run_session(
        self: &Arc<Self>,
        backoff: &mut ReconnectBackoff,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), QueryError> {
        tracing::info!(
            "Connecting to TeamSpeak at {}:{}",
            self.connect.host,
            self.connect.port
        );
        let mut client = QueryClient::open(&self.connect).await?;
        client.register_server_events().await?;
        backoff.reset();
        tracing::info!("Connected to TeamSpeak server {}", self.connect.server_id);

        self.rescan(&mut client, true).await?;

        let event_wait = Duration::from_secs(self.settings.event_wait_secs.max(1));
        let rescan_interval = Duration::from_secs(self.settings.rescan_interval_secs.max(1));
        let mut last_keepalive = Instant::now();
        let mut last_rescan = Instant::now();

        loop {
            let step = tokio::select! {
                changed = shutdown.changed() => SessionStep::Shutdown { sender_gone: changed.is_err() },
                event = tokio::time::timeout(event_wait, client.next_event()) => SessionStep::Event(event),
            };

            match step {
                SessionStep::Shutdown { sender_gone } => {
                    if sender_gone || *shutdown.borrow() {
                        client.quit().await;
                        return Ok(());
                    }
                }
                SessionStep::Event(Ok(Ok(notification))) => {
                    self.handle_notification(&mut client, notification).await?;
                }
                SessionStep::Event(Ok(Err(e))) => return Err(e),
                // Idle poll
                SessionStep::Event(Err(_)) => {}
            }

            if last_keepalive.elapsed() >= event_wait {
                client.keepalive().await?;
                last_keepalive = Instant::now();
            }
            if last_rescan.elapsed() >= rescan_interval {
                self.rescan(&mut client, false).await?;
                last_rescan = Instant::now();
            }
        }
    }

    /// Reconcile presence with the full client list.
    ///
    /// Rank checks are queued for everyone on connect and for new users afterwards.
    async fn rescan(&self, client: &mut QueryClient, check_all: bool) -> Result<(), QueryError> {
        let records = client
            .exec(&Command::new("clientlist").option("uid").option("groups"))
            .await?;

        let entries: Vec<PresenceEntry> = records
            .iter()
            .filter_map(|record| entry_from_listing(record, self.settings.excluded_group_id))
            .collect();
        let present: Vec<String> = entries.iter().map(|e| e.user_id.clone()).collect();

        let diff = self.tracker.reconcile(entries);
        let to_check = if check_all { present } else { diff.added };
        for platform_id in to_check {
            self.queue.check_ranks(platform_id);
        }
        Ok(())
    }

    async fn handle_notification(
        self: &Arc<Self>,
        client: &mut QueryClient,
        notification: Notification,
    ) -> Result<(), QueryError> {
        match ClientEvent::from_notification(&notification) {
            Some(ClientEvent::Joined {
                clid,
                database_id,
                unique_id,
                nickname,
                regular,
                server_groups,
            }) => {
                if !regular {
                    return Ok(());
                }

                let groups = match (server_groups, database_id) {
                    (Some(groups), _) => groups,
                    (None, Some(database_id)) => groups_of(client, database_id).await?,
                    (None, None) => Vec::new(),
                };
                if is_excluded(&groups, self.settings.excluded_group_id) {
                    tracing::debug!("Ignoring excluded client {}", unique_id);
                    return Ok(());
                }

                let entry = PresenceEntry::new(&unique_id, &nickname).with_session(clid.to_string());
                if self.tracker.join(entry) {
                    self.queue.check_ranks(&unique_id);
                }
                self.spawn_screening(clid, unique_id);
            }
            Some(ClientEvent::Left { clid, reason }) => {
                if let Some(user_id) = self.tracker.leave_session(&clid.to_string()) {
                    tracing::debug!("TeamSpeak client {} left ({:?})", user_id, reason);
                }
            }
            None => {}
        }
        Ok(())
    }

    fn spawn_screening(self: &Arc<Self>, clid: u64, unique_id: String) {
        if self.reputation.is_none() {
            return;
        }
        let adapter = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = adapter.screen(clid, &unique_id).await {
                tracing::warn!("Screening of {} failed: {}", unique_id, e);
            }
        });
    }

    /// Disconnect a low-level user whose origin address is flagged.
    async fn screen(&self, clid: u64, unique_id: &str) -> Result<(), AdapterError> {
        let Some(checker) = &self.reputation else {
            return Ok(());
        };

        let store = self.store.clone();
        let platform_id = unique_id.to_string();
        let stored = tokio::task::spawn_blocking(move || {
            store.stored_ranks(Platform::Teamspeak, &platform_id)
        })
        .await
        .map_err(|e| AdapterError::Storage(e.to_string()))??
        .unwrap_or_default();

        if stored.level >= checker.settings().below_level {
            return Ok(());
        }

        let info = self
            .commands
            .exec(&Command::new("clientinfo").arg("clid", clid))
            .await?;
        let Some(address) = info.first().and_then(|r| r.get("connection_client_ip")) else {
            return Ok(());
        };

        if checker.should_refuse(address).await {
            tracing::info!("Kicking {} for a flagged origin address", unique_id);
            self.commands
                .exec(
                    &Command::new("clientkick")
                        .arg("clid", clid)
                        .arg("reasonid", KICK_REASON_SERVER)
                        .arg("reasonmsg", &checker.settings().kick_reason),
                )
                .await?;
        }
        Ok(())
    }

    async fn database_id(&self, unique_id: &str) -> Result<u64, AdapterError> {
        let records = self
            .commands
            .exec(&Command::new("clientgetdbidfromuid").arg("cluid", unique_id))
            .await?;
        records
            .first()
            .and_then(|r| r.get_u64("cldbid"))
            .ok_or_else(|| AdapterError::UserNotFound(unique_id.to_string()))
    }

    async fn online_client_id(&self, unique_id: &str) -> Result<u64, AdapterError> {
        let records = self
            .commands
            .exec(&Command::new("clientgetids").arg("cluid", unique_id))
            .await?;
        records
            .first()
            .and_then(|r| r.get_u64("clid"))
            .ok_or_else(|| AdapterError::UserNotFound(unique_id.to_string()))
    }
}

async fn groups_of(client: &mut QueryClient, database_id: u64) -> Result<Vec<u64>, QueryError> {
    let records = client
        .exec(&Command::new("servergroupsbyclientid").arg("cldbid", database_id))
        .await?;
    Ok(records.iter().filter_map(|r| r.get_u64("sgid")).collect())
}

impl PlatformAdapter for TeamspeakAdapter {
    fn platform(&self) -> Platform {
        Platform::Teamspeak
    }

    fn presence(&self) -> &PresenceTracker {
        &self.tracker
    }

    fn rank_groups(&self) -> &RankGroups {
        &self.settings.groups
    }

    async fn member_groups(&self, platform_id: &str) -> Result<Vec<u64>, AdapterError> {
        let database_id = self.database_id(platform_id).await?;
        let records = self
            .commands
            .exec(&Command::new("servergroupsbyclientid").arg("cldbid", database_id))
            .await?;
        Ok(records.iter().filter_map(|r| r.get_u64("sgid")).collect())
    }

    async fn add_group(&self, platform_id: &str, group_id: u64) -> Result<(), AdapterError> {
        let database_id = self.database_id(platform_id).await?;
        let result = self
            .commands
            .exec(
                &Command::new("servergroupaddclient")
                    .arg("sgid", group_id)
                    .arg("cldbid", database_id),
            )
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if e.status_id() == Some(STATUS_DUPLICATE_ENTRY) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_group(&self, platform_id: &str, group_id: u64) -> Result<(), AdapterError> {
        let database_id = self.database_id(platform_id).await?;
        self.commands
            .exec(
                &Command::new("servergroupdelclient")
                    .arg("sgid", group_id)
                    .arg("cldbid", database_id),
            )
            .await?;
        Ok(())
    }

    async fn create_owned_channel(&self, platform_id: &str, name: &str) -> Result<u64, AdapterError> {
        let database_id = self.database_id(platform_id).await?;

        let mut channel_id = None;
        for attempt in 0..=CHANNEL_NAME_RETRIES {
            let candidate = channel_name_candidate(name, attempt);
            let result = self
                .commands
                .exec(
                    &Command::new("channelcreate")
                        .arg("channel_name", &candidate)
                        .arg("cpid", self.settings.parent_channel_id)
                        .arg("channel_flag_permanent", 1)
                        .arg("channel_codec", 4)
                        .arg("channel_codec_quality", 10),
                )
                .await;

            match result {
                Ok(records) => {
                    channel_id = records.first().and_then(|r| r.get_u64("cid"));
                    break;
                }
                Err(e) if e.status_id() == Some(STATUS_CHANNEL_NAME_IN_USE) => {
                    tracing::debug!("Channel name {:?} taken", candidate);
                }
                Err(e) => return Err(e.into()),
            }
        }

        let channel_id = channel_id.ok_or_else(|| {
            AdapterError::Rejected(format!("no free channel name for {:?}", name))
        })?;

        self.commands
            .exec(
                &Command::new("setclientchannelgroup")
                    .arg("cgid", self.settings.owner_channel_group_id)
                    .arg("cid", channel_id)
                    .arg("cldbid", database_id),
            )
            .await?;

        tracing::info!("Created TeamSpeak channel {} for {}", channel_id, platform_id);
        Ok(channel_id)
    }

    async fn relocate_channel(&self, channel_id: u64) -> Result<(), AdapterError> {
        self.commands
            .exec(
                &Command::new("channelmove")
                    .arg("cid", channel_id)
                    .arg("cpid", self.settings.apex_parent_channel_id),
            )
            .await?;
        Ok(())
    }

    async fn send_direct_message(&self, platform_id: &str, text: &str) -> Result<(), AdapterError> {
        let clid = self.online_client_id(platform_id).await?;
        self.commands
            .exec(
                &Command::new("sendtextmessage")
                    .arg("targetmode", TARGET_MODE_CLIENT)
                    .arg("target", clid)
                    .arg("msg", text),
            )
            .await?;
        Ok(())
    }

    fn move_block_group(&self) -> Option<u64> {
        self.settings.move_block_group_id
    }
}
