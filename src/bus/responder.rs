//! Responding side of the command bus.
//!
//! One responder per platform listens on that platform's command channel, runs each
//! request against the adapter and, when the request carries a `message_id`, stores
//! the reply under it. A `message_id` seen again within the reply window is ignored,
//! so a redelivered request never runs its action twice.

use super::medium::BusMedium;
use super::protocol::{verification_text, BusCommand, BusReply, BusRequest};
use crate::adapters::{AdapterError, PlatformAdapter};
use crate::platform::Platform;
use crate::ranks::check_and_correct;
use crate::storage::AccrualStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};

/// Executes bus commands for one platform adapter.
pub struct CommandResponder<A: PlatformAdapter> {
    adapter: Arc<A>,
    store: AccrualStore,
    medium: Arc<dyn BusMedium>,
    reply_ttl: Duration,
    seen: Mutex<HashMap<String, Instant>>,
}

impl<A: PlatformAdapter> CommandResponder<A> {
    pub fn new(
        adapter: Arc<A>,
        store: AccrualStore,
        medium: Arc<dyn BusMedium>,
        reply_ttl: Duration,
    ) -> Self {
        Self {
            adapter,
            store,
            medium,
            reply_ttl,
            seen: Mutex::new(HashMap::new()),
        }
    }

    pub fn platform(&self) -> Platform {
        self.adapter.platform()
    }

    /// Serve requests until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let channel = self.platform().command_channel();
        let mut rx = match self.medium.subscribe(&channel) {
            Ok(rx) => rx,
            Err(e) => {
                tracing::error!("Could not subscribe to {}: {}", channel, e);
                return;
            }
        };
        tracing::info!("Listening for commands on {}", channel);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                message = rx.recv() => match message {
                    Ok(payload) => {
                        let responder = Arc::clone(&self);
                        tokio::spawn(async move { responder.handle(&payload).await });
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Dropped {} commands on {}", skipped, channel);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        tracing::info!("Stopped listening on {}", channel);
    }

    /// Handle one raw request. Returns the reply, if the action ran.
    pub async fn handle(&self, payload: &str) -> Option<BusReply> {
        let request: BusRequest = match serde_json::from_str(payload) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("Ignoring malformed command: {}", e);
                return None;
            }
        };

        if let Some(message_id) = &request.message_id {
            if !self.first_delivery(message_id) {
                tracing::debug!("Ignoring redelivered command {}", message_id);
                return None;
            }
        }

        let name = request.command.name();
        let reply = self.execute(request.command).await;
        tracing::debug!("{} {} -> {:?}", self.platform(), name, reply);

        if let Some(message_id) = &request.message_id {
            let write = serde_json::to_string(&reply)
                .map_err(|e| e.to_string())
                .and_then(|body| {
                    self.medium
                        .set_ex(message_id, &body, self.reply_ttl)
                        .map_err(|e| e.to_string())
                });
            if let Err(e) = write {
                tracing::warn!("Could not store reply {}: {}", message_id, e);
            }
        }
        Some(reply)
    }

    /// Record a message id; false when it was already seen within the reply window.
    fn first_delivery(&self, message_id: &str) -> bool {
        let now = Instant::now();
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        seen.retain(|_, at| now.duration_since(*at) < self.reply_ttl);
        seen.insert(message_id.to_string(), now).is_none()
    }

    async fn execute(&self, command: BusCommand) -> BusReply {
        match command {
            BusCommand::CreateOwnedChannel {
                platform_id,
                channel_name,
            } => BusReply::Channel {
                channel_id: self
                    .create_owned_channel(&platform_id, &channel_name)
                    .await
                    .map_err(|e| self.log_failure("create_owned_channel", &platform_id, e))
                    .ok(),
            },
            BusCommand::SendVerification { platform_id, code } => {
                let result = self
                    .adapter
                    .send_direct_message(&platform_id, &verification_text(&code))
                    .await;
                self.outcome("send_verification", &platform_id, result)
            }
            BusCommand::CheckRanks { platform_id } => {
                let result = self.check_ranks(&platform_id).await;
                self.outcome("check_ranks", &platform_id, result)
            }
            BusCommand::AddMoveShield { platform_id } => {
                let result = self.set_move_shield(&platform_id, true).await;
                self.outcome("add_move_shield", &platform_id, result)
            }
            BusCommand::RemoveMoveShield { platform_id } => {
                let result = self.set_move_shield(&platform_id, false).await;
                self.outcome("remove_move_shield", &platform_id, result)
            }
            BusCommand::SetApexChannel { channel_id } => {
                let result = self.adapter.relocate_channel(channel_id).await;
                self.outcome("set_apex_channel", &channel_id.to_string(), result)
            }
        }
    }

    async fn create_owned_channel(&self, platform_id: &str, name: &str) -> Result<u64, AdapterError> {
        let channel_id = self.adapter.create_owned_channel(platform_id, name).await?;

        let platform = self.platform();
        let id = platform_id.to_string();
        let recorded = self
            .blocking(move |store| store.set_owned_channel(platform, &id, channel_id))
            .await?;
        if !recorded {
            tracing::warn!("Channel {} created for unknown user {}", channel_id, platform_id);
        }
        Ok(channel_id)
    }

    async fn check_ranks(&self, platform_id: &str) -> Result<(), AdapterError> {
        let platform = self.platform();
        let id = platform_id.to_string();
        let stored = self
            .blocking(move |store| store.stored_ranks(platform, &id))
            .await?
            .unwrap_or_default();
        check_and_correct(&*self.adapter, platform_id, stored).await?;
        Ok(())
    }

    /// A shielded user holds the move-block group and is flagged as not moveable.
    async fn set_move_shield(&self, platform_id: &str, enabled: bool) -> Result<(), AdapterError> {
        let group = self
            .adapter
            .move_block_group()
            .ok_or_else(|| AdapterError::NotConfigured("move block group".to_string()))?;

        if enabled {
            self.adapter.add_group(platform_id, group).await?;
        } else {
            self.adapter.remove_group(platform_id, group).await?;
        }

        let platform = self.platform();
        let id = platform_id.to_string();
        self.blocking(move |store| store.set_moveable(platform, &id, !enabled))
            .await?;
        Ok(())
    }

    /// Run a store call off the async workers.
    async fn blocking<T, F>(&self, op: F) -> Result<T, AdapterError>
    where
        T: Send + 'static,
        F: FnOnce(&AccrualStore) -> Result<T, crate::storage::DatabaseError> + Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || op(&store))
            .await
            .map_err(|e| AdapterError::Storage(e.to_string()))?
            .map_err(AdapterError::from)
    }

    fn outcome(&self, command: &str, subject: &str, result: Result<(), AdapterError>) -> BusReply {
        match result {
            Ok(()) => BusReply::ok(true),
            Err(e) => {
                self.log_failure(command, subject, e);
                BusReply::ok(false)
            }
        }
    }

    fn log_failure(&self, command: &str, subject: &str, error: AdapterError) {
        tracing::error!("{} {} for {} failed: {}", self.platform(), command, subject, error);
    }
}
