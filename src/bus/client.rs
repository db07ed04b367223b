//! Requesting side of the command bus.

use super::medium::BusMedium;
use super::protocol::{BusCommand, BusReply, BusRequest};
use super::BusError;
use crate::platform::Platform;
use crate::storage::config::BusSettings;
use std::sync::Arc;
use std::time::Duration;

/// Issues commands to a platform's responder and waits for the reply.
///
/// The reply key is watched with a wake-up signal; the poll interval only bounds how
/// long a missed signal can delay the read. No reply within the attempt budget is a
/// failed request and is never retried.
#[derive(Clone)]
pub struct CommandClient {
    medium: Arc<dyn BusMedium>,
    poll_interval: Duration,
    max_attempts: u32,
}

impl CommandClient {
    pub fn new(medium: Arc<dyn BusMedium>, settings: &BusSettings) -> Self {
        Self::with_timing(
            medium,
            Duration::from_millis(settings.poll_interval_ms),
            settings.max_poll_attempts,
        )
    }

    pub fn with_timing(medium: Arc<dyn BusMedium>, poll_interval: Duration, max_attempts: u32) -> Self {
        Self {
            medium,
            poll_interval,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Publish a command without asking for a reply.
    pub fn send(&self, platform: Platform, command: BusCommand) -> Result<(), BusError> {
        self.publish(platform, &BusRequest::new(command, None))
    }

    /// Publish a command and wait for its reply.
    ///
    /// `Ok(None)` means no reply arrived in time.
    pub async fn request(
        &self,
        platform: Platform,
        command: BusCommand,
    ) -> Result<Option<BusReply>, BusError> {
        let message_id = uuid::Uuid::new_v4().to_string();
        let name = command.name();

        let notify = self.medium.key_notify(&message_id);
        self.publish(platform, &BusRequest::new(command, Some(message_id.clone())))?;

        for _ in 0..self.max_attempts {
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(reply) = self.take_reply(&message_id)? {
                return Ok(Some(reply));
            }
            let _ = tokio::time::timeout(self.poll_interval, notified).await;
        }

        // A reply written during the last wait still counts
        if let Some(reply) = self.take_reply(&message_id)? {
            return Ok(Some(reply));
        }

        tracing::warn!("No reply to {} on {} ({})", name, platform, message_id);
        Ok(None)
    }

    fn take_reply(&self, message_id: &str) -> Result<Option<BusReply>, BusError> {
        match self.medium.take(message_id)? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| BusError::Serialize(e.to_string())),
            None => Ok(None),
        }
    }

    /// Whether a command succeeded; errors and timeouts count as failure.
    async fn succeeded(&self, platform: Platform, command: BusCommand) -> bool {
        match self.request(platform, command).await {
            Ok(Some(reply)) => reply.succeeded(),
            Ok(None) => false,
            Err(e) => {
                tracing::warn!("Command on {} failed: {}", platform, e);
                false
            }
        }
    }

    pub async fn send_verification(&self, platform: Platform, platform_id: &str, code: &str) -> bool {
        self.succeeded(
            platform,
            BusCommand::SendVerification {
                platform_id: platform_id.to_string(),
                code: code.to_string(),
            },
        )
        .await
    }

    /// Create an owned channel; returns its id.
    pub async fn create_owned_channel(
        &self,
        platform: Platform,
        platform_id: &str,
        channel_name: &str,
    ) -> Option<u64> {
        let command = BusCommand::CreateOwnedChannel {
            platform_id: platform_id.to_string(),
            channel_name: channel_name.to_string(),
        };
        match self.request(platform, command).await {
            Ok(Some(reply)) => reply.channel_id(),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Channel creation on {} failed: {}", platform, e);
                None
            }
        }
    }

    pub async fn check_ranks(&self, platform: Platform, platform_id: &str) -> bool {
        self.succeeded(
            platform,
            BusCommand::CheckRanks {
                platform_id: platform_id.to_string(),
            },
        )
        .await
    }

    /// Turn the move shield on or off.
    pub async fn set_move_shield(&self, platform: Platform, platform_id: &str, enabled: bool) -> bool {
        let platform_id = platform_id.to_string();
        let command = if enabled {
            BusCommand::AddMoveShield { platform_id }
        } else {
            BusCommand::RemoveMoveShield { platform_id }
        };
        self.succeeded(platform, command).await
    }

    pub async fn set_apex_channel(&self, platform: Platform, channel_id: u64) -> bool {
        self.succeeded(platform, BusCommand::SetApexChannel { channel_id })
            .await
    }

    fn publish(&self, platform: Platform, request: &BusRequest) -> Result<(), BusError> {
        let payload =
            serde_json::to_string(request).map_err(|e| BusError::Serialize(e.to_string()))?;
        self.medium.publish(&platform.command_channel(), &payload)
    }
}
