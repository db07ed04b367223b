//! MQTT-backed bus medium.
//!
//! Channels map to `voicerank/bus/<channel>` topics. Keys are retained messages on
//! `voicerank/kv/<key>` carrying the value and its absolute expiry, mirrored into a
//! local [`MemoryMedium`] as they arrive so reads never wait on the broker. A key is
//! cleared on the broker once it expires, so unread replies do not stay retained.

use super::medium::{BusMedium, MemoryMedium};
use super::BusError;
use crate::storage::config::BusSettings;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;

const CHANNEL_PREFIX: &str = "voicerank/bus/";
const KEY_PREFIX: &str = "voicerank/kv/";

/// Pending requests the client buffers while the broker is unreachable.
const REQUEST_CAPACITY: usize = 64;

/// Retained key payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEnvelope {
    pub value: String,
    /// Unix milliseconds
    pub expires_at: i64,
}

impl KeyEnvelope {
    /// Time left before expiry, measured against `now_ms`.
    pub fn remaining(&self, now_ms: i64) -> Option<Duration> {
        let left = self.expires_at - now_ms;
        (left > 0).then(|| Duration::from_millis(left as u64))
    }
}

fn channel_topic(channel: &str) -> String {
    format!("{}{}", CHANNEL_PREFIX, channel)
}

fn key_topic(key: &str) -> String {
    format!("{}{}", KEY_PREFIX, key)
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl From<rumqttc::ClientError> for BusError {
    fn from(e: rumqttc::ClientError) -> Self {
        BusError::Publish(e.to_string())
    }
}

/// Broker-backed medium.
pub struct MqttMedium {
    client: AsyncClient,
    local: Arc<MemoryMedium>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl MqttMedium {
    /// Create the client and start driving its event loop.
    ///
    /// The connection is made in the background and retried while the medium lives.
    pub fn connect(settings: &BusSettings, password: Option<String>) -> Arc<Self> {
        let mut options = MqttOptions::new(
            settings.client_id.clone(),
            settings.broker_host.clone(),
            settings.broker_port,
        );
        options.set_keep_alive(Duration::from_secs(settings.keep_alive_secs.max(5)));
        if let (Some(username), Some(password)) = (&settings.username, password) {
            options.set_credentials(username.clone(), password);
        }

        let (client, event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let local = Arc::new(MemoryMedium::new());

        tracing::info!(
            "Connecting to MQTT broker at {}:{}",
            settings.broker_host,
            settings.broker_port
        );
        let handle = tokio::spawn(drive(event_loop, client.clone(), Arc::clone(&local)));

        Arc::new(Self {
            client,
            local,
            event_loop: Mutex::new(Some(handle)),
        })
    }

    /// Disconnect and stop the event loop.
    pub async fn shutdown(&self) {
        let _ = self.client.disconnect().await;
        let handle = self
            .event_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
        tracing::info!("Disconnected from MQTT broker");
    }
}

/// Poll the connection, routing publishes into the local mirror.
async fn drive(mut event_loop: EventLoop, client: AsyncClient, local: Arc<MemoryMedium>) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                tracing::info!("Connected to MQTT broker");
                resubscribe(&client, &local);
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let payload = String::from_utf8_lossy(&publish.payload);
                if let Some(key) = route(&local, &publish.topic, &payload) {
                    clear_retained(&client, &key);
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("MQTT connection error: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

fn resubscribe(client: &AsyncClient, local: &MemoryMedium) {
    let mut topics = vec![format!("{}#", KEY_PREFIX)];
    topics.extend(local.channels().iter().map(|c| channel_topic(c)));
    for topic in topics {
        if let Err(e) = client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
            tracing::warn!("Could not subscribe to {}: {}", topic, e);
        }
    }
}

/// Apply one incoming publish to the local mirror.
///
/// Returns the key when the broker delivered an already expired value.
pub fn route(local: &MemoryMedium, topic: &str, payload: &str) -> Option<String> {
    if let Some(channel) = topic.strip_prefix(CHANNEL_PREFIX) {
        local.deliver(channel, payload);
        return None;
    }

    let key = topic.strip_prefix(KEY_PREFIX)?;
    if payload.is_empty() {
        local.remove(key);
        return None;
    }
    match serde_json::from_str::<KeyEnvelope>(payload) {
        Ok(envelope) => match envelope.remaining(now_ms()) {
            Some(left) => {
                local.store(key, &envelope.value, Instant::now() + left);
                None
            }
            None => {
                local.remove(key);
                Some(key.to_string())
            }
        },
        Err(e) => {
            tracing::debug!("Ignoring malformed key {}: {}", key, e);
            None
        }
    }
}

/// Drop a key's retained message; an empty retained payload clears it.
fn clear_retained(client: &AsyncClient, key: &str) {
    if let Err(e) = client.try_publish(key_topic(key), QoS::AtLeastOnce, true, Vec::new()) {
        tracing::debug!("Could not clear key {}: {}", key, e);
    }
}

impl MqttMedium {
    /// Clear `key` on the broker after `ttl` unless it was written again meanwhile.
    fn schedule_clear(&self, key: &str, ttl: Duration) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let client = self.client.clone();
        let local = Arc::clone(&self.local);
        let key = key.to_string();
        runtime.spawn(async move {
            tokio::time::sleep(ttl).await;
            if matches!(local.get(&key), Ok(None)) {
                clear_retained(&client, &key);
            }
        });
    }
}

impl BusMedium for MqttMedium {
    fn publish(&self, channel: &str, payload: &str) -> Result<(), BusError> {
        self.client
            .try_publish(channel_topic(channel), QoS::AtLeastOnce, false, payload.to_string())?;
        Ok(())
    }

    fn subscribe(&self, channel: &str) -> Result<broadcast::Receiver<String>, BusError> {
        let rx = self.local.subscribe(channel)?;
        self.client
            .try_subscribe(channel_topic(channel), QoS::AtLeastOnce)
            .map_err(|e| BusError::Subscribe(e.to_string()))?;
        Ok(rx)
    }

    fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), BusError> {
        let envelope = KeyEnvelope {
            value: value.to_string(),
            expires_at: now_ms() + ttl.as_millis() as i64,
        };
        let payload =
            serde_json::to_string(&envelope).map_err(|e| BusError::Serialize(e.to_string()))?;

        self.local.set_ex(key, value, ttl)?;
        self.client
            .try_publish(key_topic(key), QoS::AtLeastOnce, true, payload)?;
        self.schedule_clear(key, ttl);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>, BusError> {
        self.local.get(key)
    }

    fn take(&self, key: &str) -> Result<Option<String>, BusError> {
        let value = self.local.take(key)?;
        if value.is_some() {
            self.client
                .try_publish(key_topic(key), QoS::AtLeastOnce, true, Vec::new())?;
        }
        Ok(value)
    }

    fn key_notify(&self, key: &str) -> Arc<Notify> {
        self.local.key_notify(key)
    }
}
