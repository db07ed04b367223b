//! Pub/sub channels and expiring keys.
//!
//! [`BusMedium`] is what the bus and the snapshot publisher need from a broker:
//! fan-out channels plus a small key/value space whose entries expire.
//! [`MemoryMedium`] keeps both in process and also backs the local mirror of the
//! MQTT medium.

use super::BusError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Notify};

/// Buffered messages per channel subscriber.
const CHANNEL_CAPACITY: usize = 256;

/// Broker operations used by the command bus and the snapshot publisher.
pub trait BusMedium: Send + Sync {
    /// Publish a message to every subscriber of `channel`.
    fn publish(&self, channel: &str, payload: &str) -> Result<(), BusError>;

    /// Receive messages published to `channel` from now on.
    fn subscribe(&self, channel: &str) -> Result<broadcast::Receiver<String>, BusError>;

    /// Store a value that disappears after `ttl`.
    fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), BusError>;

    /// Current value of a key, if set and not expired.
    fn get(&self, key: &str) -> Result<Option<String>, BusError>;

    /// Remove a key and return its value.
    fn take(&self, key: &str) -> Result<Option<String>, BusError>;

    /// Signal raised whenever `key` is written.
    fn key_notify(&self, key: &str) -> Arc<Notify>;
}

#[derive(Debug)]
struct StoredValue {
    value: String,
    expires_at: Instant,
}

#[derive(Default)]
struct MediumState {
    channels: HashMap<String, broadcast::Sender<String>>,
    keys: HashMap<String, StoredValue>,
    waiters: HashMap<String, Arc<Notify>>,
}

impl MediumState {
    fn purge_expired(&mut self, now: Instant) {
        self.keys.retain(|_, stored| stored.expires_at > now);
        // Drop signals no waiter holds
        self.waiters
            .retain(|key, notify| Arc::strong_count(notify) > 1 || self.keys.contains_key(key));
    }
}

/// In-process medium.
#[derive(Default)]
pub struct MemoryMedium {
    state: Mutex<MediumState>,
}

impl MemoryMedium {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MediumState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver a message to local subscribers; returns how many received it.
    pub fn deliver(&self, channel: &str, payload: &str) -> usize {
        let state = self.lock();
        state
            .channels
            .get(channel)
            .and_then(|tx| tx.send(payload.to_string()).ok())
            .unwrap_or(0)
    }

    /// Store a value until `expires_at` and wake its waiters.
    pub fn store(&self, key: &str, value: &str, expires_at: Instant) {
        let mut state = self.lock();
        state.purge_expired(Instant::now());
        state.keys.insert(
            key.to_string(),
            StoredValue {
                value: value.to_string(),
                expires_at,
            },
        );
        if let Some(notify) = state.waiters.get(key) {
            notify.notify_waiters();
        }
    }

    /// Drop a key without reading it.
    pub fn remove(&self, key: &str) {
        self.lock().keys.remove(key);
    }

    /// Channels that currently have a sender registered.
    pub fn channels(&self) -> Vec<String> {
        self.lock().channels.keys().cloned().collect()
    }
}

impl BusMedium for MemoryMedium {
    fn publish(&self, channel: &str, payload: &str) -> Result<(), BusError> {
        let delivered = self.deliver(channel, payload);
        tracing::trace!("Published to {} ({} receivers)", channel, delivered);
        Ok(())
    }

    fn subscribe(&self, channel: &str) -> Result<broadcast::Receiver<String>, BusError> {
        let mut state = self.lock();
        let tx = state
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        Ok(tx.subscribe())
    }

    fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), BusError> {
        self.store(key, value, Instant::now() + ttl);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>, BusError> {
        let state = self.lock();
        Ok(state
            .keys
            .get(key)
            .filter(|stored| stored.expires_at > Instant::now())
            .map(|stored| stored.value.clone()))
    }

    fn take(&self, key: &str) -> Result<Option<String>, BusError> {
        let mut state = self.lock();
        let stored = state.keys.remove(key);
        // Keep the signal until a value was read so a later write still wakes the reader
        if stored.is_some() {
            state.waiters.remove(key);
        }
        Ok(stored
            .filter(|stored| stored.expires_at > Instant::now())
            .map(|stored| stored.value))
    }

    fn key_notify(&self, key: &str) -> Arc<Notify> {
        let mut state = self.lock();
        Arc::clone(
            state
                .waiters
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Notify::new())),
        )
    }
}
