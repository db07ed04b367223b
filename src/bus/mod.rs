//! Command bus between the web side and the platform adapters.
//!
//! Requests travel on a per-platform channel of a [`BusMedium`]; replies are written
//! to a short-lived key named after the request's `message_id`.

pub mod client;
pub mod medium;
pub mod mqtt;
pub mod protocol;
pub mod responder;

use thiserror::Error;

pub use client::CommandClient;
pub use medium::{BusMedium, MemoryMedium};
pub use mqtt::MqttMedium;
pub use protocol::{verification_text, BusCommand, BusReply, BusRequest};
pub use responder::CommandResponder;

/// Command bus errors
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Serialization error: {0}")]
    Serialize(String),
}
