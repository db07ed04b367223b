//! Command bus wire format.
//!
//! Requests are JSON objects tagged by `command`:
//!
//! ```json
//! {"command": "create_owned_channel", "platform_id": "42", "channel_name": "Room", "message_id": "..."}
//! ```
//!
//! When `message_id` is present the responder stores the reply under that key.

use serde::{Deserialize, Serialize};

/// Text of the verification direct message.
pub fn verification_text(code: &str) -> String {
    format!("Your verification code is: {}", code)
}

/// Action requested from a platform's responder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum BusCommand {
    SendVerification { platform_id: String, code: String },
    CreateOwnedChannel { platform_id: String, channel_name: String },
    CheckRanks { platform_id: String },
    AddMoveShield { platform_id: String },
    RemoveMoveShield { platform_id: String },
    SetApexChannel { channel_id: u64 },
}

impl BusCommand {
    /// Wire name of the command.
    pub fn name(&self) -> &'static str {
        match self {
            BusCommand::SendVerification { .. } => "send_verification",
            BusCommand::CreateOwnedChannel { .. } => "create_owned_channel",
            BusCommand::CheckRanks { .. } => "check_ranks",
            BusCommand::AddMoveShield { .. } => "add_move_shield",
            BusCommand::RemoveMoveShield { .. } => "remove_move_shield",
            BusCommand::SetApexChannel { .. } => "set_apex_channel",
        }
    }
}

/// A command with its optional correlation id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusRequest {
    #[serde(flatten)]
    pub command: BusCommand,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

impl BusRequest {
    pub fn new(command: BusCommand, message_id: Option<String>) -> Self {
        Self {
            command,
            message_id,
        }
    }
}

/// Reply body.
///
/// `Result` is listed first so `{"result": ..}` never decodes as a channel reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BusReply {
    Result { result: bool },
    Channel { channel_id: Option<u64> },
}

impl BusReply {
    pub fn ok(result: bool) -> Self {
        BusReply::Result { result }
    }

    /// Whether the action succeeded.
    pub fn succeeded(&self) -> bool {
        match self {
            BusReply::Result { result } => *result,
            BusReply::Channel { channel_id } => channel_id.is_some(),
        }
    }

    pub fn channel_id(&self) -> Option<u64> {
        match self {
            BusReply::Channel { channel_id } => *channel_id,
            BusReply::Result { .. } => None,
        }
    }
}
