//! Gateway websocket session.
//!
//! [`GatewayConnection::connect`] waits for HELLO and identifies; afterwards
//! [`GatewayConnection::next_event`] yields dispatches while answering heartbeats.

use super::model::{opcode, GatewayEvent, GatewayPayload, Hello};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long to wait for HELLO after connecting.
const HELLO_TIMEOUT: Duration = Duration::from_secs(15);

/// Gateway session errors.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Gateway closed the session (code {0:?})")]
    Closed(Option<u16>),

    #[error("Gateway unavailable: {0}")]
    Unavailable(String),

    #[error("Gateway asked for a new session")]
    Reconnect,

    #[error("Heartbeat not acknowledged")]
    Timeout,

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl GatewayError {
    /// Fixed wait before the next session attempt.
    pub fn retry_delay(&self) -> Duration {
        match self {
            GatewayError::Closed(_) | GatewayError::Reconnect => Duration::from_secs(5),
            GatewayError::Unavailable(_) => Duration::from_secs(30),
            GatewayError::Timeout | GatewayError::Protocol(_) => Duration::from_secs(60),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for GatewayError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match e {
            WsError::ConnectionClosed | WsError::AlreadyClosed => GatewayError::Closed(None),
            WsError::Io(e) => GatewayError::Unavailable(e.to_string()),
            WsError::Http(response) => {
                GatewayError::Unavailable(format!("HTTP {}", response.status()))
            }
            other => GatewayError::Protocol(other.to_string()),
        }
    }
}

/// Identify frame.
pub fn identify_payload(token: &str, intents: u64) -> GatewayPayload {
    GatewayPayload::new(
        opcode::IDENTIFY,
        json!({
            "token": token,
            "intents": intents,
            "properties": {
                "os": std::env::consts::OS,
                "browser": "voicerank",
                "device": "voicerank",
            },
        }),
    )
}

/// One identified gateway session.
pub struct GatewayConnection {
    socket: Socket,
    heartbeat: Interval,
    sequence: Option<u64>,
    awaiting_ack: bool,
}

impl GatewayConnection {
    /// Connect, wait for HELLO and identify.
    pub async fn connect(url: &str, token: &str, intents: u64) -> Result<Self, GatewayError> {
        let (mut socket, _) = connect_async(url).await?;

        let hello = tokio::time::timeout(HELLO_TIMEOUT, read_payload(&mut socket))
            .await
            .map_err(|_| GatewayError::Timeout)??;
        if hello.op != opcode::HELLO {
            return Err(GatewayError::Protocol(format!(
                "expected HELLO, got op {}",
                hello.op
            )));
        }
        let hello: Hello = serde_json::from_value(hello.d)
            .map_err(|e| GatewayError::Protocol(e.to_string()))?;

        let period = Duration::from_millis(hello.heartbeat_interval.max(1000));
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut connection = Self {
            socket,
            heartbeat,
            sequence: None,
            awaiting_ack: false,
        };
        connection.send(&identify_payload(token, intents)).await?;
        tracing::debug!("Gateway identified, heartbeat every {:?}", period);

        Ok(connection)
    }

    /// Next dispatch event.
    pub async fn next_event(&mut self) -> Result<GatewayEvent, GatewayError> {
        loop {
            tokio::select! {
                _ = self.heartbeat.tick() => {
                    if self.awaiting_ack {
                        return Err(GatewayError::Timeout);
                    }
                    self.send_heartbeat().await?;
                    self.awaiting_ack = true;
                }
                payload = read_payload(&mut self.socket) => {
                    let payload = payload?;
                    if let Some(sequence) = payload.s {
                        self.sequence = Some(sequence);
                    }

                    match payload.op {
                        opcode::DISPATCH => {
                            let name = payload.t.unwrap_or_default();
                            match GatewayEvent::from_dispatch(&name, payload.d) {
                                Ok(event) => return Ok(event),
                                Err(e) => tracing::warn!("Undecodable {} dispatch: {}", name, e),
                            }
                        }
                        opcode::HEARTBEAT => self.send_heartbeat().await?,
                        opcode::HEARTBEAT_ACK => self.awaiting_ack = false,
                        opcode::RECONNECT | opcode::INVALID_SESSION => {
                            return Err(GatewayError::Reconnect)
                        }
                        other => tracing::debug!("Ignoring gateway op {}", other),
                    }
                }
            }
        }
    }

    /// Close the session.
    pub async fn close(mut self) {
        let _ = self.socket.close(None).await;
    }

    async fn send_heartbeat(&mut self) -> Result<(), GatewayError> {
        let payload = GatewayPayload::new(opcode::HEARTBEAT, json!(self.sequence));
        self.send(&payload).await
    }

    async fn send(&mut self, payload: &GatewayPayload) -> Result<(), GatewayError> {
        let text =
            serde_json::to_string(payload).map_err(|e| GatewayError::Protocol(e.to_string()))?;
        self.socket.send(Message::Text(text)).await?;
        Ok(())
    }
}

/// Read frames until a JSON payload arrives.
async fn read_payload(socket: &mut Socket) -> Result<GatewayPayload, GatewayError> {
    loop {
        let message = match socket.next().await {
            Some(message) => message?,
            None => return Err(GatewayError::Closed(None)),
        };

        let text = match message {
            Message::Text(text) => text,
            Message::Binary(bytes) => String::from_utf8(bytes)
                .map_err(|e| GatewayError::Protocol(e.to_string()))?,
            Message::Close(frame) => {
                return Err(GatewayError::Closed(frame.map(|f| u16::from(f.code))))
            }
            _ => continue,
        };

        return serde_json::from_str(&text).map_err(|e| GatewayError::Protocol(e.to_string()));
    }
}
