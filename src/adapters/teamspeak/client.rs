//! ServerQuery session over TCP.

use super::query::{
    parse_notification, parse_records, parse_status, Command, Notification, QueryRecord,
    STATUS_BANNED, STATUS_EMPTY_RESULT,
};
use std::collections::VecDeque;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// Query session errors.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Connection closed by server")]
    Closed,

    #[error("Timed out waiting for the server")]
    Timeout,

    #[error("Server error {id}: {message}")]
    Server { id: u32, message: String },

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl QueryError {
    /// The server refused us because this address is banned.
    pub fn is_banned(&self) -> bool {
        match self {
            QueryError::Server { id, message } => {
                *id == STATUS_BANNED || message.to_lowercase().contains("banned")
            }
            _ => false,
        }
    }

    /// The session is unusable and must be reopened.
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            QueryError::Io(_) | QueryError::Closed | QueryError::Timeout | QueryError::Protocol(_)
        )
    }

    /// The server rejected the command with this status id.
    pub fn status_id(&self) -> Option<u32> {
        match self {
            QueryError::Server { id, .. } => Some(*id),
            _ => None,
        }
    }
}

impl From<std::io::Error> for QueryError {
    fn from(e: std::io::Error) -> Self {
        QueryError::Io(e.to_string())
    }
}

/// How to open and authenticate a session.
#[derive(Debug, Clone)]
pub struct ConnectSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub server_id: u32,
    /// Deadline for connecting and for each command reply
    pub command_timeout: Duration,
}

/// One authenticated ServerQuery session.
pub struct QueryClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    pending: VecDeque<Notification>,
    command_timeout: Duration,
}

impl QueryClient {
    /// Connect and consume the greeting.
    pub async fn connect(host: &str, port: u16, command_timeout: Duration) -> Result<Self, QueryError> {
        let stream = tokio::time::timeout(command_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| QueryError::Timeout)??;
        let (reader, writer) = stream.into_split();

        let mut client = Self {
            lines: BufReader::new(reader).lines(),
            writer,
            pending: VecDeque::new(),
            command_timeout,
        };

        let banner = client.read_line().await?;
        if banner != "TS3" {
            return Err(QueryError::Protocol(format!("unexpected banner: {}", banner)));
        }
        // Welcome text
        client.read_line().await?;

        Ok(client)
    }

    /// Connect, log in and select the virtual server.
    pub async fn open(settings: &ConnectSettings) -> Result<Self, QueryError> {
        let mut client = Self::connect(&settings.host, settings.port, settings.command_timeout).await?;
        client
            .exec(
                &Command::new("login")
                    .arg("client_login_name", &settings.username)
                    .arg("client_login_password", &settings.password),
            )
            .await?;
        client
            .exec(&Command::new("use").arg("sid", settings.server_id))
            .await?;
        Ok(client)
    }

    /// Subscribe to server-wide client enter/leave events.
    pub async fn register_server_events(&mut self) -> Result<(), QueryError> {
        self.exec(&Command::new("servernotifyregister").arg("event", "server"))
            .await
            .map(|_| ())
    }

    /// Cheap command that keeps the session from idling out.
    pub async fn keepalive(&mut self) -> Result<(), QueryError> {
        self.exec(&Command::new("version")).await.map(|_| ())
    }

    /// Send a command and collect its reply entries.
    ///
    /// Notifications received while waiting are queued for [`QueryClient::next_event`].
    pub async fn exec(&mut self, command: &Command) -> Result<Vec<QueryRecord>, QueryError> {
        let mut line = command.to_line();
        tracing::trace!("query > {}", command.name());
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;

        let mut records = Vec::new();
        loop {
            let line = tokio::time::timeout(self.command_timeout, self.read_line())
                .await
                .map_err(|_| QueryError::Timeout)??;

            if let Some(status) = parse_status(&line) {
                return match status.id {
                    id if id == STATUS_EMPTY_RESULT => Ok(Vec::new()),
                    _ if status.is_ok() => Ok(records),
                    id => Err(QueryError::Server {
                        id,
                        message: status.message,
                    }),
                };
            }
            if let Some(notification) = parse_notification(&line) {
                self.pending.push_back(notification);
                continue;
            }
            records.extend(parse_records(&line));
        }
    }

    /// Next server event. Cancel safe.
    pub async fn next_event(&mut self) -> Result<Notification, QueryError> {
        if let Some(notification) = self.pending.pop_front() {
            return Ok(notification);
        }
        loop {
            let line = self.read_line().await?;
            match parse_notification(&line) {
                Some(notification) => return Ok(notification),
                None => tracing::debug!("Ignoring unsolicited query line: {}", line),
            }
        }
    }

    /// Close the session politely.
    pub async fn quit(mut self) {
        let _ = self.writer.write_all(b"quit\n").await;
        let _ = self.writer.shutdown().await;
    }

    async fn read_line(&mut self) -> Result<String, QueryError> {
        loop {
            let Some(line) = self.lines.next_line().await? else {
                return Err(QueryError::Closed);
            };
            // Replies end in "\n\r", which leaves a stray '\r' at the start of the next line.
            let line = line.trim_matches(|c| c == '\r' || c == '\n');
            if !line.is_empty() {
                return Ok(line.to_string());
            }
        }
    }
}
