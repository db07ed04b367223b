//! Gateway platform REST client.

use super::model::{
    permission, snowflake, AuditLog, AuditLogEntry, Channel, Member, CHANNEL_TYPE_VOICE,
};
use crate::adapters::AdapterError;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

/// Page size of the member listing.
const MEMBER_PAGE_SIZE: usize = 1000;

/// Longest rate limit wait honoured before giving up.
const MAX_RATE_LIMIT_WAIT: Duration = Duration::from_secs(10);

/// REST errors.
#[derive(Debug, Error)]
pub enum RestError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Request failed with {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Rate limited")]
    RateLimited,

    #[error("Decode error: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for RestError {
    fn from(e: reqwest::Error) -> Self {
        RestError::Http(e.to_string())
    }
}

impl From<RestError> for AdapterError {
    fn from(e: RestError) -> Self {
        match e {
            RestError::Status { status: 404, message } => AdapterError::UserNotFound(message),
            RestError::Http(message) => AdapterError::Connection(message),
            other => AdapterError::Rejected(other.to_string()),
        }
    }
}

/// Body of a voice channel owned by `owner_id`.
///
/// Everyone may see but not join it; the owner may join and manage it.
pub fn owned_channel_body(name: &str, parent_id: Option<u64>, guild_id: u64, owner_id: u64) -> Value {
    let owner_allow = permission::CONNECT
        | permission::MANAGE_CHANNELS
        | permission::MANAGE_ROLES
        | permission::MOVE_MEMBERS;

    let mut body = json!({
        "name": name,
        "type": CHANNEL_TYPE_VOICE,
        "permission_overwrites": [
            {
                "id": guild_id.to_string(),
                "type": 0,
                "allow": permission::VIEW_CHANNEL.to_string(),
                "deny": permission::CONNECT.to_string(),
            },
            {
                "id": owner_id.to_string(),
                "type": 1,
                "allow": owner_allow.to_string(),
                "deny": "0",
            }
        ],
    });
    if let Some(parent_id) = parent_id {
        body["parent_id"] = json!(parent_id.to_string());
    }
    body
}

/// Bot-authenticated REST client.
#[derive(Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl RestClient {
    pub fn new(base_url: &str, token: &str) -> Result<Self, RestError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    /// Send a request, waiting out one rate limit.
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<reqwest::Response, RestError> {
        let url = format!("{}{}", self.base_url, path);

        for attempt in 0..2 {
            let mut request = self
                .http
                .request(method.clone(), &url)
                .header("Authorization", format!("Bot {}", self.token));
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request.send().await?;
            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                let wait = retry_after(response).await;
                if attempt > 0 || wait > MAX_RATE_LIMIT_WAIT {
                    return Err(RestError::RateLimited);
                }
                tracing::debug!("Rate limited on {}, waiting {:?}", path, wait);
                tokio::time::sleep(wait).await;
                continue;
            }

            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(RestError::Status {
                    status: status.as_u16(),
                    message,
                });
            }
            return Ok(response);
        }
        Err(RestError::RateLimited)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T, RestError> {
        let response = self.send(method, path, body).await?;
        response
            .json()
            .await
            .map_err(|e| RestError::Decode(e.to_string()))
    }

    pub async fn get_member(&self, guild_id: u64, user_id: u64) -> Result<Member, RestError> {
        self.send_json(
            Method::GET,
            &format!("/guilds/{}/members/{}", guild_id, user_id),
            None,
        )
        .await
    }

    /// Every member of the guild.
    pub async fn list_members(&self, guild_id: u64) -> Result<Vec<Member>, RestError> {
        let mut members = Vec::new();
        let mut after = 0u64;
        loop {
            let page: Vec<Member> = self
                .send_json(
                    Method::GET,
                    &format!(
                        "/guilds/{}/members?limit={}&after={}",
                        guild_id, MEMBER_PAGE_SIZE, after
                    ),
                    None,
                )
                .await?;

            let full = page.len() == MEMBER_PAGE_SIZE;
            let last = page.iter().filter_map(Member::user_id).max();
            members.extend(page);

            match last {
                Some(last) if full => after = last,
                _ => return Ok(members),
            }
        }
    }

    pub async fn add_role(&self, guild_id: u64, user_id: u64, role_id: u64) -> Result<(), RestError> {
        self.send(
            Method::PUT,
            &format!("/guilds/{}/members/{}/roles/{}", guild_id, user_id, role_id),
            None,
        )
        .await
        .map(|_| ())
    }

    pub async fn remove_role(&self, guild_id: u64, user_id: u64, role_id: u64) -> Result<(), RestError> {
        self.send(
            Method::DELETE,
            &format!("/guilds/{}/members/{}/roles/{}", guild_id, user_id, role_id),
            None,
        )
        .await
        .map(|_| ())
    }

    /// Create a voice channel owned by `owner_id`; returns the channel id.
    pub async fn create_voice_channel(
        &self,
        guild_id: u64,
        name: &str,
        parent_id: Option<u64>,
        owner_id: u64,
    ) -> Result<u64, RestError> {
        let body = owned_channel_body(name, parent_id, guild_id, owner_id);
        let channel: Channel = self
            .send_json(Method::POST, &format!("/guilds/{}/channels", guild_id), Some(&body))
            .await?;
        snowflake(&channel.id).ok_or_else(|| RestError::Decode(format!("channel id {}", channel.id)))
    }

    pub async fn set_channel_parent(&self, channel_id: u64, parent_id: u64) -> Result<(), RestError> {
        let body = json!({ "parent_id": parent_id.to_string() });
        self.send(Method::PATCH, &format!("/channels/{}", channel_id), Some(&body))
            .await
            .map(|_| ())
    }

    /// Open a DM channel and post `content` to it.
    pub async fn send_dm(&self, user_id: u64, content: &str) -> Result<(), RestError> {
        let body = json!({ "recipient_id": user_id.to_string() });
        let channel: Channel = self
            .send_json(Method::POST, "/users/@me/channels", Some(&body))
            .await?;

        let message = json!({ "content": content });
        self.send(
            Method::POST,
            &format!("/channels/{}/messages", channel.id),
            Some(&message),
        )
        .await
        .map(|_| ())
    }

    /// Move a connected member to another voice channel.
    pub async fn move_member(&self, guild_id: u64, user_id: u64, channel_id: u64) -> Result<(), RestError> {
        let body = json!({ "channel_id": channel_id.to_string() });
        self.send(
            Method::PATCH,
            &format!("/guilds/{}/members/{}", guild_id, user_id),
            Some(&body),
        )
        .await
        .map(|_| ())
    }

    /// Most recent audit log entries of one action type.
    pub async fn audit_log(
        &self,
        guild_id: u64,
        action_type: u32,
        limit: u32,
    ) -> Result<Vec<AuditLogEntry>, RestError> {
        let log: AuditLog = self
            .send_json(
                Method::GET,
                &format!(
                    "/guilds/{}/audit-logs?action_type={}&limit={}",
                    guild_id, action_type, limit
                ),
                None,
            )
            .await?;
        Ok(log.audit_log_entries)
    }
}

/// Wait requested by a 429 response.
async fn retry_after(response: reqwest::Response) -> Duration {
    let header = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<f64>().ok());

    let seconds = match header {
        Some(seconds) => seconds,
        None => response
            .json::<Value>()
            .await
            .ok()
            .and_then(|body| body.get("retry_after").and_then(Value::as_f64))
            .unwrap_or(1.0),
    };
    Duration::from_secs_f64(seconds.clamp(0.0, 3600.0))
}
