//! Origin address reputation lookup.
//!
//! Low-level voice users connecting through a VPN or proxy are disconnected. The
//! lookup service answers with an object keyed by the queried address:
//!
//! ```json
//! {"status": "ok", "203.0.113.9": {"proxy": "yes", "type": "VPN", "risk": 74}}
//! ```

use crate::storage::config::ReputationSettings;
use serde::Deserialize;
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;

/// Reputation lookup errors.
#[derive(Debug, Error)]
pub enum ReputationError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Lookup refused: {0}")]
    Refused(String),
}

impl From<reqwest::Error> for ReputationError {
    fn from(e: reqwest::Error) -> Self {
        ReputationError::Http(e.to_string())
    }
}

/// What the lookup service knows about one address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReputationReport {
    pub proxy: bool,
    pub vpn: bool,
    pub risk: u8,
}

impl ReputationReport {
    /// Whether the address should be refused.
    pub fn is_flagged(&self, risk_threshold: u8) -> bool {
        self.proxy || self.vpn || self.risk >= risk_threshold
    }
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    #[serde(default)]
    proxy: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    risk: Option<u8>,
}

/// Parse a lookup response body for `address`.
pub fn parse_report(body: &str, address: &str) -> Result<ReputationReport, ReputationError> {
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| ReputationError::Malformed(e.to_string()))?;

    if let Some(status) = value.get("status").and_then(|s| s.as_str()) {
        if status != "ok" && status != "warning" {
            let message = value
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or(status);
            return Err(ReputationError::Refused(message.to_string()));
        }
    }

    let Some(entry) = value.get(address) else {
        return Err(ReputationError::Malformed(format!("no entry for {}", address)));
    };
    let entry: RawEntry = serde_json::from_value(entry.clone())
        .map_err(|e| ReputationError::Malformed(e.to_string()))?;

    Ok(ReputationReport {
        proxy: entry.proxy.as_deref() == Some("yes"),
        vpn: entry
            .kind
            .as_deref()
            .is_some_and(|kind| kind.eq_ignore_ascii_case("vpn")),
        risk: entry.risk.unwrap_or(0),
    })
}

/// Whether an address is worth looking up at all.
///
/// Private, loopback and unparsable addresses are skipped.
pub fn is_public_address(address: &str) -> bool {
    match address.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            !(ip.is_private() || ip.is_loopback() || ip.is_link_local() || ip.is_unspecified())
        }
        Ok(IpAddr::V6(ip)) => !(ip.is_loopback() || ip.is_unspecified()),
        Err(_) => false,
    }
}

/// HTTP client for the lookup service.
pub struct ReputationChecker {
    http: reqwest::Client,
    settings: ReputationSettings,
    api_key: Option<String>,
}

impl ReputationChecker {
    pub fn new(
        settings: ReputationSettings,
        api_key: Option<String>,
    ) -> Result<Self, ReputationError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            http,
            settings,
            api_key,
        })
    }

    pub fn settings(&self) -> &ReputationSettings {
        &self.settings
    }

    /// Look up one address.
    pub async fn lookup(&self, address: &str) -> Result<ReputationReport, ReputationError> {
        let url = format!("{}/{}", self.settings.api_url.trim_end_matches('/'), address);
        let mut request = self.http.get(&url).query(&[("vpn", "1"), ("risk", "1")]);
        if let Some(key) = &self.api_key {
            request = request.query(&[("key", key.as_str())]);
        }

        let response = request.send().await?.error_for_status()?;
        let body = response.text().await?;
        parse_report(&body, address)
    }

    /// Look up an address and decide whether to refuse it.
    ///
    /// Lookup failures never flag a user.
    pub async fn should_refuse(&self, address: &str) -> bool {
        if !is_public_address(address) {
            return false;
        }
        match self.lookup(address).await {
            Ok(report) => {
                tracing::debug!("Reputation of {}: {:?}", address, report);
                report.is_flagged(self.settings.risk_threshold)
            }
            Err(e) => {
                tracing::warn!("Reputation lookup for {} failed: {}", address, e);
                false
            }
        }
    }
}
