//! Minting the session credential a confirmed ticket hands to the web side.

use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use super::generator::{generate_hex, SECRET_BYTES};
use super::Envelope;
use crate::storage::models::{DeviceInfo, SessionCredential};

#[derive(Debug, Error)]
pub enum IssueError {
    #[error("Session service request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Session service returned status {0}")]
    Status(u16),
}

/// Where session credentials come from
pub enum SessionIssuer {
    /// Opaque random token; the session layer is expected to adopt it as is.
    Local,
    Remote(RemoteIssuer),
}

impl SessionIssuer {
    /// Mint a credential for `subject`, logging in from `device`.
    pub async fn issue(
        &self,
        subject: &str,
        device: &DeviceInfo,
    ) -> Result<SessionCredential, IssueError> {
        match self {
            SessionIssuer::Local => Ok(SessionCredential::new(generate_hex(SECRET_BYTES))),
            SessionIssuer::Remote(remote) => remote.issue(subject, device).await,
        }
    }
}

#[derive(Debug, Serialize)]
struct CreateSessionRequest<'a> {
    metadata: serde_json::Value,
    subject_id: &'a str,
    ttl_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_agent: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct CreatedSession {
    token: String,
}

/// Creates sessions in an external session service
pub struct RemoteIssuer {
    client: reqwest::Client,
    ttl_seconds: u64,
    url: String,
}

impl RemoteIssuer {
    pub fn new(client: reqwest::Client, url: impl Into<String>, ttl_seconds: u64) -> Self {
        Self {
            client,
            ttl_seconds,
            url: url.into(),
        }
    }

    async fn issue(
        &self,
        subject: &str,
        device: &DeviceInfo,
    ) -> Result<SessionCredential, IssueError> {
        let user_agent = Some(device.raw_user_agent.as_str()).filter(|ua| !ua.is_empty());
        let request = CreateSessionRequest {
            metadata: json!({ "login_method": "qr" }),
            subject_id: subject,
            ttl_seconds: self.ttl_seconds,
            user_agent,
        };

        let response = self.client.post(&self.url).json(&request).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(IssueError::Status(status.as_u16()));
        }

        let envelope = response.json::<Envelope<CreatedSession>>().await?;
        Ok(SessionCredential::new(envelope.data.token))
    }
}
