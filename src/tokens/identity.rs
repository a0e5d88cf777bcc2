//! Mapping a caller's bearer credential to a scanner identity.
//!
//! The identity provider is an external session service. In remote mode we
//! ask it to verify the bearer token; it answers with the subject the token
//! belongs to, or 404 when the token is unknown or expired.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::Envelope;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Identity service request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Identity service returned status {0}")]
    Status(u16),
}

/// How bearer credentials are resolved to identities
pub enum IdentityVerifier {
    Remote(RemoteVerifier),
    /// The bearer value itself is the identity. Only allowed in test mode.
    Trusted,
}

impl IdentityVerifier {
    /// Resolve a bearer credential. `Ok(None)` means the credential was rejected.
    pub async fn verify(&self, bearer: &str) -> Result<Option<String>, IdentityError> {
        if bearer.trim().is_empty() {
            return Ok(None);
        }
        match self {
            IdentityVerifier::Remote(remote) => remote.verify(bearer).await,
            IdentityVerifier::Trusted => Ok(Some(bearer.to_string())),
        }
    }
}

#[derive(Debug, Serialize)]
struct VerifyRequest<'a> {
    token: &'a str,
}

#[derive(Debug, Deserialize)]
struct VerifiedSubject {
    subject_id: String,
}

pub struct RemoteVerifier {
    client: reqwest::Client,
    url: String,
}

impl RemoteVerifier {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    async fn verify(&self, bearer: &str) -> Result<Option<String>, IdentityError> {
        let response = self
            .client
            .post(&self.url)
            .json(&VerifyRequest { token: bearer })
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {
                let envelope = response.json::<Envelope<VerifiedSubject>>().await?;
                if envelope.data.subject_id.is_empty() {
                    return Ok(None);
                }
                Ok(Some(envelope.data.subject_id))
            }
            StatusCode::NOT_FOUND | StatusCode::UNAUTHORIZED | StatusCode::BAD_REQUEST => {
                Ok(None)
            }
            status => Err(IdentityError::Status(status.as_u16())),
        }
    }
}
