use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::ticket_error;
use crate::api::auth::{optional_scanner, require_scanner};
use crate::api::response::{ApiError, AppQuery, JSend};
use crate::device::describe_device;
use crate::storage::models::{DeviceInfo, Ticket};
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateTicketResponse {
    /// Lets the web session abandon the ticket even after it was scanned
    pub creator_key: String,
    pub expires_at: String,
    pub ticket_id: String,
}

/// What the mobile app sees after scanning or confirming.
/// Never carries the session credential.
#[derive(Debug, Serialize)]
pub struct TicketResponse {
    pub expires_at: String,
    pub requester_device: DeviceInfoResponse,
    pub state: String,
    pub ticket_id: String,
    pub version: u64,
}

#[derive(Debug, Serialize)]
pub struct DeviceInfoResponse {
    pub browser: Option<String>,
    pub browser_version: Option<String>,
    pub description: String,
    pub kind: String,
    pub os: Option<String>,
    pub os_version: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelTicketRequest {
    #[serde(default)]
    pub creator_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusParams {
    /// Any value other than "0" or "false" turns on long-polling
    #[serde(default)]
    pub wait: Option<String>,
    /// Last version the poller saw
    #[serde(default)]
    pub since: Option<u64>,
}

impl StatusParams {
    fn long_poll(&self) -> bool {
        self.wait
            .as_deref()
            .is_some_and(|w| !matches!(w, "" | "0" | "false"))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TicketStatusResponse {
    pub expires_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_credential: Option<String>,
    pub state: String,
    pub ticket_id: String,
    pub version: u64,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn create_ticket(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<JSend<CreateTicketResponse>>, ApiError> {
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok());

    let created = state
        .broker
        .create_ticket(user_agent)
        .map_err(ticket_error)?;

    Ok(JSend::success(CreateTicketResponse {
        creator_key: created.creator_key,
        expires_at: created.expires_at.to_rfc3339(),
        ticket_id: created.id,
    }))
}

pub async fn scan_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<JSend<TicketResponse>>, ApiError> {
    let scanner = require_scanner(&state, &headers).await?;

    let ticket = state
        .broker
        .scan_ticket(&id, &scanner)
        .map_err(ticket_error)?;

    Ok(JSend::success(ticket_to_response(&ticket)))
}

pub async fn confirm_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<JSend<TicketResponse>>, ApiError> {
    let scanner = require_scanner(&state, &headers).await?;

    let ticket = state
        .broker
        .confirm_ticket(&id, &scanner)
        .await
        .map_err(ticket_error)?;

    Ok(JSend::success(ticket_to_response(&ticket)))
}

pub async fn cancel_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<JSend<TicketResponse>>, ApiError> {
    // The body is optional: the scanner cancels with just a bearer token.
    let req: CancelTicketRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CancelTicketRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::bad_request(format!("Invalid request body: {e}")))?
    };

    let scanner = optional_scanner(&state, &headers).await?;

    let ticket = state
        .broker
        .cancel_ticket(&id, scanner.as_deref(), req.creator_key.as_deref())
        .map_err(ticket_error)?;

    Ok(JSend::success(ticket_to_response(&ticket)))
}

pub async fn get_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    AppQuery(params): AppQuery<StatusParams>,
) -> Result<Json<JSend<TicketStatusResponse>>, ApiError> {
    let status = if params.long_poll() {
        state.broker.wait_for_status(&id, params.since).await
    } else {
        state.broker.poll_status(&id)
    }
    .map_err(ticket_error)?;

    Ok(JSend::success(TicketStatusResponse {
        expires_at: status.expires_at.to_rfc3339(),
        session_credential: status.session_credential.map(|c| c.into_inner()),
        state: status.state.to_string(),
        ticket_id: status.id,
        version: status.version,
    }))
}

// ============================================================================
// Helpers
// ============================================================================

fn device_to_response(device: &DeviceInfo) -> DeviceInfoResponse {
    DeviceInfoResponse {
        browser: device.browser.clone(),
        browser_version: device.browser_version.clone(),
        description: describe_device(device),
        kind: format!("{:?}", device.kind),
        os: device.os.clone(),
        os_version: device.os_version.clone(),
    }
}

fn ticket_to_response(ticket: &Ticket) -> TicketResponse {
    TicketResponse {
        expires_at: ticket.expires_at.to_rfc3339(),
        requester_device: device_to_response(&ticket.requester_device),
        state: ticket.state.to_string(),
        ticket_id: ticket.id.clone(),
        version: ticket.version,
    }
}
