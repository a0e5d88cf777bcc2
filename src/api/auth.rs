//! Bearer authentication for the mobile-app endpoints.
//!
//! The scanning device presents the session it is already logged in with as
//! `Authorization: Bearer <token>`; the identity service turns that into the
//! subject that scans and confirms tickets.

use axum::http::{header, HeaderMap};

use crate::api::response::ApiError;
use crate::AppState;

/// Extract the raw bearer token, if any.
pub fn bearer(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Resolve the caller to a scanner identity, failing with 401 when the
/// credential is missing or rejected.
pub async fn require_scanner(state: &AppState, headers: &HeaderMap) -> Result<String, ApiError> {
    let token = bearer(headers).ok_or_else(|| ApiError::unauthorized("Bearer token required"))?;

    match state.identity.verify(token).await {
        Ok(Some(subject)) => Ok(subject),
        Ok(None) => Err(ApiError::unauthorized("Invalid or expired bearer token")),
        Err(e) => {
            tracing::error!(error = %e, "Identity verification failed");
            Err(ApiError::bad_gateway("Identity service unavailable"))
        }
    }
}

/// Like [`require_scanner`] but an absent header is not an error.
pub async fn optional_scanner(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Option<String>, ApiError> {
    if !headers.contains_key(header::AUTHORIZATION) {
        return Ok(None);
    }
    require_scanner(state, headers).await.map(Some)
}
