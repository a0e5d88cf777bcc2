use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::api::response::{ApiError, JSend};
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub node_id: String,
    /// Terminal tickets already handed to a poller, awaiting eviction
    pub observed: usize,
    pub status: String,
    pub tickets: u64,
    /// Tickets with at least one long-poll channel open
    pub watched: usize,
}

#[derive(Debug, Serialize)]
pub struct PurgeResponse {
    pub tickets_deleted: u64,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn health(
    State(state): State<Arc<AppState>>,
) -> Result<Json<JSend<HealthResponse>>, ApiError> {
    let tickets = state
        .broker
        .store()
        .count()
        .map_err(|e| ApiError::internal(format!("Failed to read ticket store: {e}")))?;

    Ok(JSend::success(HealthResponse {
        node_id: state.config.node.id.clone(),
        observed: state.broker.channel().observed_count(),
        status: "healthy".to_string(),
        tickets,
        watched: state.broker.channel().watched(),
    }))
}

pub async fn admin_purge(
    State(state): State<Arc<AppState>>,
) -> Result<Json<JSend<PurgeResponse>>, ApiError> {
    match state.broker.store().purge() {
        Ok(count) => {
            state.broker.channel().clear();
            tracing::warn!(tickets = count, "Purged all tickets");
            Ok(JSend::success(PurgeResponse {
                tickets_deleted: count,
            }))
        }
        Err(e) => Err(ApiError::internal(format!("Failed to purge data: {e}"))),
    }
}
