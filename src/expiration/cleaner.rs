use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::AppState;

/// Start the background ticket eviction task
pub fn start_expiration_cleaner(state: Arc<AppState>) -> JoinHandle<()> {
    let interval = Duration::from_secs(state.config.tickets.cleanup_interval_seconds);

    tokio::spawn(async move {
        let mut interval_timer = tokio::time::interval(interval);

        loop {
            interval_timer.tick().await;
            run_cleanup(&state).await;
        }
    })
}

async fn run_cleanup(state: &AppState) {
    debug!("Running ticket eviction sweep");

    let broker = Arc::clone(&state.broker);
    let result = tokio::task::spawn_blocking(move || broker.sweep()).await;

    let sweep_result = match result {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, "Ticket eviction task panicked");
            return;
        }
    };

    match sweep_result {
        Ok(stats) if stats.evicted > 0 || stats.expired > 0 => debug!(
            evicted = stats.evicted,
            expired = stats.expired,
            channels_pruned = stats.channels_pruned,
            "Finished tickets evicted"
        ),
        Err(e) => error!(error = %e, "Failed to sweep tickets"),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_state_with;

    #[tokio::test]
    async fn test_cleaner_evicts_lapsed_tickets() {
        let state = test_state_with(|config| {
            config.tickets.ttl_seconds = 1;
            config.tickets.eviction_grace_seconds = 0;
            config.tickets.cleanup_interval_seconds = 1;
        });
        let created = state.broker.create_ticket(None).unwrap();

        let handle = start_expiration_cleaner(Arc::clone(&state));
        tokio::time::sleep(Duration::from_millis(2500)).await;
        handle.abort();

        assert!(matches!(
            state.broker.poll_status(&created.id),
            Err(crate::broker::TicketError::NotFound)
        ));
    }
}
