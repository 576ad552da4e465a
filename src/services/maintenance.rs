//! Background cleanup of expired sessions.
//!
//! DESIGN
//! ======
//! A single task wakes on a fixed interval and deletes session rows whose
//! `expires_at` has passed. Validation already ignores expired rows, so the
//! sweep only bounds table growth; a failed sweep is logged and retried on the
//! next tick.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::db::now_ms;
use crate::services::session;
use crate::state::AppState;

/// Spawn the session sweeper. Returns a handle for shutdown.
pub fn spawn_session_sweeper(state: AppState) -> JoinHandle<()> {
    let interval_secs = state.config.session_sweep_interval_secs.max(1);
    info!(interval_secs, "session sweeper configured");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            sweep_once(&state).await;
        }
    })
}

pub(crate) async fn sweep_once(state: &AppState) {
    match session::prune_expired(&state.pool, now_ms()).await {
        Ok(0) => debug!("session sweep: nothing expired"),
        Ok(removed) => info!(removed, "session sweep removed expired sessions"),
        Err(e) => error!(error = %e, "session sweep failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::state::test_helpers;

    #[tokio::test]
    async fn sweeper_task_can_be_aborted() {
        let config = Config { session_sweep_interval_secs: 3600, ..Config::for_tests() };
        let handle = spawn_session_sweeper(test_helpers::test_app_state_with_config(config));
        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
    }
}
