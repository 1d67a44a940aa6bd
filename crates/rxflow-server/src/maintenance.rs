//! Periodic maintenance sweeps.

use std::time::Duration;

use chrono::Utc;
use rxflow_core::workflow::{MaintenanceReport, MaintenanceService, TracingSink, SYSTEM_ACTOR};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::error::ApiResult;
use crate::processing;
use crate::state::AppState;

/// Run one sweep and dispatch stale pending requests for processing.
pub fn sweep(state: &AppState, stale_after: chrono::Duration) -> ApiResult<MaintenanceReport> {
    let report = state.with_db(|db| {
        MaintenanceService::new(db, &TracingSink)
            .with_stale_after(stale_after)
            .run(Utc::now())
    })?;
    for stale in &report.stale_requests {
        processing::dispatch(
            state.clone(),
            stale.workplace_id.clone(),
            SYSTEM_ACTOR.to_string(),
            stale.request_id.clone(),
        );
    }
    Ok(report)
}

/// Sweep every `every` until `shutdown` flips.
pub async fn run_loop(
    state: AppState,
    every: Duration,
    stale_after: chrono::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(interval_secs = every.as_secs(), "Maintenance scheduler started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = sweep(&state, stale_after) {
                    warn!(error = %err, "Maintenance sweep failed");
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    info!("Maintenance scheduler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProcessingMode;
    use rxflow_ai::MockModel;
    use rxflow_core::db::Database;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_loop_stops_on_shutdown() {
        let state = AppState::new(
            Database::open_in_memory().unwrap(),
            Arc::new(MockModel),
            ProcessingMode::Deferred,
        );
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_loop(
            state,
            Duration::from_millis(10),
            chrono::Duration::minutes(10),
            rx,
        ));
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_sweep_on_empty_database() {
        let state = AppState::new(
            Database::open_in_memory().unwrap(),
            Arc::new(MockModel),
            ProcessingMode::Deferred,
        );
        let report = sweep(&state, chrono::Duration::minutes(10)).unwrap();
        assert!(report.stale_requests.is_empty());
        assert_eq!(report.missed_follow_ups, 0);
    }
}
