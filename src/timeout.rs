//! Detection of vehicles that have stopped reporting.

use std::sync::Arc;

use chrono::Duration;
use tracing::info;

use crate::avl::AvlReport;
use crate::cache::PredictionCache;
use crate::config::CoreConfig;
use crate::state::VehicleStateStore;

/// Demotes predictable vehicles whose last report has gone stale.
///
/// Staleness is judged against the incoming report's own timestamp, never
/// the wall clock, so live feeds and historical replays behave identically.
pub struct TimeoutMonitor {
    config: Arc<CoreConfig>,
    store: Arc<VehicleStateStore>,
    predictions: Arc<PredictionCache>,
}

impl TimeoutMonitor {
    pub fn new(
        config: Arc<CoreConfig>,
        store: Arc<VehicleStateStore>,
        predictions: Arc<PredictionCache>,
    ) -> Self {
        Self {
            config,
            store,
            predictions,
        }
    }

    /// Scans all known vehicles against the report's timestamp, demoting any
    /// predictable vehicle whose last report is older than the timeout.
    /// Each vehicle's mutex is taken one at a time; the store's map lock is
    /// never held while a vehicle is examined. Returns how many vehicles
    /// were demoted.
    pub async fn on_report(&self, report: &AvlReport) -> usize {
        let cutoff = report.time - Duration::seconds(self.config.vehicle_timeout_secs);
        let mut demoted = 0;

        for (vehicle_id, handle) in self.store.entries().await {
            // The reporting vehicle is about to be updated anyway
            if vehicle_id == report.vehicle_id {
                continue;
            }
            let mut state = handle.lock().await;
            if !state.is_predictable() {
                continue;
            }
            let stale = state
                .avl_report()
                .map(|last| last.time < cutoff)
                .unwrap_or(true);
            if stale {
                info!(
                    vehicle_id = %vehicle_id,
                    timeout_secs = self.config.vehicle_timeout_secs,
                    "Vehicle timed out, making it unpredictable"
                );
                state.set_match(None);
                drop(state);
                self.predictions.remove_predictions(&vehicle_id);
                demoted += 1;
            }
        }
        demoted
    }
}
