//! The per-report state machine tying assignment resolution, spatial and
//! temporal matching, vehicle state, and the downstream caches together.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::assigner::BlockAssigner;
use crate::avl::AvlReport;
use crate::cache::{KalmanErrorCache, PredictionCache};
use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::matching::spatial::SpatialMatcher;
use crate::matching::temporal::TemporalMatcher;
use crate::matching::TemporalMatch;
use crate::schedule::{active_trips, ScheduleRepository};
use crate::state::{BlockAssignmentMethod, VehicleState, VehicleStateStore};
use crate::timeout::TimeoutMonitor;

/// Capacity of the update broadcast channel; slow receivers fall behind and
/// resubscribe rather than backpressure matching.
const UPDATE_CHANNEL_CAPACITY: usize = 64;

/// Drives the full matching state machine for every incoming AVL report.
///
/// All services are explicitly constructed and owned here; the engine is the
/// sole writer of vehicle state. Reports for different vehicles are
/// processed fully in parallel; reports for one vehicle are serialized by
/// that vehicle's mutex, held for the whole of `process_report`.
pub struct MatchingEngine {
    config: Arc<CoreConfig>,
    repository: Arc<dyn ScheduleRepository>,
    store: Arc<VehicleStateStore>,
    assigner: BlockAssigner,
    spatial: SpatialMatcher,
    temporal: TemporalMatcher,
    error_cache: Arc<KalmanErrorCache>,
    predictions: Arc<PredictionCache>,
    timeout: TimeoutMonitor,
    updates_tx: broadcast::Sender<VehicleState>,
}

impl MatchingEngine {
    pub fn new(config: CoreConfig, repository: Arc<dyn ScheduleRepository>) -> Self {
        let config = Arc::new(config);
        let store = Arc::new(VehicleStateStore::new());
        let predictions = Arc::new(PredictionCache::new());
        let (updates_tx, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            assigner: BlockAssigner::new(repository.clone()),
            spatial: SpatialMatcher::new(config.clone()),
            temporal: TemporalMatcher::new(config.clone(), repository.timezone()),
            error_cache: Arc::new(KalmanErrorCache::new(config.error_cache_capacity)),
            timeout: TimeoutMonitor::new(config.clone(), store.clone(), predictions.clone()),
            config,
            repository,
            store,
            predictions,
            updates_tx,
        }
    }

    /// Receiver for per-report update notifications: one snapshot of the
    /// updated vehicle state whenever matching completes for a predictable
    /// vehicle. This is the hook downstream prediction generation consumes.
    pub fn subscribe(&self) -> broadcast::Receiver<VehicleState> {
        self.updates_tx.subscribe()
    }

    /// Read-only snapshot of a vehicle's current state.
    pub async fn current_state(&self, vehicle_id: &str) -> Option<VehicleState> {
        self.store.snapshot(vehicle_id).await
    }

    pub fn store(&self) -> &Arc<VehicleStateStore> {
        &self.store
    }

    pub fn error_cache(&self) -> &Arc<KalmanErrorCache> {
        &self.error_cache
    }

    pub fn predictions(&self) -> &Arc<PredictionCache> {
        &self.predictions
    }

    /// Processes one AVL report end to end: timeout scan, classification,
    /// matching, schedule-adherence check, downstream notification, and the
    /// end-of-block check.
    ///
    /// Failure here is contained to the reporting vehicle; other vehicles'
    /// state is never touched on an error path.
    pub async fn process_report(&self, report: AvlReport) -> Result<(), CoreError> {
        info!(
            vehicle_id = %report.vehicle_id,
            time = %report.time,
            source = %report.source,
            "Processing AVL report"
        );

        // Stale-vehicle handling is driven off the report's own timestamp so
        // replay behaves exactly like live data. Runs before this vehicle's
        // lock is taken.
        self.timeout.on_report(&report).await;

        let handle = self.store.vehicle(&report.vehicle_id).await;
        let mut state = handle.lock().await;

        // Keep the report even if the vehicle ends up unpredictable
        state.set_avl_report(report.clone());
        if let Some(route_id) = self.assigner.route_id_for(&report) {
            state.set_route_hint(Some(route_id.to_string()));
        }

        let continue_match = state.is_predictable() && !state.has_new_assignment(&report);
        let reassign = report.has_valid_assignment()
            && (!state.is_predictable() || state.has_new_assignment(&report));

        if continue_match {
            self.match_predictable_vehicle(&mut state)?;
        } else if reassign {
            // Never mix matches across assignments
            if state.is_predictable() && state.has_new_assignment(&report) {
                self.make_unpredictable_and_remove_assignment(&mut state);
            }
            self.match_vehicle_to_assignment(&mut state);
        } else {
            // No usable assignment and not already predictable
            debug!(vehicle_id = %state.vehicle_id, "No assignment to match against");
            self.make_unpredictable(&mut state);
        }

        self.check_schedule_adherence(&mut state);

        // Refine the shared error estimate for the matched location
        if let (Some(m), Some(adherence)) = (state.current_match(), state.schedule_adherence()) {
            self.error_cache.fold_observation(
                m.indices().clone(),
                (adherence.seconds() as f64).powi(2),
                self.config.error_filter_gain,
            );
        }

        // Downstream result generation (predictions, arrivals) hangs off
        // this notification
        if state.is_predictable() {
            let _ = self.updates_tx.send(state.clone());
        }

        self.handle_possible_end_of_block(&mut state);
        Ok(())
    }

    /// Warm re-match for a vehicle that is already predictable and kept its
    /// assignment. A `None` outcome demotes the vehicle; calling this for a
    /// vehicle that is not predictable is a programming error.
    fn match_predictable_vehicle(
        &self,
        state: &mut VehicleState,
    ) -> Result<Option<TemporalMatch>, CoreError> {
        if !state.is_predictable() || state.current_match().is_none() {
            return Err(CoreError::InvariantViolation(format!(
                "continuing-match path invoked for vehicle {} which is not predictable",
                state.vehicle_id
            )));
        }

        let candidates = self.spatial.matches_from_previous(state)?;
        debug!(
            vehicle_id = %state.vehicle_id,
            candidates = candidates.len(),
            "Spatial candidates for predictable vehicle"
        );
        let best = self.temporal.best_match(state, candidates)?;

        info!(
            vehicle_id = %state.vehicle_id,
            best = ?best.as_ref().map(|m| m.indices().to_string()),
            "Best match for predictable vehicle"
        );
        if best.is_none() {
            self.predictions.remove_predictions(&state.vehicle_id);
        }
        state.set_match(best.clone());
        Ok(best)
    }

    /// Cold match against the report's assignment. Returns whether the
    /// vehicle ended up predictable.
    ///
    /// The vehicle's existing block stands in only when the report names no
    /// assignment at all, which happens on the forced re-match after an
    /// adherence failure. A carried assignment that fails to resolve clears
    /// the block; it must never fall back to a stale one.
    fn match_vehicle_to_assignment(&self, state: &mut VehicleState) -> bool {
        let Some(report) = state.avl_report().cloned() else {
            return false;
        };

        let block = if report.has_valid_assignment() {
            self.assigner.block_for(&report)
        } else {
            state.block().cloned()
        };
        // A report without an assignment keeps the id the block was
        // resolved from, so the next assigned report does not read as new
        let assignment_id = report
            .assignment_id
            .clone()
            .or_else(|| state.assignment_id().map(String::from));
        let Some(block) = block else {
            state.set_match(None);
            state.set_block(None, None, assignment_id, false);
            self.predictions.remove_predictions(&state.vehicle_id);
            return false;
        };

        let trips = active_trips(
            &block,
            report.time,
            self.repository.timezone(),
            self.config.active_trip_window_secs,
        );
        let candidates = self.spatial.matches_for_assignment(&report, &trips, &block);
        debug!(
            vehicle_id = %report.vehicle_id,
            block_id = %block.block_id,
            active_trips = trips.len(),
            candidates = candidates.len(),
            "Spatial candidates for assignment"
        );

        let best = if self.config.prefer_layover_fallback {
            self.temporal
                .match_to_layover(&report, &trips, &block)
                .or_else(|| self.temporal.best_match_vs_schedule(&report, candidates))
        } else {
            self.temporal
                .best_match_vs_schedule(&report, candidates)
                .or_else(|| self.temporal.match_to_layover(&report, &trips, &block))
        };

        let predictable = best.is_some();
        if predictable {
            info!(
                vehicle_id = %report.vehicle_id,
                block_id = %block.block_id,
                "Matched to block, vehicle is now predictable"
            );
        } else {
            info!(
                vehicle_id = %report.vehicle_id,
                block_id = %block.block_id,
                "Could not match to block, vehicle is not predictable"
            );
            self.predictions.remove_predictions(&state.vehicle_id);
        }

        state.set_match(best);
        state.set_block(
            Some(block),
            Some(BlockAssignmentMethod::AvlFeed),
            assignment_id,
            predictable,
        );
        predictable
    }

    /// Computes and stores real-time schedule adherence. An out-of-bounds
    /// value forces one repeat of the assignment match (the vehicle may well
    /// keep the same block), recovering from matches gone stale across long
    /// report gaps; the recomputed value is stored even if still bad.
    fn check_schedule_adherence(&self, state: &mut VehicleState) {
        let mut adherence = self.temporal.schedule_adherence(state);

        if let Some(value) = adherence {
            if !value.is_within_bounds(
                self.config.adherence_early_secs,
                self.config.adherence_late_secs,
            ) {
                info!(
                    vehicle_id = %state.vehicle_id,
                    adherence = %value,
                    "Schedule adherence out of bounds, re-matching vehicle to assignment"
                );
                self.match_vehicle_to_assignment(state);
                adherence = self.temporal.schedule_adherence(state);
            }
        }

        state.set_schedule_adherence(adherence);
    }

    /// Clears the match (and predictions), leaving any block assignment.
    fn make_unpredictable(&self, state: &mut VehicleState) {
        state.set_match(None);
        self.predictions.remove_predictions(&state.vehicle_id);
    }

    /// Clears match, predictions, and the block assignment.
    fn make_unpredictable_and_remove_assignment(&self, state: &mut VehicleState) {
        self.make_unpredictable(state);
        state.set_block(
            None,
            Some(BlockAssignmentMethod::AssignmentTerminated),
            None,
            false,
        );
    }

    /// Best-effort end-of-block handling: a match at the final stop of the
    /// final trip terminates the assignment. A vehicle may never produce a
    /// fix exactly at the terminal, in which case the timeout or the next
    /// assignment takes care of it.
    fn handle_possible_end_of_block(&self, state: &mut VehicleState) {
        let at_end = match (state.current_match(), state.block()) {
            (Some(m), Some(block)) => m.indices().at_end_of_block(block),
            _ => false,
        };
        if at_end {
            info!(
                vehicle_id = %state.vehicle_id,
                "Vehicle reached the end of its block, removing assignment"
            );
            self.make_unpredictable_and_remove_assignment(state);
        }
    }
}
