//! Schedule-aware scoring of spatial candidates.
//!
//! Picks the single candidate whose timing best agrees with the published
//! schedule (cold matching) or with the vehicle's progress since its
//! previous match (incremental matching), and provides the wait-stop
//! fallback for vehicles idling off-route before a trip starts.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::debug;

use crate::avl::AvlReport;
use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::matching::{Indices, SpatialMatch, TemporalDifference, TemporalMatch};
use crate::schedule::{secs_into_day_candidates, Block, Trip};
use crate::state::VehicleState;

pub struct TemporalMatcher {
    config: Arc<CoreConfig>,
    tz: Tz,
}

impl TemporalMatcher {
    pub fn new(config: Arc<CoreConfig>, tz: Tz) -> Self {
        Self { config, tz }
    }

    /// Incremental scoring (contract A): for each candidate, the expected
    /// travel time from the previous match (per the schedule) is compared to
    /// the wall-clock time that actually elapsed between the two reports.
    /// The candidate with the smallest absolute deviation wins, provided it
    /// is within the acceptance bound. `None` means no candidate is
    /// acceptable.
    pub fn best_match(
        &self,
        state: &VehicleState,
        candidates: Vec<SpatialMatch>,
    ) -> Result<Option<TemporalMatch>, CoreError> {
        let (previous, report) = match (state.current_match(), state.avl_report()) {
            (Some(m), Some(r)) if state.is_predictable() => (m, r),
            _ => {
                return Err(CoreError::InvariantViolation(format!(
                    "incremental temporal match for vehicle {} which is not predictable",
                    state.vehicle_id
                )))
            }
        };
        let Some(previous_report) = state.previous_report() else {
            return Err(CoreError::InvariantViolation(format!(
                "incremental temporal match for vehicle {} with no previous report",
                state.vehicle_id
            )));
        };

        let actual_elapsed = (report.time - previous_report.time).num_seconds();
        let previous_scheduled = previous.spatial.scheduled_time_secs();

        let mut best: Option<TemporalMatch> = None;
        for candidate in candidates {
            let expected_elapsed = candidate.scheduled_time_secs() - previous_scheduled;
            // Positive: less time elapsed than the schedule allows for, so
            // the vehicle is running early
            let difference = TemporalDifference::new(expected_elapsed - actual_elapsed);
            if !difference
                .is_within_bounds(self.config.allowable_early_secs, self.config.allowable_late_secs)
            {
                continue;
            }
            if best
                .as_ref()
                .map(|b| difference.abs_seconds() < b.difference.abs_seconds())
                .unwrap_or(true)
            {
                best = Some(TemporalMatch {
                    spatial: candidate,
                    difference,
                });
            }
        }

        debug!(
            vehicle_id = %state.vehicle_id,
            best = ?best.as_ref().map(|b| b.indices().to_string()),
            "Incremental temporal match"
        );
        Ok(best)
    }

    /// Cold scoring (contract B): each candidate's scheduled time is
    /// compared directly to the report timestamp. Same minimization and
    /// bound policy as contract A.
    pub fn best_match_vs_schedule(
        &self,
        report: &AvlReport,
        candidates: Vec<SpatialMatch>,
    ) -> Option<TemporalMatch> {
        let mut best: Option<TemporalMatch> = None;
        for candidate in candidates {
            let difference =
                self.deviation_from_scheduled(candidate.scheduled_time_secs(), report.time);
            if !difference
                .is_within_bounds(self.config.allowable_early_secs, self.config.allowable_late_secs)
            {
                continue;
            }
            if best
                .as_ref()
                .map(|b| difference.abs_seconds() < b.difference.abs_seconds())
                .unwrap_or(true)
            {
                best = Some(TemporalMatch {
                    spatial: candidate,
                    difference,
                });
            }
        }

        debug!(
            vehicle_id = %report.vehicle_id,
            best = ?best.as_ref().map(|b| b.indices().to_string()),
            "Temporal match against schedule"
        );
        best
    }

    /// Wait-stop fallback: a vehicle idling in a yard or at a terminal
    /// before its trip departs may be geometrically off-route. If a supplied
    /// trip's first stop is a wait stop whose departure could still contain
    /// the vehicle, a match is synthesized at the start of that trip with
    /// zero deviation. This makes an otherwise unassignable vehicle weakly
    /// predictable at block start.
    pub fn match_to_layover(
        &self,
        report: &AvlReport,
        trips: &[Arc<Trip>],
        block: &Arc<Block>,
    ) -> Option<TemporalMatch> {
        let mut best: Option<(i64, TemporalMatch)> = None;
        for trip in trips {
            let Some(first_path) = trip.stop_paths.first() else {
                continue;
            };
            if !first_path.wait_stop {
                continue;
            }
            let departure = first_path.departure_or_arrival_secs();
            let deviation = self.deviation_from_scheduled(departure, report.time);
            // The vehicle can still be waiting if the departure has not
            // passed by more than the late tolerance
            if -deviation.seconds() > self.config.allowable_late_secs {
                continue;
            }
            let Some(trip_index) = block.trip_index(&trip.trip_id) else {
                continue;
            };
            let candidate = TemporalMatch {
                spatial: SpatialMatch {
                    vehicle_id: report.vehicle_id.clone(),
                    block: block.clone(),
                    indices: Indices {
                        block_id: block.block_id.clone(),
                        trip_index,
                        stop_path_index: 0,
                        segment_index: 0,
                    },
                    distance_to_segment: 0.0,
                    distance_along_segment: 0.0,
                },
                difference: TemporalDifference::new(0),
            };
            if best
                .as_ref()
                .map(|(abs, _)| deviation.abs_seconds() < *abs)
                .unwrap_or(true)
            {
                best = Some((deviation.abs_seconds(), candidate));
            }
        }

        let result = best.map(|(_, m)| m);
        debug!(
            vehicle_id = %report.vehicle_id,
            matched = result.is_some(),
            "Layover fallback"
        );
        result
    }

    /// Real-time schedule adherence for a stored match: the signed deviation
    /// between the match's scheduled time and the report timestamp. The
    /// engine applies the separate adherence tolerances to this value.
    pub fn schedule_adherence(&self, state: &VehicleState) -> Option<TemporalDifference> {
        let m = state.current_match()?;
        let report = state.avl_report()?;
        Some(self.deviation_from_scheduled(m.spatial.scheduled_time_secs(), report.time))
    }

    /// Deviation of the report instant from a scheduled seconds-into-day
    /// value, picking whichever service-day interpretation of the timestamp
    /// is closer (handles trips crossing midnight).
    fn deviation_from_scheduled(
        &self,
        scheduled_secs: i64,
        time: DateTime<Utc>,
    ) -> TemporalDifference {
        let deviation = secs_into_day_candidates(time, self.tz)
            .into_iter()
            .map(|s| scheduled_secs - s)
            .min_by_key(|d| d.abs())
            .unwrap_or(0);
        TemporalDifference::new(deviation)
    }
}
