//! Geometric search locating a GPS fix against the route geometry.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::debug;

use crate::avl::AvlReport;
use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::geo::{self, Location};
use crate::matching::{Indices, SpatialMatch};
use crate::schedule::{Block, Trip};
use crate::state::VehicleState;

/// Finds candidate locations for a GPS fix along a block's stop-path
/// segments. Stateless; all tuning comes from the config.
pub struct SpatialMatcher {
    config: Arc<CoreConfig>,
}

impl SpatialMatcher {
    pub fn new(config: Arc<CoreConfig>) -> Self {
        Self { config }
    }

    /// Cold search: examines every segment of every supplied trip (the trips
    /// whose scheduled span plausibly contains the report time). Candidates
    /// are ranked by perpendicular distance ascending; an empty result means
    /// no geometry plausibly explains the fix.
    pub fn matches_for_assignment(
        &self,
        report: &AvlReport,
        trips: &[Arc<Trip>],
        block: &Arc<Block>,
    ) -> Vec<SpatialMatch> {
        let fix = Location::new(report.lat, report.lon);
        let mut matches = Vec::new();

        for trip in trips {
            let Some(trip_index) = block.trip_index(&trip.trip_id) else {
                continue;
            };
            for (path_index, _) in trip.stop_paths.iter().enumerate() {
                self.collect_path_candidates(
                    &report.vehicle_id,
                    fix,
                    block,
                    trip_index,
                    path_index,
                    &mut matches,
                );
            }
        }

        matches.sort_by(|a, b| {
            a.distance_to_segment
                .partial_cmp(&b.distance_to_segment)
                .unwrap_or(Ordering::Equal)
        });
        debug!(
            vehicle_id = %report.vehicle_id,
            block_id = %block.block_id,
            candidates = matches.len(),
            "Cold spatial search complete"
        );
        matches
    }

    /// Warm search: starts from the vehicle's previous match and examines a
    /// bounded window of stop paths around it, so backward jumps from GPS
    /// noise stay bounded and the whole block is not re-scanned. Ties on
    /// distance are broken by the smaller forward jump from the previous
    /// match.
    ///
    /// Only valid for a vehicle that is already predictable; calling it for
    /// any other vehicle is a programming error.
    pub fn matches_from_previous(
        &self,
        state: &VehicleState,
    ) -> Result<Vec<SpatialMatch>, CoreError> {
        let (previous, report) = match (state.current_match(), state.avl_report()) {
            (Some(m), Some(r)) if state.is_predictable() => (m, r),
            _ => {
                return Err(CoreError::InvariantViolation(format!(
                    "warm spatial search for vehicle {} which is not predictable",
                    state.vehicle_id
                )))
            }
        };

        let block = &previous.spatial.block;
        let ordinals = path_ordinals(block);
        let previous_ordinal = ordinals
            .iter()
            .position(|&(t, p)| {
                t == previous.spatial.indices.trip_index
                    && p == previous.spatial.indices.stop_path_index
            })
            .ok_or_else(|| {
                CoreError::InvariantViolation(format!(
                    "previous match indices {} not within block {}",
                    previous.spatial.indices, block.block_id
                ))
            })?;

        let fix = Location::new(report.lat, report.lon);
        let first = previous_ordinal.saturating_sub(self.config.warm_lookback_paths);
        let last = (previous_ordinal + self.config.warm_lookahead_paths).min(ordinals.len() - 1);

        let mut candidates: Vec<(SpatialMatch, i64)> = Vec::new();
        for ordinal in first..=last {
            let (trip_index, path_index) = ordinals[ordinal];
            let mut matches = Vec::new();
            self.collect_path_candidates(
                &state.vehicle_id,
                fix,
                block,
                trip_index,
                path_index,
                &mut matches,
            );
            let jump = ordinal as i64 - previous_ordinal as i64;
            candidates.extend(matches.into_iter().map(|m| (m, jump)));
        }

        candidates.sort_by(|a, b| {
            a.0.distance_to_segment
                .partial_cmp(&b.0.distance_to_segment)
                .unwrap_or(Ordering::Equal)
                .then_with(|| jump_rank(a.1).cmp(&jump_rank(b.1)))
        });

        debug!(
            vehicle_id = %state.vehicle_id,
            previous = %previous.spatial.indices,
            candidates = candidates.len(),
            "Warm spatial search complete"
        );
        Ok(candidates.into_iter().map(|(m, _)| m).collect())
    }

    /// Projects the fix onto every segment of one stop path and keeps the
    /// segments within the acceptance radius.
    fn collect_path_candidates(
        &self,
        vehicle_id: &str,
        fix: Location,
        block: &Arc<Block>,
        trip_index: usize,
        path_index: usize,
        out: &mut Vec<SpatialMatch>,
    ) {
        let path = &block.trips[trip_index].stop_paths[path_index];
        for segment_index in 0..path.segment_count() {
            let (start, end) = path.segment(segment_index);
            let projection = geo::project_onto_segment(fix, start, end);
            if projection.distance_to_segment <= self.config.spatial_acceptance_radius_m {
                out.push(SpatialMatch {
                    vehicle_id: vehicle_id.to_string(),
                    block: block.clone(),
                    indices: Indices {
                        block_id: block.block_id.clone(),
                        trip_index,
                        stop_path_index: path_index,
                        segment_index,
                    },
                    distance_to_segment: projection.distance_to_segment,
                    distance_along_segment: projection.distance_along_segment,
                });
            }
        }
    }
}

/// Stop paths of a block flattened into block order.
fn path_ordinals(block: &Block) -> Vec<(usize, usize)> {
    block
        .trips
        .iter()
        .enumerate()
        .flat_map(|(trip_index, trip)| {
            (0..trip.stop_paths.len()).map(move |path_index| (trip_index, path_index))
        })
        .collect()
}

/// Ranks a path jump for tie-breaking: forward jumps beat backward jumps,
/// nearer beats farther.
fn jump_rank(jump: i64) -> i64 {
    if jump >= 0 {
        jump
    } else {
        i64::MAX / 2 - jump
    }
}
