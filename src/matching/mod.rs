//! Match types shared by the spatial and temporal matchers.

pub mod spatial;
pub mod temporal;

use std::fmt;
use std::sync::Arc;

use crate::schedule::{Block, StopPath, Trip};

/// Composite key locating a position within a block: which trip, which stop
/// path of that trip, which segment of that path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Indices {
    pub block_id: String,
    pub trip_index: usize,
    pub stop_path_index: usize,
    pub segment_index: usize,
}

impl Indices {
    /// Whether this position is the final segment of the final stop path of
    /// the final trip of the block.
    pub fn at_end_of_block(&self, block: &Block) -> bool {
        let Some(trip) = block.trips.last() else {
            return false;
        };
        let Some(path) = trip.stop_paths.last() else {
            return false;
        };
        self.trip_index == block.trips.len() - 1
            && self.stop_path_index == trip.stop_paths.len() - 1
            && self.segment_index == path.segment_count() - 1
    }
}

impl fmt::Display for Indices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.block_id, self.trip_index, self.stop_path_index, self.segment_index
        )
    }
}

/// A geometric candidate location of a vehicle along its block.
#[derive(Debug, Clone)]
pub struct SpatialMatch {
    pub vehicle_id: String,
    pub block: Arc<Block>,
    pub indices: Indices,
    /// Perpendicular distance from the GPS fix to the segment, meters
    pub distance_to_segment: f64,
    /// Distance traveled along the segment to the projected point, meters
    pub distance_along_segment: f64,
}

impl SpatialMatch {
    pub fn trip(&self) -> &Arc<Trip> {
        &self.block.trips[self.indices.trip_index]
    }

    pub fn stop_path(&self) -> &StopPath {
        &self.trip().stop_paths[self.indices.stop_path_index]
    }

    /// Fraction of the stop path covered up to the matched point, in [0, 1].
    pub fn fraction_along_path(&self) -> f64 {
        let path = self.stop_path();
        let length = path.length();
        if length <= 0.0 {
            return 0.0;
        }
        let covered =
            path.length_before_segment(self.indices.segment_index) + self.distance_along_segment;
        (covered / length).clamp(0.0, 1.0)
    }

    /// Scheduled time at the matched point, seconds into the service day.
    pub fn scheduled_time_secs(&self) -> i64 {
        self.trip()
            .scheduled_time_at(self.indices.stop_path_index, self.fraction_along_path())
    }

    /// Linear position within the whole block, used to compare how far
    /// forward or backward one match is from another.
    pub fn block_offset(&self) -> (usize, usize, usize) {
        (
            self.indices.trip_index,
            self.indices.stop_path_index,
            self.indices.segment_index,
        )
    }
}

/// Signed deviation from an expected time. Positive means the vehicle is
/// early (ahead of schedule), negative means late.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TemporalDifference {
    seconds: i64,
}

impl TemporalDifference {
    pub fn new(seconds: i64) -> Self {
        Self { seconds }
    }

    pub fn seconds(&self) -> i64 {
        self.seconds
    }

    pub fn abs_seconds(&self) -> i64 {
        self.seconds.abs()
    }

    /// Symmetric-around-zero bound check with separate early/late
    /// tolerances. The same deviation value can face different tolerances
    /// for candidate acceptance vs. the real-time adherence check.
    pub fn is_within_bounds(&self, allowable_early_secs: i64, allowable_late_secs: i64) -> bool {
        self.seconds <= allowable_early_secs && -self.seconds <= allowable_late_secs
    }
}

impl fmt::Display for TemporalDifference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.seconds >= 0 {
            write!(f, "{}s early", self.seconds)
        } else {
            write!(f, "{}s late", -self.seconds)
        }
    }
}

/// A spatial match plus its deviation from the expected or scheduled time.
/// The selected instance is what the engine stores on the vehicle state.
#[derive(Debug, Clone)]
pub struct TemporalMatch {
    pub spatial: SpatialMatch,
    pub difference: TemporalDifference,
}

impl TemporalMatch {
    pub fn indices(&self) -> &Indices {
        &self.spatial.indices
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[test]
    fn temporal_difference_bounds() {
        assert!(TemporalDifference::new(0).is_within_bounds(900, 1200));
        assert!(TemporalDifference::new(900).is_within_bounds(900, 1200));
        assert!(!TemporalDifference::new(901).is_within_bounds(900, 1200));
        assert!(TemporalDifference::new(-1200).is_within_bounds(900, 1200));
        assert!(!TemporalDifference::new(-1201).is_within_bounds(900, 1200));
    }

    #[test]
    fn temporal_difference_display() {
        assert_eq!(TemporalDifference::new(30).to_string(), "30s early");
        assert_eq!(TemporalDifference::new(-45).to_string(), "45s late");
    }

    #[test]
    fn end_of_block_detection() {
        let repo = testutil::fixture_repository();
        let block = crate::schedule::ScheduleRepository::block(&repo, "weekday", "B1").unwrap();

        let last_trip = block.trips.last().unwrap();
        let last_path = last_trip.stop_paths.last().unwrap();
        let end = Indices {
            block_id: "B1".into(),
            trip_index: block.trips.len() - 1,
            stop_path_index: last_trip.stop_paths.len() - 1,
            segment_index: last_path.segment_count() - 1,
        };
        assert!(end.at_end_of_block(&block));

        let mid = Indices {
            block_id: "B1".into(),
            trip_index: 0,
            stop_path_index: 1,
            segment_index: 0,
        };
        assert!(!mid.at_end_of_block(&block));
    }

    #[test]
    fn fraction_and_scheduled_time_at_path_end() {
        let repo = testutil::fixture_repository();
        let block = crate::schedule::ScheduleRepository::block(&repo, "weekday", "B1").unwrap();
        let trip = &block.trips[0];
        let path = &trip.stop_paths[1];
        let last_segment = path.segment_count() - 1;
        let (start, end) = path.segment(last_segment);
        let spatial = SpatialMatch {
            vehicle_id: "v1".into(),
            block: block.clone(),
            indices: Indices {
                block_id: "B1".into(),
                trip_index: 0,
                stop_path_index: 1,
                segment_index: last_segment,
            },
            distance_to_segment: 0.0,
            distance_along_segment: crate::geo::haversine_distance(start, end),
        };
        assert!((spatial.fraction_along_path() - 1.0).abs() < 1e-9);
        assert_eq!(spatial.scheduled_time_secs(), path.arrival_secs);
    }
}
