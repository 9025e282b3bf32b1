//! Resolution of a report's raw assignment field to a concrete block.

use std::sync::Arc;

use tracing::{debug, error};

use crate::avl::{AssignmentType, AvlReport};
use crate::schedule::{Block, ScheduleRepository};

/// Maps an AVL report's assignment (block id, trip id, or trip short name)
/// plus the report's service day to a block. Resolution failures of any kind
/// yield `None`; they are data conditions, never errors.
pub struct BlockAssigner {
    repository: Arc<dyn ScheduleRepository>,
}

impl BlockAssigner {
    pub fn new(repository: Arc<dyn ScheduleRepository>) -> Self {
        Self { repository }
    }

    /// The block the report's assignment resolves to, if any. A route-id
    /// assignment never yields a block.
    pub fn block_for(&self, report: &AvlReport) -> Option<Arc<Block>> {
        let assignment_id = report.assignment_id.as_deref()?;

        match report.assignment_type {
            AssignmentType::BlockId => self.block_by_id(report, assignment_id),
            AssignmentType::TripId => {
                let trip = self.repository.trip(assignment_id);
                if trip.is_none() {
                    error!(
                        vehicle_id = %report.vehicle_id,
                        trip_id = %assignment_id,
                        "AVL report specifies a trip assignment but that trip is not valid"
                    );
                    return None;
                }
                self.parent_block(report, assignment_id)
            }
            AssignmentType::TripShortName => {
                let Some(trip) = self.repository.trip_by_short_name(assignment_id) else {
                    error!(
                        vehicle_id = %report.vehicle_id,
                        trip_short_name = %assignment_id,
                        "AVL report specifies a trip short name assignment but that trip is not valid"
                    );
                    return None;
                };
                self.parent_block(report, &trip.trip_id)
            }
            AssignmentType::RouteId | AssignmentType::Unset => None,
        }
    }

    /// The route id named by the report, if the assignment is a route hint.
    pub fn route_id_for<'a>(&self, report: &'a AvlReport) -> Option<&'a str> {
        if report.assignment_type == AssignmentType::RouteId {
            report.assignment_id.as_deref()
        } else {
            None
        }
    }

    /// Looks the block id up across every service id valid for the report's
    /// date, returning the first hit.
    fn block_by_id(&self, report: &AvlReport, block_id: &str) -> Option<Arc<Block>> {
        let service_ids = self.repository.service_ids_for(report.time);
        for service_id in &service_ids {
            if let Some(block) = self.repository.block(service_id, block_id) {
                debug!(
                    vehicle_id = %report.vehicle_id,
                    block_id = %block.block_id,
                    service_id = %service_id,
                    "Resolved block assignment from AVL feed"
                );
                return Some(block);
            }
        }
        // Data inconsistency between the feed and the schedule, not fatal
        error!(
            vehicle_id = %report.vehicle_id,
            block_id = %block_id,
            service_ids = ?service_ids,
            "AVL report specifies a block id that is not valid for any current service id"
        );
        None
    }

    /// The parent block of a trip that is known to exist. A trip with no
    /// parent block is a schedule invariant violation; it is reported and
    /// the lookup fails.
    fn parent_block(&self, report: &AvlReport, trip_id: &str) -> Option<Arc<Block>> {
        match self.repository.block_for_trip(trip_id) {
            Some(block) => {
                debug!(
                    vehicle_id = %report.vehicle_id,
                    trip_id = %trip_id,
                    block_id = %block.block_id,
                    "Resolved trip assignment to parent block"
                );
                Some(block)
            }
            None => {
                error!(
                    vehicle_id = %report.vehicle_id,
                    trip_id = %trip_id,
                    "Trip exists in the schedule but has no parent block"
                );
                None
            }
        }
    }
}
