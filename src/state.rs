//! Per-vehicle runtime state and the store that owns it.
//!
//! The store hands out one `Arc<Mutex<VehicleState>>` per vehicle id. The
//! orchestrator holds that mutex for the whole of a report's processing, so
//! all transitions for one vehicle are serialized while unrelated vehicles
//! proceed in parallel. Readers outside the orchestrator get cloned
//! snapshots and can never observe a torn update.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::avl::AvlReport;
use crate::matching::{TemporalDifference, TemporalMatch};
use crate::schedule::Block;

/// How a vehicle came to hold (or lose) its block assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockAssignmentMethod {
    /// Assignment taken from the AVL feed
    AvlFeed,
    /// Assignment removed, e.g. at the end of the block
    AssignmentTerminated,
}

/// Authoritative runtime record for one vehicle.
///
/// Mutated exclusively through the orchestrator while the vehicle's mutex is
/// held. Invariant: `is_predictable()` iff both a match and a block are set.
#[derive(Debug, Clone)]
pub struct VehicleState {
    pub vehicle_id: String,
    avl_report: Option<AvlReport>,
    /// The report before the current one, for incremental matching
    previous_report: Option<AvlReport>,
    current_match: Option<TemporalMatch>,
    block: Option<Arc<Block>>,
    assignment_method: Option<BlockAssignmentMethod>,
    /// Raw assignment id the current block was resolved from
    assignment_id: Option<String>,
    predictable: bool,
    schedule_adherence: Option<TemporalDifference>,
    /// Route hint from a route-id assignment; never yields a block
    route_hint: Option<String>,
}

impl VehicleState {
    pub fn new(vehicle_id: impl Into<String>) -> Self {
        Self {
            vehicle_id: vehicle_id.into(),
            avl_report: None,
            previous_report: None,
            current_match: None,
            block: None,
            assignment_method: None,
            assignment_id: None,
            predictable: false,
            schedule_adherence: None,
            route_hint: None,
        }
    }

    pub fn avl_report(&self) -> Option<&AvlReport> {
        self.avl_report.as_ref()
    }

    pub fn previous_report(&self) -> Option<&AvlReport> {
        self.previous_report.as_ref()
    }

    pub fn current_match(&self) -> Option<&TemporalMatch> {
        self.current_match.as_ref()
    }

    pub fn block(&self) -> Option<&Arc<Block>> {
        self.block.as_ref()
    }

    pub fn assignment_method(&self) -> Option<BlockAssignmentMethod> {
        self.assignment_method
    }

    /// Raw assignment id the current block was resolved from.
    pub fn assignment_id(&self) -> Option<&str> {
        self.assignment_id.as_deref()
    }

    pub fn is_predictable(&self) -> bool {
        self.predictable
    }

    pub fn schedule_adherence(&self) -> Option<TemporalDifference> {
        self.schedule_adherence
    }

    pub fn route_hint(&self) -> Option<&str> {
        self.route_hint.as_deref()
    }

    /// Records the newest report; the old one becomes the previous report.
    pub fn set_avl_report(&mut self, report: AvlReport) {
        self.previous_report = self.avl_report.take();
        self.avl_report = Some(report);
    }

    /// Stores the match result for the current report. `None` also clears
    /// predictability: a vehicle without a match cannot be predicted.
    pub fn set_match(&mut self, m: Option<TemporalMatch>) {
        self.predictable = m.is_some() && self.block.is_some();
        self.current_match = m;
    }

    /// Stores the block assignment. `predictable` may only be true when a
    /// match is also present, keeping the predictability invariant intact.
    pub fn set_block(
        &mut self,
        block: Option<Arc<Block>>,
        method: Option<BlockAssignmentMethod>,
        assignment_id: Option<String>,
        predictable: bool,
    ) {
        debug_assert!(
            !predictable || (block.is_some() && self.current_match.is_some()),
            "predictable requires both block and match"
        );
        self.block = block;
        self.assignment_method = method;
        self.assignment_id = assignment_id;
        self.predictable = predictable && self.block.is_some() && self.current_match.is_some();
    }

    pub fn set_schedule_adherence(&mut self, adherence: Option<TemporalDifference>) {
        self.schedule_adherence = adherence;
    }

    pub fn set_route_hint(&mut self, route_id: Option<String>) {
        self.route_hint = route_id;
    }

    /// Whether the report names a resolvable assignment different from the
    /// one the current block came from.
    pub fn has_new_assignment(&self, report: &AvlReport) -> bool {
        report.has_valid_assignment() && report.assignment_id != self.assignment_id
    }
}

/// Concurrent map of vehicle id to its state, the unit of concurrency
/// control. Entries are created lazily and never removed while the process
/// runs.
#[derive(Debug, Default)]
pub struct VehicleStateStore {
    vehicles: RwLock<HashMap<String, Arc<Mutex<VehicleState>>>>,
}

impl VehicleStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The state handle for a vehicle, created unpredictable and empty on
    /// first access. The caller locks the returned mutex for the duration
    /// of the vehicle's update.
    pub async fn vehicle(&self, vehicle_id: &str) -> Arc<Mutex<VehicleState>> {
        {
            let vehicles = self.vehicles.read().await;
            if let Some(state) = vehicles.get(vehicle_id) {
                return state.clone();
            }
        }
        let mut vehicles = self.vehicles.write().await;
        vehicles
            .entry(vehicle_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(VehicleState::new(vehicle_id))))
            .clone()
    }

    /// Read-only snapshot for consumers outside the orchestrator. `None` if
    /// the vehicle has never reported.
    pub async fn snapshot(&self, vehicle_id: &str) -> Option<VehicleState> {
        let state = {
            let vehicles = self.vehicles.read().await;
            vehicles.get(vehicle_id)?.clone()
        };
        let guard = state.lock().await;
        Some(guard.clone())
    }

    pub async fn vehicle_ids(&self) -> Vec<String> {
        self.vehicles.read().await.keys().cloned().collect()
    }

    /// All current entries, for cross-vehicle scans. The map lock is
    /// released before any per-vehicle mutex is taken.
    pub async fn entries(&self) -> Vec<(String, Arc<Mutex<VehicleState>>)> {
        self.vehicles
            .read()
            .await
            .iter()
            .map(|(id, state)| (id.clone(), state.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::{Indices, SpatialMatch, TemporalDifference, TemporalMatch};
    use crate::schedule::ScheduleRepository;
    use crate::testutil;

    fn fixture_match(block: Arc<Block>) -> TemporalMatch {
        TemporalMatch {
            spatial: SpatialMatch {
                vehicle_id: "v1".into(),
                block: block.clone(),
                indices: Indices {
                    block_id: block.block_id.clone(),
                    trip_index: 0,
                    stop_path_index: 1,
                    segment_index: 0,
                },
                distance_to_segment: 5.0,
                distance_along_segment: 10.0,
            },
            difference: TemporalDifference::new(0),
        }
    }

    #[test]
    fn fresh_state_is_unpredictable() {
        let state = VehicleState::new("v1");
        assert!(!state.is_predictable());
        assert!(state.current_match().is_none());
        assert!(state.block().is_none());
    }

    #[test]
    fn predictable_requires_match_and_block() {
        let repo = testutil::fixture_repository();
        let block = repo.block("weekday", "B1").unwrap();
        let mut state = VehicleState::new("v1");

        // Match without block: not predictable yet
        state.set_match(Some(fixture_match(block.clone())));
        assert!(!state.is_predictable());

        state.set_block(
            Some(block.clone()),
            Some(BlockAssignmentMethod::AvlFeed),
            Some("B1".into()),
            true,
        );
        assert!(state.is_predictable());

        // Clearing the match demotes
        state.set_match(None);
        assert!(!state.is_predictable());
        assert!(state.block().is_some());
    }

    #[test]
    fn clearing_block_demotes() {
        let repo = testutil::fixture_repository();
        let block = repo.block("weekday", "B1").unwrap();
        let mut state = VehicleState::new("v1");
        state.set_match(Some(fixture_match(block.clone())));
        state.set_block(
            Some(block),
            Some(BlockAssignmentMethod::AvlFeed),
            Some("B1".into()),
            true,
        );
        assert!(state.is_predictable());

        state.set_block(
            None,
            Some(BlockAssignmentMethod::AssignmentTerminated),
            None,
            false,
        );
        assert!(!state.is_predictable());
        assert!(state.block().is_none());
    }

    #[test]
    fn report_rotation() {
        let mut state = VehicleState::new("v1");
        let first = testutil::report_at("v1", testutil::monday_at(8, 0, 0), 47.6, -122.30);
        let second = testutil::report_at("v1", testutil::monday_at(8, 1, 0), 47.6, -122.29);
        state.set_avl_report(first.clone());
        assert!(state.previous_report().is_none());
        state.set_avl_report(second.clone());
        assert_eq!(state.previous_report().unwrap().time, first.time);
        assert_eq!(state.avl_report().unwrap().time, second.time);
    }

    #[test]
    fn new_assignment_detection() {
        let mut state = VehicleState::new("v1");
        let report = testutil::block_report("v1", testutil::monday_at(8, 0, 0), 47.6, -122.30);
        assert!(state.has_new_assignment(&report));

        let repo = testutil::fixture_repository();
        let block = repo.block("weekday", "B1").unwrap();
        state.set_match(Some(fixture_match(block.clone())));
        state.set_block(
            Some(block),
            Some(BlockAssignmentMethod::AvlFeed),
            Some("B1".into()),
            true,
        );
        assert!(!state.has_new_assignment(&report));

        let other = testutil::report_at("v1", testutil::monday_at(8, 5, 0), 47.6, -122.30)
            .with_assignment("B2", crate::avl::AssignmentType::BlockId);
        assert!(state.has_new_assignment(&other));
    }

    #[tokio::test]
    async fn store_creates_lazily_and_snapshots() {
        let store = VehicleStateStore::new();
        assert!(store.snapshot("v1").await.is_none());

        let handle = store.vehicle("v1").await;
        {
            let mut state = handle.lock().await;
            state.set_avl_report(testutil::report_at(
                "v1",
                testutil::monday_at(8, 0, 0),
                47.6,
                -122.30,
            ));
        }

        let snapshot = store.snapshot("v1").await.unwrap();
        assert_eq!(snapshot.vehicle_id, "v1");
        assert!(snapshot.avl_report().is_some());
        assert_eq!(store.vehicle_ids().await, vec!["v1".to_string()]);
    }
}
