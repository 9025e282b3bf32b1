use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How the raw assignment field of an AVL report should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentType {
    BlockId,
    TripId,
    TripShortName,
    /// A route hint only; never resolves to a block
    RouteId,
    /// The feed provided no assignment information
    Unset,
}

/// One GPS fix from one vehicle, as handed over by feed ingestion.
///
/// Immutable once constructed; the engine only ever reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvlReport {
    pub vehicle_id: String,
    pub time: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
    /// Heading in degrees clockwise from north, if the feed provides it
    pub heading: Option<f32>,
    /// Speed in m/s, if the feed provides it
    pub speed: Option<f32>,
    /// Raw assignment id from the feed, interpreted per `assignment_type`
    pub assignment_id: Option<String>,
    pub assignment_type: AssignmentType,
    /// Name of the feed the report came from, for diagnostics
    pub source: String,
}

impl AvlReport {
    pub fn new(
        vehicle_id: impl Into<String>,
        time: DateTime<Utc>,
        lat: f64,
        lon: f64,
        source: impl Into<String>,
    ) -> Self {
        Self {
            vehicle_id: vehicle_id.into(),
            time,
            lat,
            lon,
            heading: None,
            speed: None,
            assignment_id: None,
            assignment_type: AssignmentType::Unset,
            source: source.into(),
        }
    }

    pub fn with_assignment(
        mut self,
        assignment_id: impl Into<String>,
        assignment_type: AssignmentType,
    ) -> Self {
        self.assignment_id = Some(assignment_id.into());
        self.assignment_type = assignment_type;
        self
    }

    /// Whether the report carries an assignment that could resolve to a
    /// block. A route-id assignment is only a hint, so it does not count.
    pub fn has_valid_assignment(&self) -> bool {
        self.assignment_id.is_some()
            && matches!(
                self.assignment_type,
                AssignmentType::BlockId | AssignmentType::TripId | AssignmentType::TripShortName
            )
    }
}
