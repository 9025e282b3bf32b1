//! In-memory schedule model and the read-only repository the matching core
//! consumes: blocks, trips, stop paths, and the service-day calendar.
//!
//! The repository is keyed by service-day identifiers. How the data gets
//! here (GTFS load, database, ...) is a loader concern outside the core.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use chrono_tz::Tz;

use crate::geo::Location;

/// Seconds in a service day; scheduled times can exceed this for trips
/// crossing midnight.
pub const SECS_PER_DAY: i64 = 86_400;

/// A geometric leg ending at a stop, with its scheduled time.
///
/// `points` trace the route geometry from the previous stop to this one and
/// are subdivided into segments (consecutive point pairs) for fine-grained
/// matching.
#[derive(Debug, Clone)]
pub struct StopPath {
    pub stop_id: String,
    pub points: Vec<Location>,
    /// Scheduled arrival at this path's stop, seconds into the service day
    /// (can exceed 86400 for trips crossing midnight)
    pub arrival_secs: i64,
    /// Scheduled departure from this path's stop, where it differs from the
    /// arrival (timepoints, wait stops)
    pub departure_secs: Option<i64>,
    /// Whether a vehicle is expected to idle at this stop until the
    /// scheduled departure (layovers, terminals)
    pub wait_stop: bool,
}

impl StopPath {
    /// Number of segments the path is subdivided into. A degenerate path
    /// with fewer than two points still counts as one zero-length segment.
    pub fn segment_count(&self) -> usize {
        self.points.len().saturating_sub(1).max(1)
    }

    /// Endpoint pair for segment `i`.
    pub fn segment(&self, i: usize) -> (Location, Location) {
        if self.points.len() < 2 {
            let p = self.points[0];
            return (p, p);
        }
        (self.points[i], self.points[i + 1])
    }

    /// Total path length in meters.
    pub fn length(&self) -> f64 {
        self.points
            .windows(2)
            .map(|w| crate::geo::haversine_distance(w[0], w[1]))
            .sum()
    }

    /// Length of the segments before segment `i`, in meters.
    pub fn length_before_segment(&self, i: usize) -> f64 {
        self.points
            .windows(2)
            .take(i)
            .map(|w| crate::geo::haversine_distance(w[0], w[1]))
            .sum()
    }

    pub fn departure_or_arrival_secs(&self) -> i64 {
        self.departure_secs.unwrap_or(self.arrival_secs)
    }
}

/// One scheduled run: ordered stop paths plus identity. Immutable and shared
/// across vehicles via `Arc`.
#[derive(Debug, Clone)]
pub struct Trip {
    pub trip_id: String,
    pub short_name: Option<String>,
    pub route_id: String,
    pub headsign: Option<String>,
    pub stop_paths: Vec<StopPath>,
}

impl Trip {
    /// Scheduled start: the departure from the first stop.
    pub fn start_time_secs(&self) -> i64 {
        self.stop_paths
            .first()
            .map(|p| p.departure_or_arrival_secs())
            .unwrap_or(0)
    }

    /// Scheduled end: the arrival at the last stop.
    pub fn end_time_secs(&self) -> i64 {
        self.stop_paths.last().map(|p| p.arrival_secs).unwrap_or(0)
    }

    /// Scheduled time, in seconds into the service day, at the given
    /// fraction along stop path `stop_path_index`. Interpolates between the
    /// departure from the previous stop and the arrival at this path's stop.
    pub fn scheduled_time_at(&self, stop_path_index: usize, fraction: f64) -> i64 {
        let end = self.stop_paths[stop_path_index].arrival_secs;
        let start = if stop_path_index == 0 {
            end
        } else {
            self.stop_paths[stop_path_index - 1].departure_or_arrival_secs()
        };
        start + ((end - start) as f64 * fraction.clamp(0.0, 1.0)).round() as i64
    }
}

/// A vehicle's full scheduled service for one service day: an ordered
/// sequence of trips. Loaded once per service day, immutable during the day.
#[derive(Debug, Clone)]
pub struct Block {
    pub block_id: String,
    pub service_id: String,
    pub trips: Vec<Arc<Trip>>,
}

impl Block {
    /// Offset of the trip within the block, if it belongs to this block.
    pub fn trip_index(&self, trip_id: &str) -> Option<usize> {
        self.trips.iter().position(|t| t.trip_id == trip_id)
    }
}

/// A service calendar entry: which weekdays a service id runs, over a date
/// range. Days are ordered Mon..Sun.
#[derive(Debug, Clone)]
pub struct ServiceCalendar {
    pub service_id: String,
    pub days: [bool; 7],
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl ServiceCalendar {
    pub fn active_on(&self, date: NaiveDate) -> bool {
        date >= self.start_date
            && date <= self.end_date
            && self.days[date.weekday().num_days_from_monday() as usize]
    }
}

/// Read-only provider of schedule data, keyed by service day.
///
/// Lookups that find nothing return `None`; the repository never errors for
/// "not found". Implementations must support concurrent readers.
pub trait ScheduleRepository: Send + Sync {
    /// Agency timezone, used to derive service days from report timestamps.
    fn timezone(&self) -> Tz;

    /// Service ids plausibly valid for the given instant: the local date's
    /// services plus the previous date's, so an after-midnight report can
    /// still resolve a block from the prior service day.
    fn service_ids_for(&self, time: DateTime<Utc>) -> Vec<String>;

    fn blocks_for(&self, service_id: &str) -> Vec<Arc<Block>>;

    fn block(&self, service_id: &str, block_id: &str) -> Option<Arc<Block>>;

    fn trip(&self, trip_id: &str) -> Option<Arc<Trip>>;

    fn trip_by_short_name(&self, short_name: &str) -> Option<Arc<Trip>>;

    /// The parent block of the given trip for the current schedule, if any.
    fn block_for_trip(&self, trip_id: &str) -> Option<Arc<Block>>;
}

/// Seconds into the service day for an instant, in the given timezone.
///
/// Returns both the plain local seconds-since-midnight and the same value
/// shifted by one day, so a 00:30 report can match a 24:30 scheduled time on
/// the previous service day.
pub fn secs_into_day_candidates(time: DateTime<Utc>, tz: Tz) -> [i64; 2] {
    let local = time.with_timezone(&tz);
    let secs = local.num_seconds_from_midnight() as i64;
    [secs, secs + SECS_PER_DAY]
}

/// Trips of a block whose scheduled span, padded by `window_secs` on both
/// sides, contains the report time. Returned in block order.
pub fn active_trips(
    block: &Block,
    time: DateTime<Utc>,
    tz: Tz,
    window_secs: i64,
) -> Vec<Arc<Trip>> {
    let candidates = secs_into_day_candidates(time, tz);
    block
        .trips
        .iter()
        .filter(|trip| {
            let start = trip.start_time_secs() - window_secs;
            let end = trip.end_time_secs() + window_secs;
            candidates.iter().any(|&s| s >= start && s <= end)
        })
        .cloned()
        .collect()
}

/// Simple owned implementation of [`ScheduleRepository`] backed by hash maps.
#[derive(Debug)]
pub struct InMemoryScheduleRepository {
    tz: Tz,
    calendars: Vec<ServiceCalendar>,
    /// (service_id, block_id) -> block
    blocks: HashMap<(String, String), Arc<Block>>,
    trips: HashMap<String, Arc<Trip>>,
    /// trip short name -> trip id
    short_names: HashMap<String, String>,
    /// trip id -> (service_id, block_id) of its parent block
    trip_blocks: HashMap<String, (String, String)>,
}

impl InMemoryScheduleRepository {
    pub fn new(tz: Tz) -> Self {
        Self {
            tz,
            calendars: Vec::new(),
            blocks: HashMap::new(),
            trips: HashMap::new(),
            short_names: HashMap::new(),
            trip_blocks: HashMap::new(),
        }
    }

    pub fn add_calendar(&mut self, calendar: ServiceCalendar) {
        self.calendars.push(calendar);
    }

    /// Registers a block and indexes its trips for direct lookup.
    pub fn add_block(&mut self, block: Block) {
        let block = Arc::new(block);
        for trip in &block.trips {
            self.trips.insert(trip.trip_id.clone(), trip.clone());
            if let Some(short_name) = &trip.short_name {
                self.short_names
                    .insert(short_name.clone(), trip.trip_id.clone());
            }
            self.trip_blocks.insert(
                trip.trip_id.clone(),
                (block.service_id.clone(), block.block_id.clone()),
            );
        }
        self.blocks.insert(
            (block.service_id.clone(), block.block_id.clone()),
            block,
        );
    }
}

impl ScheduleRepository for InMemoryScheduleRepository {
    fn timezone(&self) -> Tz {
        self.tz
    }

    fn service_ids_for(&self, time: DateTime<Utc>) -> Vec<String> {
        let local_date = time.with_timezone(&self.tz).date_naive();
        let mut ids = Vec::new();
        for date in [local_date, local_date.pred_opt().unwrap_or(local_date)] {
            for calendar in &self.calendars {
                if calendar.active_on(date) && !ids.contains(&calendar.service_id) {
                    ids.push(calendar.service_id.clone());
                }
            }
        }
        ids
    }

    fn blocks_for(&self, service_id: &str) -> Vec<Arc<Block>> {
        self.blocks
            .iter()
            .filter(|((service, _), _)| service == service_id)
            .map(|(_, block)| block.clone())
            .collect()
    }

    fn block(&self, service_id: &str, block_id: &str) -> Option<Arc<Block>> {
        self.blocks
            .get(&(service_id.to_string(), block_id.to_string()))
            .cloned()
    }

    fn trip(&self, trip_id: &str) -> Option<Arc<Trip>> {
        self.trips.get(trip_id).cloned()
    }

    fn trip_by_short_name(&self, short_name: &str) -> Option<Arc<Trip>> {
        self.short_names
            .get(short_name)
            .and_then(|trip_id| self.trips.get(trip_id))
            .cloned()
    }

    fn block_for_trip(&self, trip_id: &str) -> Option<Arc<Block>> {
        let (service_id, block_id) = self.trip_blocks.get(trip_id)?;
        self.blocks
            .get(&(service_id.clone(), block_id.clone()))
            .cloned()
    }
}
