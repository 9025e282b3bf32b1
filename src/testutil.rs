//! Shared schedule fixtures for unit tests.
//!
//! One weekday block `B1` with two trips along a straight east-west street
//! at latitude 47.6: `T1` runs east 08:00-08:30, `T2` returns west
//! 08:45-09:15 after a layover at the far terminal.

use std::sync::{Arc, Once};

use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use crate::avl::{AssignmentType, AvlReport};
use crate::geo::Location;
use crate::schedule::{
    Block, InMemoryScheduleRepository, ServiceCalendar, StopPath, Trip,
};

static TRACING: Once = Once::new();

/// Installs a test-writer tracing subscriber once per process. Honors
/// `RUST_LOG` for debugging individual tests.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Longitudes of the four stops, west to east. Roughly 340 m between
/// consecutive points at this latitude.
pub const STOP_LONS: [f64; 4] = [-122.3000, -122.2910, -122.2820, -122.2730];
pub const ROUTE_LAT: f64 = 47.6000;

fn point(lon: f64) -> Location {
    Location::new(ROUTE_LAT, lon)
}

/// A stop path from `from_lon` to `to_lon` with a midpoint, so each path has
/// two segments.
fn path(stop_id: &str, from_lon: f64, to_lon: f64, arrival_secs: i64) -> StopPath {
    StopPath {
        stop_id: stop_id.into(),
        points: vec![point(from_lon), point((from_lon + to_lon) / 2.0), point(to_lon)],
        arrival_secs,
        departure_secs: None,
        wait_stop: false,
    }
}

/// The degenerate first path of a trip: just the wait stop itself.
fn wait_path(stop_id: &str, lon: f64, arrival_secs: i64, departure_secs: i64) -> StopPath {
    StopPath {
        stop_id: stop_id.into(),
        points: vec![point(lon)],
        arrival_secs,
        departure_secs: Some(departure_secs),
        wait_stop: true,
    }
}

pub fn trip_t1() -> Trip {
    Trip {
        trip_id: "T1".into(),
        short_name: Some("10".into()),
        route_id: "R1".into(),
        headsign: Some("Eastside".into()),
        stop_paths: vec![
            wait_path("S0", STOP_LONS[0], 8 * 3600, 8 * 3600),
            path("S1", STOP_LONS[0], STOP_LONS[1], 8 * 3600 + 600),
            path("S2", STOP_LONS[1], STOP_LONS[2], 8 * 3600 + 1200),
            path("S3", STOP_LONS[2], STOP_LONS[3], 8 * 3600 + 1800),
        ],
    }
}

pub fn trip_t2() -> Trip {
    Trip {
        trip_id: "T2".into(),
        short_name: Some("11".into()),
        route_id: "R1".into(),
        headsign: Some("Westside".into()),
        stop_paths: vec![
            wait_path("S3", STOP_LONS[3], 8 * 3600 + 2400, 8 * 3600 + 2700),
            path("S2", STOP_LONS[3], STOP_LONS[2], 8 * 3600 + 3300),
            path("S1", STOP_LONS[2], STOP_LONS[1], 8 * 3600 + 3900),
            path("S0", STOP_LONS[1], STOP_LONS[0], 8 * 3600 + 4500),
        ],
    }
}

pub fn fixture_repository() -> InMemoryScheduleRepository {
    let mut repo = InMemoryScheduleRepository::new(chrono_tz::UTC);
    repo.add_calendar(ServiceCalendar {
        service_id: "weekday".into(),
        days: [true, true, true, true, true, false, false],
        start_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
        end_date: NaiveDate::from_ymd_opt(2026, 12, 31).unwrap(),
    });
    repo.add_calendar(ServiceCalendar {
        service_id: "weekend".into(),
        days: [false, false, false, false, false, true, true],
        start_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
        end_date: NaiveDate::from_ymd_opt(2026, 12, 31).unwrap(),
    });
    repo.add_block(Block {
        block_id: "B1".into(),
        service_id: "weekday".into(),
        trips: vec![Arc::new(trip_t1()), Arc::new(trip_t2())],
    });
    repo
}

/// A `Utc` instant for the given wall-clock time in the repository's
/// timezone.
pub fn local_time(
    repo: &InMemoryScheduleRepository,
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    min: u32,
    sec: u32,
) -> DateTime<Utc> {
    use crate::schedule::ScheduleRepository;
    repo.timezone()
        .with_ymd_and_hms(year, month, day, hour, min, sec)
        .unwrap()
        .with_timezone(&Utc)
}

/// Monday 2026-03-02 at the given time of day, the fixture's service day.
pub fn monday_at(hour: u32, min: u32, sec: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, hour, min, sec).unwrap()
}

pub fn report_at(vehicle_id: &str, time: DateTime<Utc>, lat: f64, lon: f64) -> AvlReport {
    AvlReport::new(vehicle_id, time, lat, lon, "test-feed")
}

pub fn block_report(vehicle_id: &str, time: DateTime<Utc>, lat: f64, lon: f64) -> AvlReport {
    report_at(vehicle_id, time, lat, lon).with_assignment("B1", AssignmentType::BlockId)
}
