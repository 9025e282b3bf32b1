//! Small geographic helpers used by the spatial matcher.
//!
//! Distances are computed in meters on a local equirectangular projection
//! around the segment, which is plenty accurate at the sub-kilometer scale
//! of stop-path segments.

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A WGS84 coordinate.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

impl Location {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// Great-circle distance between two points in meters.
pub fn haversine_distance(a: Location, b: Location) -> f64 {
    let lat1_rad = a.lat.to_radians();
    let lat2_rad = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lon = (b.lon - a.lon).to_radians();

    let h = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().asin();

    EARTH_RADIUS_M * c
}

/// Result of projecting a GPS fix onto a single segment.
#[derive(Debug, Clone, Copy)]
pub struct SegmentProjection {
    /// Perpendicular distance from the fix to the segment, in meters
    pub distance_to_segment: f64,
    /// Distance traveled along the segment to the projected point, clamped
    /// to [0, segment length], in meters
    pub distance_along_segment: f64,
}

/// Projects `fix` onto the segment from `start` to `end`.
pub fn project_onto_segment(fix: Location, start: Location, end: Location) -> SegmentProjection {
    // Local flat projection centered on the segment start.
    let cos_lat = start.lat.to_radians().cos();
    let to_xy = |p: Location| {
        (
            (p.lon - start.lon).to_radians() * cos_lat * EARTH_RADIUS_M,
            (p.lat - start.lat).to_radians() * EARTH_RADIUS_M,
        )
    };

    let (px, py) = to_xy(fix);
    let (ex, ey) = to_xy(end);

    let seg_len_sq = ex * ex + ey * ey;
    if seg_len_sq == 0.0 {
        // Degenerate segment, distance is simply point-to-point
        return SegmentProjection {
            distance_to_segment: (px * px + py * py).sqrt(),
            distance_along_segment: 0.0,
        };
    }

    let t = ((px * ex + py * ey) / seg_len_sq).clamp(0.0, 1.0);
    let (cx, cy) = (t * ex, t * ey);
    let (dx, dy) = (px - cx, py - cy);

    SegmentProjection {
        distance_to_segment: (dx * dx + dy * dy).sqrt(),
        distance_along_segment: t * seg_len_sq.sqrt(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_zero_for_same_point() {
        let p = Location::new(47.6, -122.3);
        assert!(haversine_distance(p, p) < 1e-6);
    }

    #[test]
    fn haversine_one_degree_latitude() {
        let a = Location::new(47.0, -122.3);
        let b = Location::new(48.0, -122.3);
        let d = haversine_distance(a, b);
        // One degree of latitude is about 111.2 km
        assert!((d - 111_195.0).abs() < 500.0, "got {d}");
    }

    #[test]
    fn projection_onto_midpoint() {
        // Segment running due east, fix slightly north of its midpoint
        let start = Location::new(47.6000, -122.3000);
        let end = Location::new(47.6000, -122.2900);
        let seg_len = haversine_distance(start, end);

        let fix = Location::new(47.6003, -122.2950);
        let proj = project_onto_segment(fix, start, end);

        assert!((proj.distance_along_segment - seg_len / 2.0).abs() < 5.0);
        // 0.0003 deg latitude is about 33 m
        assert!((proj.distance_to_segment - 33.0).abs() < 3.0);
    }

    #[test]
    fn projection_clamps_before_start() {
        let start = Location::new(47.6000, -122.3000);
        let end = Location::new(47.6000, -122.2900);
        let fix = Location::new(47.6000, -122.3050);

        let proj = project_onto_segment(fix, start, end);
        assert_eq!(proj.distance_along_segment, 0.0);
        // Clamped to the start point, so distance is fix-to-start
        assert!((proj.distance_to_segment - haversine_distance(fix, start)).abs() < 2.0);
    }

    #[test]
    fn projection_clamps_past_end() {
        let start = Location::new(47.6000, -122.3000);
        let end = Location::new(47.6000, -122.2900);
        let seg_len = haversine_distance(start, end);
        let fix = Location::new(47.6000, -122.2850);

        let proj = project_onto_segment(fix, start, end);
        assert!((proj.distance_along_segment - seg_len).abs() < 2.0);
    }

    #[test]
    fn degenerate_segment() {
        let p = Location::new(47.6, -122.3);
        let fix = Location::new(47.6001, -122.3);
        let proj = project_onto_segment(fix, p, p);
        assert_eq!(proj.distance_along_segment, 0.0);
        assert!(proj.distance_to_segment > 10.0);
    }
}
