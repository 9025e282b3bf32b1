use std::path::Path;

use serde::Deserialize;

use crate::error::CoreError;

/// Tuning knobs for the matching core.
///
/// All durations are in seconds, all distances in meters. Every field has a
/// default so a config file only needs to name the options it changes.
#[derive(Debug, Clone, Deserialize)]
pub struct CoreConfig {
    /// Maximum perpendicular distance from a GPS fix to a route segment for
    /// the segment to qualify as a spatial candidate (default: 60 m)
    #[serde(default = "CoreConfig::default_spatial_acceptance_radius_m")]
    pub spatial_acceptance_radius_m: f64,
    /// How many stop paths ahead of the previous match the warm search
    /// examines, crossing trip boundaries within the block (default: 4)
    #[serde(default = "CoreConfig::default_warm_lookahead_paths")]
    pub warm_lookahead_paths: usize,
    /// How many stop paths behind the previous match the warm search still
    /// examines, so GPS noise near a stop can regress by a bounded amount
    /// (default: 1)
    #[serde(default = "CoreConfig::default_warm_lookback_paths")]
    pub warm_lookback_paths: usize,
    /// Maximum amount a candidate may be ahead of schedule (or ahead of the
    /// expected progress since the previous match) and still be accepted
    /// (default: 900 s)
    #[serde(default = "CoreConfig::default_allowable_early_secs")]
    pub allowable_early_secs: i64,
    /// Maximum amount a candidate may be behind schedule and still be
    /// accepted (default: 1200 s)
    #[serde(default = "CoreConfig::default_allowable_late_secs")]
    pub allowable_late_secs: i64,
    /// Separate early tolerance for the real-time schedule-adherence check
    /// that forces a re-match (default: 900 s)
    #[serde(default = "CoreConfig::default_adherence_early_secs")]
    pub adherence_early_secs: i64,
    /// Separate late tolerance for the real-time schedule-adherence check
    /// (default: 1800 s)
    #[serde(default = "CoreConfig::default_adherence_late_secs")]
    pub adherence_late_secs: i64,
    /// A predictable vehicle whose last report is older than this, relative
    /// to the incoming report's own timestamp, is demoted (default: 360 s)
    #[serde(default = "CoreConfig::default_vehicle_timeout_secs")]
    pub vehicle_timeout_secs: i64,
    /// How far before its scheduled start / after its scheduled end a trip is
    /// still considered currently active (default: 1800 s)
    #[serde(default = "CoreConfig::default_active_trip_window_secs")]
    pub active_trip_window_secs: i64,
    /// When true the layover fallback is tried even if a weak spatial or
    /// temporal candidate exists; when false (the default) it is only used
    /// once no candidate is acceptable
    #[serde(default)]
    pub prefer_layover_fallback: bool,
    /// Capacity of the bounded Kalman error cache (default: 100_000 entries)
    #[serde(default = "CoreConfig::default_error_cache_capacity")]
    pub error_cache_capacity: usize,
    /// Gain applied when folding an observed schedule deviation into the
    /// per-location error variance (default: 0.2)
    #[serde(default = "CoreConfig::default_error_filter_gain")]
    pub error_filter_gain: f64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            spatial_acceptance_radius_m: Self::default_spatial_acceptance_radius_m(),
            warm_lookahead_paths: Self::default_warm_lookahead_paths(),
            warm_lookback_paths: Self::default_warm_lookback_paths(),
            allowable_early_secs: Self::default_allowable_early_secs(),
            allowable_late_secs: Self::default_allowable_late_secs(),
            adherence_early_secs: Self::default_adherence_early_secs(),
            adherence_late_secs: Self::default_adherence_late_secs(),
            vehicle_timeout_secs: Self::default_vehicle_timeout_secs(),
            active_trip_window_secs: Self::default_active_trip_window_secs(),
            prefer_layover_fallback: false,
            error_cache_capacity: Self::default_error_cache_capacity(),
            error_filter_gain: Self::default_error_filter_gain(),
        }
    }
}

impl CoreConfig {
    fn default_spatial_acceptance_radius_m() -> f64 {
        60.0
    }
    fn default_warm_lookahead_paths() -> usize {
        4
    }
    fn default_warm_lookback_paths() -> usize {
        1
    }
    fn default_allowable_early_secs() -> i64 {
        900
    }
    fn default_allowable_late_secs() -> i64 {
        1200
    }
    fn default_adherence_early_secs() -> i64 {
        900
    }
    fn default_adherence_late_secs() -> i64 {
        1800
    }
    fn default_vehicle_timeout_secs() -> i64 {
        360
    }
    fn default_active_trip_window_secs() -> i64 {
        1800
    }
    fn default_error_cache_capacity() -> usize {
        100_000
    }
    fn default_error_filter_gain() -> f64 {
        0.2
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| CoreError::ConfigRead(e.to_string()))?;

        serde_yaml::from_str(&content).map_err(|e| CoreError::ConfigParse(e.to_string()))
    }
}
