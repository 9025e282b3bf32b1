//! Keyed statistical caches consumed by downstream prediction generation.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Utc};
use lru::LruCache;

use crate::matching::Indices;

/// Narrow interface over the error-estimate store so the backing
/// implementation is swappable without touching matching logic.
///
/// `None` means "no estimate" whether the entry was never written or was
/// evicted under memory pressure; callers must not distinguish the two.
pub trait ErrorCache: Send + Sync {
    fn error_value(&self, indices: &Indices) -> Option<f64>;
    fn set_error_value(&self, indices: Indices, value: f64);
    fn keys(&self) -> Vec<Indices>;
}

const SHARDS: usize = 16;

/// Bounded per-Indices store of Kalman-filter error variance.
///
/// Sharded by key hash so independently-keyed writers from different
/// vehicles do not contend on one lock. Entries are evicted LRU per shard
/// when the capacity is exceeded.
pub struct KalmanErrorCache {
    shards: Vec<Mutex<LruCache<Indices, f64>>>,
}

impl KalmanErrorCache {
    pub fn new(capacity: usize) -> Self {
        let per_shard = NonZeroUsize::new((capacity / SHARDS).max(1))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            shards: (0..SHARDS)
                .map(|_| Mutex::new(LruCache::new(per_shard)))
                .collect(),
        }
    }

    fn shard(&self, indices: &Indices) -> &Mutex<LruCache<Indices, f64>> {
        let mut hasher = DefaultHasher::new();
        indices.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARDS]
    }

    /// Folds an observed error into the stored estimate with the given
    /// filter gain; the first observation seeds the estimate directly.
    pub fn fold_observation(&self, indices: Indices, observed: f64, gain: f64) {
        let mut shard = self.shard(&indices).lock().expect("error cache poisoned");
        let value = match shard.get(&indices) {
            Some(old) => old + gain * (observed - old),
            None => observed,
        };
        shard.put(indices, value);
    }
}

impl ErrorCache for KalmanErrorCache {
    fn error_value(&self, indices: &Indices) -> Option<f64> {
        self.shard(indices)
            .lock()
            .expect("error cache poisoned")
            .get(indices)
            .copied()
    }

    fn set_error_value(&self, indices: Indices, value: f64) {
        self.shard(&indices)
            .lock()
            .expect("error cache poisoned")
            .put(indices, value);
    }

    fn keys(&self) -> Vec<Indices> {
        self.shards
            .iter()
            .flat_map(|shard| {
                shard
                    .lock()
                    .expect("error cache poisoned")
                    .iter()
                    .map(|(k, _)| k.clone())
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

/// One downstream-produced arrival prediction, kept only so it can be
/// withdrawn when its vehicle stops being predictable.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub vehicle_id: String,
    pub trip_id: String,
    pub stop_id: String,
    pub predicted_time: DateTime<Utc>,
}

/// Per-vehicle registry of the predictions currently published downstream.
#[derive(Debug, Default)]
pub struct PredictionCache {
    inner: RwLock<HashMap<String, Vec<Prediction>>>,
}

impl PredictionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_predictions(&self, vehicle_id: &str, predictions: Vec<Prediction>) {
        self.inner
            .write()
            .expect("prediction cache poisoned")
            .insert(vehicle_id.to_string(), predictions);
    }

    pub fn predictions(&self, vehicle_id: &str) -> Vec<Prediction> {
        self.inner
            .read()
            .expect("prediction cache poisoned")
            .get(vehicle_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Withdraws a vehicle's predictions, e.g. when it is demoted to
    /// unpredictable.
    pub fn remove_predictions(&self, vehicle_id: &str) {
        self.inner
            .write()
            .expect("prediction cache poisoned")
            .remove(vehicle_id);
    }
}
