//! Compute/detection result store.
//!
//! Vision engines publish their latest result per source key; events and the
//! track action read it. The scheduler never writes here.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use tokio::time::Instant;

/// One detected object. Offsets are normalized to `[-1, 1]` from the image
/// center (positive x right, positive y down).
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub class: String,
    pub confidence: f64,
    pub offset_x: f64,
    pub offset_y: f64,
}

impl Detection {
    pub fn new(class: impl Into<String>, confidence: f64) -> Self {
        Self {
            class: class.into(),
            confidence,
            offset_x: 0.0,
            offset_y: 0.0,
        }
    }

    pub fn at(mut self, offset_x: f64, offset_y: f64) -> Self {
        self.offset_x = offset_x;
        self.offset_y = offset_y;
        self
    }
}

/// Latest output of one compute engine.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputeResult {
    pub detections: Vec<Detection>,
    pub stamp: Instant,
}

impl ComputeResult {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self {
            detections,
            stamp: Instant::now(),
        }
    }

    /// Highest-confidence detection of `class` at or above `min_confidence`.
    pub fn best(&self, class: &str, min_confidence: f64) -> Option<&Detection> {
        self.detections
            .iter()
            .filter(|d| d.class == class && d.confidence >= min_confidence)
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
    }

    pub fn age(&self) -> Duration {
        self.stamp.elapsed()
    }
}

/// Read access to compute results, keyed by source (e.g. a camera name).
pub trait ResultStore: Send + Sync {
    fn get_result(&self, key: &str) -> Option<ComputeResult>;
    fn clear_result(&self, key: &str);
}

/// In-process store fed by `publish`.
#[derive(Debug, Default)]
pub struct MemoryResultStore {
    results: RwLock<HashMap<String, ComputeResult>>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the latest result for `key`.
    pub fn publish(&self, key: impl Into<String>, result: ComputeResult) {
        let mut results = match self.results.write() {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        };
        results.insert(key.into(), result);
    }
}

impl ResultStore for MemoryResultStore {
    fn get_result(&self, key: &str) -> Option<ComputeResult> {
        let results = match self.results.read() {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        };
        results.get(key).cloned()
    }

    fn clear_result(&self, key: &str) {
        let mut results = match self.results.write() {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        };
        results.remove(key);
    }
}
