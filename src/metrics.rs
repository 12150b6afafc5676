//! Shared counter/snapshot machinery (spec §4.4, §6).
//!
//! The spec asks for metrics "exposed as a plain map", not a scrape
//! endpoint, so this is a small atomic counter struct with a
//! `serde_json::Value` snapshot rather than a `prometheus` registry.

use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn incr(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A running-total timer, storing accumulated microseconds.
#[derive(Debug, Default)]
pub struct TimerAccumulator(AtomicU64);

impl TimerAccumulator {
    pub fn record(&self, d: Duration) {
        self.0.fetch_add(d.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn total(&self) -> Duration {
        Duration::from_micros(self.0.load(Ordering::Relaxed))
    }
}

/// Data-pipeline metrics (spec §4.4): operation counts, per-stage timing,
/// bytes/objects processed, and a per-error-kind counter.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    pub operations_total: Counter,
    pub operations_successful: Counter,
    pub operations_failed: Counter,
    pub total_time: TimerAccumulator,
    pub serialization_time: TimerAccumulator,
    pub validation_time: TimerAccumulator,
    pub adaptation_time: TimerAccumulator,
    pub conversion_time: TimerAccumulator,
    pub bytes_processed: Counter,
    pub objects_processed: Counter,
    errors_by_kind: std::sync::Mutex<HashMap<&'static str, u64>>,
}

impl PipelineMetrics {
    pub fn record_success(&self, total: Duration, bytes: u64, objects: u64) {
        self.operations_total.incr();
        self.operations_successful.incr();
        self.total_time.record(total);
        self.bytes_processed.add(bytes);
        self.objects_processed.add(objects);
    }

    pub fn record_failure(&self, total: Duration, error_kind: &'static str) {
        self.operations_total.incr();
        self.operations_failed.incr();
        self.total_time.record(total);
        let mut errors = self.errors_by_kind.lock().expect("errors_by_kind mutex poisoned");
        *errors.entry(error_kind).or_insert(0) += 1;
    }

    pub fn snapshot(&self) -> Value {
        let errors = self.errors_by_kind.lock().expect("errors_by_kind mutex poisoned");
        let errors_json: Map<String, Value> = errors.iter().map(|(k, v)| ((*k).to_string(), json!(v))).collect();
        json!({
            "operations_total": self.operations_total.get(),
            "operations_successful": self.operations_successful.get(),
            "operations_failed": self.operations_failed.get(),
            "total_time_ms": self.total_time.total().as_secs_f64() * 1000.0,
            "serialization_time_ms": self.serialization_time.total().as_secs_f64() * 1000.0,
            "validation_time_ms": self.validation_time.total().as_secs_f64() * 1000.0,
            "adaptation_time_ms": self.adaptation_time.total().as_secs_f64() * 1000.0,
            "conversion_time_ms": self.conversion_time.total().as_secs_f64() * 1000.0,
            "bytes_processed": self.bytes_processed.get(),
            "objects_processed": self.objects_processed.get(),
            "errors_by_kind": errors_json,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reports_recorded_operations() {
        let m = PipelineMetrics::default();
        m.record_success(Duration::from_millis(5), 128, 1);
        m.record_failure(Duration::from_millis(1), "validation");
        let snap = m.snapshot();
        assert_eq!(snap["operations_total"], 2);
        assert_eq!(snap["operations_successful"], 1);
        assert_eq!(snap["operations_failed"], 1);
        assert_eq!(snap["errors_by_kind"]["validation"], 1);
    }
}
