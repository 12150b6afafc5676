//! Data pipeline (C4, spec §4.4).
//!
//! Composes C1 (serialize/deserialize), C2 (protocol adaptation), and C3
//! (schema validation) into `process_outbound`/`process_inbound`, timing
//! each stage into a shared [`PipelineMetrics`]. Mirrors the stage order
//! `original_source`'s `DataPipeline.process_outbound`/`process_inbound`
//! use: validate -> adapt -> serialize outbound; deserialize -> adapt ->
//! convert -> validate inbound.

use crate::adapters::AdapterRegistry;
use crate::config::{PipelineConfig, ProtocolVersion};
use crate::error::BlackholioError;
use crate::metrics::PipelineMetrics;
use crate::models::{Circle, Entity, Player};
use crate::schema;
use serde_json::{json, Value};
use std::time::Instant;

/// Attempts to deserialize `value` into the canonical typed model for
/// `type_name`, the inbound pipeline's step `(4)`. Types the pipeline does
/// not have a canonical struct for (e.g. raw `food`/`config` rows) pass
/// through unconverted.
fn convert_to_typed(type_name: &str, value: &Value) -> Result<(), BlackholioError> {
    match type_name {
        "Entity" => serde_json::from_value::<Entity>(value.clone())
            .map(|_| ())
            .map_err(|e| BlackholioError::data_validation(format!("cannot convert to Entity: {e}"), type_name)),
        "Player" => serde_json::from_value::<Player>(value.clone())
            .map(|_| ())
            .map_err(|e| BlackholioError::data_validation(format!("cannot convert to Player: {e}"), type_name)),
        "Circle" => serde_json::from_value::<Circle>(value.clone())
            .map(|_| ())
            .map_err(|e| BlackholioError::data_validation(format!("cannot convert to Circle: {e}"), type_name)),
        _ => Ok(()),
    }
}

/// A single object or a homogeneous list, the two shapes `process_outbound`
/// accepts (spec §4.4).
pub enum Payload {
    Single(Value),
    List(Vec<Value>),
}

/// Composes the wire codec, protocol adapters, and schema validator behind
/// a single pair of entry points, recording per-stage timing.
pub struct DataPipeline {
    config: PipelineConfig,
    adapters: AdapterRegistry,
    pub metrics: PipelineMetrics,
}

impl DataPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        DataPipeline {
            config,
            adapters: AdapterRegistry::default(),
            metrics: PipelineMetrics::default(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// `(1)` validate if enabled, `(2)` apply `adapt_to_server`, `(3)`
    /// serialize. A list payload is wrapped in a `{items, count, type,
    /// timestamp}` envelope before serialization.
    pub fn process_outbound(&self, payload: Payload, type_name: &str, now_unix: f64) -> Result<String, BlackholioError> {
        let start = Instant::now();
        let result = self.process_outbound_inner(payload, type_name, now_unix);
        let elapsed = start.elapsed();
        match &result {
            Ok(bytes) => self.metrics.record_success(elapsed, bytes.len() as u64, 1),
            Err(e) => self.metrics.record_failure(elapsed, e.category_static()),
        }
        result
    }

    fn process_outbound_inner(&self, payload: Payload, type_name: &str, now_unix: f64) -> Result<String, BlackholioError> {
        let adapter = self.adapters.get(self.config.server_language, self.config.protocol_version.adapter_version());

        let (objects, is_list) = match payload {
            Payload::Single(v) => (vec![v], false),
            Payload::List(items) => {
                if items.is_empty() {
                    return Err(BlackholioError::data_validation("empty list provided", "payload"));
                }
                (items, true)
            }
        };

        let mut adapted = Vec::with_capacity(objects.len());
        for obj in objects {
            if self.config.validation {
                let validation_start = Instant::now();
                schema::validate(type_name, &obj)?;
                self.metrics.validation_time.record(validation_start.elapsed());
            }

            let item = if self.config.adaptation {
                let adaptation_start = Instant::now();
                let out = adapter.adapt_to_server(&obj, type_name);
                self.metrics.adaptation_time.record(adaptation_start.elapsed());
                out
            } else {
                obj
            };
            adapted.push(item);
        }

        let data = if is_list {
            let count = adapted.len();
            json!({
                "items": adapted,
                "count": count,
                "type": type_name,
                "timestamp": now_unix,
            })
        } else {
            adapted.into_iter().next().expect("single payload has exactly one item")
        };

        let serialization_start = Instant::now();
        let serialized = data.to_string();
        self.metrics.serialization_time.record(serialization_start.elapsed());
        Ok(serialized)
    }

    /// `(1)` deserialize, `(2)` detect envelope vs single, `(3)` apply
    /// `adapt_from_server`, `(4)` convert to the canonical typed object,
    /// `(5)` validate if enabled.
    pub fn process_inbound(&self, data: &str, type_name: &str) -> Result<Payload, BlackholioError> {
        let start = Instant::now();
        let result = self.process_inbound_inner(data, type_name);
        let elapsed = start.elapsed();
        match &result {
            Ok(_) => self.metrics.record_success(elapsed, data.len() as u64, 1),
            Err(e) => self.metrics.record_failure(elapsed, e.category_static()),
        }
        result
    }

    fn process_inbound_inner(&self, data: &str, type_name: &str) -> Result<Payload, BlackholioError> {
        let adapter = self.adapters.get(self.config.server_language, self.config.protocol_version.adapter_version());

        let deserialization_start = Instant::now();
        let parsed: Value = serde_json::from_str(data).map_err(|e| BlackholioError::protocol(format!("inbound payload is not valid JSON: {e}")))?;
        self.metrics.serialization_time.record(deserialization_start.elapsed());

        let is_envelope = parsed
            .as_object()
            .map(|obj| obj.contains_key("items") && obj.contains_key("count"))
            .unwrap_or(false);

        let items: Vec<Value> = if is_envelope {
            parsed
                .get("items")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default()
        } else {
            vec![parsed]
        };

        let mut converted = Vec::with_capacity(items.len());
        for item in items {
            let canonical = if self.config.adaptation {
                let adaptation_start = Instant::now();
                let out = adapter.adapt_from_server(&item, type_name);
                self.metrics.adaptation_time.record(adaptation_start.elapsed());
                out
            } else {
                item
            };

            let conversion_start = Instant::now();
            convert_to_typed(type_name, &canonical)?;
            self.metrics.conversion_time.record(conversion_start.elapsed());

            if self.config.validation {
                let validation_start = Instant::now();
                schema::validate(type_name, &canonical)?;
                self.metrics.validation_time.record(validation_start.elapsed());
            }
            converted.push(canonical);
        }

        if is_envelope {
            Ok(Payload::List(converted))
        } else {
            Ok(Payload::Single(converted.into_iter().next().expect("non-envelope payload has exactly one item")))
        }
    }
}

impl BlackholioError {
    /// Stable `&'static str` error-kind label for the metrics map, distinct
    /// from the human-readable [`BlackholioError::category`] value (same
    /// string today, kept separate so the two can diverge later).
    fn category_static(&self) -> &'static str {
        self.category()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerLanguage;

    fn pipeline() -> DataPipeline {
        let mut cfg = PipelineConfig::default();
        cfg.server_language = ServerLanguage::Rust;
        DataPipeline::new(cfg)
    }

    fn sample_entity() -> Value {
        json!({
            "id": "e1",
            "position": {"x": 0.0, "y": 0.0},
            "velocity": {"x": 0.0, "y": 0.0},
            "mass": 1.0,
            "radius": 1.0,
            "kind": "player",
            "active": true,
            "created_at": 1.5
        })
    }

    #[test]
    fn round_trip_single_object() {
        let pipeline = pipeline();
        let original = sample_entity();
        let wire = pipeline.process_outbound(Payload::Single(original.clone()), "Entity", 0.0).unwrap();
        assert!(wire.contains("\"created\":1500000000"));

        let back = pipeline.process_inbound(&wire, "Entity").unwrap();
        match back {
            Payload::Single(v) => assert_eq!(v, original),
            Payload::List(_) => panic!("expected a single object"),
        }
    }

    #[test]
    fn round_trip_list_uses_envelope() {
        let pipeline = pipeline();
        let items = vec![sample_entity(), sample_entity()];
        let wire = pipeline.process_outbound(Payload::List(items.clone()), "Entity", 1_700_000_000.0).unwrap();
        assert!(wire.contains("\"count\":2"));

        let back = pipeline.process_inbound(&wire, "Entity").unwrap();
        match back {
            Payload::List(v) => assert_eq!(v, items),
            Payload::Single(_) => panic!("expected a list"),
        }
    }

    #[test]
    fn empty_list_is_rejected() {
        let pipeline = pipeline();
        let err = pipeline.process_outbound(Payload::List(vec![]), "Entity", 0.0).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::DataValidation);
    }

    #[test]
    fn invalid_record_fails_validation_before_adaptation() {
        let pipeline = pipeline();
        let bad = json!({"id": "e1", "mass": -1.0, "position": {"x":0.0,"y":0.0}, "velocity": {"x":0.0,"y":0.0}, "radius": 1.0, "kind": "player", "active": true});
        assert!(pipeline.process_outbound(Payload::Single(bad), "Entity", 0.0).is_err());
    }

    #[test]
    fn conversion_stage_rejects_record_missing_required_field() {
        let pipeline = pipeline();
        let malformed = json!({"mass": 1.0, "radius": 1.0});
        let wire = malformed.to_string();
        let err = pipeline.process_inbound(&wire, "Entity").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::DataValidation);
    }

    #[test]
    fn conversion_stage_is_timed() {
        let pipeline = pipeline();
        let wire = pipeline.process_outbound(Payload::Single(sample_entity()), "Entity", 0.0).unwrap();
        pipeline.process_inbound(&wire, "Entity").unwrap();
        let snap = pipeline.metrics.snapshot();
        assert!(snap["conversion_time_ms"].as_f64().unwrap() >= 0.0);
    }

    #[test]
    fn metrics_accumulate_across_calls() {
        let pipeline = pipeline();
        pipeline.process_outbound(Payload::Single(sample_entity()), "Entity", 0.0).unwrap();
        pipeline.process_outbound(Payload::List(vec![]), "Entity", 0.0).ok();
        let snap = pipeline.metrics.snapshot();
        assert_eq!(snap["operations_total"], 2);
        assert_eq!(snap["operations_successful"], 1);
        assert_eq!(snap["operations_failed"], 1);
    }
}
