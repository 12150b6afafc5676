use super::{nanos_to_seconds, seconds_to_nanos, Direction, FieldMapping, ProtocolAdapter};
use serde_json::Value;

/// Rust server dialect: snake_case on the wire, nanosecond (u64) timestamps,
/// lowercase enum values, and a handful of abbreviations (spec §4.2 table).
pub struct RustAdapter;

fn mapping_for(type_name: &str) -> FieldMapping {
    match type_name {
        "Entity" => FieldMapping::new(&[("kind", "entity_type"), ("created_at", "created"), ("updated_at", "updated")]),
        "Player" => FieldMapping::new(&[
            ("kind", "entity_type"),
            ("created_at", "created"),
            ("updated_at", "updated"),
            ("player_id", "id"),
            ("input_direction", "input"),
            ("max_speed", "max_vel"),
            ("acceleration", "accel"),
        ]),
        "Circle" => FieldMapping::new(&[
            ("kind", "entity_type"),
            ("created_at", "created"),
            ("updated_at", "updated"),
            ("circle_id", "id"),
            ("circle_type", "type"),
            ("respawn_time", "respawn"),
        ]),
        _ => FieldMapping::default(),
    }
}

const TIME_FIELDS: &[&str] = &["created", "updated", "created_at", "updated_at"];

impl ProtocolAdapter for RustAdapter {
    fn adapt_to_server(&self, data: &Value, type_name: &str) -> Value {
        let mapping = mapping_for(type_name);
        let mut adapted = mapping.apply(data, Direction::ToServer);
        if let Some(obj) = adapted.as_object_mut() {
            for field in TIME_FIELDS {
                if let Some(v) = obj.get(*field).and_then(Value::as_f64) {
                    obj.insert((*field).to_string(), Value::from(seconds_to_nanos(v)));
                }
            }
        }
        adapted
    }

    fn adapt_from_server(&self, data: &Value, type_name: &str) -> Value {
        let mut preconverted = data.clone();
        if let Some(obj) = preconverted.as_object_mut() {
            for field in TIME_FIELDS {
                if let Some(v) = obj.get(*field).and_then(Value::as_i64) {
                    obj.insert((*field).to_string(), Value::from(nanos_to_seconds(v)));
                }
            }
        }
        let mapping = mapping_for(type_name);
        mapping.apply(&preconverted, Direction::ToClient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn s2_entity_to_wire() {
        let adapter = RustAdapter;
        let canonical = json!({"id": "e1", "created_at": 1.5, "kind": "player"});
        let wire = adapter.adapt_to_server(&canonical, "Entity");
        assert_eq!(wire["id"], "e1");
        assert_eq!(wire["created"], 1_500_000_000i64);
        assert_eq!(wire["entity_type"], "player");
    }

    #[test]
    fn s2_entity_from_wire() {
        let adapter = RustAdapter;
        let wire = json!({"id": "e1", "created": 2_000_000_000i64});
        let canonical = adapter.adapt_from_server(&wire, "Entity");
        assert_eq!(canonical["id"], "e1");
        assert_eq!(canonical["created_at"], 2.0);
    }

    #[test]
    fn round_trip_entity() {
        let adapter = RustAdapter;
        let original = json!({"id": "e1", "kind": "circle", "created_at": 3.0, "updated_at": 4.0, "mass": 1.0});
        let wire = adapter.adapt_to_server(&original, "Entity");
        let back = adapter.adapt_from_server(&wire, "Entity");
        assert_eq!(back, original);
    }

    #[test]
    fn player_id_collapses_onto_entity_id() {
        let adapter = RustAdapter;
        let canonical = json!({"id": "p1", "player_id": "p1", "input_direction": {"x": 1.0, "y": 0.0}});
        let wire = adapter.adapt_to_server(&canonical, "Player");
        assert_eq!(wire["id"], "p1");
        assert_eq!(wire["input"]["x"], 1.0);
    }
}
