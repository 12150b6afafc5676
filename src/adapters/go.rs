use super::{nanos_to_seconds, seconds_to_nanos, Direction, FieldMapping, ProtocolAdapter};
use serde_json::Value;

/// Go server dialect: explicit per-field camelCase renames only -- unlike
/// the C# adapter, fields with no entry in the mapping table (`mass`,
/// `radius`, `position`, `score`, ...) pass through unchanged rather than
/// being camelCased generically. This mirrors a limitation observed in
/// `original_source`'s Go adapter rather than a deliberate design choice;
/// kept faithfully since nothing in the spec contradicts it.
pub struct GoAdapter;

fn mapping_for(type_name: &str) -> FieldMapping {
    match type_name {
        "Entity" => FieldMapping::new(&[
            ("kind", "entityType"),
            ("active", "isActive"),
            ("created_at", "createdAt"),
            ("updated_at", "updatedAt"),
        ]),
        "Player" => FieldMapping::new(&[
            ("kind", "entityType"),
            ("active", "isActive"),
            ("created_at", "createdAt"),
            ("updated_at", "updatedAt"),
            ("player_id", "playerID"),
            ("input_direction", "inputDirection"),
            ("max_speed", "maxSpeed"),
        ]),
        "Circle" => FieldMapping::new(&[
            ("kind", "entityType"),
            ("active", "isActive"),
            ("created_at", "createdAt"),
            ("updated_at", "updatedAt"),
            ("circle_id", "circleID"),
            ("circle_type", "circleType"),
            ("respawn_time", "respawnTime"),
        ]),
        _ => FieldMapping::default(),
    }
}

const TIME_FIELDS_WIRE: &[&str] = &["createdAt", "updatedAt"];
const TIME_FIELDS_CANONICAL: &[&str] = &["created_at", "updated_at"];

impl ProtocolAdapter for GoAdapter {
    fn adapt_to_server(&self, data: &Value, type_name: &str) -> Value {
        let mut adapted = mapping_for(type_name).apply(data, Direction::ToServer);
        if let Some(obj) = adapted.as_object_mut() {
            for field in TIME_FIELDS_WIRE {
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
            for field in TIME_FIELDS_WIRE {
                if let Some(v) = obj.get(*field).and_then(Value::as_i64) {
                    obj.insert((*field).to_string(), Value::from(nanos_to_seconds(v)));
                }
            }
        }
        let _ = TIME_FIELDS_CANONICAL;
        mapping_for(type_name).apply(&preconverted, Direction::ToClient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn explicit_fields_are_renamed_others_pass_through() {
        let adapter = GoAdapter;
        let canonical = json!({
            "id": "e1",
            "kind": "circle",
            "active": true,
            "mass": 4.0,
            "created_at": 1.0
        });
        let wire = adapter.adapt_to_server(&canonical, "Entity");
        assert_eq!(wire["entityType"], "circle");
        assert_eq!(wire["isActive"], true);
        assert_eq!(wire["mass"], 4.0);
        assert_eq!(wire["createdAt"], 1_000_000_000i64);
        assert_eq!(wire["id"], "e1");
    }

    #[test]
    fn round_trip_entity() {
        let adapter = GoAdapter;
        let original = json!({"id": "e1", "kind": "food", "active": false, "created_at": 2.5, "mass": 1.0});
        let wire = adapter.adapt_to_server(&original, "Entity");
        let back = adapter.adapt_from_server(&wire, "Entity");
        assert_eq!(back, original);
    }

    #[test]
    fn player_specific_fields_are_camel_cased() {
        let adapter = GoAdapter;
        let canonical = json!({"id": "p1", "player_id": "p1", "max_speed": 5.0});
        let wire = adapter.adapt_to_server(&canonical, "Player");
        assert_eq!(wire["playerID"], "p1");
        assert_eq!(wire["maxSpeed"], 5.0);
    }
}
