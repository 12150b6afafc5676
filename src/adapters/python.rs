use super::{Direction, FieldMapping, ProtocolAdapter};
use serde_json::Value;

/// Python server dialect: snake_case natively, seconds-as-float
/// timestamps, and no key renames at all (spec §4.2 table) -- the
/// canonical shape already matches the wire shape.
pub struct PythonAdapter;

fn mapping_for(_type_name: &str) -> FieldMapping {
    FieldMapping::default()
}

impl ProtocolAdapter for PythonAdapter {
    fn adapt_to_server(&self, data: &Value, type_name: &str) -> Value {
        mapping_for(type_name).apply(data, Direction::ToServer)
    }

    fn adapt_from_server(&self, data: &Value, type_name: &str) -> Value {
        mapping_for(type_name).apply(data, Direction::ToClient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn passes_fields_through_unchanged() {
        let adapter = PythonAdapter;
        let canonical = json!({"id": "e1", "created_at": 12.5, "kind": "food"});
        let wire = adapter.adapt_to_server(&canonical, "Entity");
        assert_eq!(wire["created_at"], 12.5);
        assert_eq!(wire["kind"], "food");
        assert!(wire.get("entity_type").is_none());
    }

    #[test]
    fn round_trip() {
        let adapter = PythonAdapter;
        let original = json!({"id": "e1", "kind": "obstacle", "mass": 2.0});
        let wire = adapter.adapt_to_server(&original, "Entity");
        let back = adapter.adapt_from_server(&wire, "Entity");
        assert_eq!(back, original);
    }
}
