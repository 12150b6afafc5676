use super::{millis_to_seconds, recase_all_keys, seconds_to_millis, to_pascal_case, to_snake_case, to_title_case, Direction, FieldMapping, ProtocolAdapter};
use serde_json::Value;

/// C# server dialect: PascalCase properties, millisecond timestamps,
/// TitleCase enum values (spec §4.2 table, scenario S3).
///
/// Word-changing renames (`kind` -> `entity_type`, `active` -> `is_active`)
/// are applied before the generic snake->Pascal casing pass that covers
/// every remaining field; the reverse direction undoes the casing pass
/// before undoing the word-changing renames, so the adapter is its own
/// inverse for the whole record, not just the fields `original_source`'s
/// Python reference happened to special-case.
pub struct CSharpAdapter;

fn mapping_for(type_name: &str) -> FieldMapping {
    match type_name {
        "Entity" | "Player" | "Circle" => FieldMapping::new(&[("kind", "entity_type"), ("active", "is_active")]),
        _ => FieldMapping::default(),
    }
}

const TIME_FIELDS: &[&str] = &["created_at", "updated_at"];

impl ProtocolAdapter for CSharpAdapter {
    fn adapt_to_server(&self, data: &Value, type_name: &str) -> Value {
        let mapping = mapping_for(type_name);
        let renamed = mapping.apply(data, Direction::ToServer);
        let mut pascal = recase_all_keys(&renamed, to_pascal_case);

        if let Some(obj) = pascal.as_object_mut() {
            for field in TIME_FIELDS {
                let pascal_key = to_pascal_case(field);
                if let Some(v) = obj.get(&pascal_key).and_then(Value::as_f64) {
                    obj.insert(pascal_key, Value::from(seconds_to_millis(v)));
                }
            }
            for key in ["EntityType", "State"] {
                if let Some(v) = obj.get(key).and_then(Value::as_str).map(str::to_string) {
                    obj.insert(key.to_string(), Value::from(to_title_case(&v)));
                }
            }
        }
        pascal
    }

    fn adapt_from_server(&self, data: &Value, type_name: &str) -> Value {
        let mut pascal = data.clone();
        if let Some(obj) = pascal.as_object_mut() {
            for field in TIME_FIELDS {
                let pascal_key = to_pascal_case(field);
                if let Some(v) = obj.get(&pascal_key).and_then(Value::as_i64) {
                    obj.insert(pascal_key, Value::from(millis_to_seconds(v)));
                }
            }
            for key in ["EntityType", "State"] {
                if let Some(v) = obj.get(key).and_then(Value::as_str).map(str::to_string) {
                    obj.insert(key.to_string(), Value::from(v.to_lowercase()));
                }
            }
        }
        let snake = recase_all_keys(&pascal, to_snake_case);
        mapping_for(type_name).apply(&snake, Direction::ToClient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn s3_vector2_casing() {
        let adapter = CSharpAdapter;
        let canonical = json!({"x": 1.5, "y": -2.0});
        let wire = adapter.adapt_to_server(&canonical, "Vector2");
        assert_eq!(wire, json!({"X": 1.5, "Y": -2.0}));

        let inbound = json!({"X": 0.0, "Y": 0.0});
        let back = adapter.adapt_from_server(&inbound, "Vector2");
        assert_eq!(back, json!({"x": 0.0, "y": 0.0}));
    }

    #[test]
    fn entity_round_trip() {
        let adapter = CSharpAdapter;
        let original = json!({
            "id": "e1",
            "kind": "player",
            "active": true,
            "created_at": 1.5,
            "mass": 2.0,
            "position": {"x": 1.0, "y": 2.0}
        });
        let wire = adapter.adapt_to_server(&original, "Entity");
        assert_eq!(wire["EntityType"], "Player");
        assert_eq!(wire["IsActive"], true);
        assert_eq!(wire["CreatedAt"], 1500);
        assert_eq!(wire["Position"]["X"], 1.0);

        let back = adapter.adapt_from_server(&wire, "Entity");
        assert_eq!(back, original);
    }
}
