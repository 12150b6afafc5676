//! Schema validator (C3, spec §4.3).
//!
//! A small JSON-schema subset -- `type`, `properties`, `required`,
//! `additionalProperties`, `enum`, numeric bounds, `items`, and local
//! `$ref` into a `definitions` block -- evaluated directly over
//! `serde_json::Value`, the same shape `original_source`'s
//! `SchemaManager._validate_against_schema` walks over Python dicts.
//! Errors are path-qualified (`Player.position.x`) rather than a bare
//! message, since the pipeline and caller need to know which field failed.

use crate::error::BlackholioError;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::OnceLock;

#[derive(Debug, Clone)]
pub enum SchemaType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    Null,
    Union(Vec<SchemaType>),
}

impl SchemaType {
    fn matches(&self, value: &Value) -> bool {
        match self {
            SchemaType::String => value.is_string(),
            SchemaType::Number => value.is_number(),
            SchemaType::Integer => value.is_i64() || value.is_u64(),
            SchemaType::Boolean => value.is_boolean(),
            SchemaType::Array => value.is_array(),
            SchemaType::Object => value.is_object(),
            SchemaType::Null => value.is_null(),
            SchemaType::Union(types) => types.iter().any(|t| t.matches(value)),
        }
    }

    fn name(&self) -> String {
        match self {
            SchemaType::String => "string".to_string(),
            SchemaType::Number => "number".to_string(),
            SchemaType::Integer => "integer".to_string(),
            SchemaType::Boolean => "boolean".to_string(),
            SchemaType::Array => "array".to_string(),
            SchemaType::Object => "object".to_string(),
            SchemaType::Null => "null".to_string(),
            SchemaType::Union(types) => types.iter().map(SchemaType::name).collect::<Vec<_>>().join("|"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NumericBounds {
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub exclusive_minimum: Option<f64>,
    pub exclusive_maximum: Option<f64>,
}

#[derive(Debug, Clone)]
pub enum PropertySchema {
    Ref(&'static str),
    Inline(Box<Schema>),
}

#[derive(Debug, Clone, Default)]
pub struct Schema {
    pub schema_type: Option<SchemaType>,
    pub properties: HashMap<&'static str, PropertySchema>,
    pub required: Vec<&'static str>,
    pub additional_properties: bool,
    pub enum_values: Option<Vec<&'static str>>,
    pub bounds: NumericBounds,
    pub items: Option<Box<PropertySchema>>,
    pub definitions: HashMap<&'static str, Schema>,
}

impl Schema {
    fn object(properties: &[(&'static str, PropertySchema)], required: &[&'static str]) -> Self {
        Schema {
            schema_type: Some(SchemaType::Object),
            properties: properties.iter().cloned().collect(),
            required: required.to_vec(),
            additional_properties: false,
            ..Default::default()
        }
    }

    fn resolve<'a>(&'a self, prop: &'a PropertySchema) -> &'a Schema {
        match prop {
            PropertySchema::Inline(s) => s,
            PropertySchema::Ref(name) => self.definitions.get(name).expect("dangling $ref"),
        }
    }
}

fn leaf(schema_type: SchemaType) -> PropertySchema {
    PropertySchema::Inline(Box::new(Schema {
        schema_type: Some(schema_type),
        additional_properties: true,
        ..Default::default()
    }))
}

fn bounded_number(minimum: f64) -> PropertySchema {
    PropertySchema::Inline(Box::new(Schema {
        schema_type: Some(SchemaType::Number),
        bounds: NumericBounds { minimum: Some(minimum), ..Default::default() },
        additional_properties: true,
        ..Default::default()
    }))
}

fn bounded_integer(minimum: f64) -> PropertySchema {
    PropertySchema::Inline(Box::new(Schema {
        schema_type: Some(SchemaType::Integer),
        bounds: NumericBounds { minimum: Some(minimum), ..Default::default() },
        additional_properties: true,
        ..Default::default()
    }))
}

fn enum_of(values: &'static [&'static str]) -> PropertySchema {
    PropertySchema::Inline(Box::new(Schema {
        schema_type: Some(SchemaType::String),
        enum_values: Some(values.to_vec()),
        additional_properties: true,
        ..Default::default()
    }))
}

fn optional_number() -> PropertySchema {
    leaf(SchemaType::Union(vec![SchemaType::Number, SchemaType::Null]))
}

fn vector2_schema() -> Schema {
    Schema::object(
        &[("x", leaf(SchemaType::Number)), ("y", leaf(SchemaType::Number))],
        &["x", "y"],
    )
}

fn entity_properties() -> Vec<(&'static str, PropertySchema)> {
    vec![
        ("id", leaf(SchemaType::String)),
        ("position", PropertySchema::Ref("Vector2")),
        ("velocity", PropertySchema::Ref("Vector2")),
        ("mass", bounded_number(0.0)),
        ("radius", bounded_number(0.0)),
        ("kind", enum_of(&["player", "circle", "food", "obstacle", "unknown"])),
        ("active", leaf(SchemaType::Boolean)),
        ("created_at", optional_number()),
        ("updated_at", optional_number()),
    ]
}

fn with_definitions(mut schema: Schema) -> Schema {
    schema.definitions.insert("Vector2", vector2_schema());
    schema
}

fn entity_schema() -> Schema {
    with_definitions(Schema::object(&entity_properties(), &["id"]))
}

fn player_schema() -> Schema {
    let mut properties = entity_properties();
    properties.extend([
        ("player_id", leaf(SchemaType::String)),
        ("name", leaf(SchemaType::String)),
        ("direction", PropertySchema::Ref("Vector2")),
        ("score", bounded_integer(0.0)),
        ("state", enum_of(&["active", "inactive", "spectating", "disconnected"])),
        ("input_direction", PropertySchema::Ref("Vector2")),
        ("max_speed", bounded_number(0.0)),
        ("acceleration", bounded_number(0.0)),
    ]);
    with_definitions(Schema::object(&properties, &["id", "player_id"]))
}

fn circle_schema() -> Schema {
    let mut properties = entity_properties();
    properties.extend([
        ("circle_id", leaf(SchemaType::String)),
        ("value", bounded_integer(0.0)),
        ("circle_type", leaf(SchemaType::String)),
        ("respawn_time", optional_number()),
    ]);
    with_definitions(Schema::object(&properties, &["id", "circle_id"]))
}

fn registry() -> &'static HashMap<&'static str, Schema> {
    static REGISTRY: OnceLock<HashMap<&'static str, Schema>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut m = HashMap::new();
        m.insert("Vector2", vector2_schema());
        m.insert("Entity", entity_schema());
        m.insert("Player", player_schema());
        m.insert("Circle", circle_schema());
        m
    })
}

/// Validates `data` against the registered schema for `type_name`, raising a
/// [`BlackholioError::DataValidation`] with a path-qualified message on the
/// first failure (e.g. `Player.position.x`).
pub fn validate(type_name: &str, data: &Value) -> Result<(), BlackholioError> {
    let schema = registry()
        .get(type_name)
        .ok_or_else(|| BlackholioError::data_validation(format!("no schema registered for '{type_name}'"), "type_name"))?;
    validate_against(data, schema, type_name)
}

fn validate_against(data: &Value, schema: &Schema, path: &str) -> Result<(), BlackholioError> {
    if let Some(t) = &schema.schema_type {
        if !t.matches(data) {
            return Err(BlackholioError::data_validation(
                format!("type mismatch at {path}: expected {}, got {}", t.name(), value_type_name(data)),
                path,
            ));
        }
    }

    if schema.schema_type.as_ref().map(|t| matches!(t, SchemaType::Object)).unwrap_or(false) {
        if let Some(obj) = data.as_object() {
            for required in &schema.required {
                if !obj.contains_key(*required) {
                    return Err(BlackholioError::data_validation(
                        format!("required property '{required}' missing at {path}"),
                        format!("{path}.{required}"),
                    ));
                }
            }
            for (key, value) in obj {
                match schema.properties.get(key.as_str()) {
                    Some(prop) => {
                        let sub = schema.resolve(prop);
                        validate_against(value, sub, &format!("{path}.{key}"))?;
                    }
                    None if !schema.additional_properties => {
                        return Err(BlackholioError::data_validation(
                            format!("additional property '{key}' not allowed at {path}"),
                            format!("{path}.{key}"),
                        ));
                    }
                    None => {}
                }
            }
        }
    }

    if schema.schema_type.as_ref().map(|t| matches!(t, SchemaType::Array)).unwrap_or(false) {
        if let (Some(items), Some(arr)) = (&schema.items, data.as_array()) {
            let sub = schema.resolve(items);
            for (i, item) in arr.iter().enumerate() {
                validate_against(item, sub, &format!("{path}[{i}]"))?;
            }
        }
    }

    if let Some(values) = &schema.enum_values {
        if let Some(s) = data.as_str() {
            if !values.contains(&s) {
                return Err(BlackholioError::data_validation(
                    format!("value '{s}' at {path} not in allowed enum {values:?}"),
                    path,
                ));
            }
        }
    }

    if let Some(n) = data.as_f64() {
        let b = &schema.bounds;
        if let Some(min) = b.minimum {
            if n < min {
                return Err(BlackholioError::data_validation(format!("value {n} at {path} is below minimum {min}"), path));
            }
        }
        if let Some(max) = b.maximum {
            if n > max {
                return Err(BlackholioError::data_validation(format!("value {n} at {path} is above maximum {max}"), path));
            }
        }
        if let Some(min) = b.exclusive_minimum {
            if n <= min {
                return Err(BlackholioError::data_validation(
                    format!("value {n} at {path} is not above exclusive minimum {min}"),
                    path,
                ));
            }
        }
        if let Some(max) = b.exclusive_maximum {
            if n >= max {
                return Err(BlackholioError::data_validation(
                    format!("value {n} at {path} is not below exclusive maximum {max}"),
                    path,
                ));
            }
        }
    }

    Ok(())
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Cross-record validation for a full game-state snapshot (spec §4.3):
/// entity ids pairwise unique; every `player_id`/`circle_id` must be
/// present as an entity id.
pub fn validate_snapshot(entities: &[Value], players: &[Value], circles: &[Value]) -> Result<(), BlackholioError> {
    let mut seen = std::collections::HashSet::new();
    let mut entity_ids = std::collections::HashSet::new();
    for e in entities {
        if let Some(id) = e.get("id").and_then(Value::as_str) {
            entity_ids.insert(id.to_string());
            if !seen.insert(id.to_string()) {
                return Err(BlackholioError::game_state(format!("duplicate entity id '{id}'")));
            }
        }
    }
    for p in players {
        if let Some(pid) = p.get("player_id").and_then(Value::as_str) {
            if !entity_ids.contains(pid) {
                return Err(BlackholioError::game_state(format!("player_id '{pid}' has no matching entity")));
            }
        }
    }
    for c in circles {
        if let Some(cid) = c.get("circle_id").and_then(Value::as_str) {
            if !entity_ids.contains(cid) {
                return Err(BlackholioError::game_state(format!("circle_id '{cid}' has no matching entity")));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn valid_entity_passes() {
        let data = json!({
            "id": "e1",
            "position": {"x": 0.0, "y": 0.0},
            "velocity": {"x": 0.0, "y": 0.0},
            "mass": 1.0,
            "radius": 1.0,
            "kind": "player",
            "active": true
        });
        assert!(validate("Entity", &data).is_ok());
    }

    #[test]
    fn negative_mass_fails_with_path() {
        let data = json!({
            "id": "e1",
            "position": {"x": 0.0, "y": 0.0},
            "velocity": {"x": 0.0, "y": 0.0},
            "mass": -1.0,
            "radius": 1.0,
            "kind": "player",
            "active": true
        });
        let err = validate("Entity", &data).unwrap_err();
        assert_eq!(err.field.as_deref(), Some("Entity.mass"));
    }

    #[test]
    fn unknown_enum_value_fails() {
        let data = json!({
            "id": "e1",
            "position": {"x": 0.0, "y": 0.0},
            "velocity": {"x": 0.0, "y": 0.0},
            "mass": 1.0,
            "radius": 1.0,
            "kind": "spaceship",
            "active": true
        });
        assert!(validate("Entity", &data).is_err());
    }

    #[test]
    fn additional_property_rejected() {
        let data = json!({
            "id": "e1",
            "position": {"x": 0.0, "y": 0.0},
            "velocity": {"x": 0.0, "y": 0.0},
            "mass": 1.0,
            "radius": 1.0,
            "kind": "player",
            "active": true,
            "unexpected_field": 1
        });
        assert!(validate("Entity", &data).is_err());
    }

    #[test]
    fn player_requires_entity_and_player_fields() {
        let data = json!({"id": "p1"});
        let err = validate("Player", &data).unwrap_err();
        assert!(err.to_string().contains("required property"));
    }

    #[test]
    fn snapshot_detects_duplicate_entity_ids() {
        let entities = vec![json!({"id": "e1"}), json!({"id": "e1"})];
        assert!(validate_snapshot(&entities, &[], &[]).is_err());
    }

    #[test]
    fn snapshot_detects_dangling_player_id() {
        let entities = vec![json!({"id": "e1"})];
        let players = vec![json!({"player_id": "ghost"})];
        assert!(validate_snapshot(&entities, &players, &[]).is_err());
    }

    #[test]
    fn snapshot_accepts_consistent_state() {
        let entities = vec![json!({"id": "e1"}), json!({"id": "e2"})];
        let players = vec![json!({"player_id": "e1"})];
        let circles = vec![json!({"circle_id": "e2"})];
        assert!(validate_snapshot(&entities, &players, &circles).is_ok());
    }
}
