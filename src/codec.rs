//! Wire codec (C1, spec §4.1).
//!
//! Produces outbound request frames as UTF-8 TEXT and parses inbound
//! server messages, tolerant of unknown discriminators. Classifies inbound
//! frames (TEXT vs BINARY) against the negotiated subprotocol, which is
//! always `v1.json.spacetimedb` for this core.

use crate::error::BlackholioError;
use serde_json::{json, Value};

/// Outbound request shapes (spec §4.1, §6). The codec must not attach a
/// synthetic `type` discriminator -- SpacetimeDB rejects unknown top-level
/// fields -- so each variant serializes to exactly the single expected key.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    CallReducer { reducer: String, args: Value },
    Subscribe { query_strings: Vec<String> },
    OneOffQuery { query: String },
}

impl OutboundMessage {
    pub fn encode(&self) -> String {
        let value = match self {
            OutboundMessage::CallReducer { reducer, args } => json!({
                "CallReducer": { "reducer": reducer, "args": args }
            }),
            OutboundMessage::Subscribe { query_strings } => json!({
                "Subscribe": { "query_strings": query_strings }
            }),
            OutboundMessage::OneOffQuery { query } => json!({
                "OneOffQuery": { "query": query }
            }),
        };
        value.to_string()
    }
}

/// Inbound server message shapes (spec §4.1). `Raw` carries any
/// discriminator this codec does not recognize, so the receive loop can
/// still emit a non-fatal `raw_message` event instead of dropping data
/// silently.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    IdentityToken { identity: String, token: String, connection_id: Option<String> },
    InitialSubscription { tables: Vec<TableRows> },
    TransactionUpdate { timestamp: Option<f64>, tables: Vec<TableDelta> },
    TransactionCommit { status: String, timestamp: Option<f64> },
    DatabaseUpdate { request_id: Option<String>, tables: Value },
    SubscriptionUpdate { status: Option<String>, tables: Value, timestamp: Option<f64> },
    Error { message: String, code: Option<String>, details: Option<Value> },
    Raw(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableRows {
    pub table_name: String,
    pub rows: Vec<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableOp {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableDelta {
    pub table_name: String,
    pub op: TableOp,
    pub rows: Vec<Value>,
}

impl InboundMessage {
    /// If this message carries a `request_id`, used by the session's
    /// correlation registry to resolve a waiting call instead of routing
    /// to a subscription/event callback.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            InboundMessage::DatabaseUpdate { request_id, .. } => request_id.as_deref(),
            InboundMessage::Raw(v) => v.get("request_id").and_then(Value::as_str),
            _ => None,
        }
    }

    /// Parses a JSON object decoded from a TEXT frame into a typed
    /// message. Unknown top-level discriminators become `Raw` rather than
    /// an error (spec §4.1: "Unknown discriminators produce a
    /// `raw_message` event rather than a hard failure").
    pub fn parse(value: Value) -> InboundMessage {
        let obj = match value.as_object() {
            Some(obj) => obj,
            None => return InboundMessage::Raw(value),
        };

        if let Some(v) = obj.get("IdentityToken") {
            return InboundMessage::IdentityToken {
                identity: str_field(v, "identity"),
                token: str_field(v, "token"),
                connection_id: v.get("connection_id").and_then(Value::as_str).map(str::to_string),
            };
        }
        if let Some(v) = obj.get("InitialSubscription") {
            let tables = v
                .get("tables")
                .and_then(Value::as_array)
                .map(|arr| arr.iter().map(parse_table_rows).collect())
                .unwrap_or_default();
            return InboundMessage::InitialSubscription { tables };
        }
        if let Some(v) = obj.get("TransactionUpdate") {
            let timestamp = v.get("timestamp").and_then(Value::as_f64);
            let tables = v
                .get("tables")
                .map(parse_table_deltas)
                .unwrap_or_default();
            return InboundMessage::TransactionUpdate { timestamp, tables };
        }
        if let Some(v) = obj.get("TransactionCommit") {
            return InboundMessage::TransactionCommit {
                status: str_field(v, "status"),
                timestamp: v.get("timestamp").and_then(Value::as_f64),
            };
        }
        if let Some(v) = obj.get("DatabaseUpdate") {
            return InboundMessage::DatabaseUpdate {
                request_id: v.get("request_id").and_then(Value::as_str).map(str::to_string),
                tables: v.get("tables").cloned().unwrap_or(Value::Null),
            };
        }
        if let Some(v) = obj.get("SubscriptionUpdate") {
            return InboundMessage::SubscriptionUpdate {
                status: v.get("status").and_then(Value::as_str).map(str::to_string),
                tables: v.get("tables").cloned().unwrap_or(Value::Null),
                timestamp: v.get("timestamp").and_then(Value::as_f64),
            };
        }
        if let Some(v) = obj.get("Error") {
            return InboundMessage::Error {
                message: str_field(v, "message"),
                code: v.get("code").and_then(Value::as_str).map(str::to_string),
                details: v.get("details").cloned(),
            };
        }

        InboundMessage::Raw(value)
    }
}

fn str_field(v: &Value, field: &str) -> String {
    v.get(field).and_then(Value::as_str).unwrap_or_default().to_string()
}

fn parse_table_rows(v: &Value) -> TableRows {
    TableRows {
        table_name: str_field(v, "table_name"),
        rows: v.get("rows").and_then(Value::as_array).cloned().unwrap_or_default(),
    }
}

fn parse_table_deltas(tables: &Value) -> Vec<TableDelta> {
    let Some(obj) = tables.as_object() else {
        return Vec::new();
    };
    obj.iter()
        .map(|(table_name, delta)| {
            let op = match delta.get("operation").and_then(Value::as_str) {
                Some("insert") => TableOp::Insert,
                Some("update") => TableOp::Update,
                Some("delete") => TableOp::Delete,
                _ => TableOp::Insert,
            };
            let rows = delta.get("rows").and_then(Value::as_array).cloned().unwrap_or_default();
            TableDelta {
                table_name: table_name.clone(),
                op,
                rows,
            }
        })
        .collect()
}

/// The kind of WebSocket frame a raw inbound payload arrived as. The
/// codec polices this against the negotiated subprotocol; a `Binary`
/// frame under `v1.json.spacetimedb` is a protocol violation, logged and
/// best-effort decoded, never a hard failure (spec §4.1, testable
/// property 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Text,
    Binary,
}

/// Decodes one inbound TEXT/BINARY frame payload. A TEXT frame that is not
/// valid JSON is dropped with a warning (returns `Err`); a BINARY frame is
/// logged at warning level by the caller (this function does not log --
/// session.rs does, since only it knows the negotiated subprotocol -- but
/// it still attempts the same best-effort UTF-8/JSON decode either way).
pub fn decode_frame(kind: FrameKind, payload: &[u8]) -> Result<InboundMessage, BlackholioError> {
    if kind == FrameKind::Binary {
        tracing::warn!(bytes = payload.len(), "received BINARY frame under v1.json.spacetimedb subprotocol");
    }
    let text = std::str::from_utf8(payload).map_err(|e| BlackholioError::protocol(format!("frame is not valid UTF-8: {e}")))?;
    let value: Value = serde_json::from_str(text).map_err(|e| BlackholioError::protocol(format!("frame is not valid JSON: {e}")))?;
    Ok(InboundMessage::parse(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_call_reducer_has_no_synthetic_type_field() {
        let msg = OutboundMessage::CallReducer {
            reducer: "move_player".into(),
            args: json!({"x": 1.0}),
        };
        let encoded: Value = serde_json::from_str(&msg.encode()).unwrap();
        let obj = encoded.as_object().unwrap();
        assert_eq!(obj.len(), 1);
        assert!(obj.contains_key("CallReducer"));
        assert!(!obj.contains_key("type"));
    }

    #[test]
    fn subscribe_encodes_core_tables() {
        let msg = OutboundMessage::Subscribe {
            query_strings: vec!["SELECT * FROM entity".into()],
        };
        assert_eq!(msg.encode(), r#"{"Subscribe":{"query_strings":["SELECT * FROM entity"]}}"#);
    }

    #[test]
    fn unknown_discriminator_becomes_raw_message() {
        let value = json!({"SomeFutureVariant": {"foo": "bar"}});
        let msg = InboundMessage::parse(value);
        assert!(matches!(msg, InboundMessage::Raw(_)));
    }

    #[test]
    fn malformed_text_frame_is_dropped_not_panicked() {
        let result = decode_frame(FrameKind::Text, b"not json{{{");
        assert!(result.is_err());
    }

    #[test]
    fn binary_frame_is_logged_but_still_best_effort_decoded() {
        let payload = br#"{"Error":{"message":"boom"}}"#;
        let msg = decode_frame(FrameKind::Binary, payload).unwrap();
        assert!(matches!(msg, InboundMessage::Error { .. }));
    }

    #[test]
    fn identity_token_round_trips_from_json() {
        let value = json!({"IdentityToken": {"identity": "id-abc", "token": "tok-xyz", "connection_id": "c1"}});
        let msg = InboundMessage::parse(value);
        match msg {
            InboundMessage::IdentityToken { identity, token, connection_id } => {
                assert_eq!(identity, "id-abc");
                assert_eq!(token, "tok-xyz");
                assert_eq!(connection_id.as_deref(), Some("c1"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn database_update_request_id_is_extracted_for_correlation() {
        let value = json!({"DatabaseUpdate": {"request_id": "req_1_123", "tables": {}}});
        let msg = InboundMessage::parse(value);
        assert_eq!(msg.request_id(), Some("req_1_123"));
    }
}
