//! Raw object payloads as they arrive from the server or the local cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CourierError, Result};
use crate::types::EntityId;

/// A JSON object describing one entity.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(CourierError::invalid_field(
                "record",
                format!("expected an object, got {other}"),
            )),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn id(&self) -> Option<EntityId> {
        self.str_field("id").map(EntityId::new)
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Owning container, accepting either `{"conversation": {"id": ..}}`
    /// or a bare id string, for conversations and channels alike.
    pub fn parent_id(&self) -> Option<EntityId> {
        ["conversation", "channel"]
            .iter()
            .find_map(|key| self.0.get(*key).and_then(reference_id))
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.str_field("created_at").and_then(parse_timestamp)
    }

    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        self.str_field("sent_at").and_then(parse_timestamp)
    }

    pub fn position(&self) -> Option<i64> {
        self.0.get("position").and_then(Value::as_i64)
    }

    pub fn last_message_sent_at(&self) -> Option<DateTime<Utc>> {
        self.0
            .get("last_message")
            .and_then(|m| m.get("sent_at"))
            .and_then(Value::as_str)
            .and_then(parse_timestamp)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Extract an id from `"id"` or `{"id": "id"}`.
pub fn reference_id(value: &Value) -> Option<EntityId> {
    match value {
        Value::String(s) => Some(EntityId::new(s.as_str())),
        Value::Object(map) => map.get("id").and_then(Value::as_str).map(EntityId::new),
        _ => None,
    }
}

pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_value_rejects_non_objects() {
        assert!(Record::from_value(json!([1, 2])).is_err());
        assert!(Record::from_value(json!({"id": "x"})).is_ok());
    }

    #[test]
    fn test_parent_id_accepts_object_or_string() {
        let nested = Record::from_value(json!({"conversation": {"id": "layer:///conversations/c1"}})).unwrap();
        let flat = Record::from_value(json!({"channel": "layer:///channels/c2"})).unwrap();
        assert_eq!(nested.parent_id().unwrap().as_str(), "layer:///conversations/c1");
        assert_eq!(flat.parent_id().unwrap().as_str(), "layer:///channels/c2");
    }

    #[test]
    fn test_last_message_sent_at() {
        let rec = Record::from_value(json!({
            "created_at": "2024-01-01T00:00:00Z",
            "last_message": {"id": "layer:///messages/m1", "sent_at": "2024-02-01T10:00:00Z"}
        }))
        .unwrap();
        assert!(rec.last_message_sent_at().unwrap() > rec.created_at().unwrap());
    }
}
