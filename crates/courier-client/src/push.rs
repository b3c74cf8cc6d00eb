//! Server-pushed change frames.
//!
//! Frames arrive as JSON:
//!
//! ```json
//! {"type": "change", "body": {"operation": "patch",
//!   "object": {"type": "Conversation", "id": "layer:///conversations/c1"},
//!   "data": [{"operation": "set", "property": "metadata.title", "value": "Hi"}]}}
//! ```
//!
//! Creates register (or refresh) objects, patches apply to already-known
//! objects, deletes destroy them and evict them from the local cache.

use serde::Deserialize;
use serde_json::{Map, Value};

use courier_shared::{CourierError, EntityId, Record, Result};

use crate::client::Client;
use crate::entity::Entity;
use crate::loader::resolve_kind;
use crate::schema::{self, FieldSpec};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PushObject {
    pub id: EntityId,
    #[serde(rename = "type", default)]
    pub type_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchOp {
    Set,
    Delete,
    Add,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PatchOperation {
    pub operation: PatchOp,
    /// Field name, or a dotted path into an object field.
    pub property: String,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum PushEvent {
    Create { object: PushObject, data: Record },
    Patch { object: PushObject, data: Vec<PatchOperation> },
    Delete { object: PushObject },
}

#[derive(Deserialize)]
struct Frame {
    #[serde(rename = "type")]
    frame_type: String,
    body: Value,
}

impl PushEvent {
    pub fn object(&self) -> &PushObject {
        match self {
            PushEvent::Create { object, .. }
            | PushEvent::Patch { object, .. }
            | PushEvent::Delete { object } => object,
        }
    }

    /// Parse a raw frame. Frames other than `change` yield `None`.
    pub fn from_frame(frame: &str) -> Result<Option<Self>> {
        let frame: Frame = serde_json::from_str(frame)
            .map_err(|e| CourierError::invalid_field("frame", e.to_string()))?;
        if frame.frame_type != "change" {
            return Ok(None);
        }
        serde_json::from_value(frame.body)
            .map(Some)
            .map_err(|e| CourierError::invalid_field("body", e.to_string()))
    }
}

impl Client {
    /// Apply one pushed change to the object graph.
    pub fn apply_push(&self, event: PushEvent) -> Result<()> {
        let id = event.object().id.clone();
        let kind = resolve_kind(&id).ok_or_else(|| CourierError::InvalidId(id.to_string()))?;
        tracing::debug!(%id, kind = %kind, "push event");

        match event {
            PushEvent::Create { data, .. } => {
                let mut record = data;
                if record.id().is_none() {
                    record.insert("id", id.to_string());
                }
                self.entity_from_record(kind, &record)?;
                self.cache_records(kind, std::slice::from_ref(&record));
            }
            PushEvent::Patch { data, .. } => match self.get(&id) {
                Some(entity) => {
                    entity.apply_patch(&data)?;
                    self.cache_records(kind, std::slice::from_ref(&entity.to_record()));
                }
                None => tracing::debug!(%id, "patch for an object not held locally"),
            },
            PushEvent::Delete { .. } => {
                if let Some(source) = self.local_source() {
                    if let Err(err) = source.remove_record(&id) {
                        tracing::warn!(%id, error = %err, "failed to evict cached record");
                    }
                }
                if let Some(entity) = self.get(&id) {
                    entity.destroy()?;
                }
            }
        }
        Ok(())
    }
}

impl Entity {
    /// Apply server patch operations. All resulting changes are delivered as
    /// one folded change event.
    ///
    /// Every operation is checked before any field is written, so a bad
    /// operation leaves the object untouched.
    pub(crate) fn apply_patch(&self, ops: &[PatchOperation]) -> Result<()> {
        if self.is_destroyed() {
            return Err(CourierError::Destroyed);
        }
        let mut staged: Vec<(&'static FieldSpec, Value)> = Vec::with_capacity(ops.len());
        for op in ops {
            let (field, path) = match op.property.split_once('.') {
                Some((field, rest)) => (field, Some(rest)),
                None => (op.property.as_str(), None),
            };
            let spec = schema::field(self.kind(), field)
                .ok_or_else(|| CourierError::invalid_field(field, format!("not a field of {}", self.kind())))?;
            let current = staged
                .iter()
                .rev()
                .find(|(s, _)| s.name == spec.name)
                .map(|(_, value)| value.clone())
                .or_else(|| self.get(spec.name))
                .unwrap_or(Value::Null);
            let next = match path {
                Some(path) => patch_nested(current, path, op)?,
                None => patch_value(current, op),
            };
            let next = match spec.adjust {
                Some(adjust) => adjust(spec.name, next)?,
                None => next,
            };
            staged.push((spec, next));
        }

        for (spec, value) in staged {
            self.write_field(spec, value)?;
        }
        Ok(())
    }
}

fn patch_value(current: Value, op: &PatchOperation) -> Value {
    match op.operation {
        PatchOp::Set => op.value.clone(),
        PatchOp::Delete => Value::Null,
        PatchOp::Add => {
            let mut items = match current {
                Value::Array(items) => items,
                _ => Vec::new(),
            };
            if !items.contains(&op.value) {
                items.push(op.value.clone());
            }
            Value::Array(items)
        }
        PatchOp::Remove => match current {
            Value::Array(mut items) => {
                items.retain(|item| item != &op.value);
                Value::Array(items)
            }
            other => other,
        },
    }
}

/// Apply `op` at a dotted `path` inside an object value.
fn patch_nested(current: Value, path: &str, op: &PatchOperation) -> Result<Value> {
    let mut root = match current {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        _ => return Err(CourierError::invalid_field(&op.property, "not an object")),
    };

    let mut segments: Vec<&str> = path.split('.').collect();
    let Some(last) = segments.pop() else {
        return Err(CourierError::invalid_field(&op.property, "empty path"));
    };

    let mut node = &mut root;
    for segment in segments {
        let child = node
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !child.is_object() {
            *child = Value::Object(Map::new());
        }
        node = match child {
            Value::Object(map) => map,
            _ => unreachable!("replaced with an object above"),
        };
    }

    let current_leaf = node.remove(last).unwrap_or(Value::Null);
    let leaf = patch_value(current_leaf, op);
    if !leaf.is_null() {
        node.insert(last.to_string(), leaf);
    }
    Ok(Value::Object(root))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    use courier_shared::EntityKind;
    use courier_store::Database;
    use serde_json::json;
    use tokio::task::LocalSet;

    use crate::testing::{conversation, conversation_id, ready_client, record, recorder, settle};

    fn op(operation: PatchOp, property: &str, value: Value) -> PatchOperation {
        PatchOperation {
            operation,
            property: property.to_string(),
            value,
        }
    }

    #[test]
    fn test_parse_change_frame() -> anyhow::Result<()> {
        let frame = json!({
            "type": "change",
            "body": {
                "operation": "delete",
                "object": {"type": "Message", "id": "layer:///messages/m1"}
            }
        })
        .to_string();
        let event = PushEvent::from_frame(&frame)?.ok_or_else(|| anyhow::anyhow!("change frame ignored"))?;
        assert!(matches!(event, PushEvent::Delete { .. }));
        assert_eq!(event.object().id.as_str(), "layer:///messages/m1");
        Ok(())
    }

    #[test]
    fn test_other_frames_are_ignored() {
        let frame = json!({"type": "signal", "body": {}}).to_string();
        assert_eq!(PushEvent::from_frame(&frame).unwrap(), None);
        assert!(PushEvent::from_frame("not json").is_err());
    }

    #[test]
    fn test_array_add_and_remove() {
        let added = patch_value(json!(["a"]), &op(PatchOp::Add, "participants", json!("b")));
        assert_eq!(added, json!(["a", "b"]));
        let again = patch_value(added, &op(PatchOp::Add, "participants", json!("b")));
        assert_eq!(again, json!(["a", "b"]));
        let removed = patch_value(again, &op(PatchOp::Remove, "participants", json!("a")));
        assert_eq!(removed, json!(["b"]));
    }

    #[test]
    fn test_nested_set_and_delete() {
        let set = patch_nested(
            json!({"title": "old"}),
            "a.b",
            &op(PatchOp::Set, "metadata.a.b", json!(1)),
        )
        .unwrap();
        assert_eq!(set, json!({"title": "old", "a": {"b": 1}}));

        let deleted = patch_nested(set, "title", &op(PatchOp::Delete, "metadata.title", Value::Null)).unwrap();
        assert_eq!(deleted, json!({"a": {"b": 1}}));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_patch_is_delivered_as_one_change() {
        LocalSet::new()
            .run_until(async {
                let (client, _transport) = ready_client();
                let entity = client
                    .entity_from_record(EntityKind::Conversation, &record(conversation("c1", "2024-01-01T00:00:00Z")))
                    .unwrap();
                settle().await;
                let (events, handler) = recorder();
                entity.on("conversations:change", handler, None).unwrap();

                let frame = json!({
                    "type": "change",
                    "body": {
                        "operation": "patch",
                        "object": {"type": "Conversation", "id": conversation_id("c1")},
                        "data": [
                            {"operation": "set", "property": "metadata.title", "value": "Hi"},
                            {"operation": "add", "property": "participants", "value": "gandalf"},
                            {"operation": "remove", "property": "participants", "value": "frodo"}
                        ]
                    }
                })
                .to_string();
                client.apply_push(PushEvent::from_frame(&frame).unwrap().unwrap()).unwrap();
                settle().await;

                assert_eq!(entity.get("metadata"), Some(json!({"title": "Hi"})));
                assert_eq!(entity.get("participants"), Some(json!(["sam", "gandalf"])));
                let events = events.borrow();
                assert_eq!(events.len(), 1);
                assert_eq!(events[0].changes().len(), 3);
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_rejected_patch_leaves_object_untouched() {
        LocalSet::new()
            .run_until(async {
                let (client, _transport) = ready_client();
                let entity = client
                    .entity_from_record(EntityKind::Conversation, &record(conversation("c1", "2024-01-01T00:00:00Z")))
                    .unwrap();
                settle().await;
                let (events, handler) = recorder();
                entity.on("conversations:change", handler, None).unwrap();

                let result = entity.apply_patch(&[
                    op(PatchOp::Set, "metadata.title", json!("Hi")),
                    op(PatchOp::Add, "participants", json!("gandalf")),
                    op(PatchOp::Set, "created_at", json!("yesterday")),
                ]);
                settle().await;

                assert!(matches!(result, Err(CourierError::InvalidField { .. })));
                assert_eq!(entity.get("participants"), Some(json!(["frodo", "sam"])));
                assert_eq!(entity.get("created_at"), Some(json!("2024-01-01T00:00:00Z")));
                assert!(entity.get("metadata").map_or(true, |m| m.get("title").is_none()));
                assert!(events.borrow().is_empty());
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_create_and_delete() {
        LocalSet::new()
            .run_until(async {
                let (client, _transport) = ready_client();
                let db = Rc::new(Database::open_in_memory().unwrap());
                client.set_local_source(db.clone());
                let id = EntityId::from(conversation_id("c9"));

                client
                    .apply_push(PushEvent::Create {
                        object: PushObject { id: id.clone(), type_name: None },
                        data: record(conversation("c9", "2024-01-01T00:00:00Z")),
                    })
                    .unwrap();
                let entity = client.get(&id).unwrap();
                assert!(entity.is_synced());
                assert!(db.find_record(&id).unwrap().is_some());

                client
                    .apply_push(PushEvent::Delete {
                        object: PushObject { id: id.clone(), type_name: None },
                    })
                    .unwrap();
                assert!(entity.is_destroyed());
                assert!(client.get(&id).is_none());
                assert!(db.find_record(&id).unwrap().is_none());
            })
            .await;
    }
}
