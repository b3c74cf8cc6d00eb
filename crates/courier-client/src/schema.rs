//! Per-kind field tables and event names.
//!
//! Each field goes through the same write path: `adjust` validates and
//! normalizes the incoming value, the result is compared with the current
//! value, and `on_updated` runs only when something actually changed.

use serde_json::{Map, Value};

use courier_shared::record::{parse_timestamp, reference_id};
use courier_shared::{CourierError, EntityId, EntityKind, Result};

use crate::entity::Entity;
use crate::events::EVENT_DESTROY;

pub type AdjustFn = fn(&'static str, Value) -> Result<Value>;
pub type UpdatedFn = fn(&Entity, &Value, &Value);

pub struct FieldSpec {
    pub name: &'static str,
    pub adjust: Option<AdjustFn>,
    pub on_updated: Option<UpdatedFn>,
    /// Changing this field may move the object within a sorted query.
    pub sort_relevant: bool,
}

const fn plain(name: &'static str) -> FieldSpec {
    FieldSpec {
        name,
        adjust: None,
        on_updated: None,
        sort_relevant: false,
    }
}

const fn adjusted(name: &'static str, adjust: AdjustFn) -> FieldSpec {
    FieldSpec {
        name,
        adjust: Some(adjust),
        on_updated: None,
        sort_relevant: false,
    }
}

const fn sorted(name: &'static str, adjust: AdjustFn) -> FieldSpec {
    FieldSpec {
        name,
        adjust: Some(adjust),
        on_updated: None,
        sort_relevant: true,
    }
}

const ID: FieldSpec = FieldSpec {
    name: "id",
    adjust: Some(id_string),
    on_updated: Some(rekey),
    sort_relevant: false,
};

static CONVERSATION_FIELDS: &[FieldSpec] = &[
    ID,
    plain("url"),
    sorted("created_at", timestamp),
    sorted("last_message", message_summary),
    adjusted("participants", id_list),
    adjusted("metadata", object),
    adjusted("unread_message_count", count),
    adjusted("distinct", boolean),
];

static CHANNEL_FIELDS: &[FieldSpec] = &[
    ID,
    plain("url"),
    adjusted("name", string),
    sorted("created_at", timestamp),
    sorted("last_message", message_summary),
    adjusted("membership", object),
    adjusted("metadata", object),
];

static MESSAGE_FIELDS: &[FieldSpec] = &[
    ID,
    plain("url"),
    adjusted("conversation", reference),
    adjusted("channel", reference),
    sorted("position", integer),
    adjusted("sent_at", timestamp),
    adjusted("parts", array),
    plain("sender"),
    FieldSpec {
        name: "is_unread",
        adjust: Some(boolean),
        on_updated: Some(read_receipt),
        sort_relevant: false,
    },
    adjusted("recipient_status", object),
];

static ANNOUNCEMENT_FIELDS: &[FieldSpec] = &[
    ID,
    plain("url"),
    sorted("position", integer),
    adjusted("sent_at", timestamp),
    adjusted("parts", array),
    plain("sender"),
    adjusted("is_unread", boolean),
];

static IDENTITY_FIELDS: &[FieldSpec] = &[
    ID,
    plain("url"),
    adjusted("user_id", string),
    adjusted("display_name", string),
    adjusted("avatar_url", string),
    adjusted("presence", object),
];

static MEMBERSHIP_FIELDS: &[FieldSpec] = &[
    ID,
    plain("url"),
    adjusted("channel", reference),
    adjusted("identity", reference),
    adjusted("role", string),
    adjusted("joined_at", timestamp),
];

pub fn fields(kind: EntityKind) -> &'static [FieldSpec] {
    match kind {
        EntityKind::Conversation => CONVERSATION_FIELDS,
        EntityKind::Channel => CHANNEL_FIELDS,
        EntityKind::Message => MESSAGE_FIELDS,
        EntityKind::Announcement => ANNOUNCEMENT_FIELDS,
        EntityKind::Identity => IDENTITY_FIELDS,
        EntityKind::Membership => MEMBERSHIP_FIELDS,
    }
}

pub fn field(kind: EntityKind, name: &str) -> Option<&'static FieldSpec> {
    fields(kind).iter().find(|f| f.name == name)
}

/// Properties whose change can reorder a query of this kind.
pub fn is_sort_relevant(kind: EntityKind, property: &str) -> bool {
    property == "sync_state" || field(kind, property).is_some_and(|f| f.sort_relevant)
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityAction {
    Add,
    Remove,
    Change,
    Loaded,
    LoadedError,
    Sent,
    SentError,
}

impl EntityAction {
    pub const ALL: [EntityAction; 7] = [
        EntityAction::Add,
        EntityAction::Remove,
        EntityAction::Change,
        EntityAction::Loaded,
        EntityAction::LoadedError,
        EntityAction::Sent,
        EntityAction::SentError,
    ];
}

/// `"<plural>:<action>"`, e.g. `messages:change`.
pub fn event_name(kind: EntityKind, action: EntityAction) -> &'static str {
    use EntityAction::*;
    use EntityKind::*;
    match (kind, action) {
        (Conversation, Add) => "conversations:add",
        (Conversation, Remove) => "conversations:remove",
        (Conversation, Change) => "conversations:change",
        (Conversation, Loaded) => "conversations:loaded",
        (Conversation, LoadedError) => "conversations:loaded-error",
        (Conversation, Sent) => "conversations:sent",
        (Conversation, SentError) => "conversations:sent-error",
        (Channel, Add) => "channels:add",
        (Channel, Remove) => "channels:remove",
        (Channel, Change) => "channels:change",
        (Channel, Loaded) => "channels:loaded",
        (Channel, LoadedError) => "channels:loaded-error",
        (Channel, Sent) => "channels:sent",
        (Channel, SentError) => "channels:sent-error",
        (Message, Add) => "messages:add",
        (Message, Remove) => "messages:remove",
        (Message, Change) => "messages:change",
        (Message, Loaded) => "messages:loaded",
        (Message, LoadedError) => "messages:loaded-error",
        (Message, Sent) => "messages:sent",
        (Message, SentError) => "messages:sent-error",
        (Announcement, Add) => "announcements:add",
        (Announcement, Remove) => "announcements:remove",
        (Announcement, Change) => "announcements:change",
        (Announcement, Loaded) => "announcements:loaded",
        (Announcement, LoadedError) => "announcements:loaded-error",
        (Announcement, Sent) => "announcements:sent",
        (Announcement, SentError) => "announcements:sent-error",
        (Identity, Add) => "identities:add",
        (Identity, Remove) => "identities:remove",
        (Identity, Change) => "identities:change",
        (Identity, Loaded) => "identities:loaded",
        (Identity, LoadedError) => "identities:loaded-error",
        (Identity, Sent) => "identities:sent",
        (Identity, SentError) => "identities:sent-error",
        (Membership, Add) => "members:add",
        (Membership, Remove) => "members:remove",
        (Membership, Change) => "members:change",
        (Membership, Loaded) => "members:loaded",
        (Membership, LoadedError) => "members:loaded-error",
        (Membership, Sent) => "members:sent",
        (Membership, SentError) => "members:sent-error",
    }
}

pub fn entity_events(kind: EntityKind) -> Vec<&'static str> {
    let mut events: Vec<&'static str> = EntityAction::ALL
        .iter()
        .map(|action| event_name(kind, *action))
        .collect();
    events.push(EVENT_DESTROY);
    events
}

// ---------------------------------------------------------------------------
// Adjusters
// ---------------------------------------------------------------------------

fn expected(field: &'static str, what: &str, got: &Value) -> CourierError {
    CourierError::invalid_field(field, format!("expected {what}, got {got}"))
}

fn id_string(field: &'static str, value: Value) -> Result<Value> {
    match value {
        Value::String(s) if !s.is_empty() => Ok(Value::String(s)),
        other => Err(expected(field, "a non-empty id", &other)),
    }
}

fn string(field: &'static str, value: Value) -> Result<Value> {
    match value {
        Value::String(_) | Value::Null => Ok(value),
        other => Err(expected(field, "a string", &other)),
    }
}

fn timestamp(field: &'static str, value: Value) -> Result<Value> {
    match &value {
        Value::Null => Ok(value),
        Value::String(s) if parse_timestamp(s).is_some() => Ok(value),
        other => Err(expected(field, "an RFC 3339 timestamp", other)),
    }
}

fn integer(field: &'static str, value: Value) -> Result<Value> {
    match &value {
        Value::Null => Ok(value),
        Value::Number(n) if n.is_i64() => Ok(value),
        other => Err(expected(field, "an integer", other)),
    }
}

fn count(field: &'static str, value: Value) -> Result<Value> {
    match &value {
        Value::Number(n) if n.is_u64() => Ok(value),
        Value::Null => Ok(Value::from(0)),
        other => Err(expected(field, "a non-negative integer", other)),
    }
}

fn boolean(field: &'static str, value: Value) -> Result<Value> {
    match value {
        Value::Bool(_) => Ok(value),
        Value::Null => Ok(Value::Bool(false)),
        other => Err(expected(field, "a boolean", &other)),
    }
}

fn object(field: &'static str, value: Value) -> Result<Value> {
    match value {
        Value::Object(_) => Ok(value),
        Value::Null => Ok(Value::Object(Map::new())),
        other => Err(expected(field, "an object", &other)),
    }
}

fn array(field: &'static str, value: Value) -> Result<Value> {
    match value {
        Value::Array(_) => Ok(value),
        Value::Null => Ok(Value::Array(Vec::new())),
        other => Err(expected(field, "an array", &other)),
    }
}

/// `{"id": ..}` or a bare id string, stored as the id string.
fn reference(field: &'static str, value: Value) -> Result<Value> {
    if value.is_null() {
        return Ok(value);
    }
    reference_id(&value)
        .map(|id| Value::String(id.to_string()))
        .ok_or_else(|| expected(field, "an object reference", &value))
}

fn id_list(field: &'static str, value: Value) -> Result<Value> {
    match value {
        Value::Null => Ok(Value::Array(Vec::new())),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                reference_id(item)
                    .map(|id| Value::String(id.to_string()))
                    .ok_or_else(|| expected(field, "an object reference", item))
            })
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        other => Err(expected(field, "an array", &other)),
    }
}

/// Keep only what ordering and display need from an embedded last message.
fn message_summary(field: &'static str, value: Value) -> Result<Value> {
    match value {
        Value::Null => Ok(value),
        Value::String(id) => Ok(serde_json::json!({ "id": id })),
        Value::Object(map) => {
            let mut summary = Map::new();
            for key in ["id", "position", "sent_at"] {
                if let Some(v) = map.get(key) {
                    summary.insert(key.to_string(), v.clone());
                }
            }
            if let Some(sent_at) = summary.get("sent_at") {
                timestamp(field, sent_at.clone())?;
            }
            Ok(Value::Object(summary))
        }
        other => Err(expected(field, "a message", &other)),
    }
}

// ---------------------------------------------------------------------------
// Update hooks
// ---------------------------------------------------------------------------

fn rekey(entity: &Entity, old: &Value, new: &Value) {
    if let (Some(old), Some(new)) = (old.as_str(), new.as_str()) {
        entity.rekey(&EntityId::from(old), &EntityId::from(new));
    }
}

/// A message that was read drops its container's unread count.
fn read_receipt(entity: &Entity, old: &Value, new: &Value) {
    if old.as_bool() == Some(true) && new.as_bool() == Some(false) {
        entity.decrement_parent_unread();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_every_kind_has_an_id_field() {
        for kind in EntityKind::ALL {
            assert!(field(kind, "id").is_some(), "{kind} has no id");
        }
    }

    #[test]
    fn test_event_names_use_plural() {
        assert_eq!(event_name(EntityKind::Message, EntityAction::LoadedError), "messages:loaded-error");
        assert_eq!(event_name(EntityKind::Membership, EntityAction::Add), "members:add");
        assert!(entity_events(EntityKind::Identity).contains(&"destroy"));
    }

    #[test]
    fn test_reference_accepts_object_or_string() {
        let id = "layer:///conversations/c1";
        assert_eq!(reference("conversation", json!({"id": id})).unwrap(), json!(id));
        assert_eq!(reference("conversation", json!(id)).unwrap(), json!(id));
        assert!(reference("conversation", json!(5)).is_err());
    }

    #[test]
    fn test_timestamp_validation() {
        assert!(timestamp("created_at", json!("2024-01-01T00:00:00Z")).is_ok());
        assert!(timestamp("created_at", json!("yesterday")).is_err());
    }

    #[test]
    fn test_message_summary_is_trimmed() {
        let summary = message_summary(
            "last_message",
            json!({"id": "m", "position": 3, "sent_at": "2024-01-01T00:00:00Z", "parts": []}),
        )
        .unwrap();
        assert_eq!(summary, json!({"id": "m", "position": 3, "sent_at": "2024-01-01T00:00:00Z"}));
    }

    #[test]
    fn test_sort_relevance() {
        assert!(is_sort_relevant(EntityKind::Conversation, "last_message"));
        assert!(is_sort_relevant(EntityKind::Message, "position"));
        assert!(is_sort_relevant(EntityKind::Message, "sync_state"));
        assert!(!is_sort_relevant(EntityKind::Message, "is_unread"));
    }
}
