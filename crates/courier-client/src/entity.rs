//! Client-side mirror of one server object.
//!
//! An [`Entity`] is shared (`Rc`) between the registry, queries and the
//! application. Fields are stored as JSON values keyed by the per-kind tables
//! in [`crate::schema`]; every write goes through the same
//! adjust → compare → assign → hook pipeline and produces a coalesced
//! `<plural>:change` event.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use courier_net::{Request, Response, TransportError};
use courier_shared::record::parse_timestamp;
use courier_shared::{CourierError, EntityId, EntityKind, Record, Result, SortField};

use crate::client::{Client, WeakClient};
use crate::events::{
    Event, EventCore, EventPayload, Evented, PropertyChange, SaveOutcome, SubscriptionId,
};
use crate::schema::{self, EntityAction, FieldSpec};
use crate::sync::{SyncState, SyncTracker, Transition};

pub struct Entity {
    me: Weak<Entity>,
    kind: EntityKind,
    core: Rc<EventCore>,
    client: WeakClient,
    fields: RefCell<BTreeMap<&'static str, Value>>,
    sync: SyncTracker,
    /// Suppresses events and hooks while the initial field values arrive.
    constructing: Cell<bool>,
    /// Fields edited locally since the last save.
    dirty: RefCell<Vec<&'static str>>,
}

/// Immutable copy of an entity's fields, used by snapshot queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub id: EntityId,
    pub kind: EntityKind,
    pub sync_state: SyncState,
    pub fields: BTreeMap<String, Value>,
}

impl Snapshot {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}

impl Entity {
    pub(crate) fn construct(client: &Client, kind: EntityKind, id: EntityId, state: SyncState) -> Rc<Self> {
        let core = EventCore::new(kind.plural(), schema::entity_events(kind), client.scheduler().clone());
        core.set_parent(client.event_core());

        let mut fields = BTreeMap::new();
        fields.insert("id", Value::String(id.to_string()));

        Rc::new_cyclic(|me| Self {
            me: me.clone(),
            kind,
            core,
            client: client.downgrade(),
            fields: RefCell::new(fields),
            sync: SyncTracker::new(state),
            constructing: Cell::new(true),
            dirty: RefCell::new(Vec::new()),
        })
    }

    pub(crate) fn finish_construction(&self) {
        self.constructing.set(false);
    }

    pub(crate) fn client(&self) -> Option<Client> {
        self.client.upgrade()
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn id(&self) -> EntityId {
        self.fields
            .borrow()
            .get("id")
            .and_then(Value::as_str)
            .map(EntityId::from)
            .unwrap_or_else(|| EntityId::new(String::new()))
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn internal_id(&self) -> crate::events::InternalId {
        self.core.id()
    }

    pub fn get(&self, field: &str) -> Option<Value> {
        self.fields.borrow().get(field).cloned()
    }

    pub fn str_field(&self, field: &str) -> Option<String> {
        self.fields
            .borrow()
            .get(field)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.str_field("created_at").as_deref().and_then(parse_timestamp)
    }

    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        self.str_field("sent_at").as_deref().and_then(parse_timestamp)
    }

    pub fn position(&self) -> Option<i64> {
        self.fields.borrow().get("position").and_then(Value::as_i64)
    }

    pub fn last_message_sent_at(&self) -> Option<DateTime<Utc>> {
        self.fields
            .borrow()
            .get("last_message")
            .and_then(|m| m.get("sent_at"))
            .and_then(Value::as_str)
            .and_then(parse_timestamp)
    }

    /// Sort key for container queries. Recomputed on every call so ordering
    /// always reflects current field values.
    pub fn sort_key(&self, sort: SortField) -> Option<DateTime<Utc>> {
        match sort {
            SortField::LastMessage => self.last_message_sent_at().or_else(|| self.created_at()),
            _ => self.created_at(),
        }
    }

    /// Owning conversation or channel.
    pub fn parent_id(&self) -> Option<EntityId> {
        let fields = self.fields.borrow();
        ["conversation", "channel"]
            .iter()
            .find_map(|key| fields.get(*key).and_then(Value::as_str))
            .map(EntityId::from)
    }

    pub fn sync_state(&self) -> SyncState {
        self.sync.state()
    }

    pub fn is_new(&self) -> bool {
        self.sync.is_new()
    }

    pub fn is_saving(&self) -> bool {
        self.sync.is_saving()
    }

    pub fn is_saved(&self) -> bool {
        self.sync.is_saved()
    }

    pub fn is_synced(&self) -> bool {
        self.sync.is_synced()
    }

    pub fn is_loading(&self) -> bool {
        self.sync.is_loading()
    }

    /// Not yet acknowledged by the server.
    pub fn is_unsynced(&self) -> bool {
        self.sync.is_new() || self.sync.is_saving()
    }

    pub fn is_destroyed(&self) -> bool {
        self.core.is_destroyed()
    }

    pub fn pending_writes(&self) -> u32 {
        self.sync.pending_writes()
    }

    pub fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            id: self.id(),
            kind: self.kind,
            sync_state: self.sync.state(),
            fields: self
                .fields
                .borrow()
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }

    /// Non-null fields as a server record.
    pub fn to_record(&self) -> Record {
        let mut record = Record::new();
        for (key, value) in self.fields.borrow().iter() {
            if !value.is_null() {
                record.insert(*key, value.clone());
            }
        }
        record
    }

    // ------------------------------------------------------------------
    // Field writes
    // ------------------------------------------------------------------

    /// Set a field from application code. Returns whether the value changed.
    pub fn set(&self, field: &str, value: impl Into<Value>) -> Result<bool> {
        if self.is_destroyed() {
            return Err(CourierError::Destroyed);
        }
        if self.is_loading() {
            return Err(CourierError::NotPermitted(format!("{} is still loading", self.id())));
        }
        let spec = schema::field(self.kind, field)
            .ok_or_else(|| CourierError::invalid_field(field, format!("not a field of {}", self.kind)))?;

        let changed = self.write_field(spec, value.into())?;
        if changed && spec.name != "id" {
            let mut dirty = self.dirty.borrow_mut();
            if !dirty.contains(&spec.name) {
                dirty.push(spec.name);
            }
        }
        Ok(changed)
    }

    /// Set a field without marking it for the next save.
    pub(crate) fn update_field(&self, field: &str, value: Value) -> Result<bool> {
        let spec = schema::field(self.kind, field)
            .ok_or_else(|| CourierError::invalid_field(field, format!("not a field of {}", self.kind)))?;
        self.write_field(spec, value)
    }

    pub(crate) fn write_field(&self, spec: &'static FieldSpec, value: Value) -> Result<bool> {
        let value = match spec.adjust {
            Some(adjust) => adjust(spec.name, value)?,
            None => value,
        };

        let old = {
            let mut fields = self.fields.borrow_mut();
            let old = fields.get(spec.name).cloned().unwrap_or(Value::Null);
            if old == value {
                return Ok(false);
            }
            fields.insert(spec.name, value.clone());
            old
        };

        if self.constructing.get() {
            return Ok(true);
        }
        if let Some(hook) = spec.on_updated {
            hook(self, &old, &value);
        }
        self.emit_changes(vec![PropertyChange::new(spec.name, old, value)]);
        Ok(true)
    }

    /// Copy every known field from a server record.
    ///
    /// With `strict`, the first invalid value aborts; otherwise invalid
    /// values are logged and skipped.
    pub(crate) fn populate(&self, record: &Record, strict: bool) -> Result<()> {
        for (key, value) in record.iter() {
            let Some(spec) = schema::field(self.kind, key) else {
                continue;
            };
            match self.write_field(spec, value.clone()) {
                Ok(_) => {}
                Err(err) if strict => return Err(err),
                Err(err) => {
                    tracing::warn!(id = %self.id(), field = %key, error = %err, "ignoring invalid field");
                }
            }
        }
        Ok(())
    }

    fn emit_changes(&self, changes: Vec<PropertyChange>) {
        let Some(me) = self.me.upgrade() else { return };
        let name = schema::event_name(self.kind, EntityAction::Change);
        self.core
            .trigger_async(Event::new(name, EventPayload::Changes(changes)).with_target(me));
    }

    // ------------------------------------------------------------------
    // Sync state
    // ------------------------------------------------------------------

    fn apply_transition(&self, transition: Transition) {
        let Some((old, new)) = transition else { return };
        tracing::trace!(id = %self.id(), from = old.as_str(), to = new.as_str(), "sync state");
        if !self.constructing.get() {
            self.emit_changes(vec![PropertyChange::new(
                "sync_state",
                json!(old.as_str()),
                json!(new.as_str()),
            )]);
        }
    }

    pub(crate) fn begin_write(&self) {
        self.apply_transition(self.sync.begin_write());
    }

    pub(crate) fn complete_write(&self) {
        self.apply_transition(self.sync.complete_write());
    }

    pub(crate) fn fail_write(&self) {
        self.apply_transition(self.sync.fail_write());
    }

    pub(crate) fn begin_load(&self) {
        self.apply_transition(self.sync.begin_load());
    }

    pub(crate) fn load_succeeded(&self) {
        self.apply_transition(self.sync.load_succeeded());
    }

    pub(crate) fn load_failed(&self) {
        self.apply_transition(self.sync.load_failed());
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    pub fn on(
        &self,
        event: &str,
        handler: impl Fn(&Event) + 'static,
        context: Option<&dyn Evented>,
    ) -> Result<SubscriptionId> {
        self.core.on(event, handler, context.map(|c| c.event_core()))
    }

    pub fn once(
        &self,
        event: &str,
        handler: impl Fn(&Event) + 'static,
        context: Option<&dyn Evented>,
    ) -> Result<SubscriptionId> {
        self.core.once(event, handler, context.map(|c| c.event_core()))
    }

    pub fn off(&self, event: Option<&str>, context: Option<&dyn Evented>) {
        self.core.off(event, context.map(|c| c.event_core().id()));
    }

    /// Deliver an event immediately; it bubbles to the client.
    pub fn trigger(&self, name: &str, payload: EventPayload) {
        let mut event = Event::new(name, payload);
        event.target = self.me.upgrade();
        self.core.trigger(event);
    }

    /// Queue an event; same-named change events are folded together.
    pub fn trigger_async(&self, name: &str, payload: EventPayload) {
        let mut event = Event::new(name, payload);
        event.target = self.me.upgrade();
        self.core.trigger_async(event);
    }

    pub(crate) fn trigger_action(&self, action: EntityAction, payload: EventPayload) {
        self.trigger(schema::event_name(self.kind, action), payload);
    }

    pub fn set_events_disabled(&self, disabled: bool) {
        self.core.set_events_disabled(disabled);
    }

    // ------------------------------------------------------------------
    // Registry hooks
    // ------------------------------------------------------------------

    pub(crate) fn rekey(&self, old: &EntityId, new: &EntityId) {
        if let Some(client) = self.client() {
            client.rekey(self.kind, old, new);
        }
    }

    pub(crate) fn decrement_parent_unread(&self) {
        let (Some(client), Some(parent)) = (self.client(), self.parent_id()) else {
            return;
        };
        let Some(container) = client.get(&parent) else { return };
        let unread = container
            .get("unread_message_count")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        if unread > 0 {
            if let Err(err) = container.update_field("unread_message_count", Value::from(unread - 1)) {
                tracing::warn!(id = %parent, error = %err, "could not update unread count");
            }
        }
    }

    // ------------------------------------------------------------------
    // Save
    // ------------------------------------------------------------------

    /// Send local state to the server: a create for new objects, otherwise a
    /// patch of the fields edited since the last save.
    ///
    /// Completion is reported through `<plural>:sent` / `<plural>:sent-error`.
    pub fn save(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(CourierError::Destroyed);
        }
        if self.is_loading() || self.is_saving() {
            return Err(CourierError::NotPermitted(format!(
                "{} cannot be saved while {}",
                self.id(),
                self.sync_state().as_str()
            )));
        }
        let client = self
            .client()
            .ok_or_else(|| CourierError::NotPermitted("client has been destroyed".into()))?;

        let creating = self.is_new();
        let request = if creating {
            Request::post(self.create_path()?, self.to_record().into_value())
        } else {
            let dirty = std::mem::take(&mut *self.dirty.borrow_mut());
            if dirty.is_empty() {
                return Ok(());
            }
            let ops: Vec<Value> = dirty
                .iter()
                .map(|name| {
                    json!({
                        "operation": "set",
                        "property": name,
                        "value": self.get(name).unwrap_or(Value::Null),
                    })
                })
                .collect();
            Request::patch(self.resource_path()?, Value::Array(ops))
        };
        if creating {
            self.dirty.borrow_mut().clear();
        }

        tracing::debug!(id = %self.id(), method = request.method.as_str(), path = %request.path, "saving");
        self.begin_write();

        let response = client.transport().request(request);
        let me = self.me.clone();
        client.scheduler().spawn(async move {
            let result = response.await;
            if let Some(entity) = me.upgrade() {
                entity.finish_save(creating, result);
            }
        });
        Ok(())
    }

    fn finish_save(&self, creating: bool, result: std::result::Result<Response, TransportError>) {
        if self.is_destroyed() {
            return;
        }

        let mut merged = None;
        let outcome = match result {
            Ok(resp) if resp.success => {
                if creating {
                    match Record::from_value(resp.data) {
                        Ok(record) => merged = self.accept_server_record(&record),
                        Err(err) => tracing::warn!(id = %self.id(), error = %err, "unexpected create response"),
                    }
                    Ok(SaveOutcome::Created)
                } else {
                    Ok(SaveOutcome::Updated)
                }
            }
            // Distinct create collided with an existing object; adopt it.
            Ok(resp) if creating && resp.status == 409 => {
                match resp.data.get("data").cloned().map(Record::from_value) {
                    Some(Ok(record)) => {
                        merged = self.accept_server_record(&record);
                        Ok(SaveOutcome::Found)
                    }
                    _ => Err(CourierError::Remote {
                        status: resp.status,
                        message: resp.message(),
                    }),
                }
            }
            Ok(resp) => Err(CourierError::Remote {
                status: resp.status,
                message: resp.message(),
            }),
            Err(err) => Err(CourierError::Remote {
                status: 0,
                message: err.to_string(),
            }),
        };

        match outcome {
            Ok(outcome) => {
                self.complete_write();
                tracing::debug!(id = %self.id(), ?outcome, "saved");
                self.trigger_action(EntityAction::Sent, EventPayload::Sent(outcome));
                if let Some(survivor) = merged {
                    tracing::debug!(id = %survivor.id(), local = %self.id(), "merged into held instance");
                    if let Err(err) = self.destroy() {
                        tracing::debug!(id = %self.id(), error = %err, "local copy already destroyed");
                    }
                }
            }
            Err(err) => {
                self.fail_write();
                tracing::warn!(id = %self.id(), error = %err, "save failed");
                self.trigger_action(EntityAction::SentError, EventPayload::Error(err));
            }
        }
    }

    /// Apply the server's copy of a newly created object. When another live
    /// instance already holds the server id, the record goes to that instance
    /// and it is returned; the local copy must then be destroyed.
    fn accept_server_record(&self, record: &Record) -> Option<Rc<Entity>> {
        let client = self.client();
        let held = match (&client, record.id()) {
            (Some(client), Some(id)) if id != self.id() => client
                .get_kind(self.kind, &id)
                .filter(|other| !std::ptr::eq(Rc::as_ptr(other), self)),
            _ => None,
        };

        let target: &Entity = held.as_deref().unwrap_or(self);
        if let Err(err) = target.populate(record, false) {
            tracing::warn!(id = %target.id(), error = %err, "could not apply server record");
        }
        if let Some(client) = client {
            client.cache_records(self.kind, std::slice::from_ref(record));
        }
        held
    }

    /// REST path of this object.
    pub(crate) fn resource_path(&self) -> Result<String> {
        let id = self.id();
        id.path()
            .map(str::to_string)
            .ok_or_else(|| CourierError::InvalidId(id.to_string()))
    }

    fn create_path(&self) -> Result<String> {
        match self.kind {
            EntityKind::Conversation | EntityKind::Channel => Ok(format!("/{}", self.kind.plural())),
            EntityKind::Message => {
                let parent = self.parent_id().ok_or(CourierError::MissingField("conversation"))?;
                let path = parent.path().ok_or_else(|| CourierError::InvalidId(parent.to_string()))?;
                Ok(format!("{path}/messages"))
            }
            EntityKind::Membership => {
                let channel = self
                    .str_field("channel")
                    .map(EntityId::from)
                    .ok_or(CourierError::MissingField("channel"))?;
                let path = channel.path().ok_or_else(|| CourierError::InvalidId(channel.to_string()))?;
                Ok(format!("{path}/members"))
            }
            EntityKind::Announcement | EntityKind::Identity => Err(CourierError::NotPermitted(
                format!("{} are created by the server", self.kind),
            )),
        }
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Fire `destroy`, detach all listeners and drop out of the registry.
    /// Destroying twice is an error.
    pub fn destroy(&self) -> Result<()> {
        self.core.destroy()?;
        if let (Some(client), Some(me)) = (self.client(), self.me.upgrade()) {
            client.deregister(&me);
        }
        tracing::trace!(id = %self.id(), "destroyed");
        Ok(())
    }
}

impl Evented for Entity {
    fn event_core(&self) -> &Rc<EventCore> {
        &self.core
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.id())
            .field("sync_state", &self.sync.state())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_net::{Method, ResponseHeaders};
    use tokio::task::LocalSet;

    use crate::testing::{conversation, conversation_id, message, ready_client, record, recorder, settle};

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_changes_fold_into_one_event() {
        LocalSet::new()
            .run_until(async {
                let (client, _transport) = ready_client();
                let entity = client
                    .entity_from_record(EntityKind::Conversation, &record(conversation("c1", "2024-01-01T00:00:00Z")))
                    .unwrap();
                settle().await;

                let (events, handler) = recorder();
                entity.on("conversations:change", handler, None).unwrap();
                let (bubbled, on_client) = recorder();
                client.on("conversations:change", on_client, None).unwrap();

                assert!(entity.set("metadata", json!({ "title": "ring" })).unwrap());
                assert!(entity.set("unread_message_count", 3).unwrap());
                assert!(!entity.set("unread_message_count", 3).unwrap());
                settle().await;

                let events = events.borrow();
                assert_eq!(events.len(), 1);
                assert!(Rc::ptr_eq(events[0].target.as_ref().unwrap(), &entity));
                let properties: Vec<&str> = events[0].changes().iter().map(|c| c.property.as_str()).collect();
                assert_eq!(properties, vec!["metadata", "unread_message_count"]);
                assert_eq!(bubbled.borrow().len(), 1);
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_three_edits_fold_in_order() {
        LocalSet::new()
            .run_until(async {
                let (client, _transport) = ready_client();
                let entity = client
                    .entity_from_record(EntityKind::Conversation, &record(conversation("c1", "2024-01-01T00:00:00Z")))
                    .unwrap();
                settle().await;
                let (events, handler) = recorder();
                entity.on("conversations:change", handler, None).unwrap();

                entity.set("unread_message_count", 1).unwrap();
                entity.set("metadata", json!({ "title": "ring" })).unwrap();
                entity.set("unread_message_count", 2).unwrap();
                settle().await;

                let events = events.borrow();
                assert_eq!(events.len(), 1);
                let changes: Vec<(&str, &Value)> = events[0]
                    .changes()
                    .iter()
                    .map(|c| (c.property.as_str(), &c.new_value))
                    .collect();
                assert_eq!(
                    changes,
                    vec![
                        ("unread_message_count", &json!(1)),
                        ("metadata", &json!({ "title": "ring" })),
                        ("unread_message_count", &json!(2)),
                    ]
                );
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_invalid_values_are_rejected() {
        LocalSet::new()
            .run_until(async {
                let (client, _transport) = ready_client();
                let entity = client.create_conversation(&["frodo"], true).unwrap();
                assert!(matches!(entity.set("created_at", "yesterday"), Err(CourierError::InvalidField { .. })));
                assert!(matches!(entity.set("no_such_field", 1), Err(CourierError::InvalidField { .. })));
                assert!(matches!(entity.on("bogus", |_| {}, None), Err(CourierError::UnsupportedEvent { .. })));
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_create_is_posted_and_adopts_server_id() {
        LocalSet::new()
            .run_until(async {
                let (client, transport) = ready_client();
                transport.respond(
                    "/conversations",
                    Response::ok(conversation("server1", "2024-01-01T00:00:00Z")),
                );
                let entity = client.create_conversation(&["frodo", "sam"], true).unwrap();
                let local_id = entity.id();
                let (sent, handler) = recorder();
                entity.on("conversations:sent", handler, None).unwrap();

                entity.save().unwrap();
                assert_eq!(entity.sync_state(), SyncState::Saving);
                assert!(matches!(entity.save(), Err(CourierError::NotPermitted(_))));
                settle().await;

                let requests = transport.requests();
                assert_eq!(requests.len(), 1);
                assert_eq!(requests[0].method, Method::Post);
                assert_eq!(requests[0].body.as_ref().unwrap()["distinct"], json!(true));

                assert_eq!(entity.sync_state(), SyncState::Synced);
                assert_eq!(entity.id().as_str(), conversation_id("server1"));
                assert!(client.get(&local_id).is_none());
                assert!(Rc::ptr_eq(&client.get(&entity.id()).unwrap(), &entity));
                assert!(matches!(sent.borrow()[0].payload, EventPayload::Sent(SaveOutcome::Created)));
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_conflicting_distinct_create_is_found() {
        LocalSet::new()
            .run_until(async {
                let (client, transport) = ready_client();
                transport.respond(
                    "/conversations",
                    Response {
                        status: 409,
                        success: false,
                        data: json!({
                            "message": "distinct conversation exists",
                            "data": conversation("existing", "2023-06-01T00:00:00Z"),
                        }),
                        headers: ResponseHeaders::default(),
                    },
                );
                let entity = client.create_conversation(&["frodo", "sam"], true).unwrap();
                let (sent, handler) = recorder();
                entity.on("conversations:sent", handler, None).unwrap();

                entity.save().unwrap();
                settle().await;

                assert_eq!(entity.sync_state(), SyncState::Synced);
                assert_eq!(entity.id().as_str(), conversation_id("existing"));
                assert!(matches!(sent.borrow()[0].payload, EventPayload::Sent(SaveOutcome::Found)));
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_conflict_with_held_object_keeps_one_instance() {
        LocalSet::new()
            .run_until(async {
                let (client, transport) = ready_client();
                let held = client
                    .entity_from_record(EntityKind::Conversation, &record(conversation("existing", "2023-06-01T00:00:00Z")))
                    .unwrap();
                let mut server_copy = conversation("existing", "2023-06-01T00:00:00Z");
                server_copy["unread_message_count"] = json!(4);
                transport.respond(
                    "/conversations",
                    Response {
                        status: 409,
                        success: false,
                        data: json!({ "message": "distinct conversation exists", "data": server_copy }),
                        headers: ResponseHeaders::default(),
                    },
                );

                let local = client.create_conversation(&["frodo", "sam"], true).unwrap();
                let local_id = local.id();
                let (sent, handler) = recorder();
                local.on("conversations:sent", handler, None).unwrap();
                local.save().unwrap();
                settle().await;

                assert!(matches!(sent.borrow()[0].payload, EventPayload::Sent(SaveOutcome::Found)));
                assert!(local.is_destroyed());
                assert!(!held.is_destroyed());
                assert!(Rc::ptr_eq(&client.get(&held.id()).unwrap(), &held));
                assert!(client.get(&local_id).is_none());
                assert_eq!(held.get("unread_message_count"), Some(json!(4)));
                assert_eq!(client.entities(EntityKind::Conversation).len(), 1);
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_failed_create_returns_to_new() {
        LocalSet::new()
            .run_until(async {
                let (client, transport) = ready_client();
                transport.respond("/conversations", Response::error(500, "boom"));
                let entity = client.create_conversation(&["frodo"], false).unwrap();
                let (errors, handler) = recorder();
                entity.on("conversations:sent-error", handler, None).unwrap();

                entity.save().unwrap();
                settle().await;

                assert_eq!(entity.sync_state(), SyncState::New);
                assert_eq!(entity.pending_writes(), 0);
                assert_eq!(errors.borrow().len(), 1);
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_save_patches_only_edited_fields() {
        LocalSet::new()
            .run_until(async {
                let (client, transport) = ready_client();
                transport.respond("/conversations/c1", Response::ok(json!({})));
                let entity = client
                    .entity_from_record(EntityKind::Conversation, &record(conversation("c1", "2024-01-01T00:00:00Z")))
                    .unwrap();

                entity.save().unwrap();
                assert!(transport.requests().is_empty());

                entity.set("metadata", json!({ "title": "ring" })).unwrap();
                entity.save().unwrap();
                assert_eq!(entity.sync_state(), SyncState::Syncing);
                settle().await;

                let requests = transport.requests();
                assert_eq!(requests.len(), 1);
                assert_eq!(requests[0].method, Method::Patch);
                assert_eq!(
                    requests[0].body,
                    Some(json!([{ "operation": "set", "property": "metadata", "value": { "title": "ring" } }]))
                );
                assert_eq!(entity.sync_state(), SyncState::Synced);
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_reading_a_message_decrements_unread() {
        LocalSet::new()
            .run_until(async {
                let (client, _transport) = ready_client();
                let mut value = conversation("c1", "2024-01-01T00:00:00Z");
                value["unread_message_count"] = json!(2);
                let parent = client.entity_from_record(EntityKind::Conversation, &record(value)).unwrap();
                let mut value = message("m1", "c1", 1);
                value["is_unread"] = json!(true);
                let message = client.entity_from_record(EntityKind::Message, &record(value)).unwrap();

                message.set("is_unread", false).unwrap();
                assert_eq!(parent.get("unread_message_count"), Some(json!(1)));
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_destroy_is_announced_once() {
        LocalSet::new()
            .run_until(async {
                let (client, _transport) = ready_client();
                let entity = client.create_conversation(&["frodo"], false).unwrap();
                settle().await;
                let (removed, handler) = recorder();
                client.on("conversations:remove", handler, None).unwrap();
                let (destroyed, on_destroy) = recorder();
                entity.on("destroy", on_destroy, None).unwrap();

                entity.destroy().unwrap();
                assert_eq!(entity.destroy(), Err(CourierError::Destroyed));
                assert_eq!(entity.set("distinct", true), Err(CourierError::Destroyed));
                settle().await;

                assert_eq!(destroyed.borrow().len(), 1);
                assert_eq!(removed.borrow().len(), 1);
                assert!(client.get(&entity.id()).is_none());
            })
            .await;
    }
}
