//! The client: owner of the registry, the transport and every live query.
//!
//! All entities and queries hold a weak back-reference; the [`Client`] handle
//! is cheap to clone. Object events bubble up to the client, so a single
//! `client.on("messages:add", ..)` sees every message.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use chrono::{SecondsFormat, Utc};
use serde_json::json;

use courier_net::Transport;
use courier_shared::{CourierError, EntityId, EntityKind, LocalSource, Record, Result};

use crate::config::ClientConfig;
use crate::entity::Entity;
use crate::events::{
    Event, EventCore, EventPayload, Evented, InternalId, SubscriptionId, EVENT_READY,
    EVENT_TYPING_CHANGE,
};
use crate::query::Query;
use crate::registry::{EvictionPolicy, Registry, SyncedOnly};
use crate::scheduler::Scheduler;
use crate::schema::{self, EntityAction};
use crate::sync::SyncState;
use crate::typing::TypingIndicators;

pub(crate) struct ClientInner {
    core: Rc<EventCore>,
    scheduler: Scheduler,
    config: ClientConfig,
    transport: Rc<dyn Transport>,
    local_source: RefCell<Option<Rc<dyn LocalSource>>>,
    registry: RefCell<Registry>,
    queries: RefCell<Vec<Weak<Query>>>,
    eviction: RefCell<Rc<dyn EvictionPolicy>>,
    pub(crate) typing: TypingIndicators,
    ready: Cell<bool>,
}

#[derive(Clone)]
pub struct Client {
    inner: Rc<ClientInner>,
}

#[derive(Clone, Default)]
pub(crate) struct WeakClient(Weak<ClientInner>);

impl WeakClient {
    pub(crate) fn upgrade(&self) -> Option<Client> {
        self.0.upgrade().map(|inner| Client { inner })
    }
}

fn client_events() -> Vec<&'static str> {
    let mut events: Vec<&'static str> = EntityKind::ALL
        .iter()
        .flat_map(|kind| {
            EntityAction::ALL
                .iter()
                .map(move |action| schema::event_name(*kind, *action))
        })
        .collect();
    events.push(EVENT_READY);
    events.push(EVENT_TYPING_CHANGE);
    events
}

impl Client {
    /// Create a client. It must be used from inside a
    /// [`tokio::task::LocalSet`].
    pub fn new(config: ClientConfig, transport: Rc<dyn Transport>) -> Self {
        let scheduler = Scheduler::new();
        let core = EventCore::new("client", client_events(), scheduler.clone());
        tracing::info!(base_url = %config.base_url, scheme = %config.id_scheme, "client created");

        Self {
            inner: Rc::new(ClientInner {
                core,
                scheduler,
                config,
                transport,
                local_source: RefCell::new(None),
                registry: RefCell::new(Registry::default()),
                queries: RefCell::new(Vec::new()),
                eviction: RefCell::new(Rc::new(SyncedOnly)),
                typing: TypingIndicators::default(),
                ready: Cell::new(false),
            }),
        }
    }

    pub fn with_local_source(self, source: Rc<dyn LocalSource>) -> Self {
        self.set_local_source(source);
        self
    }

    pub fn set_local_source(&self, source: Rc<dyn LocalSource>) {
        *self.inner.local_source.borrow_mut() = Some(source);
    }

    pub(crate) fn local_source(&self) -> Option<Rc<dyn LocalSource>> {
        self.inner.local_source.borrow().clone()
    }

    pub(crate) fn downgrade(&self) -> WeakClient {
        WeakClient(Rc::downgrade(&self.inner))
    }

    pub(crate) fn inner(&self) -> &ClientInner {
        &self.inner
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    pub(crate) fn transport(&self) -> Rc<dyn Transport> {
        self.inner.transport.clone()
    }

    pub fn internal_id(&self) -> InternalId {
        self.inner.core.id()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.core.is_destroyed()
    }

    // ------------------------------------------------------------------
    // Events and readiness
    // ------------------------------------------------------------------

    pub fn on(
        &self,
        event: &str,
        handler: impl Fn(&Event) + 'static,
        context: Option<&dyn Evented>,
    ) -> Result<SubscriptionId> {
        self.inner.core.on(event, handler, context.map(|c| c.event_core()))
    }

    pub fn once(
        &self,
        event: &str,
        handler: impl Fn(&Event) + 'static,
        context: Option<&dyn Evented>,
    ) -> Result<SubscriptionId> {
        self.inner.core.once(event, handler, context.map(|c| c.event_core()))
    }

    pub fn off(&self, event: Option<&str>, context: Option<&dyn Evented>) {
        self.inner.core.off(event, context.map(|c| c.event_core().id()));
    }

    pub(crate) fn trigger(&self, event: Event) {
        self.inner.core.trigger(event);
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.get()
    }

    /// Mark the session as authenticated; queries waiting on it start fetching.
    pub fn mark_ready(&self) {
        if self.inner.ready.replace(true) {
            return;
        }
        tracing::info!("client ready");
        self.inner.core.trigger(Event::new(EVENT_READY, EventPayload::None));
    }

    /// Run `callback` now if ready, otherwise once the client becomes ready.
    pub fn on_ready(&self, callback: impl FnOnce() + 'static, context: Option<&dyn Evented>) -> Result<()> {
        if self.is_ready() {
            callback();
            return Ok(());
        }
        let callback = RefCell::new(Some(callback));
        self.once(
            EVENT_READY,
            move |_| {
                if let Some(cb) = callback.borrow_mut().take() {
                    cb();
                }
            },
            context,
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Registry
    // ------------------------------------------------------------------

    pub fn get(&self, id: &EntityId) -> Option<Rc<Entity>> {
        self.inner.registry.borrow().find(id)
    }

    pub fn get_kind(&self, kind: EntityKind, id: &EntityId) -> Option<Rc<Entity>> {
        self.inner.registry.borrow().get(kind, id)
    }

    pub fn entities(&self, kind: EntityKind) -> Vec<Rc<Entity>> {
        self.inner.registry.borrow().entities(kind)
    }

    pub fn entity_count(&self, kind: EntityKind) -> usize {
        self.inner.registry.borrow().len(kind)
    }

    /// Insert without announcing; used for placeholders still loading.
    pub(crate) fn track(&self, entity: &Rc<Entity>) {
        if let Some(previous) = self.inner.registry.borrow_mut().insert(entity.clone()) {
            if !Rc::ptr_eq(&previous, entity) {
                tracing::warn!(id = %entity.id(), "replaced registered object");
            }
        }
    }

    /// Insert and fire `<plural>:add` on the next turn.
    pub(crate) fn register(&self, entity: &Rc<Entity>) {
        self.track(entity);
        self.announce(entity, EntityAction::Add);
    }

    pub(crate) fn announce(&self, entity: &Rc<Entity>, action: EntityAction) {
        let name = schema::event_name(entity.kind(), action);
        self.inner
            .core
            .trigger_async(Event::new(name, EventPayload::Entities(vec![entity.clone()])));
    }

    pub(crate) fn deregister(&self, entity: &Rc<Entity>) {
        let removed = self.inner.registry.borrow_mut().remove(entity);
        if removed {
            self.announce(entity, EntityAction::Remove);
        }
    }

    pub(crate) fn rekey(&self, kind: EntityKind, old: &EntityId, new: &EntityId) {
        if self.inner.registry.borrow_mut().rekey(kind, old, new) {
            tracing::debug!(%old, %new, "object id changed");
        } else {
            tracing::warn!(%old, %new, "id change not registered");
        }
    }

    // ------------------------------------------------------------------
    // Object creation
    // ------------------------------------------------------------------

    /// Create a local object that the server does not know about yet.
    pub fn create(&self, kind: EntityKind, mut record: Record) -> Result<Rc<Entity>> {
        if matches!(kind, EntityKind::Announcement | EntityKind::Identity) {
            return Err(CourierError::NotPermitted(format!("{kind} are created by the server")));
        }
        if kind == EntityKind::Message && record.parent_id().is_none() {
            return Err(CourierError::MissingField("conversation"));
        }
        if kind == EntityKind::Membership && record.get("channel").is_none() {
            return Err(CourierError::MissingField("channel"));
        }

        let id = match record.id() {
            Some(id) => id,
            None => EntityId::generate(&self.config().id_scheme, kind),
        };
        if self.get(&id).is_some() {
            return Err(CourierError::InvalidId(format!("{id} is already registered")));
        }
        record.insert("id", id.to_string());
        if kind.is_container() && record.created_at().is_none() {
            record.insert("created_at", Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true));
        }

        let entity = Entity::construct(self, kind, id, SyncState::New);
        entity.populate(&record, true)?;
        entity.finish_construction();
        self.register(&entity);
        Ok(entity)
    }

    pub fn create_conversation(&self, participants: &[&str], distinct: bool) -> Result<Rc<Entity>> {
        self.create(
            EntityKind::Conversation,
            Record::new()
                .with("participants", json!(participants))
                .with("distinct", distinct),
        )
    }

    pub fn create_message(&self, parent: &Entity, text: &str) -> Result<Rc<Entity>> {
        let parent_key = match parent.kind() {
            EntityKind::Conversation => "conversation",
            EntityKind::Channel => "channel",
            other => {
                return Err(CourierError::NotPermitted(format!("{other} cannot contain messages")))
            }
        };
        self.create(
            EntityKind::Message,
            Record::new()
                .with(parent_key, json!({ "id": parent.id() }))
                .with("parts", json!([{ "mime_type": "text/plain", "body": text }]))
                .with("is_unread", false),
        )
    }

    /// Return the registered object for a server record, creating it if this
    /// is the first time the id is seen.
    pub fn entity_from_record(&self, kind: EntityKind, record: &Record) -> Result<Rc<Entity>> {
        let id = record.id().ok_or(CourierError::MissingField("id"))?;

        if let Some(existing) = self.get(&id) {
            if existing.kind() != kind {
                return Err(CourierError::InvalidId(format!("{id} is not one of {kind}")));
            }
            // Local writes in flight win over possibly stale server data.
            if existing.pending_writes() == 0 {
                existing.populate(record, false)?;
            }
            return Ok(existing);
        }

        let entity = Entity::construct(self, kind, id, SyncState::Synced);
        entity.populate(record, false)?;
        entity.finish_construction();
        self.register(&entity);
        Ok(entity)
    }

    pub(crate) fn cache_records(&self, kind: EntityKind, records: &[Record]) {
        let Some(source) = self.local_source() else { return };
        if let Err(err) = source.store_records(kind, records) {
            tracing::warn!(kind = %kind, error = %err, "failed to cache records");
        }
    }

    // ------------------------------------------------------------------
    // Queries and eviction
    // ------------------------------------------------------------------

    pub(crate) fn register_query(&self, query: &Rc<Query>) {
        let mut queries = self.inner.queries.borrow_mut();
        queries.retain(|q| q.strong_count() > 0);
        queries.push(Rc::downgrade(query));
    }

    pub(crate) fn deregister_query(&self, id: InternalId) {
        self.inner
            .queries
            .borrow_mut()
            .retain(|q| q.upgrade().is_some_and(|q| q.internal_id() != id));
    }

    pub fn queries(&self) -> Vec<Rc<Query>> {
        self.inner
            .queries
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    fn is_held_by_query(&self, entity: &Rc<Entity>) -> bool {
        self.queries().iter().any(|q| q.holds(entity))
    }

    pub fn set_eviction_policy(&self, policy: impl EvictionPolicy + 'static) {
        *self.inner.eviction.borrow_mut() = Rc::new(policy);
    }

    /// Offer objects a query let go of for destruction. Objects still held
    /// by another query, or rejected by the eviction policy, survive.
    pub fn release(&self, entities: impl IntoIterator<Item = Rc<Entity>>) -> usize {
        let policy = self.inner.eviction.borrow().clone();
        let mut evicted = 0;
        for entity in entities {
            if entity.is_destroyed() || self.is_held_by_query(&entity) || !policy.may_evict(&entity) {
                continue;
            }
            if entity.destroy().is_ok() {
                evicted += 1;
            }
        }
        if evicted > 0 {
            tracing::debug!(evicted, "released objects");
        }
        evicted
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    pub fn destroy(&self) -> Result<()> {
        for query in self.queries() {
            if !query.is_destroyed() {
                query.destroy()?;
            }
        }
        let entities = self.inner.registry.borrow().all();
        for entity in entities {
            if !entity.is_destroyed() {
                entity.destroy()?;
            }
        }
        self.inner.typing.stop(self.scheduler());
        tracing::info!("client destroyed");
        self.inner.core.destroy()
    }
}

impl Evented for Client {
    fn event_core(&self) -> &Rc<EventCore> {
        &self.inner.core
    }
}
