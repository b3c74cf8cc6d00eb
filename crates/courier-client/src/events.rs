//! Named-event emitter shared by entities, queries and the client.
//!
//! Every emitter owns an [`EventCore`]. Handlers can be registered with a
//! *context* (another emitter); the context records a back-reference so that
//! destroying it unbinds all of its handlers from every emitter it listened to.
//!
//! Two delivery modes exist:
//! - [`EventCore::trigger`] calls handlers immediately, then bubbles the
//!   event to the parent emitter (except `destroy`).
//! - [`EventCore::trigger_async`] queues the event and flushes the queue on a
//!   later turn. Queued change events of the same name are folded into one
//!   event whose change list is the concatenation, in order.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;

use courier_shared::{CourierError, Result};

use crate::entity::Entity;
use crate::query::QueryChange;
use crate::scheduler::Scheduler;
use crate::typing::TypingChange;

pub const EVENT_DESTROY: &str = "destroy";
pub const EVENT_READY: &str = "ready";
pub const EVENT_TYPING_CHANGE: &str = "typing-indicator-change";
pub const EVENT_QUERY_CHANGE: &str = "change";
pub const EVENT_QUERY_ERROR: &str = "error";

/// Process-unique id for an emitter. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InternalId(u64);

impl InternalId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for InternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// One changed property in a change event.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyChange {
    pub property: String,
    pub old_value: Value,
    pub new_value: Value,
}

impl PropertyChange {
    pub fn new(property: impl Into<String>, old_value: Value, new_value: Value) -> Self {
        Self {
            property: property.into(),
            old_value,
            new_value,
        }
    }
}

/// How a save was resolved by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// A new object was created.
    Created,
    /// The server already had a matching object and returned it instead.
    Found,
    /// An existing object was patched.
    Updated,
}

#[derive(Debug, Clone)]
pub enum EventPayload {
    None,
    Changes(Vec<PropertyChange>),
    Entities(Vec<Rc<Entity>>),
    Error(CourierError),
    Sent(SaveOutcome),
    Query(QueryChange),
    Typing(TypingChange),
}

#[derive(Debug, Clone)]
pub struct Event {
    pub name: String,
    pub target: Option<Rc<Entity>>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(name: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            name: name.into(),
            target: None,
            payload,
        }
    }

    pub fn with_target(mut self, target: Rc<Entity>) -> Self {
        self.target = Some(target);
        self
    }

    pub fn changes(&self) -> &[PropertyChange] {
        match &self.payload {
            EventPayload::Changes(changes) => changes,
            _ => &[],
        }
    }

    /// The change record for `property`, if this event carries one.
    pub fn change(&self, property: &str) -> Option<&PropertyChange> {
        self.changes().iter().find(|c| c.property == property)
    }

    pub fn entities(&self) -> &[Rc<Entity>] {
        match &self.payload {
            EventPayload::Entities(entities) => entities,
            _ => &[],
        }
    }
}

pub type Handler = Rc<dyn Fn(&Event)>;

struct Subscription {
    id: SubscriptionId,
    event: String,
    handler: Handler,
    context: Option<InternalId>,
    once: bool,
}

/// Anything that owns an [`EventCore`] and can therefore be used as a
/// subscription context.
pub trait Evented {
    fn event_core(&self) -> &Rc<EventCore>;
}

pub struct EventCore {
    id: InternalId,
    label: String,
    supported: Vec<&'static str>,
    scheduler: Scheduler,
    handlers: RefCell<Vec<Subscription>>,
    next_subscription: Cell<u64>,
    /// Emitters this core is a subscription context on.
    bindings: RefCell<Vec<Weak<EventCore>>>,
    pending: RefCell<Vec<Event>>,
    parent: RefCell<Option<Weak<EventCore>>>,
    events_disabled: Cell<bool>,
    destroyed: Cell<bool>,
}

impl EventCore {
    pub fn new(label: impl Into<String>, supported: Vec<&'static str>, scheduler: Scheduler) -> Rc<Self> {
        Rc::new(Self {
            id: InternalId::next(),
            label: label.into(),
            supported,
            scheduler,
            handlers: RefCell::new(Vec::new()),
            next_subscription: Cell::new(1),
            bindings: RefCell::new(Vec::new()),
            pending: RefCell::new(Vec::new()),
            parent: RefCell::new(None),
            events_disabled: Cell::new(false),
            destroyed: Cell::new(false),
        })
    }

    pub fn id(&self) -> InternalId {
        self.id
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn supports(&self, event: &str) -> bool {
        event == EVENT_DESTROY || self.supported.iter().any(|e| *e == event)
    }

    pub fn set_parent(&self, parent: &Rc<EventCore>) {
        *self.parent.borrow_mut() = Some(Rc::downgrade(parent));
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.get()
    }

    pub fn events_disabled(&self) -> bool {
        self.events_disabled.get()
    }

    pub fn set_events_disabled(&self, disabled: bool) {
        self.events_disabled.set(disabled);
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    pub fn on(
        self: &Rc<Self>,
        event: &str,
        handler: impl Fn(&Event) + 'static,
        context: Option<&Rc<EventCore>>,
    ) -> Result<SubscriptionId> {
        self.subscribe(event, Rc::new(handler), context, false)
    }

    pub fn once(
        self: &Rc<Self>,
        event: &str,
        handler: impl Fn(&Event) + 'static,
        context: Option<&Rc<EventCore>>,
    ) -> Result<SubscriptionId> {
        self.subscribe(event, Rc::new(handler), context, true)
    }

    fn subscribe(
        self: &Rc<Self>,
        event: &str,
        handler: Handler,
        context: Option<&Rc<EventCore>>,
        once: bool,
    ) -> Result<SubscriptionId> {
        if self.destroyed.get() {
            return Err(CourierError::Destroyed);
        }
        if !self.supports(event) {
            return Err(CourierError::UnsupportedEvent {
                event: event.to_string(),
                emitter: self.label.clone(),
            });
        }

        let id = SubscriptionId(self.next_subscription.get());
        self.next_subscription.set(id.0 + 1);

        if let Some(ctx) = context {
            let mut bindings = ctx.bindings.borrow_mut();
            let already = bindings
                .iter()
                .any(|b| b.upgrade().is_some_and(|b| Rc::ptr_eq(&b, self)));
            if !already {
                bindings.push(Rc::downgrade(self));
            }
        }

        self.handlers.borrow_mut().push(Subscription {
            id,
            event: event.to_string(),
            handler,
            context: context.map(|c| c.id),
            once,
        });
        Ok(id)
    }

    /// Remove handlers matching the event name and/or context. `None` for
    /// both removes everything.
    pub fn off(&self, event: Option<&str>, context: Option<InternalId>) {
        self.handlers.borrow_mut().retain(|s| {
            let name_matches = event.map_or(true, |e| s.event == e);
            let ctx_matches = context.map_or(true, |c| s.context == Some(c));
            !(name_matches && ctx_matches)
        });
    }

    pub fn off_subscription(&self, id: SubscriptionId) {
        self.handlers.borrow_mut().retain(|s| s.id != id);
    }

    pub fn handler_count(&self, event: &str) -> usize {
        self.handlers.borrow().iter().filter(|s| s.event == event).count()
    }

    // ------------------------------------------------------------------
    // Delivery
    // ------------------------------------------------------------------

    /// Deliver an event now, then bubble it to the parent.
    pub fn trigger(&self, event: Event) {
        if self.destroyed.get() || self.events_disabled.get() {
            return;
        }
        if !self.supports(&event.name) {
            tracing::warn!(emitter = %self.label, event = %event.name, "triggered unsupported event");
        }

        // Snapshot first: handlers may subscribe or unsubscribe while running.
        let handlers: Vec<Handler> = {
            let mut subs = self.handlers.borrow_mut();
            let matching = subs
                .iter()
                .filter(|s| s.event == event.name)
                .map(|s| s.handler.clone())
                .collect();
            subs.retain(|s| !(s.once && s.event == event.name));
            matching
        };
        for handler in handlers {
            handler(&event);
        }

        if event.name != EVENT_DESTROY {
            let parent = self.parent.borrow().as_ref().and_then(Weak::upgrade);
            if let Some(parent) = parent {
                parent.trigger(event);
            }
        }
    }

    /// Queue an event for delivery on a later turn.
    pub fn trigger_async(self: &Rc<Self>, event: Event) {
        if self.destroyed.get() || self.events_disabled.get() {
            return;
        }
        let schedule = {
            let mut pending = self.pending.borrow_mut();
            pending.push(event);
            pending.len() == 1
        };
        if schedule {
            let weak = Rc::downgrade(self);
            self.scheduler.defer(move || {
                if let Some(core) = weak.upgrade() {
                    core.flush();
                }
            });
        }
    }

    /// Deliver every queued event, folding same-named change events.
    pub fn flush(&self) {
        let queued = std::mem::take(&mut *self.pending.borrow_mut());
        for event in fold_changes(queued) {
            self.trigger(event);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.borrow().len()
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Fire `destroy`, then detach every handler this core registered as a
    /// context elsewhere. Destroying twice is an error.
    pub fn destroy(&self) -> Result<()> {
        if self.destroyed.get() {
            return Err(CourierError::Destroyed);
        }
        self.events_disabled.set(false);
        self.trigger(Event::new(EVENT_DESTROY, EventPayload::None));
        self.destroyed.set(true);

        let bindings = std::mem::take(&mut *self.bindings.borrow_mut());
        for emitter in bindings.iter().filter_map(Weak::upgrade) {
            emitter.off(None, Some(self.id));
        }

        self.handlers.borrow_mut().clear();
        self.pending.borrow_mut().clear();
        self.parent.borrow_mut().take();
        Ok(())
    }
}

impl fmt::Debug for EventCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventCore")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("destroyed", &self.destroyed.get())
            .finish()
    }
}

fn fold_changes(events: Vec<Event>) -> Vec<Event> {
    let mut folded: Vec<Event> = Vec::with_capacity(events.len());
    for event in events {
        if let EventPayload::Changes(changes) = &event.payload {
            let existing = folded
                .iter_mut()
                .find(|e| e.name == event.name && matches!(e.payload, EventPayload::Changes(_)));
            if let Some(Event {
                payload: EventPayload::Changes(into),
                ..
            }) = existing
            {
                into.extend(changes.iter().cloned());
                continue;
            }
        }
        folded.push(event);
    }
    folded
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tokio::task::LocalSet;

    fn core(label: &str, supported: &[&'static str]) -> Rc<EventCore> {
        EventCore::new(label, supported.to_vec(), Scheduler::new())
    }

    fn change(name: &str, property: &str, value: i64) -> Event {
        Event::new(
            name,
            EventPayload::Changes(vec![PropertyChange::new(property, Value::Null, json!(value))]),
        )
    }

    fn recorder(core: &Rc<EventCore>, event: &str) -> Rc<RefCell<Vec<Event>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        core.on(event, move |e| s.borrow_mut().push(e.clone()), None).unwrap();
        seen
    }

    #[test]
    fn test_unsupported_event_is_rejected() {
        let emitter = core("messages", &["messages:change"]);
        let err = emitter.on("bogus", |_| {}, None).unwrap_err();
        assert!(matches!(err, CourierError::UnsupportedEvent { .. }));
        assert!(emitter.on(EVENT_DESTROY, |_| {}, None).is_ok());
    }

    #[test]
    fn test_once_fires_once() {
        let emitter = core("x", &["ping"]);
        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        emitter.once("ping", move |_| h.set(h.get() + 1), None).unwrap();
        emitter.trigger(Event::new("ping", EventPayload::None));
        emitter.trigger(Event::new("ping", EventPayload::None));
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_bubbles_to_parent_except_destroy() {
        let parent = core("client", &["ping"]);
        let child = core("entity", &["ping"]);
        child.set_parent(&parent);

        let pings = recorder(&parent, "ping");
        let destroys = recorder(&parent, EVENT_DESTROY);

        child.trigger(Event::new("ping", EventPayload::None));
        child.destroy().unwrap();

        assert_eq!(pings.borrow().len(), 1);
        assert!(destroys.borrow().is_empty());
    }

    #[test]
    fn test_disabled_events_are_dropped() {
        let emitter = core("x", &["ping"]);
        let seen = recorder(&emitter, "ping");
        emitter.set_events_disabled(true);
        emitter.trigger(Event::new("ping", EventPayload::None));
        emitter.set_events_disabled(false);
        emitter.trigger(Event::new("ping", EventPayload::None));
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn test_destroy_unbinds_context_handlers() {
        let emitter = core("client", &["ping"]);
        let listener = core("query", &[]);
        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        emitter
            .on("ping", move |_| h.set(h.get() + 1), Some(&listener))
            .unwrap();
        assert_eq!(emitter.handler_count("ping"), 1);

        listener.destroy().unwrap();
        emitter.trigger(Event::new("ping", EventPayload::None));

        assert_eq!(hits.get(), 0);
        assert_eq!(emitter.handler_count("ping"), 0);
        assert!(matches!(listener.destroy(), Err(CourierError::Destroyed)));
    }

    #[test]
    fn test_fold_concatenates_in_order() {
        let folded = fold_changes(vec![
            change("messages:change", "a", 1),
            Event::new("messages:add", EventPayload::None),
            change("messages:change", "b", 2),
            change("messages:change", "c", 3),
        ]);
        assert_eq!(folded.len(), 2);
        assert_eq!(folded[0].name, "messages:change");
        let props: Vec<_> = folded[0].changes().iter().map(|c| c.property.as_str()).collect();
        assert_eq!(props, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_fold_is_idempotent() {
        let once = fold_changes(vec![
            change("messages:change", "a", 1),
            change("messages:change", "b", 2),
        ]);
        let twice = fold_changes(once.clone());
        assert_eq!(once.len(), twice.len());
        assert_eq!(once[0].changes(), twice[0].changes());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_async_events_are_coalesced() {
        LocalSet::new()
            .run_until(async {
                let emitter = core("messages", &["messages:change"]);
                let seen = recorder(&emitter, "messages:change");

                emitter.trigger_async(change("messages:change", "a", 1));
                emitter.trigger_async(change("messages:change", "b", 2));
                assert!(seen.borrow().is_empty());

                tokio::time::sleep(Duration::from_millis(1)).await;
                let seen = seen.borrow();
                assert_eq!(seen.len(), 1);
                assert_eq!(seen[0].changes().len(), 2);
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_three_async_changes_arrive_as_one() {
        LocalSet::new()
            .run_until(async {
                let emitter = core("messages", &["messages:change"]);
                let seen = recorder(&emitter, "messages:change");

                emitter.trigger_async(change("messages:change", "a", 1));
                emitter.trigger_async(change("messages:change", "b", 2));
                emitter.trigger_async(change("messages:change", "a", 3));
                assert_eq!(emitter.pending_count(), 3);

                tokio::time::sleep(Duration::from_millis(1)).await;
                let seen = seen.borrow();
                assert_eq!(seen.len(), 1);
                let values: Vec<(&str, &Value)> = seen[0]
                    .changes()
                    .iter()
                    .map(|c| (c.property.as_str(), &c.new_value))
                    .collect();
                assert_eq!(values, vec![("a", &json!(1)), ("b", &json!(2)), ("a", &json!(3))]);
                assert_eq!(emitter.pending_count(), 0);
            })
            .await;
    }
}
