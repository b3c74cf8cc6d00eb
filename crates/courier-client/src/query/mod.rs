//! Live, sorted, paginated views over one kind of object.
//!
//! A [`Query`] pages results in from the local cache and the server, then
//! keeps them current by listening to the client's add, remove and change
//! events. Consumers subscribe to `change` and receive a [`QueryChange`]
//! describing each mutation of [`Query::data`].

mod deltas;
mod fetch;
pub mod options;
mod ordering;
pub mod predicate;
mod results;

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use courier_shared::{CourierError, EntityId, EntityKind, Result, SortField};

use crate::client::{Client, WeakClient};
use crate::entity::Entity;
use crate::events::{
    Event, EventCore, EventPayload, Evented, InternalId, PropertyChange, SubscriptionId,
    EVENT_QUERY_CHANGE, EVENT_QUERY_ERROR,
};
use crate::scheduler::TaskHandle;
use crate::schema::{self, EntityAction};

pub use options::{resolve_sort, DataType, QueryOptions, QueryPatch, SortBy, SortDirection};
pub use predicate::Predicate;
pub use results::QueryItem;

use results::ResultView;

/// One mutation of a query's data, delivered through the `change` event.
#[derive(Debug, Clone)]
pub enum QueryChange {
    /// A page was added, or (with no items) the data was cleared or trimmed.
    Data { items: Vec<QueryItem> },
    Insert { index: usize, item: QueryItem },
    Remove { index: usize, item: QueryItem },
    Property {
        index: usize,
        item: QueryItem,
        changes: Vec<PropertyChange>,
    },
    Move {
        from_index: usize,
        to_index: usize,
        item: QueryItem,
    },
    Reset,
}

pub(crate) struct QueryState {
    predicate: Option<Predicate>,
    sort: Option<SortField>,
    window: usize,
    view: Box<dyn ResultView>,
    total_size: usize,
    paged_to_end: bool,
    local_exhausted: bool,
    local_in_flight: bool,
    remote_cursor: Option<EntityId>,
    local_cursor: Option<EntityId>,
    /// Url of the outstanding server request.
    in_flight: Option<String>,
    /// Bumped on reset so late local pages can be told apart.
    generation: u64,
    retry: Option<TaskHandle>,
}

impl QueryState {
    fn index_of(&self, entity: &Entity) -> Option<usize> {
        let id = entity.id();
        self.view
            .entities()
            .iter()
            .position(|e| std::ptr::eq(e.as_ref(), entity) || e.id() == id)
    }

    fn index_of_id(&self, id: &EntityId) -> Option<usize> {
        self.view.entities().iter().position(|e| e.id() == *id)
    }
}

pub struct Query {
    me: Weak<Query>,
    core: Rc<EventCore>,
    client: WeakClient,
    model: EntityKind,
    data_type: DataType,
    state: RefCell<QueryState>,
}

impl Client {
    /// Build a query and start fetching as soon as the client is ready.
    pub fn create_query(&self, options: QueryOptions) -> Result<Rc<Query>> {
        Query::new(self, options)
    }
}

impl Query {
    fn new(client: &Client, options: QueryOptions) -> Result<Rc<Self>> {
        let model = options.model;
        let predicate = predicate::normalize(model, options.predicate.as_deref(), &client.config().id_scheme)?;
        let sort = resolve_sort(model, &options.sort_by)?;
        let window = options::validate_window(options.pagination_window)?;

        let core = EventCore::new(
            format!("{model} query"),
            vec![EVENT_QUERY_CHANGE, EVENT_QUERY_ERROR],
            client.scheduler().clone(),
        );

        let query = Rc::new_cyclic(|me| Self {
            me: me.clone(),
            core,
            client: client.downgrade(),
            model,
            data_type: options.data_type,
            state: RefCell::new(QueryState {
                predicate,
                sort,
                window,
                view: results::new_view(options.data_type),
                total_size: 0,
                paged_to_end: false,
                local_exhausted: false,
                local_in_flight: false,
                remote_cursor: None,
                local_cursor: None,
                in_flight: None,
                generation: 0,
                retry: None,
            }),
        });

        query.subscribe(client)?;
        client.register_query(&query);
        tracing::debug!(query = %query.internal_id(), model = %model, window, "query created");

        let weak = Rc::downgrade(&query);
        client.on_ready(
            move || {
                if let Some(query) = weak.upgrade() {
                    query.fetch();
                }
            },
            Some(query.as_ref() as &dyn Evented),
        )?;
        Ok(query)
    }

    fn subscribe(&self, client: &Client) -> Result<()> {
        type DeltaHandler = fn(&Query, &Event);
        let handlers: [(EntityAction, DeltaHandler); 3] = [
            (EntityAction::Add, Query::handle_add),
            (EntityAction::Remove, Query::handle_remove),
            (EntityAction::Change, Query::handle_change),
        ];
        for (action, handler) in handlers {
            let weak = self.me.clone();
            client.on(
                schema::event_name(self.model, action),
                move |event| {
                    if let Some(query) = weak.upgrade() {
                        handler(&query, event);
                    }
                },
                Some(self as &dyn Evented),
            )?;
        }

        for container in predicate::allowed_containers(self.model) {
            let weak = self.me.clone();
            client.on(
                schema::event_name(*container, EntityAction::Change),
                move |event| {
                    if let Some(query) = weak.upgrade() {
                        query.handle_container_change(event);
                    }
                },
                Some(self as &dyn Evented),
            )?;
        }
        Ok(())
    }

    pub(crate) fn client(&self) -> Option<Client> {
        self.client.upgrade()
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn internal_id(&self) -> InternalId {
        self.core.id()
    }

    pub fn model(&self) -> EntityKind {
        self.model
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Normalized predicate text.
    pub fn predicate(&self) -> Option<String> {
        self.state.borrow().predicate.as_ref().map(Predicate::render)
    }

    pub fn sort(&self) -> Option<SortField> {
        self.state.borrow().sort
    }

    pub fn pagination_window(&self) -> usize {
        self.state.borrow().window
    }

    pub fn data(&self) -> Vec<QueryItem> {
        self.state.borrow().view.items()
    }

    pub fn get(&self, index: usize) -> Option<QueryItem> {
        self.state.borrow().view.item(index)
    }

    pub fn ids(&self) -> Vec<EntityId> {
        self.state.borrow().view.entities().iter().map(|e| e.id()).collect()
    }

    pub fn index_of(&self, id: &EntityId) -> Option<usize> {
        self.state.borrow().index_of_id(id)
    }

    pub fn size(&self) -> usize {
        self.state.borrow().view.len()
    }

    /// Count reported by the server, adjusted by live adds and removes.
    pub fn total_size(&self) -> usize {
        self.state.borrow().total_size
    }

    /// A server request is outstanding.
    pub fn is_firing(&self) -> bool {
        self.state.borrow().in_flight.is_some()
    }

    pub fn is_paged_to_end(&self) -> bool {
        self.state.borrow().paged_to_end
    }

    pub fn remote_cursor(&self) -> Option<EntityId> {
        self.state.borrow().remote_cursor.clone()
    }

    pub fn local_cursor(&self) -> Option<EntityId> {
        self.state.borrow().local_cursor.clone()
    }

    pub fn is_destroyed(&self) -> bool {
        self.core.is_destroyed()
    }

    /// Whether `entity` is currently part of this query's data.
    pub(crate) fn holds(&self, entity: &Entity) -> bool {
        match self.state.try_borrow() {
            Ok(state) => state.index_of(entity).is_some(),
            // Mid-mutation; treat everything as held.
            Err(_) => true,
        }
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

    fn emit(&self, change: QueryChange) {
        self.core
            .trigger(Event::new(EVENT_QUERY_CHANGE, EventPayload::Query(change)));
    }

    fn emit_error(&self, error: CourierError) {
        tracing::warn!(query = %self.internal_id(), error = %error, "query fetch failed");
        self.core
            .trigger(Event::new(EVENT_QUERY_ERROR, EventPayload::Error(error)));
    }

    // ------------------------------------------------------------------
    // Update, reset, destroy
    // ------------------------------------------------------------------

    /// Change predicate, sort or pagination window.
    ///
    /// A new predicate or sort resets the query; a window change only fetches
    /// more or trims.
    pub fn update(&self, patch: QueryPatch) -> Result<()> {
        if self.is_destroyed() {
            return Err(CourierError::Destroyed);
        }
        if patch.model.is_some_and(|m| m != self.model) {
            return Err(CourierError::ImmutableModel);
        }
        let client = self.client().ok_or(CourierError::Destroyed)?;

        let (current_predicate, current_sort, current_window) = {
            let state = self.state.borrow();
            (state.predicate.clone(), state.sort, state.window)
        };
        let predicate = match patch.predicate.as_deref() {
            Some(p) => predicate::normalize(self.model, Some(p), &client.config().id_scheme)?,
            None => current_predicate.clone(),
        };
        let sort = match &patch.sort_by {
            Some(sort_by) => resolve_sort(self.model, sort_by)?,
            None => current_sort,
        };
        let window = match patch.pagination_window {
            Some(window) => options::validate_window(window)?,
            None => current_window,
        };

        let needs_reset = predicate != current_predicate || sort != current_sort;
        {
            let mut state = self.state.borrow_mut();
            state.predicate = predicate;
            state.sort = sort;
            state.window = window;
        }

        if needs_reset {
            self.reset();
        } else if window < current_window {
            self.trim_to_window(&client, window);
        } else if window > current_window {
            {
                let mut state = self.state.borrow_mut();
                state.paged_to_end = false;
                state.local_exhausted = false;
            }
            self.fetch();
        }
        Ok(())
    }

    fn trim_to_window(&self, client: &Client, window: usize) {
        let released = {
            let mut state = self.state.borrow_mut();
            if state.view.len() <= window {
                return;
            }
            let released = state.view.truncate(window);
            let last = state.view.entities().last().map(|e| e.id());
            state.remote_cursor = last.clone();
            state.local_cursor = last;
            state.paged_to_end = false;
            state.local_exhausted = false;
            released
        };
        tracing::debug!(query = %self.internal_id(), window, released = released.len(), "trimmed");
        client.release(released);
        self.emit(QueryChange::Data { items: Vec::new() });
    }

    /// Drop all data and start paging again from the top.
    pub fn reset(&self) {
        if self.is_destroyed() {
            return;
        }
        let (released, retry) = self.clear_state();
        if let Some(client) = self.client() {
            if let Some(retry) = retry {
                client.scheduler().cancel(retry);
            }
            client.release(released);
        }
        self.emit(QueryChange::Reset);
        self.fetch();
    }

    fn clear_state(&self) -> (Vec<Rc<Entity>>, Option<TaskHandle>) {
        let mut state = self.state.borrow_mut();
        state.generation += 1;
        state.in_flight = None;
        state.local_in_flight = false;
        state.remote_cursor = None;
        state.local_cursor = None;
        state.total_size = 0;
        state.paged_to_end = false;
        state.local_exhausted = false;
        (state.view.clear(), state.retry.take())
    }

    /// Clear data, tell subscribers, and detach from the client.
    pub fn destroy(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(CourierError::Destroyed);
        }
        let (released, retry) = self.clear_state();
        self.emit(QueryChange::Data { items: Vec::new() });
        self.core.destroy()?;

        if let Some(client) = self.client() {
            if let Some(retry) = retry {
                client.scheduler().cancel(retry);
            }
            client.deregister_query(self.internal_id());
            client.release(released);
        }
        tracing::debug!(query = %self.internal_id(), "query destroyed");
        Ok(())
    }
}

impl Evented for Query {
    fn event_core(&self) -> &Rc<EventCore> {
        &self.core
    }
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("id", &self.internal_id())
            .field("model", &self.model)
            .field("size", &self.size())
            .finish()
    }
}
