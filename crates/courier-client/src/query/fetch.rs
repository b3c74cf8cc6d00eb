//! Paging from the local cache and the server.
//!
//! Each source keeps its own cursor. Server requests are identified by their
//! url: an identical request is never issued twice concurrently, and a
//! response is only applied while its url is still the outstanding one.

use std::rc::Rc;

use courier_net::{Request, Response, TransportError};
use courier_shared::{CourierError, EntityKind, PageRequest, Record, Result};

use super::options::page_size;
use super::ordering::insert_index;
use super::{Query, QueryChange, QueryItem, QueryState};
use crate::client::Client;
use crate::entity::Entity;

impl Query {
    /// Request the next page from both sources.
    ///
    /// Does nothing once the window is full, once the server reported the
    /// end of its data, or while the client is not ready.
    pub fn fetch(&self) {
        let Some(client) = self.client() else { return };
        if self.is_destroyed() || !client.is_ready() {
            return;
        }
        self.fetch_local(&client);
        self.fetch_remote(&client);
    }

    fn fetch_local(&self, client: &Client) {
        let Some(source) = client.local_source() else { return };

        let (request, generation) = {
            let mut state = self.state.borrow_mut();
            if state.local_exhausted || state.local_in_flight || state.paged_to_end {
                return;
            }
            let size = page_size(self.model, state.window, state.view.len());
            if size == 0 {
                return;
            }
            state.local_in_flight = true;
            let request = PageRequest {
                kind: self.model,
                parent: state.predicate.as_ref().map(|p| p.container_id.clone()),
                sort: state.sort,
                from_id: state.local_cursor.clone(),
                page_size: size,
            };
            (request, state.generation)
        };

        let expected = request.page_size;
        let page = source.load_page(request);
        let me = self.me.clone();
        client.scheduler().spawn(async move {
            let result = page.await;
            if let Some(query) = me.upgrade() {
                query.handle_local_page(generation, expected, result);
            }
        });
    }

    fn handle_local_page(&self, generation: u64, expected: usize, result: Result<Vec<Record>>) {
        if self.is_destroyed() {
            return;
        }
        {
            let mut state = self.state.borrow_mut();
            if state.generation != generation {
                tracing::debug!(query = %self.internal_id(), "discarding stale cache page");
                return;
            }
            state.local_in_flight = false;
        }

        let records = match result {
            Ok(records) => records,
            Err(err) => {
                tracing::warn!(query = %self.internal_id(), error = %err, "cache page failed");
                return;
            }
        };
        let Some(client) = self.client() else { return };
        let entities = self.materialize(&client, &records);

        let items = {
            let mut state = self.state.borrow_mut();
            if records.len() < expected {
                state.local_exhausted = true;
            }
            if let Some(last) = records.last().and_then(Record::id) {
                state.local_cursor = Some(last);
            }
            self.splice_page(&mut state, entities)
        };

        tracing::debug!(query = %self.internal_id(), count = items.len(), "cache page applied");
        if !items.is_empty() {
            self.emit(QueryChange::Data { items });
        }
    }

    fn fetch_remote(&self, client: &Client) {
        let (path, size) = {
            let mut state = self.state.borrow_mut();
            if state.paged_to_end || self.container_unsaved(client, &state) {
                return;
            }
            let size = page_size(self.model, state.window, state.view.len());
            if size == 0 {
                return;
            }
            let path = match self.remote_path(&state, size) {
                Ok(path) => path,
                Err(err) => {
                    drop(state);
                    self.emit_error(err);
                    return;
                }
            };
            if state.in_flight.as_deref() == Some(path.as_str()) {
                tracing::debug!(query = %self.internal_id(), %path, "request already in flight");
                return;
            }
            state.in_flight = Some(path.clone());
            (path, size)
        };

        tracing::debug!(query = %self.internal_id(), %path, "fetching page");
        let response = client.transport().request(Request::get(path.clone()));
        let me = self.me.clone();
        client.scheduler().spawn(async move {
            let result = response.await;
            if let Some(query) = me.upgrade() {
                query.handle_remote_page(&path, size, result);
            }
        });
    }

    /// Messages of a conversation the server has not seen yet cannot exist
    /// remotely.
    fn container_unsaved(&self, client: &Client, state: &QueryState) -> bool {
        state
            .predicate
            .as_ref()
            .and_then(|p| client.get(&p.container_id))
            .is_some_and(|container| container.is_unsynced())
    }

    pub(crate) fn remote_path(&self, state: &QueryState, size: usize) -> Result<String> {
        let base = match self.model {
            EntityKind::Message | EntityKind::Membership => {
                let predicate = state
                    .predicate
                    .as_ref()
                    .ok_or_else(|| CourierError::PredicateRequired(self.model.to_string()))?;
                let container = predicate
                    .container_id
                    .path()
                    .ok_or_else(|| CourierError::InvalidId(predicate.container_id.to_string()))?;
                format!("{container}/{}", self.model.plural())
            }
            _ => format!("/{}", self.model.plural()),
        };

        let mut path = format!("{base}?page_size={size}");
        if self.model.is_container() {
            if let Some(sort) = state.sort {
                path.push_str("&sort_by=");
                path.push_str(sort.as_param());
            }
        }
        if let Some(cursor) = &state.remote_cursor {
            path.push_str("&from_id=");
            path.push_str(cursor.as_str());
        }
        Ok(path)
    }

    fn handle_remote_page(
        &self,
        path: &str,
        expected: usize,
        result: std::result::Result<Response, TransportError>,
    ) {
        if self.is_destroyed() {
            return;
        }
        {
            let mut state = self.state.borrow_mut();
            if state.in_flight.as_deref() != Some(path) {
                tracing::debug!(query = %self.internal_id(), %path, "discarding stale response");
                return;
            }
            state.in_flight = None;
        }
        let Some(client) = self.client() else { return };

        let response = match result {
            Ok(response) if response.success => response,
            Ok(response) => {
                return self.emit_error(CourierError::Remote {
                    status: response.status,
                    message: response.message(),
                });
            }
            Err(err) => {
                return self.emit_error(CourierError::Remote {
                    status: 0,
                    message: err.to_string(),
                });
            }
        };

        if response.headers.is_syncing {
            self.schedule_retry(&client);
            return;
        }

        let records: Vec<Record> = match response.data {
            serde_json::Value::Array(values) => values
                .into_iter()
                .filter_map(|value| match Record::from_value(value) {
                    Ok(record) => Some(record),
                    Err(err) => {
                        tracing::warn!(query = %self.internal_id(), error = %err, "skipping malformed record");
                        None
                    }
                })
                .collect(),
            other => {
                return self.emit_error(CourierError::Remote {
                    status: response.status,
                    message: format!("expected an array of records, got {other}"),
                });
            }
        };

        client.cache_records(self.model, &records);
        let entities = self.materialize(&client, &records);

        let items = {
            let mut state = self.state.borrow_mut();
            if records.len() < expected {
                state.paged_to_end = true;
            }
            if let Some(last) = records.last().and_then(Record::id) {
                state.remote_cursor = Some(last);
            }
            let items = self.splice_page(&mut state, entities);
            state.total_size = response
                .headers
                .total_count
                .unwrap_or(state.total_size.max(state.view.len()));
            items
        };

        tracing::debug!(
            query = %self.internal_id(),
            count = items.len(),
            paged_to_end = self.is_paged_to_end(),
            "page applied"
        );
        self.emit(QueryChange::Data { items });
    }

    /// One delayed retry while the server is still building the container.
    fn schedule_retry(&self, client: &Client) {
        let mut state = self.state.borrow_mut();
        if state.retry.is_some_and(|handle| client.scheduler().is_pending(handle)) {
            return;
        }
        let delay = client.config().syncing_retry;
        tracing::debug!(query = %self.internal_id(), ?delay, "server still syncing, retrying");

        let me = self.me.clone();
        state.retry = Some(client.scheduler().after(delay, move || {
            if let Some(query) = me.upgrade() {
                query.state.borrow_mut().retry = None;
                query.fetch();
            }
        }));
    }

    fn materialize(&self, client: &Client, records: &[Record]) -> Vec<Rc<Entity>> {
        records
            .iter()
            .filter_map(|record| match client.entity_from_record(self.model, record) {
                Ok(entity) => Some(entity),
                Err(err) => {
                    tracing::warn!(query = %self.internal_id(), error = %err, "skipping record");
                    None
                }
            })
            .collect()
    }

    /// Insert page results that are not already present, in sort order.
    fn splice_page(&self, state: &mut QueryState, entities: Vec<Rc<Entity>>) -> Vec<QueryItem> {
        let mut items = Vec::with_capacity(entities.len());
        for entity in entities {
            if entity.is_destroyed() || state.index_of(&entity).is_some() {
                continue;
            }
            let index = insert_index(state.sort, state.view.entities(), &entity, None);
            state.view.insert(index, entity);
            items.extend(state.view.item(index));
        }
        items
    }
}
