//! Keeping query data current as objects are added, removed and changed.
//!
//! Handlers never fail: an unexpected payload is logged and ignored so the
//! rest of the result set stays usable.

use courier_shared::EntityId;

use super::ordering::insert_index;
use super::predicate::Predicate;
use super::{Query, QueryChange};
use crate::events::Event;
use crate::schema;

impl Query {
    pub(crate) fn handle_add(&self, event: &Event) {
        if event.entities().is_empty() {
            tracing::warn!(query = %self.internal_id(), event = %event.name, "add event without objects");
            return;
        }

        for entity in event.entities() {
            if entity.is_destroyed() || entity.kind() != self.model {
                continue;
            }
            // Emit per item so each index reflects the data at that moment.
            let change = {
                let mut state = self.state.borrow_mut();
                if state.index_of(entity).is_some() {
                    continue;
                }
                if let Some(predicate) = &state.predicate {
                    if entity.parent_id().as_ref() != Some(&predicate.container_id) {
                        continue;
                    }
                }
                let index = insert_index(state.sort, state.view.entities(), entity, None);
                state.view.insert(index, entity.clone());
                state.total_size += 1;
                state
                    .view
                    .item(index)
                    .map(|item| QueryChange::Insert { index, item })
            };
            if let Some(change) = change {
                self.emit(change);
            }
        }
    }

    pub(crate) fn handle_remove(&self, event: &Event) {
        for entity in event.entities() {
            let change = {
                let mut state = self.state.borrow_mut();
                let Some(index) = state.index_of(entity) else {
                    continue;
                };
                let id = entity.id();
                // Cursor moves back to the surviving predecessor; the first
                // item was never a cursor, so nothing replaces it.
                let previous = index
                    .checked_sub(1)
                    .map(|i| state.view.entities()[i].id());
                if state.remote_cursor.as_ref() == Some(&id) {
                    state.remote_cursor = previous.clone();
                }
                if state.local_cursor.as_ref() == Some(&id) {
                    state.local_cursor = previous;
                }
                let item = state.view.item(index);
                state.view.remove(index);
                state.total_size = state.total_size.saturating_sub(1);
                item.map(|item| QueryChange::Remove { index, item })
            };
            if let Some(change) = change {
                self.emit(change);
            }
        }
    }

    pub(crate) fn handle_change(&self, event: &Event) {
        let Some(entity) = &event.target else {
            tracing::warn!(query = %self.internal_id(), event = %event.name, "change event without target");
            return;
        };
        if entity.kind() != self.model || event.changes().is_empty() {
            return;
        }

        let property = {
            let mut state = self.state.borrow_mut();
            let found = state.index_of(entity).or_else(|| {
                // An id change may already be applied; look for the old id.
                event
                    .change("id")
                    .and_then(|c| c.old_value.as_str())
                    .and_then(|old| state.index_of_id(&EntityId::from(old)))
            });
            let Some(index) = found else { return };
            state.view.refresh(index);
            state.view.item(index).map(|item| QueryChange::Property {
                index,
                item,
                changes: event.changes().to_vec(),
            })
        };
        if let Some(property) = property {
            self.emit(property);
        }

        let reorders = event
            .changes()
            .iter()
            .any(|c| schema::is_sort_relevant(self.model, &c.property));
        if !reorders {
            return;
        }

        let moved = {
            let mut state = self.state.borrow_mut();
            // A property handler may have mutated the data; re-locate.
            let Some(from) = state.index_of(entity) else { return };
            let to = insert_index(state.sort, state.view.entities(), entity, Some(from));
            if to == from {
                None
            } else {
                state.view.relocate(from, to);
                state.view.item(to).map(|item| QueryChange::Move {
                    from_index: from,
                    to_index: to,
                    item,
                })
            }
        };
        if let Some(moved) = moved {
            self.emit(moved);
        }
    }

    /// A container this query is scoped to got a new id: follow it.
    pub(crate) fn handle_container_change(&self, event: &Event) {
        let Some(change) = event.change("id") else { return };
        let (Some(old), Some(new)) = (change.old_value.as_str(), change.new_value.as_str()) else {
            return;
        };

        {
            let mut state = self.state.borrow_mut();
            let Some(predicate) = &state.predicate else { return };
            if predicate.container_id.as_str() != old {
                return;
            }
            let container = predicate.container;
            state.predicate = Some(Predicate::new(container, EntityId::from(new)));
        }
        tracing::debug!(query = %self.internal_id(), %old, %new, "container id changed, resetting");
        self.reset();
    }
}
