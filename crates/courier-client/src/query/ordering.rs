//! Where an object belongs in a sorted result list.
//!
//! Every function returns an index into `entries` as it would look with the
//! slot `exclude` removed, so relocating an item compares it against its
//! neighbours only.

use std::rc::Rc;

use courier_shared::SortField;

use crate::entity::Entity;

pub fn insert_index(
    sort: Option<SortField>,
    entries: &[Rc<Entity>],
    item: &Entity,
    exclude: Option<usize>,
) -> usize {
    let others: Vec<&Rc<Entity>> = entries
        .iter()
        .enumerate()
        .filter(|(i, _)| Some(*i) != exclude)
        .map(|(_, e)| e)
        .collect();

    match sort {
        Some(SortField::Position) => position_index(&others, item),
        Some(field) => date_index(&others, item, field),
        None => others.len(),
    }
}

/// Containers: unsynced objects pin to the top; synced ones go before the
/// first synced neighbour with an equal or older key.
fn date_index(others: &[&Rc<Entity>], item: &Entity, field: SortField) -> usize {
    if item.is_unsynced() {
        return 0;
    }
    let key = item.sort_key(field);
    others
        .iter()
        .position(|other| !other.is_unsynced() && other.sort_key(field) <= key)
        .unwrap_or(others.len())
}

/// Messages: descending position; no position yet means newest.
fn position_index(others: &[&Rc<Entity>], item: &Entity) -> usize {
    let key = effective_position(item);
    others
        .iter()
        .position(|other| effective_position(other) < key)
        .unwrap_or(others.len())
}

fn effective_position(entity: &Entity) -> i64 {
    entity.position().unwrap_or(i64::MAX)
}
