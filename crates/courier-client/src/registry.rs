//! Id → entity maps, one per kind, plus the eviction policy applied when
//! queries let go of objects.

use std::collections::HashMap;
use std::rc::Rc;

use courier_shared::{EntityId, EntityKind};

use crate::entity::Entity;

#[derive(Default)]
pub struct Registry {
    by_kind: HashMap<EntityKind, HashMap<EntityId, Rc<Entity>>>,
}

impl Registry {
    pub fn get(&self, kind: EntityKind, id: &EntityId) -> Option<Rc<Entity>> {
        self.by_kind.get(&kind).and_then(|m| m.get(id)).cloned()
    }

    /// Look an id up across every kind.
    pub fn find(&self, id: &EntityId) -> Option<Rc<Entity>> {
        self.by_kind.values().find_map(|m| m.get(id)).cloned()
    }

    /// Insert an entity under its current id, returning any entity it replaced.
    pub fn insert(&mut self, entity: Rc<Entity>) -> Option<Rc<Entity>> {
        self.by_kind
            .entry(entity.kind())
            .or_default()
            .insert(entity.id(), entity)
    }

    /// Remove `entity` if it is the one registered under its id.
    pub fn remove(&mut self, entity: &Rc<Entity>) -> bool {
        let Some(map) = self.by_kind.get_mut(&entity.kind()) else {
            return false;
        };
        let id = entity.id();
        match map.get(&id) {
            Some(current) if Rc::ptr_eq(current, entity) => {
                map.remove(&id);
                true
            }
            _ => false,
        }
    }

    /// Move the entity registered under `old` to `new`. Refuses when `new`
    /// already belongs to another instance.
    pub fn rekey(&mut self, kind: EntityKind, old: &EntityId, new: &EntityId) -> bool {
        let Some(map) = self.by_kind.get_mut(&kind) else {
            return false;
        };
        if map.contains_key(new) {
            return false;
        }
        match map.remove(old) {
            Some(entity) => {
                map.insert(new.clone(), entity);
                true
            }
            None => false,
        }
    }

    pub fn entities(&self, kind: EntityKind) -> Vec<Rc<Entity>> {
        self.by_kind
            .get(&kind)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn all(&self) -> Vec<Rc<Entity>> {
        self.by_kind.values().flat_map(|m| m.values().cloned()).collect()
    }

    pub fn len(&self, kind: EntityKind) -> usize {
        self.by_kind.get(&kind).map_or(0, HashMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.by_kind.values().all(HashMap::is_empty)
    }
}

/// Decides whether an entity no query holds any more may be destroyed.
pub trait EvictionPolicy {
    fn may_evict(&self, entity: &Entity) -> bool;
}

/// Evict only objects the server fully knows about; local or in-flight
/// objects are kept.
#[derive(Debug, Default, Clone, Copy)]
pub struct SyncedOnly;

impl EvictionPolicy for SyncedOnly {
    fn may_evict(&self, entity: &Entity) -> bool {
        entity.is_synced()
    }
}

impl<F> EvictionPolicy for F
where
    F: Fn(&Entity) -> bool,
{
    fn may_evict(&self, entity: &Entity) -> bool {
        self(entity)
    }
}
