//! Result storage for the two query data types.
//!
//! Both views keep the live entities (ordering always needs current field
//! values); the snapshot view additionally keeps one immutable copy per slot
//! and replaces it whenever that slot changes.

use std::rc::Rc;

use crate::entity::{Entity, Snapshot};
use crate::query::DataType;

/// One element of a query's data, in the query's data type.
#[derive(Debug, Clone)]
pub enum QueryItem {
    Instance(Rc<Entity>),
    Snapshot(Rc<Snapshot>),
}

impl QueryItem {
    pub fn id(&self) -> courier_shared::EntityId {
        match self {
            QueryItem::Instance(entity) => entity.id(),
            QueryItem::Snapshot(snapshot) => snapshot.id.clone(),
        }
    }

    pub fn as_entity(&self) -> Option<&Rc<Entity>> {
        match self {
            QueryItem::Instance(entity) => Some(entity),
            QueryItem::Snapshot(_) => None,
        }
    }

    pub fn as_snapshot(&self) -> Option<&Rc<Snapshot>> {
        match self {
            QueryItem::Snapshot(snapshot) => Some(snapshot),
            QueryItem::Instance(_) => None,
        }
    }
}

pub(crate) trait ResultView {
    fn entities(&self) -> &[Rc<Entity>];
    fn item(&self, index: usize) -> Option<QueryItem>;
    fn insert(&mut self, index: usize, entity: Rc<Entity>);
    fn remove(&mut self, index: usize) -> Rc<Entity>;
    /// The object in `index` changed.
    fn refresh(&mut self, index: usize);
    fn truncate(&mut self, len: usize) -> Vec<Rc<Entity>>;

    fn len(&self) -> usize {
        self.entities().len()
    }

    fn items(&self) -> Vec<QueryItem> {
        (0..self.len()).filter_map(|i| self.item(i)).collect()
    }

    fn relocate(&mut self, from: usize, to: usize) {
        let entity = self.remove(from);
        self.insert(to, entity);
    }

    fn clear(&mut self) -> Vec<Rc<Entity>> {
        self.truncate(0)
    }
}

#[derive(Default)]
pub(crate) struct LiveView {
    entries: Vec<Rc<Entity>>,
}

impl ResultView for LiveView {
    fn entities(&self) -> &[Rc<Entity>] {
        &self.entries
    }

    fn item(&self, index: usize) -> Option<QueryItem> {
        self.entries.get(index).cloned().map(QueryItem::Instance)
    }

    fn insert(&mut self, index: usize, entity: Rc<Entity>) {
        self.entries.insert(index, entity);
    }

    fn remove(&mut self, index: usize) -> Rc<Entity> {
        self.entries.remove(index)
    }

    fn refresh(&mut self, _index: usize) {}

    fn truncate(&mut self, len: usize) -> Vec<Rc<Entity>> {
        if len >= self.entries.len() {
            return Vec::new();
        }
        self.entries.split_off(len)
    }
}

#[derive(Default)]
pub(crate) struct SnapshotView {
    entries: Vec<Rc<Entity>>,
    snapshots: Vec<Rc<Snapshot>>,
}

impl ResultView for SnapshotView {
    fn entities(&self) -> &[Rc<Entity>] {
        &self.entries
    }

    fn item(&self, index: usize) -> Option<QueryItem> {
        self.snapshots.get(index).cloned().map(QueryItem::Snapshot)
    }

    fn insert(&mut self, index: usize, entity: Rc<Entity>) {
        self.snapshots.insert(index, Rc::new(entity.to_snapshot()));
        self.entries.insert(index, entity);
    }

    fn remove(&mut self, index: usize) -> Rc<Entity> {
        self.snapshots.remove(index);
        self.entries.remove(index)
    }

    fn refresh(&mut self, index: usize) {
        if let Some(entity) = self.entries.get(index) {
            self.snapshots[index] = Rc::new(entity.to_snapshot());
        }
    }

    fn truncate(&mut self, len: usize) -> Vec<Rc<Entity>> {
        if len >= self.entries.len() {
            return Vec::new();
        }
        self.snapshots.truncate(len);
        self.entries.split_off(len)
    }
}

pub(crate) fn new_view(data_type: DataType) -> Box<dyn ResultView> {
    match data_type {
        DataType::Instance => Box::<LiveView>::default(),
        DataType::Snapshot => Box::<SnapshotView>::default(),
    }
}
