use chrono::{DateTime, Utc};
use uuid::Uuid;

use cove_types::models::MessageDetail;

/// Anything the reconciler can keep in an ordered list.
pub trait Record {
    fn id(&self) -> Uuid;
    fn created_at(&self) -> DateTime<Utc>;
}

impl Record for MessageDetail {
    fn id(&self) -> Uuid {
        self.message.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.message.created_at
    }
}

#[derive(Debug, Clone)]
pub enum ListEvent<T> {
    Insert(T),
    Update(T),
    Delete(Uuid),
}

/// Ordered, id-addressable list of records for one scope.
///
/// Records are kept in creation-time order, ties broken by id, so the same
/// set of events produces the same list regardless of arrival order. Every
/// operation is idempotent: re-applying an event leaves the list unchanged.
#[derive(Debug, Clone)]
pub struct RecordList<T> {
    items: Vec<T>,
}

impl<T> Default for RecordList<T> {
    fn default() -> Self {
        RecordList { items: Vec::new() }
    }
}

impl<T: Record> RecordList<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event. Returns whether the list changed.
    pub fn apply(&mut self, event: ListEvent<T>) -> bool {
        match event {
            ListEvent::Insert(item) => self.insert(item),
            ListEvent::Update(item) => self.update(item),
            ListEvent::Delete(id) => self.remove(id),
        }
    }

    fn insert(&mut self, item: T) -> bool {
        if self.position(item.id()).is_some() {
            return false;
        }
        let key = (item.created_at(), item.id());
        let at = self
            .items
            .partition_point(|probe| (probe.created_at(), probe.id()) <= key);
        self.items.insert(at, item);
        true
    }

    fn update(&mut self, item: T) -> bool {
        let Some(at) = self.position(item.id()) else {
            // Update for a record we never saw: no-op, never an implicit insert.
            return false;
        };
        if self.items[at].created_at() == item.created_at() {
            self.items[at] = item;
        } else {
            self.items.remove(at);
            self.insert(item);
        }
        true
    }

    fn remove(&mut self, id: Uuid) -> bool {
        match self.position(id) {
            Some(at) => {
                self.items.remove(at);
                true
            }
            None => false,
        }
    }

    fn position(&self, id: Uuid) -> Option<usize> {
        self.items.iter().position(|item| item.id() == id)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.position(id).is_some()
    }

    pub fn get(&self, id: Uuid) -> Option<&T> {
        self.position(id).map(|at| &self.items[at])
    }

    pub fn get_mut(&mut self, id: Uuid) -> Option<&mut T> {
        self.position(id).map(|at| &mut self.items[at])
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
