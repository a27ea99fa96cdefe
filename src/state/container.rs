//! Reactive containers - Observable lists and maps.
//!
//! A container is linked to the root key that owns it. Reads record that root
//! key with the tracker; writes notify the owner. Links are assigned when a
//! container is stored into a linked parent:
//!
//! - a detached container is adopted, recursively, by the parent's link
//! - a container already owned by the same state keeps its link
//! - a container owned by another state (or store) is snapshotted first, so
//!   container identity never crosses state boundaries
//!
//! Stores are the exception: a store map is shared by identity and its writes
//! go to the store's subscribers instead of a state scheduler.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::config::config;
use crate::types::{ArrayOp, Value};

use super::observable::StateCore;
use super::store::StoreHub;
use super::tracker;

thread_local! {
    static NEXT_CONTAINER_ID: Cell<u64> = const { Cell::new(1) };
}

fn next_container_id() -> u64 {
    NEXT_CONTAINER_ID.with(|next| {
        let id = next.get();
        next.set(id + 1);
        id
    })
}

// =============================================================================
// Link
// =============================================================================

/// Who gets notified when a container changes.
#[derive(Clone, Default)]
pub(crate) enum Link {
    #[default]
    Detached,
    /// Owned by a state field.
    State { owner: Weak<StateCore>, root: Rc<str> },
    /// Nested inside a shared store under `key`.
    Store { hub: Weak<StoreHub>, key: Rc<str> },
}

impl Link {
    fn is_detached(&self) -> bool {
        matches!(self, Link::Detached)
    }

    /// Same owning state or store (root keys may differ).
    fn same_owner(&self, other: &Link) -> bool {
        match (self, other) {
            (Link::State { owner: a, .. }, Link::State { owner: b, .. }) => a.ptr_eq(b),
            (Link::Store { hub: a, .. }, Link::Store { hub: b, .. }) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Record a read of the owning root key.
    fn track(&self) {
        if let Link::State { root, .. } = self {
            tracker::record(root);
        }
    }

    /// Notify the owner, optionally recording a list operation.
    fn notify(&self, op: Option<(u64, ArrayOp)>) {
        match self {
            Link::Detached => {}
            Link::State { owner, root } => {
                if let Some(core) = owner.upgrade() {
                    if let Some((list_id, op)) = op {
                        core.record_op(list_id, op);
                    }
                    StateCore::notify(&core, root);
                }
            }
            Link::Store { hub, key } => {
                if let Some(hub) = hub.upgrade() {
                    hub.publish(key);
                }
            }
        }
    }
}

/// Prepare `value` for storage under a parent with `link`.
pub(crate) fn adopt(link: &Link, value: Value) -> Value {
    if link.is_detached() {
        return value;
    }
    let current = match &value {
        Value::List(list) => list.0.link.borrow().clone(),
        Value::Map(map) if !map.is_store() => map.0.link.borrow().clone(),
        _ => return value,
    };
    if current.is_detached() {
        link_value(&value, link);
        value
    } else if current.same_owner(link) {
        value
    } else {
        let copy = value.deep_clone();
        link_value(&copy, link);
        copy
    }
}

/// Link `value` and its detached descendants.
fn link_value(value: &Value, link: &Link) {
    match value {
        Value::List(list) => {
            if !list.0.link.borrow().is_detached() {
                return;
            }
            *list.0.link.borrow_mut() = link.clone();
            for item in list.0.items.borrow().iter() {
                link_value(item, link);
            }
        }
        Value::Map(map) if !map.is_store() => {
            if !map.0.link.borrow().is_detached() {
                return;
            }
            *map.0.link.borrow_mut() = link.clone();
            for item in map.0.entries.borrow().values() {
                link_value(item, link);
            }
        }
        _ => {}
    }
}

// =============================================================================
// ReactiveList
// =============================================================================

struct ListInner {
    id: u64,
    items: RefCell<Vec<Value>>,
    link: RefCell<Link>,
}

/// An observable sequence.
///
/// Mutating methods notify the owning root key and record an [`ArrayOp`] so
/// list directives can patch appends and tail removals incrementally.
#[derive(Clone)]
pub struct ReactiveList(Rc<ListInner>);

impl ReactiveList {
    /// A detached list.
    pub fn new(items: Vec<Value>) -> Self {
        Self(Rc::new(ListInner {
            id: next_container_id(),
            items: RefCell::new(items),
            link: RefCell::new(Link::Detached),
        }))
    }

    /// Stable identity used for operation hints.
    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn ptr_eq(&self, other: &ReactiveList) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn track(&self) {
        self.0.link.borrow().track();
    }

    fn changed(&self, op: ArrayOp) {
        let link = self.0.link.borrow().clone();
        link.notify(Some((self.0.id, op)));
    }

    fn adopt(&self, value: Value) -> Value {
        let link = self.0.link.borrow().clone();
        adopt(&link, value)
    }

    pub fn len(&self) -> usize {
        self.track();
        self.0.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element at `index`, or `undefined`.
    pub fn get(&self, index: usize) -> Value {
        self.track();
        self.0.items.borrow().get(index).cloned().unwrap_or_default()
    }

    /// All elements (tracked).
    pub fn to_vec(&self) -> Vec<Value> {
        self.track();
        self.0.items.borrow().clone()
    }

    /// All elements without recording a dependency.
    pub(crate) fn peek_all(&self) -> Vec<Value> {
        self.0.items.borrow().clone()
    }

    pub fn push(&self, value: impl Into<Value>) {
        let value = self.adopt(value.into());
        self.0.items.borrow_mut().push(value);
        self.changed(ArrayOp::Append(1));
    }

    /// Append several elements as one operation.
    pub fn extend(&self, values: impl IntoIterator<Item = Value>) {
        let values: Vec<Value> = values.into_iter().map(|v| self.adopt(v)).collect();
        if values.is_empty() {
            return;
        }
        let count = values.len();
        self.0.items.borrow_mut().extend(values);
        self.changed(ArrayOp::Append(count));
    }

    /// Remove and return the last element.
    pub fn pop(&self) -> Value {
        let popped = self.0.items.borrow_mut().pop();
        match popped {
            Some(value) => {
                self.changed(ArrayOp::RemoveLast(1));
                value
            }
            None => Value::Undefined,
        }
    }

    /// Keep the first `len` elements.
    pub fn truncate(&self, len: usize) {
        let removed = {
            let mut items = self.0.items.borrow_mut();
            let removed = items.len().saturating_sub(len);
            items.truncate(len);
            removed
        };
        if removed > 0 {
            self.changed(ArrayOp::RemoveLast(removed));
        }
    }

    /// Remove and return the first element.
    pub fn shift(&self) -> Value {
        let shifted = {
            let mut items = self.0.items.borrow_mut();
            if items.is_empty() { None } else { Some(items.remove(0)) }
        };
        match shifted {
            Some(value) => {
                self.changed(ArrayOp::Other);
                value
            }
            None => Value::Undefined,
        }
    }

    pub fn unshift(&self, value: impl Into<Value>) {
        self.insert(0, value);
    }

    /// Insert at `index` (clamped to the length).
    pub fn insert(&self, index: usize, value: impl Into<Value>) {
        let value = self.adopt(value.into());
        let appended = {
            let mut items = self.0.items.borrow_mut();
            let index = index.min(items.len());
            let appended = index == items.len();
            items.insert(index, value);
            appended
        };
        self.changed(if appended { ArrayOp::Append(1) } else { ArrayOp::Other });
    }

    /// Remove the element at `index`.
    pub fn remove(&self, index: usize) -> Value {
        let (removed, was_last) = {
            let mut items = self.0.items.borrow_mut();
            if index >= items.len() {
                return Value::Undefined;
            }
            let was_last = index + 1 == items.len();
            (items.remove(index), was_last)
        };
        self.changed(if was_last { ArrayOp::RemoveLast(1) } else { ArrayOp::Other });
        removed
    }

    /// Remove `delete` elements at `start` and insert `values` there.
    pub fn splice(&self, start: usize, delete: usize, values: Vec<Value>) -> Vec<Value> {
        let values: Vec<Value> = values.into_iter().map(|v| self.adopt(v)).collect();
        let removed: Vec<Value> = {
            let mut items = self.0.items.borrow_mut();
            let start = start.min(items.len());
            let end = start.saturating_add(delete).min(items.len());
            items.splice(start..end, values).collect()
        };
        self.changed(ArrayOp::Other);
        removed
    }

    /// Replace the element at `index`; writing at the length appends.
    ///
    /// Writing past the end fills the gap with `undefined`. Returns false,
    /// leaving the list untouched, when the gap exceeds
    /// [`RuntimeConfig::max_list_gap`](crate::config::RuntimeConfig::max_list_gap).
    pub fn set(&self, index: usize, value: impl Into<Value>) -> bool {
        let len = self.0.items.borrow().len();
        if index > len && index - len > config().max_list_gap {
            return false;
        }
        let value = self.adopt(value.into());
        let op = {
            let mut items = self.0.items.borrow_mut();
            if index < items.len() {
                items[index] = value;
                ArrayOp::Other
            } else if index == items.len() {
                items.push(value);
                ArrayOp::Append(1)
            } else {
                items.resize(index, Value::Undefined);
                items.push(value);
                ArrayOp::Other
            }
        };
        self.changed(op);
        true
    }

    /// Replace every element.
    pub fn replace_all(&self, values: Vec<Value>) {
        let values: Vec<Value> = values.into_iter().map(|v| self.adopt(v)).collect();
        *self.0.items.borrow_mut() = values;
        self.changed(ArrayOp::Other);
    }

    pub fn clear(&self) {
        self.truncate(0);
    }

    pub fn reverse(&self) {
        self.0.items.borrow_mut().reverse();
        self.changed(ArrayOp::Other);
    }

    /// Sort numerically when every element is a number, otherwise by display
    /// string.
    pub fn sort(&self) {
        let numeric = self
            .0
            .items
            .borrow()
            .iter()
            .all(|v| matches!(v, Value::Number(_)));
        if numeric {
            self.sort_by(|a, b| {
                a.to_number()
                    .partial_cmp(&b.to_number())
                    .unwrap_or(Ordering::Equal)
            });
        } else {
            self.sort_by(|a, b| a.to_display().cmp(&b.to_display()));
        }
    }

    /// Sort with `compare`. The comparator may read this list.
    pub fn sort_by(&self, compare: impl FnMut(&Value, &Value) -> Ordering) {
        let mut items = self.peek_all();
        items.sort_by(compare);
        *self.0.items.borrow_mut() = items;
        self.changed(ArrayOp::Other);
    }
}

impl fmt::Debug for ReactiveList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveList")
            .field("id", &self.0.id)
            .field("items", &*self.0.items.borrow())
            .finish()
    }
}

// =============================================================================
// ReactiveMap
// =============================================================================

struct MapInner {
    id: u64,
    entries: RefCell<BTreeMap<Rc<str>, Value>>,
    link: RefCell<Link>,
    /// Present when this map is a shared store.
    hub: Option<Rc<StoreHub>>,
}

/// An observable string-keyed mapping.
#[derive(Clone)]
pub struct ReactiveMap(Rc<MapInner>);

impl Default for ReactiveMap {
    fn default() -> Self {
        Self::new()
    }
}

impl ReactiveMap {
    /// A detached, empty map.
    pub fn new() -> Self {
        Self::from_entries(std::iter::empty())
    }

    /// A detached map with `entries`.
    pub fn from_entries(entries: impl IntoIterator<Item = (Rc<str>, Value)>) -> Self {
        Self(Rc::new(MapInner {
            id: next_container_id(),
            entries: RefCell::new(entries.into_iter().collect()),
            link: RefCell::new(Link::Detached),
            hub: None,
        }))
    }

    /// A map that publishes its writes to `hub`.
    pub(crate) fn with_hub(hub: Rc<StoreHub>) -> Self {
        Self(Rc::new(MapInner {
            id: next_container_id(),
            entries: RefCell::new(BTreeMap::new()),
            link: RefCell::new(Link::Detached),
            hub: Some(hub),
        }))
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn ptr_eq(&self, other: &ReactiveMap) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Whether this map is a shared store.
    pub fn is_store(&self) -> bool {
        self.0.hub.is_some()
    }

    pub(crate) fn hub(&self) -> Option<&Rc<StoreHub>> {
        self.0.hub.as_ref()
    }

    fn track(&self) {
        self.0.link.borrow().track();
    }

    /// Link for a value stored under `key`.
    fn child_link(&self, key: &Rc<str>) -> Link {
        match &self.0.hub {
            Some(hub) => Link::Store {
                hub: Rc::downgrade(hub),
                key: Rc::clone(key),
            },
            None => self.0.link.borrow().clone(),
        }
    }

    fn changed(&self, key: &Rc<str>) {
        match &self.0.hub {
            Some(hub) => hub.publish(key),
            None => {
                let link = self.0.link.borrow().clone();
                link.notify(None);
            }
        }
    }

    /// Value under `key`, or `undefined`.
    pub fn get(&self, key: &str) -> Value {
        self.track();
        self.0.entries.borrow().get(key).cloned().unwrap_or_default()
    }

    /// Value under `key` without recording a dependency.
    pub fn peek(&self, key: &str) -> Value {
        self.0.entries.borrow().get(key).cloned().unwrap_or_default()
    }

    pub fn set(&self, key: &str, value: impl Into<Value>) {
        let key = self.intern(key);
        let value = adopt(&self.child_link(&key), value.into());
        self.0.entries.borrow_mut().insert(Rc::clone(&key), value);
        self.changed(&key);
    }

    pub fn remove(&self, key: &str) -> Value {
        let removed = self.0.entries.borrow_mut().remove_entry(key);
        match removed {
            Some((key, value)) => {
                self.changed(&key);
                value
            }
            None => Value::Undefined,
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.track();
        self.0.entries.borrow().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.track();
        self.0.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<Rc<str>> {
        self.track();
        self.0.entries.borrow().keys().cloned().collect()
    }

    /// All entries in key order (tracked).
    pub fn entries(&self) -> Vec<(Rc<str>, Value)> {
        self.track();
        self.peek_entries()
    }

    pub(crate) fn peek_entries(&self) -> Vec<(Rc<str>, Value)> {
        self.0
            .entries
            .borrow()
            .iter()
            .map(|(k, v)| (Rc::clone(k), v.clone()))
            .collect()
    }

    fn intern(&self, key: &str) -> Rc<str> {
        self.0
            .entries
            .borrow()
            .get_key_value(key)
            .map_or_else(|| Rc::from(key), |(k, _)| Rc::clone(k))
    }
}

impl fmt::Debug for ReactiveMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveMap")
            .field("id", &self.0.id)
            .field("store", &self.is_store())
            .field("entries", &*self.0.entries.borrow())
            .finish()
    }
}
