//! Store - Shared state with per-key subscribers.
//!
//! A store is a map shared by identity between component states. Writes to
//! the store (or to anything nested in it) invoke the subscribers for the
//! written top-level key synchronously. A [`State`](super::State) that holds a
//! store in one of its root fields subscribes its own notify path, so
//! bindings reading through that field update on the next flush.
//!
//! # Example
//!
//! ```ignore
//! let cart = Store::new().with("items", Value::list(["apple"]));
//! let state = State::new().with("cart", cart.clone());
//!
//! cart.set("items", Value::list(["apple", "pear"]));
//! tick(); // bindings reading `cart.items` re-run
//! ```

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::types::Value;

use super::container::ReactiveMap;

/// Handle returned by [`Store::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type StoreCallback = Rc<dyn Fn(&str)>;

struct Subscriber {
    id: SubscriptionId,
    /// `None` subscribes to every key.
    key: Option<Rc<str>>,
    callback: StoreCallback,
}

/// Subscriber registry behind a store map.
#[derive(Default)]
pub(crate) struct StoreHub {
    subscribers: RefCell<Vec<Subscriber>>,
    next_id: Cell<u64>,
}

impl StoreHub {
    pub(crate) fn subscribe(&self, key: Option<Rc<str>>, callback: StoreCallback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.subscribers.borrow_mut().push(Subscriber { id, key, callback });
        id
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.borrow_mut().retain(|s| s.id != id);
    }

    /// Invoke every subscriber interested in `key`.
    pub(crate) fn publish(&self, key: &str) {
        let callbacks: Vec<StoreCallback> = self
            .subscribers
            .borrow()
            .iter()
            .filter(|s| s.key.as_deref().is_none_or(|k| k == key))
            .map(|s| Rc::clone(&s.callback))
            .collect();
        for callback in callbacks {
            callback(key);
        }
    }

    fn len(&self) -> usize {
        self.subscribers.borrow().len()
    }
}

/// A shared, independently subscribable state object.
#[derive(Clone)]
pub struct Store {
    map: ReactiveMap,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            map: ReactiveMap::with_hub(Rc::new(StoreHub::default())),
        }
    }

    /// Builder-style initial value.
    pub fn with(self, key: &str, value: impl Into<Value>) -> Self {
        self.map.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Value {
        self.map.get(key)
    }

    pub fn set(&self, key: &str, value: impl Into<Value>) {
        self.map.set(key, value);
    }

    /// The backing map.
    pub fn map(&self) -> &ReactiveMap {
        &self.map
    }

    fn hub(&self) -> &Rc<StoreHub> {
        self.map
            .hub()
            .unwrap_or_else(|| unreachable!("store maps always carry a hub"))
    }

    /// Call `callback` whenever `key` is written.
    pub fn subscribe(&self, key: &str, callback: impl Fn(&str) + 'static) -> SubscriptionId {
        self.hub().subscribe(Some(key.into()), Rc::new(callback))
    }

    /// Call `callback` whenever any key is written.
    pub fn subscribe_any(&self, callback: impl Fn(&str) + 'static) -> SubscriptionId {
        self.hub().subscribe(None, Rc::new(callback))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.hub().unsubscribe(id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.hub().len()
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("map", &self.map)
            .field("subscribers", &self.hub().len())
            .finish()
    }
}

impl From<Store> for Value {
    fn from(store: Store) -> Self {
        Value::Map(store.map)
    }
}
