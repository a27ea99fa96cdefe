//! Observable State - The root state container of a component.
//!
//! `State` owns a set of root fields. Every read records the root key with the
//! tracker; every write (root or nested) enqueues the root key with the
//! state's scheduler. Computed accessors and methods live next to the fields:
//!
//! - **Fields** - plain values; nested lists/maps are linked to their root key
//! - **Computed** - `Fn(&State) -> Value`, recomputed on read; the keys it read
//!   last time decide when dependents of the computed key re-run
//! - **Methods** - `Fn(&State, &[Value]) -> Value` with the state as receiver;
//!   `mounted` and `unmounted` are lifecycle hooks
//!
//! # Example
//!
//! ```ignore
//! let state = State::new()
//!     .with("count", 0)
//!     .with_computed("double", |s| Value::from(s.get("count").to_number() * 2.0))
//!     .with_method("increment", |s, _| {
//!         s.update("count", |c| Value::from(c.to_number() + 1.0));
//!         Value::Undefined
//!     });
//!
//! let effect = state.effect(|s| println!("double = {}", s.get("double")));
//! state.call("increment", &[]);
//! tick(); // effect runs once
//! ```

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::types::{ArrayOp, Value};

use super::container::{adopt, Link, ReactiveList};
use super::scheduler::{queue_microtask, BindingId, Scheduler};
use super::store::SubscriptionId;
use super::tracker::{self, track, untracked, Deps};

/// A state method: receiver plus positional arguments.
pub type Method = Rc<dyn Fn(&State, &[Value]) -> Value>;

/// A computed accessor.
pub type Getter = Rc<dyn Fn(&State) -> Value>;

/// Emit capability installed by the owning component.
pub(crate) type Emitter = Rc<dyn Fn(&str, Value)>;

struct Computed {
    getter: Getter,
    deps: RefCell<Deps>,
}

thread_local! {
    static NEXT_STATE_ID: Cell<u64> = const { Cell::new(1) };
}

// =============================================================================
// StateCore
// =============================================================================

pub(crate) struct StateCore {
    id: u64,
    fields: RefCell<BTreeMap<Rc<str>, Value>>,
    computed: RefCell<BTreeMap<Rc<str>, Rc<Computed>>>,
    methods: RefCell<BTreeMap<Rc<str>, Method>>,
    scheduler: Scheduler,
    /// Store subscriptions per root field.
    store_subs: RefCell<Vec<(Rc<str>, Value, SubscriptionId)>>,
    emitter: RefCell<Option<Emitter>>,
    cleanups: RefCell<Vec<Box<dyn FnOnce()>>>,
    disposed: Cell<bool>,
}

impl StateCore {
    /// Enqueue `key`; queue one flush per turn.
    pub(crate) fn notify(core: &Rc<StateCore>, key: &Rc<str>) {
        if core.disposed.get() {
            return;
        }
        if core.scheduler.enqueue(key) {
            let weak = Rc::downgrade(core);
            queue_microtask(move || {
                if let Some(core) = weak.upgrade() {
                    core.flush();
                }
            });
        }
    }

    pub(crate) fn record_op(&self, list_id: u64, op: ArrayOp) {
        self.scheduler.record_op(list_id, op);
    }

    fn flush(&self) {
        self.scheduler.flush(|keys| self.expand(keys));
    }

    /// Add every computed key whose recorded deps intersect `keys`, to a
    /// fixpoint.
    fn expand(&self, keys: &Deps) -> Deps {
        let mut expanded = keys.clone();
        let computed = self.computed.borrow();
        loop {
            let mut added = false;
            for (name, entry) in computed.iter() {
                if expanded.contains(name) {
                    continue;
                }
                if entry.deps.borrow().iter().any(|dep| expanded.contains(dep)) {
                    expanded.insert(Rc::clone(name));
                    added = true;
                }
            }
            if !added {
                return expanded;
            }
        }
    }
}

// =============================================================================
// State
// =============================================================================

/// Observable root state of one component instance.
///
/// Cloning a `State` clones the handle.
#[derive(Clone)]
pub struct State(Rc<StateCore>);

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

impl State {
    pub fn new() -> Self {
        let id = NEXT_STATE_ID.with(|next| {
            let id = next.get();
            next.set(id + 1);
            id
        });
        Self(Rc::new(StateCore {
            id,
            fields: RefCell::new(BTreeMap::new()),
            computed: RefCell::new(BTreeMap::new()),
            methods: RefCell::new(BTreeMap::new()),
            scheduler: Scheduler::default(),
            store_subs: RefCell::new(Vec::new()),
            emitter: RefCell::new(None),
            cleanups: RefCell::new(Vec::new()),
            disposed: Cell::new(false),
        }))
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    // -------------------------------------------------------------------------
    // Builder
    // -------------------------------------------------------------------------

    /// Builder-style field initialisation (no notification).
    pub fn with(self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, value.into());
        self
    }

    /// Builder-style computed accessor.
    pub fn with_computed(self, name: &str, getter: impl Fn(&State) -> Value + 'static) -> Self {
        self.define_computed(name, getter);
        self
    }

    /// Builder-style method.
    pub fn with_method(
        self,
        name: &str,
        method: impl Fn(&State, &[Value]) -> Value + 'static,
    ) -> Self {
        self.define_method(name, method);
        self
    }

    pub fn define_computed(&self, name: &str, getter: impl Fn(&State) -> Value + 'static) {
        self.0.computed.borrow_mut().insert(
            name.into(),
            Rc::new(Computed {
                getter: Rc::new(getter),
                deps: RefCell::new(Deps::new()),
            }),
        );
    }

    pub fn define_method(&self, name: &str, method: impl Fn(&State, &[Value]) -> Value + 'static) {
        self.0.methods.borrow_mut().insert(name.into(), Rc::new(method));
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    fn intern(&self, key: &str) -> Rc<str> {
        if let Some((k, _)) = self.0.fields.borrow().get_key_value(key) {
            return Rc::clone(k);
        }
        if let Some((k, _)) = self.0.computed.borrow().get_key_value(key) {
            return Rc::clone(k);
        }
        Rc::from(key)
    }

    /// Read a root field or computed accessor, recording `key` as a dependency.
    ///
    /// Missing keys read as `undefined` and are still recorded, so a later
    /// write to them re-runs the reader.
    pub fn get(&self, key: &str) -> Value {
        let key = self.intern(key);
        tracker::record(&key);

        let computed = self.0.computed.borrow().get(&key).cloned();
        if let Some(computed) = computed {
            let (value, deps) = track(|| (computed.getter)(self));
            *computed.deps.borrow_mut() = deps;
            return value;
        }
        self.0.fields.borrow().get(&key).cloned().unwrap_or_default()
    }

    /// Read without recording a dependency.
    pub fn peek(&self, key: &str) -> Value {
        untracked(|| self.get(key))
    }

    /// Whether a field or computed accessor named `key` exists.
    pub fn has(&self, key: &str) -> bool {
        self.0.fields.borrow().contains_key(key) || self.0.computed.borrow().contains_key(key)
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.0.methods.borrow().contains_key(name)
    }

    /// Root field names.
    pub fn keys(&self) -> Vec<Rc<str>> {
        self.0.fields.borrow().keys().cloned().collect()
    }

    /// Read a dotted path; numeric segments index into lists.
    pub fn get_path(&self, path: &str) -> Value {
        let mut segments = path.split('.');
        let Some(root) = segments.next() else {
            return Value::Undefined;
        };
        let mut current = self.get(root.trim());
        for segment in segments {
            current = child(&current, segment.trim());
        }
        current
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    fn link_for(&self, key: &Rc<str>) -> Link {
        Link::State {
            owner: Rc::downgrade(&self.0),
            root: Rc::clone(key),
        }
    }

    /// Store a root field without notifying. Returns the interned key.
    fn insert(&self, key: &str, value: Value) -> Rc<str> {
        let key = self.intern(key);
        let value = adopt(&self.link_for(&key), value);
        self.connect_store(&key, &value);
        self.0.fields.borrow_mut().insert(Rc::clone(&key), value);
        key
    }

    /// Write a root field and schedule its dependents.
    pub fn set(&self, key: &str, value: impl Into<Value>) {
        if self.0.computed.borrow().contains_key(key) {
            tracing::warn!(key, "ignoring write to computed property");
            return;
        }
        let key = self.insert(key, value.into());
        StateCore::notify(&self.0, &key);
    }

    /// Read-modify-write of a root field.
    pub fn update(&self, key: &str, f: impl FnOnce(&Value) -> Value) {
        let current = self.peek(key);
        self.set(key, f(&current));
    }

    /// Write a value pushed from outside (a prop), preserving structure.
    ///
    /// - deep-equal values are a no-op
    /// - a list that extends the current list appends the new tail
    /// - a list that is a prefix of the current list pops the excess
    /// - anything else replaces the field
    pub fn assign(&self, key: &str, value: impl Into<Value>) {
        let value = value.into();
        let current = untracked(|| self.0.fields.borrow().get(key).cloned());

        if let Some(current) = current {
            if current.deep_eq(&value) {
                return;
            }
            if let (Value::List(existing), Value::List(incoming)) = (&current, &value) {
                let old = existing.peek_all();
                let new = incoming.peek_all();
                let shared = old.len().min(new.len());
                let prefix_matches = old[..shared]
                    .iter()
                    .zip(&new[..shared])
                    .all(|(a, b)| a.deep_eq(b));
                if prefix_matches {
                    if new.len() > old.len() {
                        existing.extend(new[old.len()..].iter().map(Value::deep_clone));
                    } else {
                        existing.truncate(new.len());
                    }
                    return;
                }
            }
        }
        self.set(key, value);
    }

    /// Write a dotted path. Returns false when an intermediate segment does
    /// not resolve to a container, or a list index is too far past the end.
    pub fn set_path(&self, path: &str, value: impl Into<Value>) -> bool {
        let segments: Vec<&str> = path.split('.').map(str::trim).collect();
        let Some((last, parents)) = segments.split_last() else {
            return false;
        };
        if parents.is_empty() {
            self.set(last, value);
            return true;
        }

        let target = untracked(|| {
            let mut current = self.get(parents[0]);
            for segment in &parents[1..] {
                current = child(&current, segment);
            }
            current
        });
        match target {
            Value::Map(map) => {
                map.set(last, value);
                true
            }
            Value::List(list) => match last.parse::<usize>() {
                Ok(index) => {
                    let written = list.set(index, value);
                    if !written {
                        tracing::warn!(path, index, "list index too far past the end");
                    }
                    written
                }
                Err(_) => false,
            },
            _ => false,
        }
    }

    // -------------------------------------------------------------------------
    // Stores
    // -------------------------------------------------------------------------

    /// Subscribe to a store held in root field `key`, replacing any previous
    /// subscription for that field.
    fn connect_store(&self, key: &Rc<str>, value: &Value) {
        let mut subs = self.0.store_subs.borrow_mut();
        if let Some(pos) = subs.iter().position(|(field, _, _)| field == key) {
            let (_, old, id) = subs.remove(pos);
            if let Some(hub) = old.as_map().and_then(|m| m.hub()) {
                hub.unsubscribe(id);
            }
        }

        let Some(hub) = value.as_map().and_then(|m| m.hub()) else {
            return;
        };
        let weak: Weak<StateCore> = Rc::downgrade(&self.0);
        let field = Rc::clone(key);
        let id = hub.subscribe(
            None,
            Rc::new(move |_: &str| {
                if let Some(core) = weak.upgrade() {
                    StateCore::notify(&core, &field);
                }
            }),
        );
        subs.push((Rc::clone(key), value.clone(), id));
    }

    // -------------------------------------------------------------------------
    // Methods
    // -------------------------------------------------------------------------

    pub fn method(&self, name: &str) -> Option<Method> {
        self.0.methods.borrow().get(name).cloned()
    }

    /// Call a method with this state as receiver. `None` if undefined.
    pub fn call(&self, name: &str, args: &[Value]) -> Option<Value> {
        let method = self.method(name)?;
        Some(method(self, args))
    }

    /// Emit a component event. Without an owning component this is a no-op.
    pub fn emit(&self, name: &str, detail: impl Into<Value>) {
        let emitter = self.0.emitter.borrow().clone();
        match emitter {
            Some(emit) => emit(name, detail.into()),
            None => tracing::debug!(event = name, "emit on a state without a component"),
        }
    }

    pub(crate) fn set_emitter(&self, emitter: Emitter) {
        *self.0.emitter.borrow_mut() = Some(emitter);
    }

    // -------------------------------------------------------------------------
    // Bindings and effects
    // -------------------------------------------------------------------------

    pub(crate) fn register_binding(&self, update: Rc<dyn Fn()>) -> BindingId {
        self.0.scheduler.register(update)
    }

    pub(crate) fn unregister_binding(&self, id: BindingId) {
        self.0.scheduler.unregister(id);
    }

    pub(crate) fn binding_dependencies(&self, id: BindingId) -> Option<Deps> {
        self.0.scheduler.dependencies(id)
    }

    /// Number of live bindings (effects included).
    pub fn binding_count(&self) -> usize {
        self.0.scheduler.binding_count()
    }

    /// Run `f` now and again after every flush that touches a key it read.
    pub fn effect(&self, f: impl Fn(&State) + 'static) -> Effect {
        let weak = Rc::downgrade(&self.0);
        let id = self.register_binding(Rc::new(move || {
            if let Some(core) = weak.upgrade() {
                f(&State(core));
            }
        }));
        Effect {
            state: Rc::downgrade(&self.0),
            id,
        }
    }

    /// Hint recorded for `list` before the current flush pass.
    pub(crate) fn array_op(&self, list: &ReactiveList) -> Option<ArrayOp> {
        self.0.scheduler.array_op(list.id())
    }

    /// Flush pending keys synchronously instead of waiting for `tick()`.
    pub fn flush(&self) {
        self.0.flush();
    }

    pub fn has_pending(&self) -> bool {
        self.0.scheduler.has_pending()
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Register a callback for disposal. Runs immediately if already disposed.
    pub fn on_cleanup(&self, f: impl FnOnce() + 'static) {
        if self.0.disposed.get() {
            f();
        } else {
            self.0.cleanups.borrow_mut().push(Box::new(f));
        }
    }

    /// Tear down bindings, store subscriptions, and run cleanups once.
    pub(crate) fn dispose(&self) {
        if self.0.disposed.replace(true) {
            return;
        }
        self.0.scheduler.clear();
        for (_, store, id) in self.0.store_subs.borrow_mut().drain(..) {
            if let Some(hub) = store.as_map().and_then(|m| m.hub()) {
                hub.unsubscribe(id);
            }
        }
        self.0.emitter.borrow_mut().take();
        let cleanups = std::mem::take(&mut *self.0.cleanups.borrow_mut());
        for cleanup in cleanups.into_iter().rev() {
            cleanup();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.0.disposed.get()
    }

    pub fn ptr_eq(&self, other: &State) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// Member/index step used by path access.
fn child(value: &Value, segment: &str) -> Value {
    match value {
        Value::Map(map) => map.get(segment),
        Value::List(list) => segment
            .parse::<usize>()
            .map_or(Value::Undefined, |index| list.get(index)),
        _ => Value::Undefined,
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("id", &self.0.id)
            .field("fields", &*self.0.fields.borrow())
            .field("computed", &self.0.computed.borrow().keys().collect::<Vec<_>>())
            .field("methods", &self.0.methods.borrow().keys().collect::<Vec<_>>())
            .finish()
    }
}

// =============================================================================
// Effect
// =============================================================================

/// A public binding created by [`State::effect`].
#[derive(Debug)]
pub struct Effect {
    state: Weak<StateCore>,
    id: BindingId,
}

impl Effect {
    /// Stop re-running.
    pub fn stop(&self) {
        if let Some(core) = self.state.upgrade() {
            core.scheduler.unregister(self.id);
        }
    }

    /// Keys read on the most recent run, sorted.
    pub fn dependencies(&self) -> Vec<String> {
        self.state
            .upgrade()
            .and_then(|core| core.scheduler.dependencies(self.id))
            .map(|deps| deps.iter().map(ToString::to_string).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::scheduler::{reset_microtasks, tick};
    use crate::state::Store;

    fn counter(effect_runs: &Rc<Cell<usize>>) -> impl Fn() + 'static {
        let runs = Rc::clone(effect_runs);
        move || runs.set(runs.get() + 1)
    }

    #[test]
    fn test_get_records_root_key() {
        let state = State::new().with("a", 1).with("b", Value::map([("c", 2)]));
        let (_, deps) = track(|| {
            state.get("a");
            state.get("b").as_map().unwrap().get("c");
        });
        assert_eq!(deps.iter().map(|k| &**k).collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_writes_coalesce_into_one_flush() {
        reset_microtasks();
        let state = State::new().with("count", 0);
        let runs = Rc::new(Cell::new(0));
        let bump = counter(&runs);
        let _effect = state.effect(move |s| {
            s.get("count");
            bump();
        });
        assert_eq!(runs.get(), 1);

        state.set("count", 1);
        state.set("count", 2);
        state.set("count", 3);
        assert_eq!(runs.get(), 1, "no update before the turn ends");

        tick();
        assert_eq!(runs.get(), 2);
        assert!(state.peek("count").strict_eq(&Value::from(3)));
    }

    #[test]
    fn test_nested_write_notifies_root() {
        reset_microtasks();
        let state = State::new().with("user", Value::map([("name", "Ann")]));
        let seen = Rc::new(RefCell::new(String::new()));
        let seen_clone = seen.clone();
        let _effect = state.effect(move |s| {
            *seen_clone.borrow_mut() = s.get_path("user.name").to_text();
        });

        state.peek("user").as_map().unwrap().set("name", "Bea");
        tick();
        assert_eq!(*seen.borrow(), "Bea");
    }

    #[test]
    fn test_dependencies_follow_last_run() {
        reset_microtasks();
        let state = State::new().with("a", true).with("b", 1).with("c", 2);
        let effect = state.effect(|s| {
            if s.get("a").is_truthy() {
                s.get("b");
            } else {
                s.get("c");
            }
        });
        assert_eq!(effect.dependencies(), vec!["a", "b"]);

        state.set("a", false);
        tick();
        assert_eq!(effect.dependencies(), vec!["a", "c"]);
    }

    #[test]
    fn test_computed_cascades_to_dependents() {
        reset_microtasks();
        let state = State::new()
            .with("count", 2)
            .with_computed("double", |s| Value::from(s.get("count").to_number() * 2.0));
        let seen = Rc::new(Cell::new(0.0));
        let runs = Rc::new(Cell::new(0));
        let (seen_clone, runs_clone) = (seen.clone(), runs.clone());
        let _effect = state.effect(move |s| {
            runs_clone.set(runs_clone.get() + 1);
            seen_clone.set(s.get("double").to_number());
        });
        assert_eq!(seen.get(), 4.0);

        state.set("count", 5);
        tick();
        assert_eq!(seen.get(), 10.0);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn test_binding_reading_key_and_computed_runs_once() {
        reset_microtasks();
        let state = State::new()
            .with("n", 1)
            .with_computed("plus_one", |s| Value::from(s.get("n").to_number() + 1.0));
        let runs = Rc::new(Cell::new(0));
        let runs_clone = runs.clone();
        let _effect = state.effect(move |s| {
            s.get("n");
            s.get("plus_one");
            runs_clone.set(runs_clone.get() + 1);
        });

        state.set("n", 2);
        tick();
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn test_methods_receive_state() {
        let state = State::new().with("count", 1).with_method("add", |s, args| {
            let by = args.first().map_or(1.0, Value::to_number);
            s.update("count", |c| Value::from(c.to_number() + by));
            Value::Undefined
        });
        state.call("add", &[Value::from(4)]);
        assert!(state.peek("count").strict_eq(&Value::from(5)));
        assert!(state.call("missing", &[]).is_none());
    }

    #[test]
    fn test_assign_extends_list_in_place() {
        reset_microtasks();
        let state = State::new().with("items", Value::list(["A", "B"]));
        let before = state.peek("items");

        state.assign("items", Value::list(["A", "B", "C"]));
        let after = state.peek("items");
        assert!(after.strict_eq(&before), "list identity preserved");
        assert_eq!(after.to_display(), "A,B,C");
        assert_eq!(
            state.array_op_for_test(after.as_list().unwrap()),
            Some(ArrayOp::Append(1))
        );

        state.assign("items", Value::list(["A"]));
        assert_eq!(state.peek("items").to_display(), "A");

        state.assign("items", Value::list(["Z"]));
        assert!(!state.peek("items").strict_eq(&before));
        tick();
    }

    #[test]
    fn test_container_from_other_state_is_snapshotted() {
        let a = State::new().with("items", Value::list([1]));
        let b = State::new();
        b.set("copy", a.peek("items"));
        assert!(!b.peek("copy").strict_eq(&a.peek("items")));
        assert!(b.peek("copy").deep_eq(&a.peek("items")));
    }

    #[test]
    fn test_set_path() {
        let state = State::new().with("form", Value::map([("tags", Value::list(["x"]))]));
        assert!(state.set_path("form.name", "Ann"));
        assert!(state.set_path("form.tags.0", "y"));
        assert!(!state.set_path("missing.name", "x"));
        assert!(!state.set_path("form.tags.99999999", "z"));
        assert_eq!(state.get_path("form.name").to_text(), "Ann");
        assert_eq!(state.get_path("form.tags.0").to_text(), "y");
    }

    #[test]
    fn test_store_write_reaches_state_bindings() {
        reset_microtasks();
        let store = Store::new().with("total", 1);
        let state = State::new().with("cart", store.clone());
        let seen = Rc::new(Cell::new(0.0));
        let seen_clone = seen.clone();
        let _effect = state.effect(move |s| {
            seen_clone.set(s.get_path("cart.total").to_number());
        });

        store.set("total", 7);
        tick();
        assert_eq!(seen.get(), 7.0);

        state.dispose();
        assert_eq!(store.subscriber_count(), 0);
    }

    #[test]
    fn test_dispose_runs_cleanups_once_and_stops_bindings() {
        reset_microtasks();
        let state = State::new().with("x", 0);
        let runs = Rc::new(Cell::new(0));
        let bump = counter(&runs);
        let _effect = state.effect(move |s| {
            s.get("x");
            bump();
        });
        let cleaned = Rc::new(Cell::new(0));
        let cleaned_clone = cleaned.clone();
        state.on_cleanup(move || cleaned_clone.set(cleaned_clone.get() + 1));

        state.dispose();
        state.dispose();
        assert_eq!(cleaned.get(), 1);

        state.set("x", 1);
        tick();
        assert_eq!(runs.get(), 1);
        assert_eq!(state.binding_count(), 0);
    }

    #[test]
    fn test_effect_stop() {
        reset_microtasks();
        let state = State::new().with("x", 0);
        let runs = Rc::new(Cell::new(0));
        let bump = counter(&runs);
        let effect = state.effect(move |s| {
            s.get("x");
            bump();
        });
        effect.stop();
        state.set("x", 1);
        tick();
        assert_eq!(runs.get(), 1);
        assert!(effect.dependencies().is_empty());
    }

    impl State {
        /// Recorded (not yet flushed) hint, for assertions.
        fn array_op_for_test(&self, list: &ReactiveList) -> Option<ArrayOp> {
            self.0.scheduler.recorded_op_for_test(list.id())
        }
    }
}
