//! Update Scheduler - Coalesces writes into one flush per turn.
//!
//! # Turn model
//!
//! The runtime is single-threaded. A write never runs bindings directly: it
//! adds the owning root key to the state's pending set and, the first time in
//! a turn, queues one flush as a microtask. [`tick`] ends the turn by draining
//! the microtask queue; host event dispatch does the same when it returns to
//! the top level.
//!
//! ```text
//! set(count=1) ─┐
//! set(count=2) ─┼─► pending {count} ─► tick() ─► flush: run bindings ∋ count once
//! set(count=3) ─┘
//! ```
//!
//! # Flush
//!
//! Each pass snapshots and clears the pending keys, expands them through
//! computed dependencies, resolves bindings through the key→binding index and
//! runs each at most once. Writes made by bindings during a pass start another
//! pass. Array-operation hints recorded before a pass are visible during that
//! pass and discarded once the flush settles.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::rc::Rc;

use crate::config::config;
use crate::types::ArrayOp;

use super::tracker::{track, Deps};

// =============================================================================
// Microtask Queue
// =============================================================================

type Microtask = Box<dyn FnOnce()>;

thread_local! {
    /// Deferred work for the end of the current turn.
    static MICROTASKS: RefCell<VecDeque<Microtask>> = RefCell::new(VecDeque::new());

    /// Set while `tick()` is draining.
    static DRAINING: Cell<bool> = const { Cell::new(false) };
}

struct DrainGuard;

impl Drop for DrainGuard {
    fn drop(&mut self) {
        DRAINING.with(|d| d.set(false));
    }
}

/// Queue `task` to run when the current turn ends.
pub fn queue_microtask(task: impl FnOnce() + 'static) {
    MICROTASKS.with(|queue| queue.borrow_mut().push_back(Box::new(task)));
}

/// End the turn: run queued microtasks until the queue is empty.
///
/// Tasks queued while draining run in the same call. Nested calls return 0
/// immediately. Returns the number of tasks run.
pub fn tick() -> usize {
    if DRAINING.with(Cell::get) {
        return 0;
    }
    DRAINING.with(|d| d.set(true));
    let _guard = DrainGuard;

    let mut ran = 0;
    loop {
        let next = MICROTASKS.with(|queue| queue.borrow_mut().pop_front());
        let Some(task) = next else { break };
        task();
        ran += 1;
    }
    ran
}

/// Number of queued microtasks.
pub fn pending_microtasks() -> usize {
    MICROTASKS.with(|queue| queue.borrow().len())
}

/// Whether `tick()` is currently draining.
pub fn is_draining() -> bool {
    DRAINING.with(Cell::get)
}

/// Drop all queued microtasks (for testing).
pub fn reset_microtasks() {
    MICROTASKS.with(|queue| queue.borrow_mut().clear());
}

// =============================================================================
// Bindings
// =============================================================================

/// Identifies a binding within one state's scheduler.
///
/// Ids increase monotonically, so ordering by id runs outer bindings before
/// the bindings their render pass created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BindingId(u64);

/// An update function plus the keys it read on its last run.
struct Binding {
    update: Rc<dyn Fn()>,
    deps: RefCell<Deps>,
}

// =============================================================================
// Scheduler
// =============================================================================

/// Per-state binding registry and pending-key set.
#[derive(Default)]
pub(crate) struct Scheduler {
    pending: RefCell<Deps>,
    scheduled: Cell<bool>,
    flushing: Cell<bool>,
    next_id: Cell<u64>,
    bindings: RefCell<BTreeMap<BindingId, Rc<Binding>>>,
    index: RefCell<HashMap<Rc<str>, BTreeSet<BindingId>>>,
    /// Hints recorded since the current pass started.
    recorded_ops: RefCell<HashMap<u64, ArrayOp>>,
    /// Hints visible to bindings running in the current pass.
    pass_ops: RefCell<HashMap<u64, ArrayOp>>,
}

impl Scheduler {
    /// Register `update` and run it once to record its dependencies.
    pub(crate) fn register(&self, update: Rc<dyn Fn()>) -> BindingId {
        let id = BindingId(self.next_id.get());
        self.next_id.set(id.0 + 1);

        let binding = Rc::new(Binding {
            update,
            deps: RefCell::new(Deps::new()),
        });
        self.bindings.borrow_mut().insert(id, Rc::clone(&binding));
        tracing::trace!(binding = id.0, "binding registered");

        self.run(id, &binding);
        id
    }

    /// Remove a binding and its index entries.
    pub(crate) fn unregister(&self, id: BindingId) {
        let removed = self.bindings.borrow_mut().remove(&id);
        if let Some(binding) = removed {
            let deps = binding.deps.borrow();
            let mut index = self.index.borrow_mut();
            for key in deps.iter() {
                if let Some(ids) = index.get_mut(key) {
                    ids.remove(&id);
                    if ids.is_empty() {
                        index.remove(key);
                    }
                }
            }
        }
    }

    /// Drop every binding and pending key.
    pub(crate) fn clear(&self) {
        self.bindings.borrow_mut().clear();
        self.index.borrow_mut().clear();
        self.pending.borrow_mut().clear();
        self.recorded_ops.borrow_mut().clear();
        self.pass_ops.borrow_mut().clear();
    }

    /// Keys recorded on the binding's last run.
    pub(crate) fn dependencies(&self, id: BindingId) -> Option<Deps> {
        self.bindings
            .borrow()
            .get(&id)
            .map(|binding| binding.deps.borrow().clone())
    }

    pub(crate) fn binding_count(&self) -> usize {
        self.bindings.borrow().len()
    }

    /// Run one binding in a fresh tracking frame and re-index its deps.
    fn run(&self, id: BindingId, binding: &Rc<Binding>) {
        let ((), deps) = track(|| (binding.update)());

        // The binding may have been torn down by its own run.
        if !self.bindings.borrow().contains_key(&id) {
            return;
        }

        let old = binding.deps.replace(deps.clone());
        if old == deps {
            return;
        }
        let mut index = self.index.borrow_mut();
        for key in old.difference(&deps) {
            if let Some(ids) = index.get_mut(key) {
                ids.remove(&id);
                if ids.is_empty() {
                    index.remove(key);
                }
            }
        }
        for key in deps.difference(&old) {
            index.entry(Rc::clone(key)).or_default().insert(id);
        }
    }

    /// Add `key` to the pending set. Returns true when the caller must queue a
    /// flush for this turn.
    pub(crate) fn enqueue(&self, key: &Rc<str>) -> bool {
        self.pending.borrow_mut().insert(Rc::clone(key));
        if self.scheduled.get() || self.flushing.get() {
            return false;
        }
        self.scheduled.set(true);
        true
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.pending.borrow().is_empty()
    }

    /// Record an array operation on list `list_id`.
    pub(crate) fn record_op(&self, list_id: u64, op: ArrayOp) {
        self.recorded_ops
            .borrow_mut()
            .entry(list_id)
            .and_modify(|existing| *existing = existing.merge(op))
            .or_insert(op);
    }

    /// The operation recorded for `list_id` before the current pass.
    pub(crate) fn array_op(&self, list_id: u64) -> Option<ArrayOp> {
        self.pass_ops.borrow().get(&list_id).copied()
    }

    #[cfg(test)]
    pub(crate) fn recorded_op_for_test(&self, list_id: u64) -> Option<ArrayOp> {
        self.recorded_ops.borrow().get(&list_id).copied()
    }

    /// Process pending keys until none remain.
    ///
    /// `expand` maps a pass's keys to the keys plus every computed accessor
    /// whose recorded dependencies they touch.
    pub(crate) fn flush(&self, expand: impl Fn(&Deps) -> Deps) {
        self.scheduled.set(false);
        if self.flushing.get() {
            return;
        }
        self.flushing.set(true);

        let max_passes = config().max_flush_passes;
        let mut passes = 0;
        loop {
            let keys = std::mem::take(&mut *self.pending.borrow_mut());
            if keys.is_empty() {
                break;
            }
            passes += 1;
            if passes > max_passes {
                tracing::warn!(
                    passes = max_passes,
                    dropped = keys.len(),
                    "flush did not settle; dropping pending keys"
                );
                self.pending.borrow_mut().clear();
                break;
            }

            let keys = expand(&keys);
            let ops = std::mem::take(&mut *self.recorded_ops.borrow_mut());
            *self.pass_ops.borrow_mut() = ops;

            let ids: BTreeSet<BindingId> = {
                let index = self.index.borrow();
                keys.iter()
                    .filter_map(|key| index.get(key))
                    .flatten()
                    .copied()
                    .collect()
            };
            tracing::debug!(
                pass = passes,
                keys = keys.len(),
                bindings = ids.len(),
                "flush pass"
            );

            for id in ids {
                let binding = self.bindings.borrow().get(&id).cloned();
                if let Some(binding) = binding {
                    self.run(id, &binding);
                }
            }
        }

        self.recorded_ops.borrow_mut().clear();
        self.pass_ops.borrow_mut().clear();
        self.flushing.set(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tracker::record;

    fn key(s: &str) -> Rc<str> {
        Rc::from(s)
    }

    #[test]
    fn test_tick_drains_nested_microtasks() {
        reset_microtasks();
        let log = Rc::new(RefCell::new(Vec::new()));
        let log_outer = log.clone();
        queue_microtask(move || {
            log_outer.borrow_mut().push("outer");
            let log_inner = log_outer.clone();
            queue_microtask(move || log_inner.borrow_mut().push("inner"));
        });

        assert_eq!(pending_microtasks(), 1);
        assert_eq!(tick(), 2);
        assert_eq!(*log.borrow(), vec!["outer", "inner"]);
        assert_eq!(pending_microtasks(), 0);
    }

    #[test]
    fn test_nested_tick_is_noop() {
        reset_microtasks();
        let nested = Rc::new(Cell::new(usize::MAX));
        let nested_clone = nested.clone();
        queue_microtask(move || nested_clone.set(tick()));
        tick();
        assert_eq!(nested.get(), 0);
        assert!(!is_draining());
    }

    #[test]
    fn test_register_runs_and_indexes() {
        let scheduler = Scheduler::default();
        let runs = Rc::new(Cell::new(0));
        let runs_clone = runs.clone();
        let id = scheduler.register(Rc::new(move || {
            runs_clone.set(runs_clone.get() + 1);
            record(&key("a"));
        }));

        assert_eq!(runs.get(), 1);
        let deps = scheduler.dependencies(id).unwrap();
        assert!(deps.contains("a"));

        assert!(scheduler.enqueue(&key("a")));
        assert!(!scheduler.enqueue(&key("a")), "second enqueue is coalesced");
        scheduler.flush(Deps::clone);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn test_unregister_stops_updates() {
        let scheduler = Scheduler::default();
        let runs = Rc::new(Cell::new(0));
        let runs_clone = runs.clone();
        let id = scheduler.register(Rc::new(move || {
            runs_clone.set(runs_clone.get() + 1);
            record(&key("a"));
        }));
        scheduler.unregister(id);

        scheduler.enqueue(&key("a"));
        scheduler.flush(Deps::clone);
        assert_eq!(runs.get(), 1);
        assert_eq!(scheduler.binding_count(), 0);
    }

    #[test]
    fn test_binding_runs_once_for_several_keys() {
        let scheduler = Scheduler::default();
        let runs = Rc::new(Cell::new(0));
        let runs_clone = runs.clone();
        scheduler.register(Rc::new(move || {
            runs_clone.set(runs_clone.get() + 1);
            record(&key("a"));
            record(&key("b"));
        }));

        scheduler.enqueue(&key("a"));
        scheduler.enqueue(&key("b"));
        scheduler.flush(Deps::clone);
        assert_eq!(runs.get(), 2, "one initial run plus one flush run");
    }

    #[test]
    fn test_ops_visible_only_during_pass() {
        let scheduler = Rc::new(Scheduler::default());
        let seen = Rc::new(Cell::new(None));
        let seen_clone = seen.clone();
        let weak = Rc::downgrade(&scheduler);
        scheduler.register(Rc::new(move || {
            record(&key("items"));
            if let Some(s) = weak.upgrade() {
                seen_clone.set(s.array_op(7));
            }
        }));
        assert_eq!(seen.get(), None);

        scheduler.record_op(7, ArrayOp::Append(1));
        scheduler.record_op(7, ArrayOp::Append(1));
        scheduler.enqueue(&key("items"));
        scheduler.flush(Deps::clone);
        assert_eq!(seen.get(), Some(ArrayOp::Append(2)));
        assert_eq!(scheduler.array_op(7), None);
    }
}
