//! Dependency Tracker - Records which root keys a computation reads.
//!
//! A tracking frame is active while [`track`] runs its closure. Every read
//! through a [`State`](super::State) or a linked container records the owning
//! root key into that frame. Frames nest: an inner `track` saves the outer
//! frame and restores it when done, so computed getters can track their own
//! reads while being read from a binding.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

/// Set of root keys read during one evaluation.
pub type Deps = BTreeSet<Rc<str>>;

thread_local! {
    /// The active tracking frame, if any.
    static ACTIVE: RefCell<Option<Deps>> = const { RefCell::new(None) };
}

/// Restores the saved frame on drop, including on unwind.
struct FrameGuard {
    saved: Option<Option<Deps>>,
}

impl FrameGuard {
    fn enter(frame: Option<Deps>) -> Self {
        let saved = ACTIVE.with(|active| active.replace(frame));
        Self { saved: Some(saved) }
    }

    fn exit(mut self) -> Option<Deps> {
        let saved = self.saved.take().unwrap_or_default();
        ACTIVE.with(|active| active.replace(saved))
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            ACTIVE.with(|active| {
                active.replace(saved);
            });
        }
    }
}

/// Run `f` in a fresh tracking frame; return its result and the keys it read.
pub fn track<R>(f: impl FnOnce() -> R) -> (R, Deps) {
    let guard = FrameGuard::enter(Some(Deps::new()));
    let result = f();
    let deps = guard.exit().unwrap_or_default();
    (result, deps)
}

/// Run `f` with tracking suspended.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let guard = FrameGuard::enter(None);
    let result = f();
    guard.exit();
    result
}

/// Whether a tracking frame is active.
pub fn is_tracking() -> bool {
    ACTIVE.with(|active| active.borrow().is_some())
}

/// Record a read of `key` into the active frame.
pub(crate) fn record(key: &Rc<str>) {
    ACTIVE.with(|active| {
        if let Some(deps) = active.borrow_mut().as_mut() {
            if !deps.contains(key) {
                deps.insert(Rc::clone(key));
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> Rc<str> {
        Rc::from(s)
    }

    #[test]
    fn test_track_collects_reads() {
        let ((), deps) = track(|| {
            record(&key("a"));
            record(&key("b"));
            record(&key("a"));
        });
        assert_eq!(deps.len(), 2);
        assert!(deps.contains("a"));
        assert!(deps.contains("b"));
    }

    #[test]
    fn test_no_frame_no_recording() {
        assert!(!is_tracking());
        record(&key("ignored"));
        let ((), deps) = track(|| {});
        assert!(deps.is_empty());
    }

    #[test]
    fn test_nested_track_restores_outer_frame() {
        let (inner, outer) = track(|| {
            record(&key("outer"));
            let ((), inner) = track(|| record(&key("inner")));
            record(&key("after"));
            inner
        });
        assert_eq!(inner.iter().map(|k| &**k).collect::<Vec<_>>(), vec!["inner"]);
        assert_eq!(
            outer.iter().map(|k| &**k).collect::<Vec<_>>(),
            vec!["after", "outer"]
        );
    }

    #[test]
    fn test_untracked_suspends_frame() {
        let ((), deps) = track(|| {
            untracked(|| record(&key("hidden")));
            assert!(is_tracking());
            record(&key("seen"));
        });
        assert!(!deps.contains("hidden"));
        assert!(deps.contains("seen"));
    }

    #[test]
    fn test_frame_restored_after_panic() {
        let result = std::panic::catch_unwind(|| {
            track(|| {
                record(&key("x"));
                panic!("boom");
            })
        });
        assert!(result.is_err());
        assert!(!is_tracking());
    }
}
