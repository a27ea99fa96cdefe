//! Primitive Types - Cleanup scopes, directive flags, and walker context.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::engine::{Node, Registry};
use crate::expr::{self, EvalScope, Locals};
use crate::state::{untracked, State};
use crate::types::Value;

// =============================================================================
// Cleanup Function
// =============================================================================

/// Cleanup function run when a rendered region goes away.
pub type Cleanup = Box<dyn FnOnce()>;

// =============================================================================
// Scope
// =============================================================================

#[derive(Default)]
struct ScopeInner {
    cleanups: RefCell<Vec<Cleanup>>,
    disposed: Cell<bool>,
}

/// Cleanup collector for one rendered region: a component instance, an `if`
/// branch, or a list row.
///
/// Cleanups run once, newest first. Adding to a disposed scope runs the
/// cleanup immediately.
#[derive(Clone, Default)]
pub struct Scope(Rc<ScopeInner>);

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, cleanup: impl FnOnce() + 'static) {
        if self.0.disposed.get() {
            cleanup();
        } else {
            self.0.cleanups.borrow_mut().push(Box::new(cleanup));
        }
    }

    /// Run every cleanup. Idempotent.
    pub fn dispose(&self) {
        if self.0.disposed.replace(true) {
            return;
        }
        loop {
            let next = self.0.cleanups.borrow_mut().pop();
            let Some(cleanup) = next else { break };
            cleanup();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.0.disposed.get()
    }

    /// Number of pending cleanups.
    pub fn len(&self) -> usize {
        self.0.cleanups.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("cleanups", &self.len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// =============================================================================
// Directive flags (bitflags)
// =============================================================================

bitflags::bitflags! {
    /// Directive attributes present on an element.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Directives: u8 {
        const NONE = 0;
        const FOR = 1 << 0;
        const IF = 1 << 1;
        const SHOW = 1 << 2;
        const BIND = 1 << 3;
        /// At least one `on:` attribute.
        const EVENTS = 1 << 4;
        /// At least one other attribute containing `{...}`.
        const EXPRESSIONS = 1 << 5;
    }
}

impl Directives {
    /// Scan the attributes of `node`.
    pub fn of(node: &Node) -> Self {
        let mut flags = Directives::NONE;
        for (name, value) in node.attributes() {
            flags |= match &*name {
                "for" => Directives::FOR,
                "if" => Directives::IF,
                "show" => Directives::SHOW,
                "bind" => Directives::BIND,
                n if n.starts_with("on:") => Directives::EVENTS,
                _ if crate::template::has_interpolation(&value) => Directives::EXPRESSIONS,
                _ => Directives::NONE,
            };
        }
        flags
    }
}

// =============================================================================
// Walker context
// =============================================================================

/// Everything a directive needs while walking one component's template.
#[derive(Clone)]
pub(crate) struct Ctx {
    pub state: State,
    pub registry: Registry,
    /// Region that owns bindings and listeners created here.
    pub scope: Scope,
    /// Loop variables visible at this point.
    pub locals: Locals,
    /// Tag of the component being walked; never substituted into itself.
    pub own_tag: Rc<str>,
}

impl Ctx {
    pub fn eval_scope(&self) -> EvalScope {
        EvalScope::with_locals(&self.state, self.locals.clone())
    }

    pub fn evaluate(&self, text: &str) -> Value {
        expr::evaluate(text, &self.eval_scope())
    }

    /// Evaluate without recording dependencies.
    pub fn peek(&self, text: &str) -> Value {
        untracked(|| self.evaluate(text))
    }

    /// Run `text` as statements with `extra` locals in scope.
    pub fn execute(&self, text: &str, extra: Vec<(&str, Value)>) -> Value {
        let scope = EvalScope::with_locals(&self.state, self.locals.extend(extra));
        expr::execute(text, &scope)
    }

    /// Same state and locals, new cleanup region.
    pub fn with_scope(&self, scope: Scope) -> Ctx {
        Ctx {
            scope,
            ..self.clone()
        }
    }

    /// Register a binding owned by this context's scope.
    pub fn bind(&self, update: impl Fn() + 'static) {
        let id = self.state.register_binding(Rc::new(update));
        let state = self.state.clone();
        self.scope.add(move || state.unregister_binding(id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_runs_cleanups_once_newest_first() {
        let scope = Scope::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let log = log.clone();
            scope.add(move || log.borrow_mut().push(i));
        }
        assert_eq!(scope.len(), 3);

        scope.dispose();
        scope.dispose();
        assert_eq!(*log.borrow(), vec![2, 1, 0]);

        let late = log.clone();
        scope.add(move || late.borrow_mut().push(9));
        assert_eq!(log.borrow().last(), Some(&9));
    }

    #[test]
    fn test_directive_flags() {
        let node = Node::element("li");
        node.set_attribute("for", "item in items");
        node.set_attribute("on:click", "pick(item)");
        node.set_attribute("class", "{item.kind}");
        node.set_attribute("title", "plain");
        let flags = Directives::of(&node);
        assert!(flags.contains(Directives::FOR | Directives::EVENTS | Directives::EXPRESSIONS));
        assert!(!flags.intersects(Directives::IF | Directives::SHOW | Directives::BIND));
    }
}
