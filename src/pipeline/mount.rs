//! Mount API - Component definitions, factories and instance lifecycle.
//!
//! A [`ComponentDef`] is parsed and validated once. Its [`Factory`] creates
//! instances: each call resolves a fresh [`State`], clones the template,
//! walks it, and returns a [`ComponentHandle`] that owns everything the walk
//! created.
//!
//! # Example
//!
//! ```ignore
//! use spark_weave::{component, tick, ComponentInput, Node, State, Value};
//!
//! let counter = component("x-counter", "<button on:click=\"count++\">{count}</button>", |input| {
//!     State::new().with("count", input.get("start"))
//! })?;
//!
//! let body = Node::element("body");
//! let handle = counter.create(ComponentInput::new().prop("start", 5));
//! handle.mount(&body, None)?;
//!
//! // Clean up
//! handle.unmount();
//! ```

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use crate::engine::{Event, Node, WeakRegistry};
use crate::error::{Error, Result};
use crate::expr::Locals;
use crate::primitives::{validate_for, walk, Ctx, Scope};
use crate::state::{untracked, Emitter, State};
use crate::style::register_style;
use crate::types::{Props, RouteParams, Value};

// =============================================================================
// Component Input
// =============================================================================

/// What a factory call receives: props from a parent or host, and route
/// parameters from a router.
#[derive(Debug, Clone, Default)]
pub struct ComponentInput {
    pub props: Props,
    pub route: RouteParams,
}

impl ComponentInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prop(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.props.insert(name.into(), value.into());
        self
    }

    pub fn route_param(mut self, name: &str, value: &str) -> Self {
        self.route.insert(name.to_string(), value.to_string());
        self
    }

    /// A prop, else a route parameter, else `undefined`.
    pub fn get(&self, name: &str) -> Value {
        if let Some(value) = self.props.get(name) {
            return value.clone();
        }
        self.route
            .get(name)
            .map_or(Value::Undefined, |v| Value::from(v.as_str()))
    }
}

// =============================================================================
// Component Definition
// =============================================================================

/// Resolves the initial state of an instance.
pub type StateFn = Rc<dyn Fn(&ComponentInput) -> State>;

/// A parsed, validated component.
pub struct ComponentDef {
    tag: Rc<str>,
    template: Node,
    state_fn: StateFn,
    style: Option<String>,
}

impl ComponentDef {
    /// Parse `template` and check its `for` attributes. The tag is
    /// lower-cased to match parsed element names.
    pub fn new(
        tag: &str,
        template: &str,
        state_fn: impl Fn(&ComponentInput) -> State + 'static,
    ) -> Result<Self> {
        let fragment = crate::template::parse(template)?;
        validate_for(&fragment)?;
        Ok(Self {
            tag: tag.to_ascii_lowercase().into(),
            template: fragment,
            state_fn: Rc::new(state_fn),
            style: None,
        })
    }

    /// CSS scoped under the tag, registered when the first instance is created.
    pub fn with_style(mut self, css: &str) -> Self {
        self.style = Some(css.to_string());
        self
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// The pristine parsed template.
    pub fn template(&self) -> &Node {
        &self.template
    }
}

impl fmt::Debug for ComponentDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentDef")
            .field("tag", &self.tag)
            .field("template", &self.template.to_html())
            .field("style", &self.style.is_some())
            .finish()
    }
}

// =============================================================================
// Factory
// =============================================================================

/// Creates instances of one registered component.
#[derive(Clone)]
pub struct Factory {
    def: Rc<ComponentDef>,
    registry: WeakRegistry,
}

impl Factory {
    pub(crate) fn new(def: ComponentDef, registry: WeakRegistry) -> Self {
        Self {
            def: Rc::new(def),
            registry,
        }
    }

    pub fn tag(&self) -> &str {
        self.def.tag()
    }

    pub fn def(&self) -> &ComponentDef {
        &self.def
    }

    /// Build an unmounted instance.
    pub fn create(&self, input: ComponentInput) -> ComponentHandle {
        let def = &self.def;
        if let Some(css) = &def.style {
            register_style(&def.tag, css);
        }

        let mut state = untracked(|| (def.state_fn)(&input));
        for (name, value) in &input.props {
            if !state.has(name) && !state.has_method(name) {
                state = state.with(name, value.deep_clone());
            }
        }
        for (name, value) in &input.route {
            if !state.has(name) && !state.has_method(name) {
                state = state.with(name, value.as_str());
            }
        }

        let holder = def.template.clone_deep();
        let scope = Scope::new();
        let ctx = Ctx {
            state: state.clone(),
            registry: self.registry.upgrade().unwrap_or_default(),
            scope: scope.clone(),
            locals: Locals::new(),
            own_tag: Rc::clone(&def.tag),
        };
        untracked(|| walk(&holder, &ctx));

        let host = holder.children().into_iter().find(Node::is_element);
        let start = Node::text("");
        let end = Node::text("");
        let span = Node::fragment();
        span.append_child(&start);
        span.append_child(&holder);
        span.append_child(&end);
        let weak_host = host.as_ref().map(Node::downgrade);
        let emitter: Emitter = Rc::new(move |name: &str, detail: Value| {
            match weak_host.as_ref().and_then(|h| h.upgrade()) {
                Some(host) => host.dispatch(&Event::with_detail(name, detail)),
                None => tracing::debug!(event = name, "emit without an element root"),
            }
        });
        state.set_emitter(emitter);

        tracing::debug!(tag = %def.tag, bindings = state.binding_count(), "component created");
        ComponentHandle(Rc::new(Instance {
            tag: Rc::clone(&def.tag),
            holder: span,
            start,
            end,
            host,
            state,
            scope,
            mounted: Cell::new(false),
            unmounted: Cell::new(false),
        }))
    }
}

impl fmt::Debug for Factory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Factory").field("tag", &self.def.tag).finish()
    }
}

// =============================================================================
// Component Handle
// =============================================================================

struct Instance {
    tag: Rc<str>,
    /// Fragment owning the roots until the first mount.
    holder: Node,
    /// Empty text anchors bracketing the roots wherever they are placed.
    /// Top-level `for` rows and `if` branches land between them.
    start: Node,
    end: Node,
    host: Option<Node>,
    state: State,
    scope: Scope,
    mounted: Cell<bool>,
    unmounted: Cell<bool>,
}

/// A live component instance.
///
/// Cloning the handle does not clone the instance. Dropping every handle
/// without calling [`unmount`](Self::unmount) leaves the nodes in place.
#[derive(Clone)]
pub struct ComponentHandle(Rc<Instance>);

impl ComponentHandle {
    pub fn tag(&self) -> &str {
        &self.0.tag
    }

    pub fn state(&self) -> &State {
        &self.0.state
    }

    /// Top-level nodes of the instance, including rows and branches that
    /// top-level directives rendered since the last mount.
    pub fn roots(&self) -> Vec<Node> {
        let mut roots = Vec::new();
        let mut next = self.0.start.next_sibling();
        while let Some(node) = next {
            if node.ptr_eq(&self.0.end) {
                break;
            }
            next = node.next_sibling();
            roots.push(node);
        }
        roots
    }

    /// Roots plus both anchors, in tree order.
    fn span(&self) -> Vec<Node> {
        let mut nodes = vec![self.0.start.clone()];
        nodes.extend(self.roots());
        nodes.push(self.0.end.clone());
        nodes
    }

    /// First element root; target of [`emit`](Self::emit).
    pub fn host(&self) -> Option<Node> {
        self.0.host.clone()
    }

    pub fn is_mounted(&self) -> bool {
        self.0.mounted.get() && !self.0.unmounted.get()
    }

    /// Insert the roots into `target` before `before` (or at the end) and
    /// run the `mounted` hook the first time.
    pub fn mount(&self, target: &Node, before: Option<&Node>) -> Result<()> {
        if self.0.unmounted.get() {
            return Err(Error::Unmounted(self.0.tag.to_string()));
        }
        if let Some(reference) = before {
            if !reference.parent().is_some_and(|p| p.ptr_eq(target)) {
                return Err(Error::NotAChild);
            }
        }

        for node in self.span() {
            target.insert_before(&node, before)?;
        }

        if !self.0.mounted.replace(true) {
            tracing::debug!(tag = %self.0.tag, "component mounted");
            self.run_hook("mounted");
        }
        Ok(())
    }

    /// Tear the instance down: dispose bindings, listeners and child
    /// components, detach the roots, run cleanups, then the `unmounted` hook.
    /// Idempotent.
    pub fn unmount(&self) {
        if self.0.unmounted.replace(true) {
            return;
        }
        self.0.scope.dispose();
        for node in self.span() {
            node.remove();
        }
        self.0.state.dispose();
        self.run_hook("unmounted");
        tracing::debug!(tag = %self.0.tag, "component unmounted");
    }

    /// Dispatch a component event on the host element.
    pub fn emit(&self, name: &str, detail: impl Into<Value>) {
        self.0.state.emit(name, detail);
    }

    /// Run `f` once on unmount.
    pub fn on_cleanup(&self, f: impl FnOnce() + 'static) {
        self.0.state.on_cleanup(f);
    }

    /// Serialised roots, for inspection and tests.
    pub fn to_html(&self) -> String {
        self.roots().iter().map(Node::to_html).collect()
    }

    fn run_hook(&self, name: &str) {
        if let Some(hook) = self.0.state.method(name) {
            untracked(|| hook(&self.0.state, &[]));
        }
    }
}

impl fmt::Debug for ComponentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentHandle")
            .field("tag", &self.0.tag)
            .field("mounted", &self.is_mounted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::engine::Registry;
    use crate::state::tick;

    fn reset_all() {
        crate::style::reset_styles();
    }

    fn counter(registry: &Registry) -> Factory {
        registry
            .component(
                "x-counter",
                "<button on:click=\"count++\">{count}</button>",
                |input| State::new().with("count", input.get("start")),
            )
            .unwrap()
    }

    #[test]
    fn test_create_resolves_state_from_input() {
        let registry = Registry::new();
        let handle = counter(&registry).create(ComponentInput::new().prop("start", 5));
        assert_eq!(handle.to_html(), "<button>5</button>");
        assert!(!handle.is_mounted());
    }

    #[test]
    fn test_unproduced_props_and_route_params_are_merged() {
        let registry = Registry::new();
        let factory = registry
            .component("x-user", "<p>{id} {title}</p>", |_| State::new().with("title", "own"))
            .unwrap();
        let handle = factory.create(
            ComponentInput::new()
                .prop("title", "ignored")
                .route_param("id", "42"),
        );
        assert_eq!(handle.to_html(), "<p>42 own</p>");
    }

    #[test]
    fn test_mount_before_reference_and_hooks() {
        let registry = Registry::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let hooks = Rc::clone(&log);
        let factory = registry
            .component("x-hooks", "<i>a</i><b>b</b>", move |_| {
                let mounted = Rc::clone(&hooks);
                let unmounted = Rc::clone(&hooks);
                State::new()
                    .with_method("mounted", move |_, _| {
                        mounted.borrow_mut().push("mounted");
                        Value::Undefined
                    })
                    .with_method("unmounted", move |_, _| {
                        unmounted.borrow_mut().push("unmounted");
                        Value::Undefined
                    })
            })
            .unwrap();

        let body = Node::element("body");
        let end = Node::element("hr");
        body.append_child(&end);
        let handle = factory.create(ComponentInput::new());
        handle.mount(&body, Some(&end)).unwrap();
        assert_eq!(body.to_html(), "<body><i>a</i><b>b</b><hr></body>");
        assert_eq!(*log.borrow(), vec!["mounted"]);

        handle.unmount();
        handle.unmount();
        assert_eq!(body.to_html(), "<body><hr></body>");
        assert_eq!(*log.borrow(), vec!["mounted", "unmounted"]);
    }

    #[test]
    fn test_remount_moves_rows_rendered_after_the_first_mount() {
        let registry = Registry::new();
        let factory = registry
            .component("x-rows", "<li for=\"x in items\">{x}</li>", |_| {
                State::new().with("items", Value::list(["a"]))
            })
            .unwrap();
        let handle = factory.create(ComponentInput::new());
        let first = Node::element("ul");
        let second = Node::element("ul");
        handle.mount(&first, None).unwrap();

        handle.state().get("items").as_list().unwrap().push("b");
        tick();
        assert_eq!(handle.to_html(), "<li>a</li><li>b</li><!--for-->");

        handle.mount(&second, None).unwrap();
        assert_eq!(first.to_html(), "<ul></ul>");
        assert_eq!(second.to_html(), "<ul><li>a</li><li>b</li><!--for--></ul>");

        handle.unmount();
        assert_eq!(second.child_count(), 0);
    }

    #[test]
    fn test_mount_errors() {
        let registry = Registry::new();
        let handle = counter(&registry).create(ComponentInput::new());
        let body = Node::element("body");
        let stranger = Node::element("p");
        assert_eq!(handle.mount(&body, Some(&stranger)), Err(Error::NotAChild));

        handle.unmount();
        assert!(matches!(handle.mount(&body, None), Err(Error::Unmounted(_))));
    }

    #[test]
    fn test_unmount_tears_down_bindings_and_runs_cleanups_once() {
        let registry = Registry::new();
        let handle = counter(&registry).create(ComponentInput::new().prop("start", 0));
        let body = Node::element("body");
        handle.mount(&body, None).unwrap();
        let runs = Rc::new(Cell::new(0));
        let counted = Rc::clone(&runs);
        handle.on_cleanup(move || counted.set(counted.get() + 1));

        let button = body.query("button").unwrap();
        handle.unmount();
        assert_eq!(runs.get(), 1);
        assert_eq!(handle.state().binding_count(), 0);
        assert!(button.parent().is_none());
        assert_eq!(button.listener_count(), 0);

        handle.state().set("count", 9);
        tick();
        assert_eq!(button.text_content(), "0");
    }

    #[test]
    fn test_emit_dispatches_on_host() {
        let registry = Registry::new();
        let handle = counter(&registry).create(ComponentInput::new());
        let seen = Rc::new(RefCell::new(Value::Undefined));
        let sink = Rc::clone(&seen);
        handle
            .host()
            .unwrap()
            .add_listener("changed", move |ev| *sink.borrow_mut() = ev.detail().clone());

        handle.emit("changed", 3);
        assert!(seen.borrow().strict_eq(&Value::from(3)));
    }

    #[test]
    fn test_style_registered_on_first_create() {
        reset_all();
        let registry = Registry::new();
        let def = ComponentDef::new("x-styled", "<p>x</p>", |_| State::new())
            .unwrap()
            .with_style("p { color: red }");
        let factory = registry.register(def).unwrap();
        assert!(!crate::style::stylesheet().contains("x-styled"));
        factory.create(ComponentInput::new());
        factory.create(ComponentInput::new());
        assert_eq!(crate::style::stylesheet().matches("x-styled p").count(), 1);
    }

    #[test]
    fn test_definition_errors() {
        assert!(matches!(
            ComponentDef::new("x-bad", "<li for=\"items\">x</li>", |_| State::new()),
            Err(Error::MalformedFor(_))
        ));
        assert!(matches!(
            ComponentDef::new("x-bad", "<div>", |_| State::new()),
            Err(Error::Template(_))
        ));
    }
}
