//! Control Flow Primitives - `if`, `for` and `show`.
//!
//! - [`bind_if`] - mount or dispose a branch as a condition flips
//! - [`bind_for`] - one row per list item, patched incrementally
//! - [`bind_show`] - toggle `display: none` without touching the tree
//!
//! # Pattern: Marker and Scope
//!
//! `if` and `for` take their element out of the tree and leave a comment
//! marker in its place. The detached element becomes the template for every
//! branch or row:
//! 1. Clone the template and walk the clone in a fresh [`Scope`]
//! 2. Insert the resulting nodes next to the marker
//! 3. To tear down, dispose the scope and remove the nodes
//!
//! Each directive registers a cleanup on its parent scope that tears down
//! whatever is currently rendered.
//!
//! # Rows
//!
//! `for` rows sit before the marker. When the source list is the same list
//! as last time and the pass recorded a pure append or pop, only the tail
//! rows are created or removed; anything else re-renders every row.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::engine::Node;
use crate::error::{Error, Result};
use crate::expr::{compile, Mode};
use crate::state::{untracked, ReactiveList};
use crate::types::{ArrayOp, Value};

use super::types::{Ctx, Scope};
use super::walk;

// =============================================================================
// Shared helpers
// =============================================================================

/// Swap `el` for a comment marker. `None` when `el` is detached.
fn replace_with_marker(el: &Node, label: &str) -> Option<Node> {
    let Some(parent) = el.parent() else {
        tracing::error!(error = %Error::DetachedElement(el.tag().to_string()), "directive skipped");
        return None;
    };
    let marker = Node::comment(label);
    parent.insert_before(&marker, Some(el)).ok()?;
    el.remove();
    Some(marker)
}

/// Clone `template`, wire the clone in `ctx`, and return the holder fragment.
///
/// Walking happens inside the holder so directives on the clone itself
/// (a child component, a nested marker) still have a parent.
fn instantiate(template: &Node, ctx: &Ctx) -> Node {
    let holder = Node::fragment();
    let clone = template.clone_deep();
    holder.append_child(&clone);
    untracked(|| walk(&clone, ctx));
    holder
}

/// Nodes and scope of one rendered branch or row.
struct Rendered {
    nodes: Vec<Node>,
    scope: Scope,
}

impl Rendered {
    fn dispose(&self) {
        self.scope.dispose();
        for node in &self.nodes {
            node.remove();
        }
    }
}

// =============================================================================
// if
// =============================================================================

/// Conditional rendering: the element exists only while its condition is
/// truthy. Re-evaluations that keep the same truthiness do nothing.
pub(crate) fn bind_if(el: &Node, ctx: &Ctx) {
    let condition = el.attribute("if").unwrap_or_default();
    el.remove_attribute("if");
    let Some(marker) = replace_with_marker(el, "if") else {
        return;
    };

    let template = el.clone();
    let current: Rc<RefCell<Option<Rendered>>> = Rc::new(RefCell::new(None));
    let was_true: Rc<Cell<Option<bool>>> = Rc::new(Cell::new(None));

    let for_dispose = Rc::clone(&current);
    ctx.scope.add(move || {
        if let Some(branch) = for_dispose.borrow_mut().take() {
            branch.dispose();
        }
    });

    let branch_ctx = ctx.clone();
    ctx.bind(move || {
        let truthy = branch_ctx.evaluate(&condition).is_truthy();
        if was_true.replace(Some(truthy)) == Some(truthy) {
            return;
        }
        tracing::trace!(condition = %condition, truthy, "if");

        let previous = current.borrow_mut().take();
        if let Some(branch) = previous {
            branch.dispose();
        }
        if !truthy {
            return;
        }
        let Some(parent) = marker.parent() else {
            return;
        };

        let scope = Scope::new();
        let holder = instantiate(&template, &branch_ctx.with_scope(scope.clone()));
        let nodes = holder.children();
        if parent.insert_after(&holder, &marker).is_err() {
            scope.dispose();
            return;
        }
        *current.borrow_mut() = Some(Rendered { nodes, scope });
    });
}

// =============================================================================
// for
// =============================================================================

/// Parsed `item[, index] in source`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForSpec {
    pub item: Rc<str>,
    pub index: Option<Rc<str>>,
    pub source: String,
}

/// Parse a `for` attribute value.
///
/// Accepts `item in items`, `item, i in items` and `(item, i) in items`.
pub fn parse_for(text: &str) -> Result<ForSpec> {
    let malformed = || Error::MalformedFor(text.to_string());
    let (lhs, rhs) = split_in(text).ok_or_else(malformed)?;

    let lhs = lhs.trim();
    let lhs = lhs
        .strip_prefix('(')
        .and_then(|l| l.strip_suffix(')'))
        .unwrap_or(lhs);
    let names: Vec<&str> = lhs.split(',').map(str::trim).collect();
    if names.is_empty() || names.len() > 2 || !names.iter().all(|n| is_identifier(n)) {
        return Err(malformed());
    }

    let source = rhs.trim();
    if source.is_empty() || compile(source, Mode::Expression).is_err() {
        return Err(malformed());
    }

    Ok(ForSpec {
        item: names[0].into(),
        index: names.get(1).map(|&n| n.into()),
        source: source.to_string(),
    })
}

/// Split at the first free-standing `in`.
fn split_in(text: &str) -> Option<(&str, &str)> {
    text.match_indices("in").find_map(|(i, _)| {
        let before = text[..i].chars().next_back()?;
        let after = text[i + 2..].chars().next()?;
        let bounded = (before.is_whitespace() || before == ')') && after.is_whitespace();
        bounded.then(|| (&text[..i], &text[i + 2..]))
    })
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

/// Check every `for` attribute under `root`.
pub(crate) fn validate_for(root: &Node) -> Result<()> {
    for el in root.find_all(|n| n.has_attribute("for")) {
        parse_for(&el.attribute("for").unwrap_or_default())?;
    }
    Ok(())
}

struct ListView {
    spec: ForSpec,
    template: Node,
    marker: Node,
    ctx: Ctx,
    rows: RefCell<Vec<Rendered>>,
    /// List rendered last time, for incremental patches.
    source: RefCell<Option<ReactiveList>>,
}

impl ListView {
    fn update(&self) {
        let value = self.ctx.evaluate(&self.spec.source);
        let entries = self.entries(&value);
        let list = value.as_list().cloned();

        let same_list = matches!(
            (&*self.source.borrow(), &list),
            (Some(old), Some(new)) if old.ptr_eq(new)
        );
        let op = list
            .as_ref()
            .filter(|_| same_list)
            .and_then(|l| self.ctx.state.array_op(l));
        *self.source.borrow_mut() = list;

        let rendered = self.rows.borrow().len();
        match op {
            Some(ArrayOp::Append(n)) if rendered + n == entries.len() => {
                tracing::trace!(appended = n, "for: patch");
                self.append(&entries[rendered..]);
            }
            Some(ArrayOp::RemoveLast(n)) if rendered == entries.len() + n => {
                tracing::trace!(removed = n, "for: patch");
                let removed: Vec<Rendered> = self.rows.borrow_mut().drain(entries.len()..).collect();
                for row in removed {
                    row.dispose();
                }
            }
            _ => {
                tracing::trace!(rows = entries.len(), "for: full render");
                self.clear();
                self.append(&entries);
            }
        }
    }

    /// `(index, item)` pairs for the source value.
    fn entries(&self, value: &Value) -> Vec<(Value, Value)> {
        match value {
            Value::List(list) => list
                .to_vec()
                .into_iter()
                .enumerate()
                .map(|(i, item)| (Value::from(i), item))
                .collect(),
            Value::Map(map) => map
                .entries()
                .into_iter()
                .map(|(key, item)| (Value::from(key), item))
                .collect(),
            Value::Undefined | Value::Null => Vec::new(),
            other => {
                tracing::warn!(
                    source = %self.spec.source,
                    type_name = other.type_of(),
                    "for: source is not iterable"
                );
                Vec::new()
            }
        }
    }

    fn append(&self, entries: &[(Value, Value)]) {
        let Some(parent) = self.marker.parent() else {
            return;
        };
        for (index, item) in entries {
            let mut locals = self.ctx.locals.with(Rc::clone(&self.spec.item), item.clone());
            if let Some(name) = &self.spec.index {
                locals = locals.with(Rc::clone(name), index.clone());
            }
            let scope = Scope::new();
            let row_ctx = Ctx {
                scope: scope.clone(),
                locals,
                ..self.ctx.clone()
            };
            let holder = instantiate(&self.template, &row_ctx);
            let nodes = holder.children();
            if parent.insert_before(&holder, Some(&self.marker)).is_err() {
                scope.dispose();
                return;
            }
            self.rows.borrow_mut().push(Rendered { nodes, scope });
        }
    }

    fn clear(&self) {
        let rows = std::mem::take(&mut *self.rows.borrow_mut());
        for row in rows {
            row.dispose();
        }
    }
}

/// List rendering: one clone of the element per item, with the item (and
/// optionally its index) in scope.
pub(crate) fn bind_for(el: &Node, ctx: &Ctx) {
    let text = el.attribute("for").unwrap_or_default();
    el.remove_attribute("for");
    let spec = match parse_for(&text) {
        Ok(spec) => spec,
        Err(err) => {
            tracing::error!(error = %err, "list skipped");
            el.remove();
            return;
        }
    };
    let Some(marker) = replace_with_marker(el, "for") else {
        return;
    };

    let view = Rc::new(ListView {
        spec,
        template: el.clone(),
        marker,
        ctx: ctx.clone(),
        rows: RefCell::new(Vec::new()),
        source: RefCell::new(None),
    });

    let for_dispose = Rc::clone(&view);
    ctx.scope.add(move || for_dispose.clear());
    ctx.bind(move || view.update());
}

// =============================================================================
// show
// =============================================================================

/// Visibility toggle: falsy sets `display: none`, truthy restores whatever
/// `display` the element started with.
pub(crate) fn bind_show(el: &Node, ctx: &Ctx) {
    let condition = el.attribute("show").unwrap_or_default();
    el.remove_attribute("show");
    bind_visibility(el, condition, ctx);
}

/// Toggle `el` by `condition`, evaluated in `ctx`.
pub(crate) fn bind_visibility(el: &Node, condition: String, ctx: &Ctx) {
    let original = el.style("display");

    let node = el.downgrade();
    let show_ctx = ctx.clone();
    ctx.bind(move || {
        let visible = show_ctx.evaluate(&condition).is_truthy();
        let Some(el) = node.upgrade() else { return };
        match (visible, &original) {
            (false, _) => el.set_style("display", "none"),
            (true, Some(display)) => el.set_style("display", display),
            (true, None) => el.remove_style("display"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::test_support::render;
    use crate::state::{tick, State};

    #[test]
    fn test_parse_for_forms() {
        let spec = parse_for("item in items").unwrap();
        assert_eq!(&*spec.item, "item");
        assert_eq!(spec.index, None);
        assert_eq!(spec.source, "items");

        let spec = parse_for("(todo, i) in list.filter(t => !t.done)").unwrap();
        assert_eq!(&*spec.item, "todo");
        assert_eq!(spec.index.as_deref(), Some("i"));
        assert_eq!(spec.source, "list.filter(t => !t.done)");

        assert_eq!(parse_for("row, n in rows").unwrap().index.as_deref(), Some("n"));
        assert_eq!(&*parse_for("index in indexes").unwrap().item, "index");
    }

    #[test]
    fn test_parse_for_rejects_malformed() {
        for text in ["items", "in items", "a b in items", "a, b, c in x", "x in", "x in (", "1 in x"] {
            assert!(
                matches!(parse_for(text), Err(Error::MalformedFor(_))),
                "{text} should be rejected"
            );
        }
    }

    #[test]
    fn test_if_mounts_and_disposes_branch() {
        let state = State::new().with("open", false).with("label", "hi");
        let (root, _ctx) = render("<div><p if=\"open\">{label}</p></div>", &state);
        assert_eq!(root.to_html(), "<div><!--if--></div>");
        assert_eq!(state.binding_count(), 1);

        state.set("open", true);
        tick();
        assert_eq!(root.to_html(), "<div><!--if--><p>hi</p></div>");
        assert_eq!(state.binding_count(), 2);

        state.set("open", false);
        tick();
        assert_eq!(root.to_html(), "<div><!--if--></div>");
        assert_eq!(state.binding_count(), 1);
    }

    #[test]
    fn test_if_same_truthiness_keeps_branch() {
        let state = State::new().with("n", 1);
        let (root, _ctx) = render("<div><p if=\"n\">x</p></div>", &state);
        let first = root.query("p").unwrap();

        state.set("n", 2);
        tick();
        assert!(root.query("p").unwrap().ptr_eq(&first));
    }

    #[test]
    fn test_for_renders_rows_with_index() {
        let state = State::new().with("items", Value::list(["a", "b"]));
        let (root, _ctx) = render("<ul><li for=\"(item, i) in items\">{i}:{item}</li></ul>", &state);
        assert_eq!(root.to_html(), "<ul><li>0:a</li><li>1:b</li><!--for--></ul>");
    }

    #[test]
    fn test_for_push_appends_without_rebuilding() {
        let state = State::new().with("items", Value::list([1, 2]));
        let (root, _ctx) = render("<ul><li for=\"n in items\">{n}</li></ul>", &state);
        let before = root.find_by_tag("li");

        state.get("items").as_list().unwrap().push(3);
        tick();
        let after = root.find_by_tag("li");
        assert_eq!(after.len(), 3);
        assert!(after[0].ptr_eq(&before[0]));
        assert!(after[1].ptr_eq(&before[1]));
        assert_eq!(root.text_content(), "123");

        state.get("items").as_list().unwrap().pop();
        tick();
        let popped = root.find_by_tag("li");
        assert_eq!(popped.len(), 2);
        assert!(popped[0].ptr_eq(&before[0]));
    }

    #[test]
    fn test_for_reassignment_re_renders() {
        let state = State::new().with("items", Value::list([1, 2]));
        let (root, _ctx) = render("<ul><li for=\"n in items\">{n}</li></ul>", &state);
        let before = root.find_by_tag("li");

        state.set("items", Value::list([5]));
        tick();
        let after = root.find_by_tag("li");
        assert_eq!(after.len(), 1);
        assert!(!after[0].ptr_eq(&before[0]));
        assert_eq!(root.text_content(), "5");
    }

    #[test]
    fn test_for_nullish_source_renders_nothing() {
        let state = State::new();
        let (root, _ctx) = render("<ul><li for=\"x in missing\">{x}</li></ul>", &state);
        assert_eq!(root.to_html(), "<ul><!--for--></ul>");
    }

    #[test]
    fn test_for_with_nested_if_keeps_order() {
        let state = State::new().with("items", Value::list([1, 2, 3]));
        let (root, _ctx) = render(
            "<ul><li for=\"n in items\"><b if=\"n % 2\">{n}</b></li></ul>",
            &state,
        );
        assert_eq!(root.text_content(), "13");
        state.get("items").as_list().unwrap().push(5);
        tick();
        assert_eq!(root.text_content(), "135");
    }

    #[test]
    fn test_show_toggles_display_and_restores_original() {
        let state = State::new().with("visible", false);
        let (root, _ctx) = render("<p show=\"visible\" style=\"display: flex\">x</p>", &state);
        let p = root.query("p").unwrap();
        assert_eq!(p.style("display").as_deref(), Some("none"));

        state.set("visible", true);
        tick();
        assert_eq!(p.style("display").as_deref(), Some("flex"));
    }

    #[test]
    fn test_scope_dispose_tears_down_rows() {
        let state = State::new().with("items", Value::list([1, 2]));
        let (root, ctx) = render("<ul><li for=\"n in items\">{n}</li></ul>", &state);
        assert_eq!(state.binding_count(), 3);

        ctx.scope.dispose();
        assert_eq!(state.binding_count(), 0);
        assert_eq!(root.to_html(), "<ul><!--for--></ul>");
    }
}
