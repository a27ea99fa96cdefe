//! Template Primitives - Directive walker.
//!
//! This module turns a cloned template into live nodes:
//! - [`text`] - `{expr}` interpolation in text nodes
//! - [`control_flow`] - `if`, `for` and `show`
//! - [`input`] - `bind` two-way control bindings
//! - [`attrs`] - attribute expressions and `on:` listeners
//! - [`component`] - child component substitution
//!
//! # Architecture
//!
//! The walker visits each node once. Every dynamic piece becomes a binding:
//! a closure registered with the component's [`State`](crate::state::State)
//! that records which keys it reads and runs again when one of them changes.
//! Bindings, listeners and child components created in a region are owned by
//! that region's [`Scope`] and released when it is disposed.
//!
//! On an element, directives are applied in a fixed order and the first
//! structural one takes the element over:
//!
//! ```text
//! for > if > show > bind > child component > attributes/events > children
//! ```
//!
//! A `for` row or `if` branch is a fresh clone of the element with the
//! directive attribute removed, walked again in its own scope, so the
//! remaining directives apply per row or per branch.

mod attrs;
mod component;
mod control_flow;
mod input;
mod text;
mod types;

pub use control_flow::{parse_for, ForSpec};
pub use types::{Cleanup, Directives, Scope};

pub(crate) use control_flow::validate_for;
pub(crate) use types::Ctx;

use crate::engine::{Node, NodeKind};

/// Wire `node` and its descendants. `node` must already have a parent.
pub(crate) fn walk(node: &Node, ctx: &Ctx) {
    match node.kind() {
        NodeKind::Text => text::bind_text(node, ctx),
        NodeKind::Comment => {}
        NodeKind::Fragment => walk_children(node, ctx),
        NodeKind::Element => walk_element(node, ctx),
    }
}

fn walk_children(node: &Node, ctx: &Ctx) {
    // Directives replace children with markers; walk the original set.
    for child in node.children() {
        walk(&child, ctx);
    }
}

fn walk_element(el: &Node, ctx: &Ctx) {
    let directives = Directives::of(el);

    if directives.contains(Directives::FOR) {
        control_flow::bind_for(el, ctx);
        return;
    }
    if directives.contains(Directives::IF) {
        control_flow::bind_if(el, ctx);
        return;
    }
    let factory = if el.tag() != &*ctx.own_tag {
        ctx.registry.lookup(el.tag())
    } else {
        None
    };

    // A component's `show` is applied to the child's host by `mount_child`.
    if directives.contains(Directives::SHOW) && factory.is_none() {
        control_flow::bind_show(el, ctx);
    }
    if directives.contains(Directives::BIND) {
        input::bind_control(el, ctx);
    }

    if let Some(factory) = factory {
        component::mount_child(el, &factory, ctx);
        return;
    }

    if directives.intersects(Directives::EVENTS | Directives::EXPRESSIONS) {
        attrs::bind_attributes(el, ctx);
    }
    walk_children(el, ctx);
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::engine::{Node, Registry};
    use crate::expr::Locals;
    use crate::state::State;

    use super::{walk, Ctx, Scope};

    /// Parse `markup` and walk it against `state` with an empty registry.
    pub(crate) fn render(markup: &str, state: &State) -> (Node, Ctx) {
        render_with(markup, state, &Registry::new())
    }

    pub(crate) fn render_with(markup: &str, state: &State, registry: &Registry) -> (Node, Ctx) {
        let root = crate::template::parse(markup).unwrap();
        let ctx = Ctx {
            state: state.clone(),
            registry: registry.clone(),
            scope: Scope::new(),
            locals: Locals::new(),
            own_tag: "test-root".into(),
        };
        walk(&root, &ctx);
        (root, ctx)
    }
}
