//! Child component substitution.
//!
//! An element whose tag is a registered component is replaced by a fresh
//! instance of that component. Its attributes become props:
//!
//! - `items="{list}"` - evaluated in the parent, deep-copied into the child,
//!   and pushed again whenever the expression's dependencies change
//! - `label="Total: {n}"` - interpolated text, also live
//! - `max="10"` - a literal; JSON-looking values are parsed (`10`, `true`,
//!   `[1,2]`), anything else stays text
//! - `on:select="pick(detail)"` - listens for events the child emits
//!
//! Pushed props go through [`State::assign`](crate::state::State::assign),
//! so a list the parent appended to is appended to in the child, and the
//! child's own `for` rows patch instead of re-rendering.

use crate::engine::{Event, Node};
use crate::error::Error;
use crate::pipeline::{ComponentInput, Factory};
use crate::state::untracked;
use crate::template::{has_interpolation, single_expression, split, Segment};
use crate::types::Value;

use super::control_flow::bind_visibility;
use super::types::Ctx;

enum PropSource {
    Expr(String),
    Text(Vec<Segment>),
    Literal(Value),
}

impl PropSource {
    fn parse(raw: &str) -> Self {
        if let Some(expr) = single_expression(raw) {
            PropSource::Expr(expr)
        } else if has_interpolation(raw) {
            PropSource::Text(split(raw))
        } else {
            PropSource::Literal(Value::parse_literal(raw))
        }
    }

    fn resolve(&self, ctx: &Ctx) -> Value {
        match self {
            PropSource::Expr(expr) => ctx.evaluate(expr).deep_clone(),
            PropSource::Text(segments) => Value::from(
                segments
                    .iter()
                    .map(|segment| match segment {
                        Segment::Literal(text) => text.clone(),
                        Segment::Expr(expr) => ctx.evaluate(expr).to_text(),
                    })
                    .collect::<String>(),
            ),
            PropSource::Literal(value) => value.deep_clone(),
        }
    }
}

/// Replace `el` with an instance of `factory`.
pub(crate) fn mount_child(el: &Node, factory: &Factory, ctx: &Ctx) {
    let Some(parent) = el.parent() else {
        tracing::error!(error = %Error::DetachedElement(el.tag().to_string()), "child component skipped");
        return;
    };

    let mut props = Vec::new();
    let mut events = Vec::new();
    let mut show = None;
    for (name, raw) in el.attributes() {
        if &*name == "show" {
            show = Some(raw);
            continue;
        }
        match name.strip_prefix("on:") {
            Some(event) => events.push((event.to_string(), raw)),
            None => props.push((name, PropSource::parse(&raw))),
        }
    }

    let mut input = ComponentInput::new();
    for (name, source) in &props {
        input.props.insert(name.clone(), untracked(|| source.resolve(ctx)));
    }
    let child = factory.create(input);

    if let Err(err) = child.mount(&parent, Some(el)) {
        tracing::error!(tag = el.tag(), error = %err, "child component mount failed");
        child.unmount();
        return;
    }
    el.remove();
    tracing::debug!(tag = factory.tag(), props = props.len(), "child component mounted");

    // Live props.
    for (name, source) in props {
        if matches!(source, PropSource::Literal(_)) {
            continue;
        }
        let prop_ctx = ctx.clone();
        let target = child.state().clone();
        ctx.bind(move || {
            let value = source.resolve(&prop_ctx);
            target.assign(&name, value);
        });
    }

    if let Some(condition) = show {
        match child.host() {
            Some(host) => bind_visibility(&host, condition, ctx),
            None => tracing::warn!(tag = factory.tag(), "child component has no element root; `show` ignored"),
        }
    }

    // Events emitted by the child.
    if let Some(host) = child.host() {
        for (event, statement) in events {
            let handler_ctx = ctx.clone();
            host.add_listener(&event, move |ev: &Event| {
                let payload = ev.to_value();
                let result = handler_ctx.execute(
                    &statement,
                    vec![
                        ("detail", ev.detail().clone()),
                        ("event", payload.clone()),
                        ("$event", payload.clone()),
                    ],
                );
                if let Value::Function(handler) = result {
                    if let Err(err) = handler.call(&[ev.detail().clone()]) {
                        tracing::warn!(event = ev.kind(), error = %err, "event handler failed");
                    }
                }
            });
        }
    } else if !events.is_empty() {
        tracing::warn!(tag = factory.tag(), "child component has no element root; `on:` listeners ignored");
    }

    ctx.scope.add(move || child.unmount());
}

#[cfg(test)]
mod tests {
    use crate::engine::{Event, Registry};
    use crate::primitives::test_support::render_with;
    use crate::state::{tick, State};
    use crate::types::Value;

    fn registry() -> Registry {
        let registry = Registry::new();
        registry
            .component("item-list", "<ul><li for=\"x in items\">{x}</li></ul>", |_| State::new())
            .unwrap();
        registry
            .component(
                "fancy-button",
                "<button on:click=\"emit('pressed', label)\">{label}</button>",
                |_| State::new(),
            )
            .unwrap();
        registry
    }

    #[test]
    fn test_child_replaces_element_and_gets_props() {
        let state = State::new().with("data", Value::list([1, 2]));
        let (root, _ctx) = render_with(
            "<section><item-list items=\"{data}\" max=\"10\"></item-list></section>",
            &state,
            &registry(),
        );
        assert!(root.query("item-list").is_none());
        assert_eq!(root.query("ul").unwrap().text_content(), "12");
    }

    #[test]
    fn test_parent_push_appends_in_child() {
        let state = State::new().with("data", Value::list([1, 2]));
        let (root, _ctx) = render_with("<item-list items=\"{data}\"></item-list>", &state, &registry());
        let before = root.find_by_tag("li");

        state.get("data").as_list().unwrap().push(3);
        tick();
        let after = root.find_by_tag("li");
        assert_eq!(after.len(), 3);
        assert!(after[0].ptr_eq(&before[0]));
        assert!(after[1].ptr_eq(&before[1]));
    }

    #[test]
    fn test_parent_listens_to_child_events() {
        let state = State::new().with("pressed", Value::Null);
        let (root, _ctx) = render_with(
            "<fancy-button label=\"Go\" on:pressed=\"pressed = detail\"></fancy-button>",
            &state,
            &registry(),
        );
        let button = root.query("button").unwrap();
        assert_eq!(button.text_content(), "Go");

        button.dispatch(&Event::new("click"));
        assert_eq!(state.get("pressed").to_text(), "Go");
    }

    #[test]
    fn test_show_on_a_child_toggles_its_host() {
        let state = State::new().with("vis", false);
        let (root, _ctx) = render_with(
            "<div><fancy-button label=\"Go\" show=\"vis\"></fancy-button></div>",
            &state,
            &registry(),
        );
        let button = root.query("button").unwrap();
        assert_eq!(button.style("display").as_deref(), Some("none"));

        state.set("vis", true);
        tick();
        assert_eq!(button.style("display"), None);
    }

    #[test]
    fn test_scope_dispose_unmounts_child() {
        let state = State::new().with("data", Value::list([1]));
        let (root, ctx) = render_with("<div><item-list items=\"{data}\"></item-list></div>", &state, &registry());
        assert!(root.query("ul").is_some());
        ctx.scope.dispose();
        assert!(root.query("ul").is_none());
        assert_eq!(state.binding_count(), 0);
    }
}
