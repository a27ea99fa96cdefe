//! Attribute expressions and `on:` event listeners.
//!
//! - `name="{expr}"` - the value of `expr`; `false`/nullish removes the
//!   attribute, and boolean attributes (`disabled`, `checked`, ...) are
//!   present exactly when `expr` is truthy
//! - `name="a {b} c"` - interpolated text
//! - `on:event="statements"` - run on every `event`, with `event`/`$event`
//!   in scope; a function result is called with the event

use crate::engine::{Event, Node};
use crate::template::{has_interpolation, single_expression, split, Segment};
use crate::types::Value;

use super::types::Ctx;

/// Attributes whose presence is the value.
const BOOLEAN_ATTRIBUTES: &[&str] = &[
    "autofocus", "checked", "disabled", "hidden", "multiple", "open", "readonly", "required",
    "selected",
];

// =============================================================================
// Attributes
// =============================================================================

pub(crate) fn bind_attributes(el: &Node, ctx: &Ctx) {
    for (name, value) in el.attributes() {
        if let Some(event) = name.strip_prefix("on:") {
            el.remove_attribute(&name);
            bind_event(el, event, value, ctx);
        } else if has_interpolation(&value) {
            bind_attribute(el, &name, &value, ctx);
        }
    }
}

fn bind_attribute(el: &Node, name: &str, raw: &str, ctx: &Ctx) {
    let node = el.downgrade();
    let name = name.to_string();
    let attr_ctx = ctx.clone();

    if let Some(expr) = single_expression(raw) {
        ctx.bind(move || {
            let value = attr_ctx.evaluate(&expr);
            let Some(el) = node.upgrade() else { return };
            apply(&el, &name, &value);
        });
        return;
    }

    let segments = split(raw);
    ctx.bind(move || {
        let text: String = segments
            .iter()
            .map(|segment| match segment {
                Segment::Literal(text) => text.clone(),
                Segment::Expr(expr) => attr_ctx.evaluate(expr).to_text(),
            })
            .collect();
        let Some(el) = node.upgrade() else { return };
        apply(&el, &name, &Value::from(text));
    });
}

/// Reflect `value` onto attribute `name` (and the matching control property).
fn apply(el: &Node, name: &str, value: &Value) {
    if BOOLEAN_ATTRIBUTES.contains(&name) {
        let present = value.is_truthy();
        el.toggle_attribute(name, present);
        if name == "checked" {
            el.set_checked(present);
        }
        return;
    }
    if value.is_nullish() || matches!(value, Value::Bool(false)) {
        el.remove_attribute(name);
        return;
    }

    let text = value.to_display();
    if el.attribute(name).as_deref() != Some(text.as_str()) {
        el.set_attribute(name, &text);
    }
    if name == "value" && el.value() != text {
        el.set_value(&text);
    }
}

// =============================================================================
// Events
// =============================================================================

fn bind_event(el: &Node, event: &str, statement: String, ctx: &Ctx) {
    let handler_ctx = ctx.clone();
    let event_name = event.to_string();
    let listener = el.add_listener(event, move |ev: &Event| {
        let payload = ev.to_value();
        let result = handler_ctx.execute(
            &statement,
            vec![
                ("event", payload.clone()),
                ("$event", payload.clone()),
                ("detail", ev.detail().clone()),
            ],
        );
        if let Value::Function(handler) = result {
            if let Err(err) = handler.call(&[payload]) {
                tracing::warn!(event = %event_name, error = %err, "event handler failed");
            }
        }
    });

    let node = el.downgrade();
    ctx.scope.add(move || {
        if let Some(el) = node.upgrade() {
            el.remove_listener(listener);
        }
    });
}

#[cfg(test)]
mod tests {
    use crate::engine::Event;
    use crate::primitives::test_support::render;
    use crate::state::{tick, State};
    use crate::types::Value;

    #[test]
    fn test_attribute_expression_and_interpolation() {
        let state = State::new().with("kind", "primary").with("busy", false).with("tip", Value::Null);
        let (root, _ctx) = render(
            "<button class=\"btn btn-{kind}\" disabled=\"{busy}\" title=\"{tip}\">x</button>",
            &state,
        );
        assert_eq!(root.to_html(), "<button class=\"btn btn-primary\">x</button>");

        state.set("busy", true);
        state.set("tip", "wait");
        tick();
        let button = root.query("button").unwrap();
        assert!(button.has_attribute("disabled"));
        assert_eq!(button.attribute("title").as_deref(), Some("wait"));
    }

    #[test]
    fn test_click_handler_mutates_state() {
        let state = State::new().with("count", 0);
        let (root, _ctx) = render("<button on:click=\"count++\">{count}</button>", &state);
        let button = root.query("button").unwrap();
        assert!(!button.has_attribute("on:click"));

        button.dispatch(&Event::new("click"));
        button.dispatch(&Event::new("click"));
        assert_eq!(button.text_content(), "2");
    }

    #[test]
    fn test_handler_sees_event_and_calls_methods() {
        let state = State::new()
            .with("last", "")
            .with_method("remember", |state, args| {
                state.set("last", args.first().cloned().unwrap_or_default());
                Value::Undefined
            });
        let (root, _ctx) = render("<input on:input=\"remember(event.value)\">", &state);
        let input = root.query("input").unwrap();
        input.set_value("typed");
        input.dispatch(&Event::new("input"));
        assert_eq!(state.get("last").to_text(), "typed");
    }

    #[test]
    fn test_function_result_is_called_with_event() {
        let state = State::new().with("kind", "").with_method("record", |state, args| {
            let kind = args
                .first()
                .and_then(|e| e.as_map().map(|m| m.get("type")))
                .unwrap_or_default();
            state.set("kind", kind);
            Value::Undefined
        });
        let (root, _ctx) = render("<a on:click=\"record\">x</a>", &state);
        root.query("a").unwrap().dispatch(&Event::new("click"));
        assert_eq!(state.get("kind").to_text(), "click");
    }

    #[test]
    fn test_scope_dispose_removes_listeners() {
        let state = State::new().with("n", 0);
        let (root, ctx) = render("<a on:click=\"n++\">x</a>", &state);
        let a = root.query("a").unwrap();
        assert_eq!(a.listener_count(), 1);
        ctx.scope.dispose();
        assert_eq!(a.listener_count(), 0);
    }
}
