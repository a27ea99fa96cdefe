//! Input Primitive - Two-way `bind` between a form control and a state path.
//!
//! The bound path is any assignable expression: `name`, `form.email`,
//! `todo.done` inside a `for` row. State flows to the control through a
//! binding; user input flows back through a listener that assigns the path.
//!
//! | control                      | property  | event    | written value          |
//! |------------------------------|-----------|----------|------------------------|
//! | `<input type=checkbox>`      | `checked` | `change` | boolean                |
//! | `<input type=radio>`         | `checked` | `change` | the radio's `value`    |
//! | `<input type=number\|range>` | `value`   | `input`  | number (text if blank) |
//! | `<select>`                   | `value`   | `change` | text                   |
//! | anything else                | `value`   | `input`  | text                   |

use crate::engine::{Event, Node};
use crate::expr::{try_execute, EvalScope};
use crate::types::Value;

use super::types::Ctx;

/// Local name carrying the control's value into the write-back statement.
const INCOMING: &str = "$value";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlKind {
    Checkbox,
    Radio,
    Number,
    Select,
    Text,
}

impl ControlKind {
    fn of(el: &Node) -> Self {
        match el.tag() {
            "select" => ControlKind::Select,
            "input" => match el.attribute("type").unwrap_or_default().to_ascii_lowercase().as_str() {
                "checkbox" => ControlKind::Checkbox,
                "radio" => ControlKind::Radio,
                "number" | "range" => ControlKind::Number,
                _ => ControlKind::Text,
            },
            _ => ControlKind::Text,
        }
    }

    fn event(self) -> &'static str {
        match self {
            ControlKind::Checkbox | ControlKind::Radio | ControlKind::Select => "change",
            ControlKind::Number | ControlKind::Text => "input",
        }
    }
}

/// Wire `bind="path"` on a form control.
pub(crate) fn bind_control(el: &Node, ctx: &Ctx) {
    let path = el.attribute("bind").unwrap_or_default();
    el.remove_attribute("bind");
    let kind = ControlKind::of(el);

    // State -> control.
    let node = el.downgrade();
    let read_ctx = ctx.clone();
    let read_path = path.clone();
    ctx.bind(move || {
        let value = read_ctx.evaluate(&read_path);
        let Some(el) = node.upgrade() else { return };
        match kind {
            ControlKind::Checkbox => el.set_checked(value.is_truthy()),
            ControlKind::Radio => {
                let own = el.attribute("value").unwrap_or_default();
                el.set_checked(!value.is_nullish() && value.to_display() == own);
            }
            _ => {
                let text = value.to_text();
                if el.value() != text {
                    el.set_value(&text);
                }
            }
        }
    });

    // Control -> state.
    let write_ctx = ctx.clone();
    let statement = format!("{path} = {INCOMING}");
    let listener = el.add_listener(kind.event(), move |event: &Event| {
        let Some(el) = event.target() else { return };
        let incoming = match kind {
            ControlKind::Checkbox => Value::Bool(el.checked()),
            ControlKind::Radio => {
                if !el.checked() {
                    return;
                }
                let raw = el.value();
                let current = write_ctx.peek(&path);
                if matches!(current, Value::Number(_)) {
                    Value::from(Value::from(raw.as_str()).to_number())
                } else {
                    Value::from(raw)
                }
            }
            ControlKind::Number => {
                let raw = el.value();
                let number = Value::from(raw.as_str()).to_number();
                if raw.trim().is_empty() || number.is_nan() {
                    Value::from(raw)
                } else {
                    Value::from(number)
                }
            }
            ControlKind::Select | ControlKind::Text => Value::from(el.value()),
        };

        let scope = EvalScope::with_locals(
            &write_ctx.state,
            write_ctx.locals.with(INCOMING, incoming),
        );
        if let Err(err) = try_execute(&statement, &scope) {
            tracing::warn!(path = %path, error = %err, "bind: write-back failed");
        }
    });

    let node = el.downgrade();
    ctx.scope.add(move || {
        if let Some(el) = node.upgrade() {
            el.remove_listener(listener);
        }
    });
}
