//! Text Primitive - `{expr}` interpolation in text nodes.
//!
//! Each distinct expression in a text node gets one binding. When it runs,
//! it stores the new rendering of its expression and re-joins the node's
//! text from the literal runs and the latest value of every span.
//!
//! # Example
//!
//! ```ignore
//! // <p>Hello {name}, you have {items.length} items</p>
//! state.set("name", "Ada");
//! tick(); // text reads "Hello Ada, you have 3 items"
//! ```

use std::cell::RefCell;
use std::rc::Rc;

use crate::engine::Node;
use crate::template::{split, Segment};

use super::types::Ctx;

// =============================================================================
// Text Binding
// =============================================================================

/// Wire interpolated spans in a text node. Plain text is left untouched.
pub(crate) fn bind_text(node: &Node, ctx: &Ctx) {
    let segments = split(&node.data());
    if !segments.iter().any(|s| matches!(s, Segment::Expr(_))) {
        return;
    }

    let rendered: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(
        segments
            .iter()
            .map(|s| match s {
                Segment::Literal(text) => text.clone(),
                Segment::Expr(_) => String::new(),
            })
            .collect(),
    ));

    let mut distinct: Vec<&str> = Vec::new();
    for segment in &segments {
        if let Segment::Expr(expr) = segment {
            if !distinct.contains(&expr.as_str()) {
                distinct.push(expr.as_str());
            }
        }
    }

    for expr in distinct {
        let slots: Vec<usize> = segments
            .iter()
            .enumerate()
            .filter(|(_, s)| matches!(s, Segment::Expr(e) if e == expr))
            .map(|(i, _)| i)
            .collect();
        let text = expr.to_string();
        let node = node.downgrade();
        let rendered = Rc::clone(&rendered);
        let binding_ctx = ctx.clone();

        ctx.bind(move || {
            let value = binding_ctx.evaluate(&text).to_text();
            let Some(node) = node.upgrade() else { return };
            let joined = {
                let mut parts = rendered.borrow_mut();
                for &slot in &slots {
                    parts[slot].clone_from(&value);
                }
                parts.concat()
            };
            if node.data() != joined {
                node.set_data(&joined);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use crate::primitives::test_support::render;
    use crate::state::{tick, State};
    use crate::types::Value;

    #[test]
    fn test_text_interpolation_tracks_each_span() {
        let state = State::new().with("name", "Ada").with("count", 2);
        let (root, _ctx) = render("<p>Hi {name}, {count} new ({count})</p>", &state);
        assert_eq!(root.text_content(), "Hi Ada, 2 new (2)");

        state.set("count", 3);
        tick();
        assert_eq!(root.text_content(), "Hi Ada, 3 new (3)");
    }

    #[test]
    fn test_nullish_renders_empty() {
        let state = State::new().with("missing", Value::Null);
        let (root, _ctx) = render("<p>[{missing}{nothing}]</p>", &state);
        assert_eq!(root.text_content(), "[]");
    }

    #[test]
    fn test_one_binding_per_distinct_expression() {
        let state = State::new().with("a", 1);
        let (_root, _ctx) = render("<p>{a} {a} {a + 1}</p>", &state);
        assert_eq!(state.binding_count(), 2);
    }
}
