//! Host events.

use std::rc::Rc;

use crate::types::Value;

use super::node::Node;

/// An event dispatched on a [`Node`].
///
/// `detail` carries the payload of component events emitted with
/// `emit(name, detail)`.
#[derive(Debug, Clone)]
pub struct Event {
    kind: Rc<str>,
    detail: Value,
    target: Option<Node>,
}

impl Event {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.into(),
            detail: Value::Undefined,
            target: None,
        }
    }

    /// A custom event carrying `detail`.
    pub fn with_detail(kind: &str, detail: impl Into<Value>) -> Self {
        Self {
            detail: detail.into(),
            ..Self::new(kind)
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn detail(&self) -> &Value {
        &self.detail
    }

    pub fn target(&self) -> Option<&Node> {
        self.target.as_ref()
    }

    /// Copy with the target set, unless one is already set.
    pub(crate) fn with_target(&self, node: &Node) -> Self {
        let mut event = self.clone();
        if event.target.is_none() {
            event.target = Some(node.clone());
        }
        event
    }

    /// Script view of the event: `type`, `detail`, and the target's `value`
    /// and `checked` properties.
    pub fn to_value(&self) -> Value {
        let mut entries: Vec<(&str, Value)> = vec![
            ("type", Value::from(Rc::clone(&self.kind))),
            ("detail", self.detail.clone()),
        ];
        if let Some(target) = &self.target {
            entries.push(("value", Value::from(target.value())));
            entries.push(("checked", Value::from(target.checked())));
        }
        Value::map(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_value_includes_target_properties() {
        let input = Node::element("input");
        input.set_value("Bob");
        let event = Event::with_detail("input", 7).with_target(&input);
        let value = event.to_value();
        let map = value.as_map().unwrap();
        assert_eq!(map.get("type").to_text(), "input");
        assert_eq!(map.get("value").to_text(), "Bob");
        assert!(map.get("detail").strict_eq(&Value::from(7)));
        assert!(matches!(map.get("checked"), Value::Bool(false)));
    }

    #[test]
    fn test_existing_target_is_kept() {
        let a = Node::element("a");
        let b = Node::element("b");
        let event = Event::new("click").with_target(&a).with_target(&b);
        assert!(event.target().unwrap().ptr_eq(&a));
    }
}
