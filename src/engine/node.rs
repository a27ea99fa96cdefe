//! Host Node Tree - The live tree components render into.
//!
//! A deliberately small document model: elements, text, comment markers and
//! fragments with parent/child links, attributes, an inline style map,
//! control properties and event listeners.
//!
//! Nodes are shared handles (`Rc`). Parents own their children; a child holds
//! a weak link back, so dropping a detached subtree frees it.
//!
//! # Events
//!
//! [`Node::dispatch`] runs the target's listeners synchronously. When the
//! outermost dispatch returns, the microtask queue is drained, so writes made
//! by handlers are flushed before control returns to the host.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::error::{Error, Result};
use crate::state::tick;

use super::event::Event;

/// Elements that never have children or a closing tag.
pub(crate) const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Element,
    Text,
    Comment,
    Fragment,
}

/// Handle returned by [`Node::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Handler = Rc<dyn Fn(&Event)>;

struct Listener {
    id: ListenerId,
    kind: Rc<str>,
    handler: Handler,
}

struct NodeData {
    kind: NodeKind,
    tag: Rc<str>,
    /// Text or comment data.
    data: RefCell<String>,
    attrs: RefCell<Vec<(Rc<str>, String)>>,
    style: RefCell<BTreeMap<String, String>>,
    value: RefCell<Option<String>>,
    checked: Cell<Option<bool>>,
    parent: RefCell<Weak<NodeData>>,
    children: RefCell<Vec<Node>>,
    listeners: RefCell<Vec<Listener>>,
    next_listener: Cell<u64>,
}

thread_local! {
    static DISPATCH_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// A node in the host tree.
#[derive(Clone)]
pub struct Node(Rc<NodeData>);

/// Non-owning node reference.
#[derive(Clone, Default)]
pub struct WeakNode(Weak<NodeData>);

impl WeakNode {
    pub fn upgrade(&self) -> Option<Node> {
        self.0.upgrade().map(Node)
    }
}

impl fmt::Debug for WeakNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(node) => write!(f, "WeakNode({node:?})"),
            None => write!(f, "WeakNode(<dropped>)"),
        }
    }
}

impl Node {
    fn new(kind: NodeKind, tag: &str, data: &str) -> Self {
        Self(Rc::new(NodeData {
            kind,
            tag: tag.into(),
            data: RefCell::new(data.to_string()),
            attrs: RefCell::new(Vec::new()),
            style: RefCell::new(BTreeMap::new()),
            value: RefCell::new(None),
            checked: Cell::new(None),
            parent: RefCell::new(Weak::new()),
            children: RefCell::new(Vec::new()),
            listeners: RefCell::new(Vec::new()),
            next_listener: Cell::new(0),
        }))
    }

    /// An element; the tag is lower-cased.
    pub fn element(tag: &str) -> Self {
        Self::new(NodeKind::Element, &tag.to_ascii_lowercase(), "")
    }

    pub fn text(data: &str) -> Self {
        Self::new(NodeKind::Text, "", data)
    }

    /// A comment, used as a placeholder marker by directives.
    pub fn comment(data: &str) -> Self {
        Self::new(NodeKind::Comment, "", data)
    }

    pub fn fragment() -> Self {
        Self::new(NodeKind::Fragment, "", "")
    }

    pub fn kind(&self) -> NodeKind {
        self.0.kind
    }

    /// Element tag, empty for other kinds.
    pub fn tag(&self) -> &str {
        &self.0.tag
    }

    pub fn is_element(&self) -> bool {
        self.0.kind == NodeKind::Element
    }

    pub fn ptr_eq(&self, other: &Node) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn downgrade(&self) -> WeakNode {
        WeakNode(Rc::downgrade(&self.0))
    }

    // =========================================================================
    // Text
    // =========================================================================

    /// Text or comment data.
    pub fn data(&self) -> String {
        self.0.data.borrow().clone()
    }

    pub fn set_data(&self, data: &str) {
        let mut current = self.0.data.borrow_mut();
        if *current != data {
            current.clear();
            current.push_str(data);
        }
    }

    /// Concatenated text of this node and its descendants.
    pub fn text_content(&self) -> String {
        match self.0.kind {
            NodeKind::Text => self.data(),
            NodeKind::Comment => String::new(),
            NodeKind::Element | NodeKind::Fragment => self
                .0
                .children
                .borrow()
                .iter()
                .map(Node::text_content)
                .collect(),
        }
    }

    // =========================================================================
    // Attributes and style
    // =========================================================================

    /// Attributes in source order. `style` is rendered from the style map.
    pub fn attributes(&self) -> Vec<(Rc<str>, String)> {
        let mut attrs = self.0.attrs.borrow().clone();
        if !self.0.style.borrow().is_empty() {
            attrs.push(("style".into(), self.style_text()));
        }
        attrs
    }

    pub fn attribute(&self, name: &str) -> Option<String> {
        if name == "style" {
            return (!self.0.style.borrow().is_empty()).then(|| self.style_text());
        }
        self.0
            .attrs
            .borrow()
            .iter()
            .find(|(k, _)| &**k == name)
            .map(|(_, v)| v.clone())
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attribute(name).is_some()
    }

    /// Set an attribute. Setting `style` replaces the style map.
    pub fn set_attribute(&self, name: &str, value: &str) {
        if name == "style" {
            let mut style = self.0.style.borrow_mut();
            style.clear();
            for declaration in value.split(';') {
                if let Some((prop, val)) = declaration.split_once(':') {
                    let prop = prop.trim();
                    if !prop.is_empty() {
                        style.insert(prop.to_string(), val.trim().to_string());
                    }
                }
            }
            return;
        }
        let mut attrs = self.0.attrs.borrow_mut();
        match attrs.iter_mut().find(|(k, _)| &**k == name) {
            Some((_, existing)) => {
                if existing != value {
                    *existing = value.to_string();
                }
            }
            None => attrs.push((name.into(), value.to_string())),
        }
    }

    pub fn remove_attribute(&self, name: &str) {
        if name == "style" {
            self.0.style.borrow_mut().clear();
        } else {
            self.0.attrs.borrow_mut().retain(|(k, _)| &**k != name);
        }
    }

    /// Presence toggle for boolean attributes.
    pub fn toggle_attribute(&self, name: &str, present: bool) {
        if present {
            if !self.has_attribute(name) {
                self.set_attribute(name, "");
            }
        } else {
            self.remove_attribute(name);
        }
    }

    pub fn style(&self, property: &str) -> Option<String> {
        self.0.style.borrow().get(property).cloned()
    }

    pub fn set_style(&self, property: &str, value: &str) {
        self.0
            .style
            .borrow_mut()
            .insert(property.to_string(), value.to_string());
    }

    pub fn remove_style(&self, property: &str) {
        self.0.style.borrow_mut().remove(property);
    }

    fn style_text(&self) -> String {
        self.0
            .style
            .borrow()
            .iter()
            .map(|(k, v)| format!("{k}: {v}"))
            .collect::<Vec<_>>()
            .join("; ")
    }

    // =========================================================================
    // Control properties
    // =========================================================================

    /// Current control value; falls back to the `value` attribute.
    pub fn value(&self) -> String {
        self.0
            .value
            .borrow()
            .clone()
            .or_else(|| self.attribute("value"))
            .unwrap_or_default()
    }

    pub fn set_value(&self, value: &str) {
        *self.0.value.borrow_mut() = Some(value.to_string());
    }

    /// Current checked flag; falls back to the `checked` attribute.
    pub fn checked(&self) -> bool {
        self.0
            .checked
            .get()
            .unwrap_or_else(|| self.has_attribute("checked"))
    }

    pub fn set_checked(&self, checked: bool) {
        self.0.checked.set(Some(checked));
    }

    // =========================================================================
    // Tree structure
    // =========================================================================

    pub fn parent(&self) -> Option<Node> {
        self.0.parent.borrow().upgrade().map(Node)
    }

    pub fn children(&self) -> Vec<Node> {
        self.0.children.borrow().clone()
    }

    pub fn child_count(&self) -> usize {
        self.0.children.borrow().len()
    }

    pub fn first_child(&self) -> Option<Node> {
        self.0.children.borrow().first().cloned()
    }

    fn index_in_parent(&self) -> Option<(Node, usize)> {
        let parent = self.parent()?;
        let index = parent
            .0
            .children
            .borrow()
            .iter()
            .position(|c| c.ptr_eq(self))?;
        Some((parent, index))
    }

    pub fn next_sibling(&self) -> Option<Node> {
        let (parent, index) = self.index_in_parent()?;
        let children = parent.0.children.borrow();
        children.get(index + 1).cloned()
    }

    /// Detach from the parent, if any.
    pub fn remove(&self) {
        if let Some((parent, index)) = self.index_in_parent() {
            parent.0.children.borrow_mut().remove(index);
        }
        *self.0.parent.borrow_mut() = Weak::new();
    }

    /// Whether `other` is this node or one of its descendants.
    pub fn contains(&self, other: &Node) -> bool {
        let mut current = Some(other.clone());
        while let Some(node) = current {
            if node.ptr_eq(self) {
                return true;
            }
            current = node.parent();
        }
        false
    }

    /// Append `child`; a fragment contributes its children instead.
    pub fn append_child(&self, child: &Node) {
        let at = self.child_count();
        self.insert_at(child, at);
    }

    /// Insert `child` before `reference`, or append when `reference` is
    /// `None`. Fails when `reference` is not a child of `self`.
    pub fn insert_before(&self, child: &Node, reference: Option<&Node>) -> Result<()> {
        let at = match reference {
            None => self.child_count(),
            Some(reference) => self.position_of(reference)?,
        };
        self.insert_at(child, at);
        Ok(())
    }

    /// Insert `child` right after `reference`.
    pub fn insert_after(&self, child: &Node, reference: &Node) -> Result<()> {
        let at = self.position_of(reference)? + 1;
        self.insert_at(child, at);
        Ok(())
    }

    fn position_of(&self, reference: &Node) -> Result<usize> {
        self.0
            .children
            .borrow()
            .iter()
            .position(|c| c.ptr_eq(reference))
            .ok_or(Error::NotAChild)
    }

    fn insert_at(&self, child: &Node, mut at: usize) {
        let moving: Vec<Node> = if child.kind() == NodeKind::Fragment {
            let moved = std::mem::take(&mut *child.0.children.borrow_mut());
            for node in &moved {
                *node.0.parent.borrow_mut() = Weak::new();
            }
            moved
        } else {
            vec![child.clone()]
        };

        for node in moving {
            // Moving within the same parent shifts the insertion point.
            if let Some((old_parent, old_index)) = node.index_in_parent() {
                if old_parent.ptr_eq(self) && old_index < at {
                    at -= 1;
                }
            }
            node.remove();
            *node.0.parent.borrow_mut() = Rc::downgrade(&self.0);
            self.0.children.borrow_mut().insert(at, node);
            at += 1;
        }
    }

    /// Deep copy without listeners or parent.
    pub fn clone_deep(&self) -> Node {
        let copy = Node::new(self.0.kind, &self.0.tag, &self.0.data.borrow());
        *copy.0.attrs.borrow_mut() = self.0.attrs.borrow().clone();
        *copy.0.style.borrow_mut() = self.0.style.borrow().clone();
        *copy.0.value.borrow_mut() = self.0.value.borrow().clone();
        copy.0.checked.set(self.0.checked.get());
        for child in self.0.children.borrow().iter() {
            copy.append_child(&child.clone_deep());
        }
        copy
    }

    // =========================================================================
    // Search
    // =========================================================================

    /// Descendants (not self) matching `predicate`, in document order.
    pub fn find_all(&self, predicate: impl Fn(&Node) -> bool) -> Vec<Node> {
        fn walk(node: &Node, predicate: &dyn Fn(&Node) -> bool, out: &mut Vec<Node>) {
            for child in node.0.children.borrow().iter() {
                if predicate(child) {
                    out.push(child.clone());
                }
                walk(child, predicate, out);
            }
        }
        let mut out = Vec::new();
        walk(self, &predicate, &mut out);
        out
    }

    /// Descendant elements with `tag`.
    pub fn find_by_tag(&self, tag: &str) -> Vec<Node> {
        let tag = tag.to_ascii_lowercase();
        self.find_all(|n| n.is_element() && n.tag() == tag)
    }

    /// First descendant element with `tag`.
    pub fn query(&self, tag: &str) -> Option<Node> {
        self.find_by_tag(tag).into_iter().next()
    }

    // =========================================================================
    // Events
    // =========================================================================

    pub fn add_listener(&self, kind: &str, handler: impl Fn(&Event) + 'static) -> ListenerId {
        let id = ListenerId(self.0.next_listener.get());
        self.0.next_listener.set(id.0 + 1);
        self.0.listeners.borrow_mut().push(Listener {
            id,
            kind: kind.into(),
            handler: Rc::new(handler),
        });
        id
    }

    pub fn remove_listener(&self, id: ListenerId) {
        self.0.listeners.borrow_mut().retain(|l| l.id != id);
    }

    pub fn listener_count(&self) -> usize {
        self.0.listeners.borrow().len()
    }

    /// Run listeners for `event.kind()` on this node.
    ///
    /// The outermost dispatch ends the turn by draining microtasks.
    pub fn dispatch(&self, event: &Event) {
        let event = event.with_target(self);
        let handlers: Vec<Handler> = self
            .0
            .listeners
            .borrow()
            .iter()
            .filter(|l| *l.kind == *event.kind())
            .map(|l| Rc::clone(&l.handler))
            .collect();

        DISPATCH_DEPTH.with(|d| d.set(d.get() + 1));
        let _guard = DispatchGuard;
        for handler in handlers {
            handler(&event);
        }
    }

    // =========================================================================
    // Serialisation
    // =========================================================================

    /// Serialise for inspection and tests.
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        self.write_html(&mut out);
        out
    }

    fn write_html(&self, out: &mut String) {
        match self.0.kind {
            NodeKind::Text => out.push_str(&escape(&self.0.data.borrow(), false)),
            NodeKind::Comment => {
                out.push_str("<!--");
                out.push_str(&self.0.data.borrow());
                out.push_str("-->");
            }
            NodeKind::Fragment => {
                for child in self.0.children.borrow().iter() {
                    child.write_html(out);
                }
            }
            NodeKind::Element => {
                out.push('<');
                out.push_str(&self.0.tag);
                for (name, value) in self.attributes() {
                    out.push(' ');
                    out.push_str(&name);
                    if !value.is_empty() {
                        out.push_str("=\"");
                        out.push_str(&escape(&value, true));
                        out.push('"');
                    }
                }
                out.push('>');
                if VOID_ELEMENTS.contains(&&*self.0.tag) {
                    return;
                }
                for child in self.0.children.borrow().iter() {
                    child.write_html(out);
                }
                out.push_str("</");
                out.push_str(&self.0.tag);
                out.push('>');
            }
        }
    }
}

/// Decrements the dispatch depth and drains microtasks at the top level.
struct DispatchGuard;

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        let depth = DISPATCH_DEPTH.with(|d| {
            let depth = d.get().saturating_sub(1);
            d.set(depth);
            depth
        });
        if depth == 0 && !std::thread::panicking() {
            tick();
        }
    }
}

fn escape(text: &str, attribute: bool) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.kind {
            NodeKind::Element => write!(f, "<{}>", self.0.tag),
            NodeKind::Text => write!(f, "#text({:?})", self.0.data.borrow()),
            NodeKind::Comment => write!(f, "<!--{}-->", self.0.data.borrow()),
            NodeKind::Fragment => write!(f, "#fragment({})", self.child_count()),
        }
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Node {}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(items: &[&str]) -> Node {
        let ul = Node::element("ul");
        for item in items {
            let li = Node::element("li");
            li.append_child(&Node::text(item));
            ul.append_child(&li);
        }
        ul
    }

    #[test]
    fn test_append_and_remove() {
        let ul = list(&["a", "b"]);
        assert_eq!(ul.to_html(), "<ul><li>a</li><li>b</li></ul>");

        let first = ul.first_child().unwrap();
        first.remove();
        assert!(first.parent().is_none());
        assert_eq!(ul.text_content(), "b");
    }

    #[test]
    fn test_insert_before_and_after() {
        let ul = list(&["a", "c"]);
        let children = ul.children();
        let b = Node::text("b");
        ul.insert_after(&b, &children[0]).unwrap();
        assert_eq!(ul.text_content(), "abc");

        let z = Node::text("z");
        ul.insert_before(&z, Some(&children[0])).unwrap();
        assert_eq!(ul.text_content(), "zabc");

        let stranger = Node::text("?");
        assert_eq!(ul.insert_before(&z, Some(&stranger)), Err(Error::NotAChild));
    }

    #[test]
    fn test_fragment_insertion_moves_children() {
        let fragment = Node::fragment();
        fragment.append_child(&Node::text("1"));
        fragment.append_child(&Node::text("2"));
        let div = Node::element("div");
        div.append_child(&fragment);
        assert_eq!(div.child_count(), 2);
        assert_eq!(fragment.child_count(), 0);
        assert!(div.children()[0].parent().unwrap().ptr_eq(&div));
    }

    #[test]
    fn test_moving_within_parent() {
        let ul = list(&["a", "b", "c"]);
        let a = ul.first_child().unwrap();
        ul.append_child(&a);
        assert_eq!(ul.text_content(), "bca");
        let c = ul.children()[1].clone();
        ul.insert_before(&c, Some(&ul.first_child().unwrap())).unwrap();
        assert_eq!(ul.text_content(), "cba");
    }

    #[test]
    fn test_clone_deep_drops_listeners() {
        let button = Node::element("BUTTON");
        assert_eq!(button.tag(), "button");
        button.set_attribute("class", "primary");
        button.set_style("color", "red");
        button.add_listener("click", |_| {});
        let copy = button.clone_deep();
        assert_eq!(copy.to_html(), button.to_html());
        assert_eq!(copy.listener_count(), 0);
        assert!(!copy.ptr_eq(&button));
    }

    #[test]
    fn test_style_map_round_trip() {
        let div = Node::element("div");
        div.set_attribute("style", "color: red; display:flex");
        assert_eq!(div.style("display").as_deref(), Some("flex"));
        div.remove_style("display");
        assert_eq!(div.attribute("style").as_deref(), Some("color: red"));
    }

    #[test]
    fn test_control_properties_fall_back_to_attributes() {
        let input = Node::element("input");
        input.set_attribute("value", "initial");
        input.set_attribute("checked", "");
        assert_eq!(input.value(), "initial");
        assert!(input.checked());
        input.set_value("typed");
        input.set_checked(false);
        assert_eq!(input.value(), "typed");
        assert!(!input.checked());
        assert_eq!(input.to_html(), "<input value=\"initial\" checked>");
    }

    #[test]
    fn test_dispatch_runs_matching_listeners() {
        let button = Node::element("button");
        let hits = Rc::new(Cell::new(0));
        let hits_clone = hits.clone();
        let id = button.add_listener("click", move |event| {
            assert_eq!(event.kind(), "click");
            hits_clone.set(hits_clone.get() + 1);
        });
        button.add_listener("input", |_| panic!("wrong kind"));

        button.dispatch(&Event::new("click"));
        button.remove_listener(id);
        button.dispatch(&Event::new("click"));
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_find_and_escape() {
        let div = Node::element("div");
        div.append_child(&list(&["<a>", "b & c"]));
        assert_eq!(div.find_by_tag("li").len(), 2);
        assert!(div.query("ul").is_some());
        assert!(div.to_html().contains("&lt;a&gt;"));
        assert!(div.contains(&div.find_by_tag("li")[1]));
    }
}
