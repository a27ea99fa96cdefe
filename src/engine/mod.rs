//! Engine - Host node tree, events, and the component registry.
//!
//! The engine holds the data structures everything else writes to:
//! - [`Node`]: a minimal document tree (elements, text, comments, fragments)
//!   with attributes, inline style, control properties and listeners
//! - [`Event`]: what listeners receive, including component event details
//! - [`Registry`]: which tags are components, and their factories
//!
//! # Turn boundary
//!
//! Mutations queue work; they do not render. The outermost
//! [`Node::dispatch`] ends a turn by draining the microtask queue, which
//! flushes every state touched by its listeners. Outside of event dispatch
//! call [`tick`](crate::state::tick) to end the turn.

mod event;
mod node;
mod registry;

pub use event::Event;
pub use node::{ListenerId, Node, NodeKind, WeakNode};
pub use registry::{component, registry, reset_registry, Registry, WeakRegistry};

pub(crate) use node::VOID_ELEMENTS;
