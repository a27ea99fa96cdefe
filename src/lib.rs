//! # spark-weave
//!
//! Reactive UI component runtime for Rust.
//!
//! A component is a template string plus a function that produces its
//! [`State`]. Instances render into a small host node tree ([`Node`]) and
//! stay in sync with their state through fine-grained bindings: no virtual
//! tree, no diffing.
//!
//! ## Architecture
//!
//! Every dynamic piece of a template becomes a binding that records which
//! root state keys it read. Writes enqueue their root key; once per turn the
//! state's scheduler re-runs exactly the bindings that read a changed key:
//! ```text
//! State write → Scheduler (pending keys) → tick() → flush → bindings → Node tree
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use spark_weave::{component, tick, ComponentInput, Node, State, Value};
//!
//! let list = component(
//!     "todo-list",
//!     r#"<ul><li for="todo in todos">{todo}</li></ul>"#,
//!     |_| State::new().with("todos", Value::list(["write", "test"])),
//! )?;
//!
//! let body = Node::element("body");
//! let handle = list.create(ComponentInput::new());
//! handle.mount(&body, None)?;
//!
//! handle.state().get("todos").as_list().unwrap().push("ship");
//! tick(); // one new <li>, the first two untouched
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Dynamic values, props, array operation hints
//! - [`state`] - Observable state, containers, tracker, scheduler, stores
//! - [`expr`] - Template expression language
//! - [`template`] - Markup parser and `{}` interpolation
//! - [`engine`] - Host node tree, events, component registry
//! - [`primitives`] - Directive walker (`if`, `for`, `show`, `bind`, `on:`)
//! - [`pipeline`] - Component definitions, factories, instance lifecycle
//! - [`style`] - Scoped component CSS

pub mod config;
pub mod engine;
pub mod error;
pub mod expr;
pub mod pipeline;
pub mod primitives;
pub mod state;
pub mod style;
pub mod template;
pub mod types;

// Re-export commonly used items
pub use types::*;

pub use config::{config, reset_config, set_config, RuntimeConfig};

pub use error::{Error, Result};

pub use engine::{
    component, registry, reset_registry, Event, ListenerId, Node, NodeKind, Registry, WeakNode,
};

pub use expr::{evaluate, execute, EvalError, EvalScope, Locals, ParseError};

pub use pipeline::{ComponentDef, ComponentHandle, ComponentInput, Factory};

pub use primitives::{parse_for, Cleanup, ForSpec, Scope};

pub use state::{
    queue_microtask, tick, track, untracked, Effect, ReactiveList, ReactiveMap, State, Store,
    SubscriptionId,
};

pub use style::{register_style, reset_styles, stylesheet};

pub use template::TemplateError;
