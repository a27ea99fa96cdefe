//! State Module - Reactive state for component instances
//!
//! This module contains the reactive core that every component runs on:
//!
//! - **Tracker** - Records which root keys a computation reads
//! - **Scheduler** - Pending keys, binding registry, microtask turn model
//! - **Containers** - Observable lists and maps linked to their root key
//! - **Observable** - The per-component `State` with computed and methods
//! - **Store** - Shared state with per-key subscribers

mod container;
mod observable;
mod scheduler;
mod store;
mod tracker;

pub use container::{ReactiveList, ReactiveMap};
pub use observable::{Effect, Getter, Method, State};
pub(crate) use observable::Emitter;
pub use scheduler::{
    is_draining, pending_microtasks, queue_microtask, reset_microtasks, tick, BindingId,
};
pub use store::{Store, SubscriptionId};
pub use tracker::{is_tracking, track, untracked, Deps};
