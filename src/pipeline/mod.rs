//! Component Pipeline
//!
//! This module connects a parsed template to a live instance.
//!
//! # Pipeline Architecture
//!
//! ```text
//! ComponentDef → Factory::create → State + cloned template → walk → ComponentHandle
//! ```
//!
//! ## Data Flow
//!
//! 1. **create** - resolve state from the input, merge unclaimed props and
//!    route parameters, clone the template
//! 2. **walk** - wire bindings, directives, listeners and child components
//!    into the instance's scope
//! 3. **mount** - move the roots into the host tree, fire `mounted`
//! 4. **unmount** - dispose the scope and state, detach, fire `unmounted`

pub mod mount;

pub use mount::{ComponentDef, ComponentHandle, ComponentInput, Factory, StateFn};
