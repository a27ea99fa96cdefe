//! Error types for component definition and mounting.
//!
//! Expression errors live in [`crate::expr`]; they are recovered at the
//! evaluation boundary and never surface here.

use thiserror::Error;

use crate::template::TemplateError;

/// Configuration and host-tree errors.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    /// A tag was registered twice in the same registry.
    #[error("component tag `{0}` is already registered")]
    DuplicateTag(String),

    /// A `for` attribute did not match `item[, index] in source`.
    #[error("malformed `for` expression `{0}`: expected `item[, index] in source`")]
    MalformedFor(String),

    /// The template markup could not be parsed.
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// `mount` was given a reference node that is not a child of the target.
    #[error("reference node is not a child of the mount target")]
    NotAChild,

    /// The handle was used after `unmount`.
    #[error("component `{0}` has been unmounted")]
    Unmounted(String),

    /// A child component element had no parent to be mounted into.
    #[error("cannot mount child component `{0}`: element has no parent")]
    DetachedElement(String),
}

/// Crate result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;
