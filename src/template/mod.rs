//! Template Module - Markup parsing and `{}` interpolation
//!
//! Templates are parsed once, when a component is defined. The resulting
//! fragment is the pristine copy every instance clones from; directives and
//! bindings are wired on the clone by the walker in [`crate::primitives`].

mod interpolate;
mod parser;

use thiserror::Error;

pub use interpolate::{has_interpolation, single_expression, split, Segment};
pub use parser::parse;

/// Markup syntax errors. Offsets are byte offsets into the template text.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TemplateError {
    #[error("unexpected end of template in tag starting at {offset}")]
    UnexpectedEof { offset: usize },

    #[error("unclosed `<{tag}>` (at {offset})")]
    Unclosed { tag: String, offset: usize },

    #[error("closing tag `</{found}>` at {offset} does not match `<{expected}>`")]
    MismatchedClose {
        expected: String,
        found: String,
        offset: usize,
    },

    #[error("closing tag `</{tag}>` at {offset} has no open element")]
    UnexpectedClose { tag: String, offset: usize },

    #[error("unterminated comment starting at {offset}")]
    UnterminatedComment { offset: usize },

    #[error("unterminated value for attribute `{name}` at {offset}")]
    UnterminatedAttribute { name: String, offset: usize },
}
