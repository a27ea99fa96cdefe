//! Expression Module - Template expressions and event statements
//!
//! Text from `{...}` spans, directive attributes and `on:` handlers is
//! compiled once into an AST and interpreted against an [`EvalScope`]:
//!
//! - **Lexer / Parser** - Pratt parser over a small script-like grammar
//! - **Eval** - interpreter with locals layered over the component state
//! - **Builtins** - list, string and number methods
//!
//! Compiled programs are cached per `(mode, text)` so an expression inside a
//! 1000-row list is parsed once. Parse failures are cached too.
//!
//! [`evaluate`] and [`execute`] never fail: errors are logged and the result
//! is `undefined`, so one broken binding never stops a render pass.

mod ast;
mod builtins;
mod eval;
mod lexer;
mod parser;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use thiserror::Error;

use crate::config::config;
use crate::types::Value;

pub use ast::{AssignOp, BinaryOp, Expr, LogicalOp, UnaryOp};
pub use eval::{EvalScope, Locals};
pub use parser::{parse_expression, parse_statements};

// =============================================================================
// Errors
// =============================================================================

/// Syntax errors. Offsets are byte offsets into the expression text.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("empty expression")]
    Empty,

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("unexpected character `{ch}` at {offset}")]
    UnexpectedChar { ch: char, offset: usize },

    #[error("unexpected `{found}` at {offset}")]
    UnexpectedToken { found: String, offset: usize },

    #[error("unterminated string starting at {offset}")]
    UnterminatedString { offset: usize },

    #[error("invalid escape sequence at {offset}")]
    InvalidEscape { offset: usize },

    #[error("invalid number `{text}` at {offset}")]
    InvalidNumber { text: String, offset: usize },

    #[error("invalid assignment target at {offset}")]
    InvalidAssignmentTarget { offset: usize },
}

/// Runtime evaluation errors.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvalError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("`{0}` is not a function")]
    NotCallable(String),

    #[error("cannot assign to `{0}`")]
    NotAssignable(String),

    #[error("cannot assign to loop variable `{0}`")]
    ReadOnlyLocal(String),

    #[error("cannot read property `{property}` of {value}")]
    PropertyOfNullish { property: String, value: String },

    #[error("{type_name} has no method `{method}`")]
    UnknownMethod {
        method: String,
        type_name: &'static str,
    },

    #[error("bad argument: {0}")]
    BadArgument(String),

    #[error("index {index} is too far past the end of a list of length {len}")]
    IndexOutOfRange { index: usize, len: usize },
}

// =============================================================================
// Compile cache
// =============================================================================

/// How a text is parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// A single expression (`{...}` spans, directive values).
    Expression,
    /// `;`-separated statements (`on:` handlers).
    Statements,
}

type Compiled = Result<Rc<Expr>, ParseError>;

/// One map per mode so lookups borrow the text instead of building a key.
#[derive(Default)]
struct Cache {
    expressions: HashMap<Rc<str>, Compiled>,
    statements: HashMap<Rc<str>, Compiled>,
}

impl Cache {
    fn map(&mut self, mode: Mode) -> &mut HashMap<Rc<str>, Compiled> {
        match mode {
            Mode::Expression => &mut self.expressions,
            Mode::Statements => &mut self.statements,
        }
    }

    fn len(&self) -> usize {
        self.expressions.len() + self.statements.len()
    }

    fn clear(&mut self) {
        self.expressions.clear();
        self.statements.clear();
    }
}

thread_local! {
    static CACHE: RefCell<Cache> = RefCell::new(Cache::default());
}

/// Parse `text`, reusing a cached result when available.
pub fn compile(text: &str, mode: Mode) -> Compiled {
    if let Some(hit) = CACHE.with(|cache| cache.borrow_mut().map(mode).get(text).cloned()) {
        return hit;
    }

    let compiled = match mode {
        Mode::Expression => parse_expression(text),
        Mode::Statements => parse_statements(text),
    }
    .map(Rc::new);

    let capacity = config().expression_cache_capacity;
    CACHE.with(|cache| {
        let mut cache = cache.borrow_mut();
        if capacity > 0 && cache.len() >= capacity {
            tracing::debug!(capacity, "expression cache full; clearing");
            cache.clear();
        }
        cache.map(mode).insert(Rc::from(text), compiled.clone());
    });
    compiled
}

/// Number of cached programs.
pub fn cache_len() -> usize {
    CACHE.with(|cache| cache.borrow().len())
}

/// Drop every cached program (for testing).
pub fn reset_cache() {
    CACHE.with(|cache| cache.borrow_mut().clear());
}

// =============================================================================
// Evaluation
// =============================================================================

/// Evaluate `text` as an expression, propagating errors.
pub fn try_evaluate(text: &str, scope: &EvalScope) -> Result<Value, EvalError> {
    let program = compile(text, Mode::Expression)?;
    eval::eval(&program, scope)
}

/// Execute `text` as statements, propagating errors.
pub fn try_execute(text: &str, scope: &EvalScope) -> Result<Value, EvalError> {
    let program = compile(text, Mode::Statements)?;
    eval::eval(&program, scope)
}

/// Evaluate `text`; errors are logged and yield `undefined`.
pub fn evaluate(text: &str, scope: &EvalScope) -> Value {
    try_evaluate(text, scope).unwrap_or_else(|err| {
        tracing::warn!(expression = text, error = %err, "expression failed");
        Value::Undefined
    })
}

/// Execute `text`; errors are logged and yield `undefined`.
pub fn execute(text: &str, scope: &EvalScope) -> Value {
    try_execute(text, scope).unwrap_or_else(|err| {
        tracing::warn!(statement = text, error = %err, "statement failed");
        Value::Undefined
    })
}
