//! Core types - Values, functions, props, and array-operation hints.
//!
//! [`Value`] is the dynamic value every state field, expression result, and
//! prop is expressed in. Its coercions follow the usual script semantics
//! (truthiness, loose equality, `String(x)` display) so templates read the
//! way template authors expect.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::expr::EvalError;
use crate::state::{ReactiveList, ReactiveMap};

// =============================================================================
// Function
// =============================================================================

/// Native callable signature.
pub type NativeFn = dyn Fn(&[Value]) -> Result<Value, EvalError>;

/// A callable value: bound state methods, arrow functions, and builtins.
#[derive(Clone)]
pub struct Function {
    name: Rc<str>,
    call: Rc<NativeFn>,
}

impl Function {
    /// Wrap a native closure.
    pub fn new(
        name: impl Into<Rc<str>>,
        f: impl Fn(&[Value]) -> Result<Value, EvalError> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            call: Rc::new(f),
        }
    }

    /// Name used in diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke with positional arguments.
    pub fn call(&self, args: &[Value]) -> Result<Value, EvalError> {
        (self.call)(args)
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &Function) -> bool {
        Rc::ptr_eq(&self.call, &other.call)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Function({})", self.name)
    }
}

// =============================================================================
// Value
// =============================================================================

/// A dynamically typed state value.
///
/// Containers (`List`, `Map`) are shared handles: cloning a `Value` clones the
/// handle, not the contents. Use [`Value::deep_clone`] for a snapshot.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    List(ReactiveList),
    Map(ReactiveMap),
    Function(Function),
}

impl Value {
    /// Build a list value from items.
    pub fn list(items: impl IntoIterator<Item = impl Into<Value>>) -> Self {
        Value::List(ReactiveList::new(items.into_iter().map(Into::into).collect()))
    }

    /// Build a map value from entries.
    pub fn map<K: Into<Rc<str>>, V: Into<Value>>(entries: impl IntoIterator<Item = (K, V)>) -> Self {
        Value::Map(ReactiveMap::from_entries(
            entries.into_iter().map(|(k, v)| (k.into(), v.into())),
        ))
    }

    /// Script truthiness.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::List(_) | Value::Map(_) | Value::Function(_) => true,
        }
    }

    /// `undefined` or `null`.
    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    /// Numeric coercion.
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse().unwrap_or(f64::NAN)
                }
            }
            Value::List(list) => {
                let items = list.peek_all();
                match items.as_slice() {
                    [] => 0.0,
                    [only] => only.to_number(),
                    _ => f64::NAN,
                }
            }
            Value::Map(_) | Value::Function(_) => f64::NAN,
        }
    }

    /// `String(value)` display.
    pub fn to_display(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::String(s) => s.to_string(),
            Value::List(list) => list
                .peek_all()
                .iter()
                .map(Value::to_text)
                .collect::<Vec<_>>()
                .join(","),
            Value::Map(_) => "[object Object]".to_string(),
            Value::Function(f) => format!("function {}() {{ [native code] }}", f.name()),
        }
    }

    /// Display for interpolation: nullish values render as the empty string.
    pub fn to_text(&self) -> String {
        if self.is_nullish() {
            String::new()
        } else {
            self.to_display()
        }
    }

    /// `typeof` result.
    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null | Value::List(_) | Value::Map(_) => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Function(_) => "function",
        }
    }

    /// `===` semantics: containers and functions compare by identity.
    pub fn strict_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::List(a), Value::List(b)) => a.ptr_eq(b),
            (Value::Map(a), Value::Map(b)) => a.ptr_eq(b),
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// `==` semantics.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() || b.is_nullish() => a.is_nullish() && b.is_nullish(),
            (Value::Number(_), Value::String(_))
            | (Value::String(_), Value::Number(_))
            | (Value::Bool(_), _)
            | (_, Value::Bool(_)) => self.to_number() == other.to_number(),
            (Value::List(_) | Value::Map(_), Value::String(_) | Value::Number(_))
            | (Value::String(_) | Value::Number(_), Value::List(_) | Value::Map(_)) => {
                self.to_display() == other.to_display()
            }
            _ => self.strict_eq(other),
        }
    }

    /// Structural equality. Does not record dependencies.
    pub fn deep_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::List(a), Value::List(b)) => {
                if a.ptr_eq(b) {
                    return true;
                }
                let (a, b) = (a.peek_all(), b.peek_all());
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.deep_eq(y))
            }
            (Value::Map(a), Value::Map(b)) => {
                if a.ptr_eq(b) {
                    return true;
                }
                let (a, b) = (a.peek_entries(), b.peek_entries());
                a.len() == b.len()
                    && a
                        .iter()
                        .zip(b.iter())
                        .all(|((ka, va), (kb, vb))| ka == kb && va.deep_eq(vb))
            }
            _ => self.strict_eq(other),
        }
    }

    /// Snapshot: containers are copied into fresh, unlinked containers.
    ///
    /// Shared stores are kept by identity.
    pub fn deep_clone(&self) -> Value {
        match self {
            Value::List(list) => Value::List(ReactiveList::new(
                list.peek_all().iter().map(Value::deep_clone).collect(),
            )),
            Value::Map(map) if map.is_store() => self.clone(),
            Value::Map(map) => Value::Map(ReactiveMap::from_entries(
                map.peek_entries()
                    .into_iter()
                    .map(|(k, v)| (k, v.deep_clone())),
            )),
            other => other.clone(),
        }
    }

    /// Convert from a JSON value.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s.as_str().into()),
            serde_json::Value::Array(items) => {
                Value::List(ReactiveList::new(items.iter().map(Value::from_json).collect()))
            }
            serde_json::Value::Object(entries) => Value::Map(ReactiveMap::from_entries(
                entries
                    .iter()
                    .map(|(k, v)| (Rc::from(k.as_str()), Value::from_json(v))),
            )),
        }
    }

    /// Convert to JSON. Functions and `undefined` become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Undefined | Value::Null | Value::Function(_) => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 => {
                serde_json::Value::from(*n as i64)
            }
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Value::String(s) => serde_json::Value::String(s.to_string()),
            Value::List(list) => {
                serde_json::Value::Array(list.peek_all().iter().map(Value::to_json).collect())
            }
            Value::Map(map) => serde_json::Value::Object(
                map.peek_entries()
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Parse a literal attribute value: structured literal if it parses as
    /// JSON, otherwise the raw string.
    pub fn parse_literal(raw: &str) -> Value {
        match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(json) => Value::from_json(&json),
            Err(_) => Value::String(raw.into()),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&ReactiveList> {
        match self {
            Value::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&ReactiveMap> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }
}

/// Format a number the way `String(n)` does for the common cases.
pub(crate) fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{n:.0}")
    } else {
        format!("{n}")
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::String(s) => write!(f, "{s:?}"),
            Value::List(list) => f.debug_list().entries(list.peek_all()).finish(),
            Value::Map(map) => f
                .debug_map()
                .entries(map.peek_entries())
                .finish(),
            Value::Function(func) => write!(f, "{func:?}"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_display())
    }
}

/// Structural equality (same as [`Value::deep_eq`]); `NaN != NaN`.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.deep_eq(other)
    }
}

// =============================================================================
// Conversions
// =============================================================================

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

macro_rules! impl_from_int {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                #[allow(clippy::cast_precision_loss, clippy::cast_lossless)]
                fn from(value: $ty) -> Self {
                    Value::Number(value as f64)
                }
            }
        )*
    };
}

impl_from_int!(i32, i64, u32, u64, usize, f32);

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.into())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value.into())
    }
}

impl From<Rc<str>> for Value {
    fn from(value: Rc<str>) -> Self {
        Value::String(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(ReactiveList::new(value))
    }
}

impl From<ReactiveList> for Value {
    fn from(value: ReactiveList) -> Self {
        Value::List(value)
    }
}

impl From<ReactiveMap> for Value {
    fn from(value: ReactiveMap) -> Self {
        Value::Map(value)
    }
}

impl From<Function> for Value {
    fn from(value: Function) -> Self {
        Value::Function(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

// =============================================================================
// Props and route parameters
// =============================================================================

/// Initial props handed to a component factory.
pub type Props = BTreeMap<Rc<str>, Value>;

/// Route and query parameters handed over by a router.
pub type RouteParams = BTreeMap<String, String>;

// =============================================================================
// Array operation hints
// =============================================================================

/// What happened to a list during the current turn.
///
/// The list directive uses this to patch incrementally instead of
/// re-rendering every row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayOp {
    /// `n` elements were appended at the end.
    Append(usize),
    /// `n` elements were removed from the end.
    RemoveLast(usize),
    /// Any other structural change.
    Other,
}

impl ArrayOp {
    /// Combine two operations recorded in the same turn.
    pub fn merge(self, next: ArrayOp) -> ArrayOp {
        match (self, next) {
            (ArrayOp::Append(a), ArrayOp::Append(b)) => ArrayOp::Append(a + b),
            (ArrayOp::RemoveLast(a), ArrayOp::RemoveLast(b)) => ArrayOp::RemoveLast(a + b),
            _ => ArrayOp::Other,
        }
    }
}
