//! Tree-walking interpreter over an [`EvalScope`].

use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use crate::state::{ReactiveMap, State};
use crate::types::{Function, Value};

use super::ast::{AssignOp, BinaryOp, Expr, LogicalOp, UnaryOp};
use super::builtins;
use super::EvalError;

// =============================================================================
// Locals
// =============================================================================

struct Frame {
    bindings: Vec<(Rc<str>, Value)>,
    parent: Locals,
}

/// Persistent stack of local bindings (loop variables, event locals, arrow
/// parameters). Extending never mutates the parent, so rendered list rows
/// can hold their own context cheaply.
#[derive(Clone, Default)]
pub struct Locals(Option<Rc<Frame>>);

impl Locals {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new frame over `self`.
    pub fn extend<K: Into<Rc<str>>>(&self, bindings: impl IntoIterator<Item = (K, Value)>) -> Locals {
        let bindings: Vec<(Rc<str>, Value)> =
            bindings.into_iter().map(|(k, v)| (k.into(), v)).collect();
        if bindings.is_empty() {
            return self.clone();
        }
        Locals(Some(Rc::new(Frame {
            bindings,
            parent: self.clone(),
        })))
    }

    /// A new frame with a single binding.
    pub fn with(&self, name: impl Into<Rc<str>>, value: Value) -> Locals {
        self.extend([(name.into(), value)])
    }

    /// Innermost binding named `name`.
    pub fn get(&self, name: &str) -> Option<Value> {
        let mut current = self.0.as_ref();
        while let Some(frame) = current {
            if let Some((_, value)) = frame.bindings.iter().rev().find(|(k, _)| &**k == name) {
                return Some(value.clone());
            }
            current = frame.parent.0.as_ref();
        }
        None
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }
}

impl fmt::Debug for Locals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        let mut current = self.0.as_ref();
        while let Some(frame) = current {
            for (name, value) in &frame.bindings {
                list.entry(&(name, value));
            }
            current = frame.parent.0.as_ref();
        }
        list.finish()
    }
}

// =============================================================================
// EvalScope
// =============================================================================

/// What an expression can see: loop/event locals over the component state.
#[derive(Debug, Clone)]
pub struct EvalScope {
    state: State,
    locals: Locals,
}

impl EvalScope {
    pub fn new(state: &State) -> Self {
        Self::with_locals(state, Locals::new())
    }

    pub fn with_locals(state: &State, locals: Locals) -> Self {
        Self {
            state: state.clone(),
            locals,
        }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn locals(&self) -> &Locals {
        &self.locals
    }

    /// Same state, extra locals.
    pub fn extend<K: Into<Rc<str>>>(&self, bindings: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self {
            state: self.state.clone(),
            locals: self.locals.extend(bindings),
        }
    }

    /// Resolve an identifier: locals, then methods, then fields, then `emit`.
    pub fn lookup(&self, name: &str) -> Value {
        if let Some(value) = self.locals.get(name) {
            return value;
        }
        if let Some(method) = self.state.method(name) {
            let state = self.state.clone();
            return Value::Function(Function::new(name, move |args| Ok(method(&state, args))));
        }
        if name == "emit" && !self.state.has(name) {
            return Value::Function(emit_function(&self.state));
        }
        self.state.get(name)
    }
}

fn emit_function(state: &State) -> Function {
    let state = state.clone();
    Function::new("emit", move |args| {
        let name = args.first().map(Value::to_display).unwrap_or_default();
        let detail = args.get(1).cloned().unwrap_or_default();
        state.emit(&name, detail);
        Ok(Value::Undefined)
    })
}

// =============================================================================
// Interpreter
// =============================================================================

pub(crate) fn eval(expr: &Expr, scope: &EvalScope) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Ident(name) => Ok(scope.lookup(name)),
        Expr::Array(items) => {
            let items = items
                .iter()
                .map(|item| eval(item, scope))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::from(items))
        }
        Expr::Object(entries) => {
            let map = ReactiveMap::new();
            for (key, value) in entries {
                map.set(key, eval(value, scope)?);
            }
            Ok(Value::Map(map))
        }
        Expr::Member {
            object,
            property,
            optional,
        } => {
            let object = eval(object, scope)?;
            if *optional && object.is_nullish() {
                return Ok(Value::Undefined);
            }
            get_member(&object, property)
        }
        Expr::Index {
            object,
            index,
            optional,
        } => {
            let object = eval(object, scope)?;
            if *optional && object.is_nullish() {
                return Ok(Value::Undefined);
            }
            let index = eval(index, scope)?;
            get_index(&object, &index)
        }
        Expr::Call {
            callee,
            args,
            optional,
        } => call(callee, args, *optional, scope),
        Expr::Unary { op, operand } => {
            let value = eval(operand, scope)?;
            Ok(match op {
                UnaryOp::Not => Value::Bool(!value.is_truthy()),
                UnaryOp::Neg => Value::Number(-value.to_number()),
                UnaryOp::Plus => Value::Number(value.to_number()),
                UnaryOp::TypeOf => Value::from(value.type_of()),
            })
        }
        Expr::Binary { op, left, right } => {
            let left = eval(left, scope)?;
            let right = eval(right, scope)?;
            Ok(binary(*op, &left, &right))
        }
        Expr::Logical { op, left, right } => {
            let left = eval(left, scope)?;
            let short_circuit = match op {
                LogicalOp::And => !left.is_truthy(),
                LogicalOp::Or => left.is_truthy(),
                LogicalOp::Nullish => !left.is_nullish(),
            };
            if short_circuit {
                Ok(left)
            } else {
                eval(right, scope)
            }
        }
        Expr::Conditional {
            test,
            consequent,
            alternate,
        } => {
            if eval(test, scope)?.is_truthy() {
                eval(consequent, scope)
            } else {
                eval(alternate, scope)
            }
        }
        Expr::Assign { op, target, value } => {
            let value = eval(value, scope)?;
            let value = match op {
                AssignOp::Assign => value,
                AssignOp::Compound(op) => binary(*op, &eval(target, scope)?, &value),
            };
            assign(target, value.clone(), scope)?;
            Ok(value)
        }
        Expr::Update {
            increment,
            prefix,
            target,
        } => {
            let old = eval(target, scope)?.to_number();
            let new = if *increment { old + 1.0 } else { old - 1.0 };
            assign(target, Value::Number(new), scope)?;
            Ok(Value::Number(if *prefix { new } else { old }))
        }
        Expr::Arrow { params, body } => Ok(Value::Function(arrow(params, body, scope))),
        Expr::Sequence(body) => {
            let mut last = Value::Undefined;
            for statement in body {
                last = eval(statement, scope)?;
            }
            Ok(last)
        }
    }
}

fn arrow(params: &Rc<[Rc<str>]>, body: &Rc<Expr>, scope: &EvalScope) -> Function {
    let params = Rc::clone(params);
    let body = Rc::clone(body);
    let scope = scope.clone();
    Function::new("arrow", move |args| {
        let bindings = params
            .iter()
            .enumerate()
            .map(|(i, name)| (Rc::clone(name), args.get(i).cloned().unwrap_or_default()));
        eval(&body, &scope.extend(bindings))
    })
}

fn call(callee: &Expr, args: &[Expr], optional: bool, scope: &EvalScope) -> Result<Value, EvalError> {
    let eval_args = |scope: &EvalScope| -> Result<Vec<Value>, EvalError> {
        args.iter().map(|arg| eval(arg, scope)).collect()
    };

    // Method call: the receiver decides what `property` means.
    if let Expr::Member {
        object,
        property,
        optional: member_optional,
    } = callee
    {
        let receiver = eval(object, scope)?;
        if receiver.is_nullish() && (*member_optional || optional) {
            return Ok(Value::Undefined);
        }
        let args = eval_args(scope)?;
        return call_method(&receiver, property, &args);
    }

    let function = eval(callee, scope)?;
    if optional && function.is_nullish() {
        return Ok(Value::Undefined);
    }
    let args = eval_args(scope)?;
    apply(&function, &args, || describe_callee(callee))
}

/// Call `value` as a function.
pub(crate) fn apply(
    value: &Value,
    args: &[Value],
    name: impl FnOnce() -> String,
) -> Result<Value, EvalError> {
    match value {
        Value::Function(function) => function.call(args),
        _ => Err(EvalError::NotCallable(name())),
    }
}

fn call_method(receiver: &Value, method: &str, args: &[Value]) -> Result<Value, EvalError> {
    match receiver {
        Value::Map(map) => {
            let member = map.get(method);
            apply(&member, args, || method.to_string())
        }
        Value::List(list) => builtins::list_method(list, method, args),
        Value::String(s) => builtins::string_method(s, method, args),
        Value::Number(n) => builtins::number_method(*n, method, args),
        Value::Undefined | Value::Null => Err(EvalError::PropertyOfNullish {
            property: method.to_string(),
            value: receiver.to_display(),
        }),
        _ => Err(EvalError::UnknownMethod {
            method: method.to_string(),
            type_name: receiver.type_of(),
        }),
    }
}

pub(crate) fn get_member(object: &Value, property: &str) -> Result<Value, EvalError> {
    match object {
        Value::Map(map) => Ok(map.get(property)),
        Value::List(list) if property == "length" => Ok(Value::from(list.len())),
        Value::String(s) if property == "length" => Ok(Value::from(s.chars().count())),
        Value::List(list) => Ok(property
            .parse::<usize>()
            .map_or(Value::Undefined, |index| list.get(index))),
        Value::Undefined | Value::Null => Err(EvalError::PropertyOfNullish {
            property: property.to_string(),
            value: object.to_display(),
        }),
        _ => Ok(Value::Undefined),
    }
}

fn as_index(index: &Value) -> Option<usize> {
    match index {
        Value::Number(n) if *n >= 0.0 && n.fract() == 0.0 => Some(*n as usize),
        _ => None,
    }
}

fn get_index(object: &Value, index: &Value) -> Result<Value, EvalError> {
    match (object, as_index(index)) {
        (Value::List(list), Some(i)) => Ok(list.get(i)),
        (Value::String(s), Some(i)) => Ok(s
            .chars()
            .nth(i)
            .map_or(Value::Undefined, |c| Value::from(c.to_string()))),
        _ => get_member(object, &index.to_display()),
    }
}

fn assign(target: &Expr, value: Value, scope: &EvalScope) -> Result<(), EvalError> {
    match target {
        Expr::Ident(name) => {
            if scope.locals.contains(name) {
                return Err(EvalError::ReadOnlyLocal(name.to_string()));
            }
            scope.state.set(name, value);
            Ok(())
        }
        Expr::Member {
            object, property, ..
        } => {
            let object = eval(object, scope)?;
            set_member(&object, property, value)
        }
        Expr::Index { object, index, .. } => {
            let object = eval(object, scope)?;
            let index = eval(index, scope)?;
            match (&object, as_index(&index)) {
                (Value::List(list), Some(i)) => {
                    if list.set(i, value) {
                        Ok(())
                    } else {
                        Err(EvalError::IndexOutOfRange {
                            index: i,
                            len: list.peek_all().len(),
                        })
                    }
                }
                _ => set_member(&object, &index.to_display(), value),
            }
        }
        _ => Err(EvalError::NotAssignable(describe_callee(target))),
    }
}

fn set_member(object: &Value, property: &str, value: Value) -> Result<(), EvalError> {
    match object {
        Value::Map(map) => {
            map.set(property, value);
            Ok(())
        }
        Value::List(list) if property == "length" => {
            list.truncate(value.to_number().max(0.0) as usize);
            Ok(())
        }
        Value::Undefined | Value::Null => Err(EvalError::PropertyOfNullish {
            property: property.to_string(),
            value: object.to_display(),
        }),
        _ => Err(EvalError::NotAssignable(format!(
            "{}.{property}",
            object.type_of()
        ))),
    }
}

pub(crate) fn binary(op: BinaryOp, left: &Value, right: &Value) -> Value {
    match op {
        BinaryOp::Add => {
            let concat = |v: &Value| !matches!(v, Value::Undefined | Value::Null | Value::Bool(_) | Value::Number(_));
            if concat(left) || concat(right) {
                Value::from(format!("{}{}", left.to_display(), right.to_display()))
            } else {
                Value::Number(left.to_number() + right.to_number())
            }
        }
        BinaryOp::Sub => Value::Number(left.to_number() - right.to_number()),
        BinaryOp::Mul => Value::Number(left.to_number() * right.to_number()),
        BinaryOp::Div => Value::Number(left.to_number() / right.to_number()),
        BinaryOp::Rem => Value::Number(left.to_number() % right.to_number()),
        BinaryOp::LooseEq => Value::Bool(left.loose_eq(right)),
        BinaryOp::LooseNe => Value::Bool(!left.loose_eq(right)),
        BinaryOp::StrictEq => Value::Bool(left.strict_eq(right)),
        BinaryOp::StrictNe => Value::Bool(!left.strict_eq(right)),
        BinaryOp::Lt => Value::Bool(compare(left, right) == Some(Ordering::Less)),
        BinaryOp::Gt => Value::Bool(compare(left, right) == Some(Ordering::Greater)),
        BinaryOp::Le => Value::Bool(matches!(
            compare(left, right),
            Some(Ordering::Less | Ordering::Equal)
        )),
        BinaryOp::Ge => Value::Bool(matches!(
            compare(left, right),
            Some(Ordering::Greater | Ordering::Equal)
        )),
    }
}

/// Relational comparison: strings lexicographically, everything else as
/// numbers. `None` when either side is `NaN`.
fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => left.to_number().partial_cmp(&right.to_number()),
    }
}

fn describe_callee(expr: &Expr) -> String {
    match expr {
        Expr::Ident(name) => name.to_string(),
        Expr::Member {
            object, property, ..
        } => format!("{}.{property}", describe_callee(object)),
        Expr::Index { object, .. } => format!("{}[..]", describe_callee(object)),
        Expr::Call { callee, .. } => format!("{}(..)", describe_callee(callee)),
        _ => "expression".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parser::{parse_expression, parse_statements};

    fn run(src: &str, scope: &EvalScope) -> Result<Value, EvalError> {
        eval(&parse_statements(src).unwrap(), scope)
    }

    fn value(src: &str, state: &State) -> Value {
        eval(&parse_expression(src).unwrap(), &EvalScope::new(state)).unwrap()
    }

    #[test]
    fn test_arithmetic_and_concat() {
        let state = State::new().with("n", 4).with("name", "Ann");
        assert!(value("n * 2 + 1", &state).strict_eq(&Value::from(9)));
        assert!(value("'Hi ' + name", &state).strict_eq(&Value::from("Hi Ann")));
        assert!(value("1 + '2'", &state).strict_eq(&Value::from("12")));
        assert!(value("7 % 4", &state).strict_eq(&Value::from(3)));
    }

    #[test]
    fn test_logical_and_nullish() {
        let state = State::new().with("a", 0).with("b", "x");
        assert!(value("a || b", &state).strict_eq(&Value::from("x")));
        assert!(value("a && b", &state).strict_eq(&Value::from(0)));
        assert!(value("a ?? b", &state).strict_eq(&Value::from(0)));
        assert!(value("missing ?? b", &state).strict_eq(&Value::from("x")));
    }

    #[test]
    fn test_comparison() {
        let state = State::new();
        assert!(value("'apple' < 'banana'", &state).is_truthy());
        assert!(value("2 >= 2", &state).is_truthy());
        assert!(!value("NaN < 1", &state).is_truthy());
        assert!(value("1 == '1' && 1 !== '1'", &state).is_truthy());
    }

    #[test]
    fn test_locals_shadow_state() {
        let state = State::new().with("item", "state");
        let scope = EvalScope::new(&state).extend([("item", Value::from("local"))]);
        let inner = scope.extend([("item", Value::from("inner"))]);
        assert_eq!(run("item", &scope).unwrap().to_text(), "local");
        assert_eq!(run("item", &inner).unwrap().to_text(), "inner");
    }

    #[test]
    fn test_assignment_writes_state() {
        let state = State::new()
            .with("count", 1)
            .with("user", Value::map([("name", "Ann")]));
        let scope = EvalScope::new(&state);
        run("count += 2; user.name = 'Bea'", &scope).unwrap();
        assert!(state.peek("count").strict_eq(&Value::from(3)));
        assert_eq!(state.get_path("user.name").to_text(), "Bea");

        let post = run("count++", &scope).unwrap();
        assert!(post.strict_eq(&Value::from(3)));
        assert!(state.peek("count").strict_eq(&Value::from(4)));
    }

    #[test]
    fn test_far_index_write_is_an_error() {
        let state = State::new().with("items", Value::list([1, 2]));
        let scope = EvalScope::new(&state);
        assert_eq!(
            run("items[1000000000000000] = 1", &scope),
            Err(EvalError::IndexOutOfRange {
                index: 1_000_000_000_000_000,
                len: 2,
            })
        );
        run("items[3] = 4", &scope).unwrap();
        assert_eq!(state.get("items").to_display(), "1,2,,4");
    }

    #[test]
    fn test_sort_comparator_reading_the_list() {
        let state = State::new().with("items", Value::list([1, 3, 2]));
        let scope = EvalScope::new(&state);
        run("items.sort((a, b) => items.length * (b - a))", &scope).unwrap();
        assert_eq!(state.get("items").to_display(), "3,2,1");
    }

    #[test]
    fn test_assigning_a_local_is_an_error() {
        let state = State::new();
        let scope = EvalScope::new(&state).extend([("item", Value::from(1))]);
        assert_eq!(
            run("item = 2", &scope),
            Err(EvalError::ReadOnlyLocal("item".to_string()))
        );
    }

    #[test]
    fn test_methods_are_bound_to_state() {
        let state = State::new().with("count", 0).with_method("add", |s, args| {
            let by = args.first().map_or(1.0, Value::to_number);
            s.update("count", |c| Value::from(c.to_number() + by));
            s.get("count")
        });
        let scope = EvalScope::new(&state);
        assert!(run("add(5)", &scope).unwrap().strict_eq(&Value::from(5)));

        // A method referenced without a call is a callable value.
        let method = run("add", &scope).unwrap();
        assert!(matches!(method, Value::Function(_)));
    }

    #[test]
    fn test_arrow_callbacks() {
        let state = State::new().with("items", Value::list([1, 2, 3, 4]));
        let evens = value("items.filter(n => n % 2 === 0).map((n, i) => n * 10 + i)", &state);
        assert_eq!(evens.to_display(), "20,41");
    }

    #[test]
    fn test_unknown_field_is_undefined_but_tracked() {
        let state = State::new();
        let (result, deps) = crate::state::track(|| value("later", &state));
        assert!(matches!(result, Value::Undefined));
        assert!(deps.contains("later"));
    }

    #[test]
    fn test_nullish_member_errors_unless_optional() {
        let state = State::new();
        let scope = EvalScope::new(&state);
        assert!(matches!(
            run("user.name", &scope),
            Err(EvalError::PropertyOfNullish { .. })
        ));
        assert!(matches!(run("user?.name", &scope), Ok(Value::Undefined)));
        assert!(matches!(run("user?.greet()", &scope), Ok(Value::Undefined)));
    }

    #[test]
    fn test_calling_a_non_function() {
        let state = State::new().with("n", 1);
        assert_eq!(
            run("n()", &EvalScope::new(&state)),
            Err(EvalError::NotCallable("n".to_string()))
        );
    }

    #[test]
    fn test_emit_builtin() {
        let state = State::new();
        let seen = Rc::new(std::cell::RefCell::new(Vec::new()));
        let seen_clone = seen.clone();
        state.set_emitter(Rc::new(move |name: &str, detail: Value| {
            seen_clone.borrow_mut().push(format!("{name}:{detail}"));
        }));
        run("emit('saved', 42)", &EvalScope::new(&state)).unwrap();
        assert_eq!(*seen.borrow(), vec!["saved:42".to_string()]);
    }

    #[test]
    fn test_object_and_array_literals() {
        let state = State::new().with("x", 1);
        let object = value("{ x, y: [x, 2] }", &state);
        assert_eq!(object.to_json(), serde_json::json!({"x": 1, "y": [1, 2]}));
    }
}
