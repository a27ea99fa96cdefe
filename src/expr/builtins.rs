//! Builtin methods on lists, strings, and numbers.

use std::cmp::Ordering;

use crate::state::ReactiveList;
use crate::types::Value;

use super::eval::apply;
use super::EvalError;

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or_default()
}

/// Resolve a possibly negative, possibly missing position against `len`.
fn position(value: Option<&Value>, len: usize, default: usize) -> usize {
    match value {
        None | Some(Value::Undefined) => default,
        Some(v) => {
            let n = v.to_number();
            if n.is_nan() {
                0
            } else if n < 0.0 {
                len.saturating_sub((-n) as usize)
            } else {
                (n as usize).min(len)
            }
        }
    }
}

fn callback(args: &[Value], method: &str) -> Result<Value, EvalError> {
    match args.first() {
        Some(f @ Value::Function(_)) => Ok(f.clone()),
        _ => Err(EvalError::BadArgument(format!("{method} expects a function"))),
    }
}

fn call_with(f: &Value, item: &Value, index: usize) -> Result<Value, EvalError> {
    apply(f, &[item.clone(), Value::from(index)], || "callback".to_string())
}

// =============================================================================
// Lists
// =============================================================================

pub(crate) fn list_method(
    list: &ReactiveList,
    method: &str,
    args: &[Value],
) -> Result<Value, EvalError> {
    match method {
        // Mutations
        "push" => {
            list.extend(args.iter().cloned());
            Ok(Value::from(list.len()))
        }
        "pop" => Ok(list.pop()),
        "shift" => Ok(list.shift()),
        "unshift" => {
            if !args.is_empty() {
                list.splice(0, 0, args.to_vec());
            }
            Ok(Value::from(list.len()))
        }
        "splice" => {
            let len = list.to_vec().len();
            let start = position(args.first(), len, 0);
            let delete = match args.get(1) {
                None => len - start,
                Some(count) => count.to_number().max(0.0) as usize,
            };
            let inserted = args.iter().skip(2).cloned().collect();
            Ok(Value::from(list.splice(start, delete, inserted)))
        }
        "sort" => {
            match args.first() {
                Some(compare @ Value::Function(_)) => {
                    let mut failure = None;
                    list.sort_by(|a, b| {
                        if failure.is_some() {
                            return Ordering::Equal;
                        }
                        match apply(compare, &[a.clone(), b.clone()], || "comparator".into()) {
                            Ok(result) => result
                                .to_number()
                                .partial_cmp(&0.0)
                                .unwrap_or(Ordering::Equal),
                            Err(err) => {
                                failure = Some(err);
                                Ordering::Equal
                            }
                        }
                    });
                    if let Some(err) = failure {
                        return Err(err);
                    }
                }
                _ => list.sort(),
            }
            Ok(Value::List(list.clone()))
        }
        "reverse" => {
            list.reverse();
            Ok(Value::List(list.clone()))
        }

        // Queries
        "includes" => {
            let needle = arg(args, 0);
            Ok(Value::Bool(list.to_vec().iter().any(|v| v.strict_eq(&needle))))
        }
        "indexOf" => {
            let needle = arg(args, 0);
            Ok(Value::from(
                list.to_vec()
                    .iter()
                    .position(|v| v.strict_eq(&needle))
                    .map_or(-1.0, |i| i as f64),
            ))
        }
        "join" => {
            let separator = match args.first() {
                None | Some(Value::Undefined) => ",".to_string(),
                Some(sep) => sep.to_display(),
            };
            Ok(Value::from(
                list.to_vec()
                    .iter()
                    .map(Value::to_text)
                    .collect::<Vec<_>>()
                    .join(&separator),
            ))
        }
        "slice" => {
            let items = list.to_vec();
            let start = position(args.first(), items.len(), 0);
            let end = position(args.get(1), items.len(), items.len());
            Ok(Value::from(items.get(start..end.max(start)).unwrap_or(&[]).to_vec()))
        }
        "concat" => {
            let mut items = list.to_vec();
            for value in args {
                match value {
                    Value::List(other) => items.extend(other.to_vec()),
                    other => items.push(other.clone()),
                }
            }
            Ok(Value::from(items))
        }

        // Callbacks
        "map" => {
            let f = callback(args, method)?;
            let mapped = list
                .to_vec()
                .iter()
                .enumerate()
                .map(|(i, item)| call_with(&f, item, i))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::from(mapped))
        }
        "filter" => {
            let f = callback(args, method)?;
            let mut kept = Vec::new();
            for (i, item) in list.to_vec().into_iter().enumerate() {
                if call_with(&f, &item, i)?.is_truthy() {
                    kept.push(item);
                }
            }
            Ok(Value::from(kept))
        }
        "find" | "findIndex" => {
            let f = callback(args, method)?;
            for (i, item) in list.to_vec().into_iter().enumerate() {
                if call_with(&f, &item, i)?.is_truthy() {
                    return Ok(if method == "find" { item } else { Value::from(i) });
                }
            }
            Ok(if method == "find" {
                Value::Undefined
            } else {
                Value::from(-1)
            })
        }
        "some" => {
            let f = callback(args, method)?;
            for (i, item) in list.to_vec().iter().enumerate() {
                if call_with(&f, item, i)?.is_truthy() {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        "every" => {
            let f = callback(args, method)?;
            for (i, item) in list.to_vec().iter().enumerate() {
                if !call_with(&f, item, i)?.is_truthy() {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        }
        _ => Err(EvalError::UnknownMethod {
            method: method.to_string(),
            type_name: "list",
        }),
    }
}

// =============================================================================
// Strings
// =============================================================================

pub(crate) fn string_method(s: &str, method: &str, args: &[Value]) -> Result<Value, EvalError> {
    let needle = || arg(args, 0).to_display();
    Ok(match method {
        "toUpperCase" => Value::from(s.to_uppercase()),
        "toLowerCase" => Value::from(s.to_lowercase()),
        "trim" => Value::from(s.trim()),
        "includes" => Value::Bool(s.contains(needle().as_str())),
        "startsWith" => Value::Bool(s.starts_with(needle().as_str())),
        "endsWith" => Value::Bool(s.ends_with(needle().as_str())),
        "indexOf" => {
            let needle = needle();
            Value::from(
                s.find(needle.as_str())
                    .map_or(-1.0, |byte| s[..byte].chars().count() as f64),
            )
        }
        "split" => {
            let parts: Vec<Value> = match args.first() {
                None | Some(Value::Undefined) => vec![Value::from(s)],
                Some(sep) => {
                    let sep = sep.to_display();
                    if sep.is_empty() {
                        s.chars().map(|c| Value::from(c.to_string())).collect()
                    } else {
                        s.split(sep.as_str()).map(Value::from).collect()
                    }
                }
            };
            Value::from(parts)
        }
        "slice" => {
            let chars: Vec<char> = s.chars().collect();
            let start = position(args.first(), chars.len(), 0);
            let end = position(args.get(1), chars.len(), chars.len());
            Value::from(
                chars
                    .get(start..end.max(start))
                    .unwrap_or(&[])
                    .iter()
                    .collect::<String>(),
            )
        }
        _ => {
            return Err(EvalError::UnknownMethod {
                method: method.to_string(),
                type_name: "string",
            });
        }
    })
}

// =============================================================================
// Numbers
// =============================================================================

pub(crate) fn number_method(n: f64, method: &str, args: &[Value]) -> Result<Value, EvalError> {
    match method {
        "toFixed" => {
            let digits = args.first().map_or(0.0, Value::to_number);
            if !(0.0..=100.0).contains(&digits) {
                return Err(EvalError::BadArgument(format!(
                    "toFixed digits out of range: {digits}"
                )));
            }
            Ok(Value::from(format!("{:.*}", digits as usize, n)))
        }
        "toString" => Ok(Value::from(Value::Number(n).to_display())),
        _ => Err(EvalError::UnknownMethod {
            method: method.to_string(),
            type_name: "number",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(items: &[i32]) -> ReactiveList {
        ReactiveList::new(items.iter().map(|&n| Value::from(n)).collect())
    }

    #[test]
    fn test_list_mutations_return_script_values() {
        let items = list(&[1, 2]);
        assert!(list_method(&items, "push", &[Value::from(3)])
            .unwrap()
            .strict_eq(&Value::from(3)));
        assert!(list_method(&items, "pop", &[]).unwrap().strict_eq(&Value::from(3)));

        let removed = list_method(&items, "splice", &[Value::from(0), Value::from(1)]).unwrap();
        assert_eq!(removed.to_display(), "1");
        assert_eq!(Value::List(items.clone()).to_display(), "2");

        list_method(&items, "unshift", &[Value::from(0)]).unwrap();
        assert_eq!(Value::List(items).to_display(), "0,2");
    }

    #[test]
    fn test_list_queries() {
        let items = list(&[3, 1, 2]);
        assert!(list_method(&items, "includes", &[Value::from(1)]).unwrap().is_truthy());
        assert!(list_method(&items, "indexOf", &[Value::from(9)])
            .unwrap()
            .strict_eq(&Value::from(-1)));
        assert_eq!(
            list_method(&items, "join", &[Value::from(" - ")]).unwrap().to_display(),
            "3 - 1 - 2"
        );
        assert_eq!(
            list_method(&items, "slice", &[Value::from(-2)]).unwrap().to_display(),
            "1,2"
        );
        assert_eq!(
            list_method(&items, "concat", &[Value::list([4]), Value::from(5)])
                .unwrap()
                .to_display(),
            "3,1,2,4,5"
        );
    }

    #[test]
    fn test_sort_with_comparator() {
        let items = list(&[3, 1, 2]);
        let desc = Value::Function(crate::types::Function::new("desc", |args| {
            Ok(Value::from(args[1].to_number() - args[0].to_number()))
        }));
        list_method(&items, "sort", &[desc]).unwrap();
        assert_eq!(Value::List(items).to_display(), "3,2,1");
    }

    #[test]
    fn test_callback_must_be_function() {
        let items = list(&[1]);
        assert!(matches!(
            list_method(&items, "map", &[Value::from(1)]),
            Err(EvalError::BadArgument(_))
        ));
    }

    #[test]
    fn test_string_methods() {
        assert_eq!(
            string_method("  Hi  ", "trim", &[]).unwrap().to_display(),
            "Hi"
        );
        assert_eq!(
            string_method("a,b", "split", &[Value::from(",")]).unwrap().to_display(),
            "a,b"
        );
        assert!(string_method("héllo", "indexOf", &[Value::from("l")])
            .unwrap()
            .strict_eq(&Value::from(2)));
        assert_eq!(
            string_method("hello", "slice", &[Value::from(1), Value::from(3)])
                .unwrap()
                .to_display(),
            "el"
        );
        assert!(string_method("x", "nope", &[]).is_err());
    }

    #[test]
    fn test_to_fixed() {
        assert_eq!(
            number_method(3.14159, "toFixed", &[Value::from(2)]).unwrap().to_display(),
            "3.14"
        );
    }
}
