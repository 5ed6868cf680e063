//! The `std` library
//!
//! [`STDLIB`] is the catalog used by tooling (completion, hover) and by the evaluator, which
//! binds every entry as a field of the `std` object.

use std::rc::Rc;

use crate::error::EvalError;
use crate::evaluator::Run;
use crate::value::Value;

/// A documented builtin.
#[derive(Debug, PartialEq, Eq)]
pub struct StdFunction {
    pub name: &'static str,
    pub params: &'static [&'static str],
    pub doc: &'static str,
}

impl StdFunction {
    /// `std.name(a, b)`
    pub fn signature(&self) -> String {
        format!("std.{}({})", self.name, self.params.join(", "))
    }
}

macro_rules! builtins {
    ($($name:literal ($($param:literal),*) => $doc:literal;)*) => {
        pub static STDLIB: &[StdFunction] = &[
            $(StdFunction { name: $name, params: &[$($param),*], doc: $doc },)*
        ];
    };
}

builtins! {
    "abs" ("n") => "Absolute value of the number `n`.";
    "endsWith" ("a", "b") => "Whether the string `a` ends with the string `b`.";
    "extVar" ("x") => "The external variable named `x`, as a string. Fails if it was not supplied.";
    "filter" ("func", "arr") => "Elements of `arr` for which `func(element)` is true, in order.";
    "foldl" ("func", "arr", "init") => "Left fold: `func(func(func(init, arr[0]), arr[1]), ...)`.";
    "join" ("sep", "arr") => "Concatenate the strings of `arr`, putting `sep` between them.";
    "length" ("x") => "Number of elements of an array, characters of a string, fields of an object or parameters of a function.";
    "manifestJson" ("value") => "Render `value` as pretty-printed JSON text.";
    "map" ("func", "arr") => "Apply `func` to every element of `arr`.";
    "max" ("a", "b") => "The larger of two numbers.";
    "min" ("a", "b") => "The smaller of two numbers.";
    "objectFields" ("o") => "Field names of the object `o`, sorted.";
    "objectHas" ("o", "f") => "Whether the object `o` has a field named `f`.";
    "range" ("from", "to") => "The integers from `from` to `to`, both inclusive.";
    "split" ("str", "c") => "Split `str` on every occurrence of the separator `c`.";
    "startsWith" ("a", "b") => "Whether the string `a` starts with the string `b`.";
    "toString" ("a") => "Strings are returned unchanged, anything else is rendered as JSON.";
    "type" ("x") => "Name of the type of `x`: null, boolean, number, string, array, object or function.";
}

/// Longest array `std.range` builds.
pub const MAX_RANGE: u64 = 10_000_000;

/// Look up a builtin by name.
pub fn lookup(name: &str) -> Option<&'static StdFunction> {
    STDLIB.iter().find(|func| func.name == name)
}

fn expect_number(func: &StdFunction, value: &Value) -> Result<f64, EvalError> {
    match value {
        Value::Number(n) => Ok(*n),
        other => Err(type_mismatch(func, "number", other)),
    }
}

fn expect_str(func: &StdFunction, value: &Value) -> Result<Rc<str>, EvalError> {
    match value {
        Value::Str(s) => Ok(Rc::clone(s)),
        other => Err(type_mismatch(func, "string", other)),
    }
}

fn expect_array(func: &StdFunction, value: &Value) -> Result<Rc<Vec<Value>>, EvalError> {
    match value {
        Value::Array(items) => Ok(Rc::clone(items)),
        other => Err(type_mismatch(func, "array", other)),
    }
}

fn type_mismatch(func: &StdFunction, expected: &str, got: &Value) -> EvalError {
    EvalError::new(format!(
        "std.{}: expected {expected}, got {}",
        func.name,
        got.type_name()
    ))
}

fn array(items: Vec<Value>) -> Value {
    Value::Array(Rc::new(items))
}

/// Call `func` with already evaluated arguments. The caller checks the arity.
pub(crate) fn call(
    run: &mut Run<'_>,
    func: &'static StdFunction,
    args: Vec<Value>,
) -> Result<Value, EvalError> {
    let value = match (func.name, args.as_slice()) {
        ("abs", [n]) => Value::Number(expect_number(func, n)?.abs()),
        ("max", [a, b]) => Value::Number(expect_number(func, a)?.max(expect_number(func, b)?)),
        ("min", [a, b]) => Value::Number(expect_number(func, a)?.min(expect_number(func, b)?)),
        ("type", [x]) => Value::str(x.type_name()),
        ("toString", [x]) => Value::str(x.to_display_string()?),
        ("manifestJson", [x]) => Value::str(x.manifest()?),
        ("length", [x]) => {
            let len = match x {
                Value::Array(items) => items.len(),
                Value::Str(s) => s.chars().count(),
                Value::Object(fields) => fields.len(),
                Value::Function(closure) => closure.params.len(),
                Value::Builtin(builtin) => builtin.params.len(),
                other => return Err(type_mismatch(func, "array, string or object", other)),
            };
            Value::Number(len as f64)
        }
        ("extVar", [x]) => {
            let name = expect_str(func, x)?;
            match run.ext_var(&name) {
                Some(value) => Value::str(value),
                None => {
                    return Err(EvalError::new(format!(
                        "undefined external variable: {name}"
                    )))
                }
            }
        }
        ("startsWith", [a, b]) => {
            Value::Bool(expect_str(func, a)?.starts_with(&*expect_str(func, b)?))
        }
        ("endsWith", [a, b]) => Value::Bool(expect_str(func, a)?.ends_with(&*expect_str(func, b)?)),
        ("split", [s, c]) => {
            let sep = expect_str(func, c)?;
            if sep.is_empty() {
                return Err(EvalError::new("std.split: separator must not be empty"));
            }
            array(
                expect_str(func, s)?
                    .split(&*sep)
                    .map(Value::str)
                    .collect(),
            )
        }
        ("join", [sep, arr]) => {
            let sep = expect_str(func, sep)?;
            let parts = expect_array(func, arr)?
                .iter()
                .map(|item| expect_str(func, item).map(|s| s.to_string()))
                .collect::<Result<Vec<_>, _>>()?;
            Value::str(parts.join(&*sep))
        }
        ("range", [from, to]) => {
            let from = expect_number(func, from)? as i64;
            let to = expect_number(func, to)? as i64;
            let len = match to.checked_sub(from) {
                Some(diff) if diff < 0 => 0,
                Some(diff) => diff as u64 + 1,
                None => u64::MAX,
            };
            if len > MAX_RANGE {
                return Err(EvalError::new(format!(
                    "std.range: {from} to {to} is longer than {MAX_RANGE} elements"
                )));
            }
            array((from..=to).map(|n| Value::Number(n as f64)).collect())
        }
        ("objectFields", [o]) => match o {
            Value::Object(fields) => array(fields.keys().map(|k| Value::str(k.as_str())).collect()),
            other => return Err(type_mismatch(func, "object", other)),
        },
        ("objectHas", [o, f]) => match o {
            Value::Object(fields) => Value::Bool(fields.contains_key(&*expect_str(func, f)?)),
            other => return Err(type_mismatch(func, "object", other)),
        },
        ("map", [f, arr]) => {
            let items = expect_array(func, arr)?;
            let mut out = Vec::with_capacity(items.len());
            for item in items.iter() {
                out.push(run.call_value(f, vec![item.clone()])?);
            }
            array(out)
        }
        ("filter", [f, arr]) => {
            let items = expect_array(func, arr)?;
            let mut out = Vec::new();
            for item in items.iter() {
                match run.call_value(f, vec![item.clone()])? {
                    Value::Bool(true) => out.push(item.clone()),
                    Value::Bool(false) => {}
                    other => return Err(type_mismatch(func, "boolean from filter function", &other)),
                }
            }
            array(out)
        }
        ("foldl", [f, arr, init]) => {
            let items = expect_array(func, arr)?;
            let mut acc = init.clone();
            for item in items.iter() {
                acc = run.call_value(f, vec![acc, item.clone()])?;
            }
            acc
        }
        (name, _) => {
            return Err(EvalError::new(format!(
                "std.{name} expects {} argument(s), got {}",
                func.params.len(),
                args.len()
            )))
        }
    };
    Ok(value)
}
