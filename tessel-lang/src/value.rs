//! Runtime values
//!
//! Values are eager and reference counted. Closures keep their defining [`Scope`] alive and a
//! scope holding a closure keeps that closure alive, so every scope created by a run is
//! registered and cleared when the run ends (see `evaluator::Run`).

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use crate::ast::Expr;
use crate::error::EvalError;
use crate::stdlib::StdFunction;

#[derive(Clone)]
pub(crate) enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    Array(Rc<Vec<Value>>),
    Object(Rc<BTreeMap<String, Value>>),
    Function(Rc<Closure>),
    Builtin(&'static StdFunction),
}

pub(crate) struct Closure {
    pub params: Vec<String>,
    pub body: Arc<Expr>,
    pub env: Rc<Scope>,
}

/// One level of lexical bindings.
#[derive(Default)]
pub(crate) struct Scope {
    vars: RefCell<HashMap<String, Value>>,
    parent: Option<Rc<Scope>>,
}

impl Scope {
    pub fn child(parent: &Rc<Scope>) -> Self {
        Self {
            vars: RefCell::default(),
            parent: Some(Rc::clone(parent)),
        }
    }

    pub fn define(&self, name: impl Into<String>, value: Value) {
        self.vars.borrow_mut().insert(name.into(), value);
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        let mut scope = self;
        loop {
            if let Some(value) = scope.vars.borrow().get(name) {
                return Some(value.clone());
            }
            scope = scope.parent.as_deref()?;
        }
    }

    /// Drop every binding, releasing closures that point back at this scope.
    pub fn clear(&self) {
        self.vars.borrow_mut().clear();
    }
}

impl Value {
    pub fn str(value: impl Into<Rc<str>>) -> Self {
        Value::Str(value.into())
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Function(_) | Value::Builtin(_) => "function",
        }
    }

    /// Structural equality. Functions cannot be compared.
    pub fn equals(&self, other: &Value) -> Result<bool, EvalError> {
        let equal = match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => {
                if a.len() != b.len() {
                    return Ok(false);
                }
                for (x, y) in a.iter().zip(b.iter()) {
                    if !x.equals(y)? {
                        return Ok(false);
                    }
                }
                true
            }
            (Value::Object(a), Value::Object(b)) => {
                if a.len() != b.len() {
                    return Ok(false);
                }
                for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
                    if ka != kb || !va.equals(vb)? {
                        return Ok(false);
                    }
                }
                true
            }
            (Value::Function(_) | Value::Builtin(_), _)
            | (_, Value::Function(_) | Value::Builtin(_)) => {
                return Err(EvalError::new("cannot test equality of functions"));
            }
            _ => false,
        };
        Ok(equal)
    }

    pub fn to_json(&self) -> Result<serde_json::Value, EvalError> {
        let json = match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(value) => serde_json::Value::Bool(*value),
            Value::Number(value) => number_to_json(*value)?,
            Value::Str(value) => serde_json::Value::String(value.to_string()),
            Value::Array(items) => serde_json::Value::Array(
                items
                    .iter()
                    .map(Value::to_json)
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(fields) => {
                let mut map = serde_json::Map::new();
                for (name, value) in fields.iter() {
                    map.insert(name.clone(), value.to_json()?);
                }
                serde_json::Value::Object(map)
            }
            Value::Function(_) | Value::Builtin(_) => {
                return Err(EvalError::new("couldn't manifest function as JSON"));
            }
        };
        Ok(json)
    }

    /// Pretty JSON, as printed for a whole program.
    pub fn manifest(&self) -> Result<String, EvalError> {
        let json = self.to_json()?;
        serde_json::to_string_pretty(&json)
            .map_err(|err| EvalError::new(format!("couldn't manifest value: {err}")))
    }

    /// `std.toString` semantics: strings as-is, everything else as compact JSON.
    pub fn to_display_string(&self) -> Result<String, EvalError> {
        match self {
            Value::Str(value) => Ok(value.to_string()),
            other => Ok(other.to_json()?.to_string()),
        }
    }
}

fn number_to_json(value: f64) -> Result<serde_json::Value, EvalError> {
    const MAX_SAFE: f64 = 9_007_199_254_740_992.0;
    if value.fract() == 0.0 && value.abs() < MAX_SAFE {
        return Ok(serde_json::Value::from(value as i64));
    }
    serde_json::Number::from_f64(value)
        .map(serde_json::Value::Number)
        .ok_or_else(|| EvalError::new(format!("couldn't manifest number {value}")))
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Function(closure) => write!(f, "function({})", closure.params.join(", ")),
            Value::Builtin(func) => write!(f, "std.{}", func.name),
            other => match other.to_json() {
                Ok(json) => write!(f, "{json}"),
                Err(_) => write!(f, "<{}>", other.type_name()),
            },
        }
    }
}
