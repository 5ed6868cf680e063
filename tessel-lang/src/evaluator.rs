//! Evaluation of Tessel programs to JSON
//!
//! [`Evaluator`] holds the configuration of a run (import search paths, external variables,
//! maximum call depth) and is cheap to clone and `Send`. Each call to
//! [`Evaluator::evaluate_snippet`] creates a private [`Run`] that owns the reference counted
//! runtime state; nothing of it escapes, only the manifested JSON text does.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::rc::{Rc, Weak};

use crate::ast::{BinaryOp, Bind, Expr, ExprKind, Field, UnaryOp};
use crate::error::{EvalError, ImportError};
use crate::location::LocationRange;
use crate::parser::parse;
use crate::stdlib::{self, StdFunction, STDLIB};
use crate::value::{Closure, Scope, Value};

pub const DEFAULT_MAX_STACK: usize = 100;

/// Expressions being evaluated at once, across all calls of a run.
const MAX_NESTING: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluator {
    /// Lowest priority first.
    import_paths: Vec<PathBuf>,
    ext_vars: BTreeMap<String, String>,
    max_stack: usize,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator {
    pub fn new() -> Self {
        Self {
            import_paths: Vec::new(),
            ext_vars: BTreeMap::new(),
            max_stack: DEFAULT_MAX_STACK,
        }
    }

    pub fn with_import_paths(mut self, paths: impl IntoIterator<Item = PathBuf>) -> Self {
        self.import_paths = paths.into_iter().collect();
        self
    }

    pub fn with_max_stack(mut self, max_stack: usize) -> Self {
        self.max_stack = max_stack.max(1);
        self
    }

    pub fn import_paths(&self) -> &[PathBuf] {
        &self.import_paths
    }

    pub fn set_ext_var(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.ext_vars.insert(name.into(), value.into());
    }

    pub fn ext_var(&self, name: &str) -> Option<&str> {
        self.ext_vars.get(name).map(String::as_str)
    }

    pub fn max_stack(&self) -> usize {
        self.max_stack
    }

    /// Find the file an `import` written in `from` refers to: the importing file's directory
    /// first, then the import paths from highest to lowest priority.
    pub fn resolve_import(&self, from: &Path, import: &str) -> Result<PathBuf, ImportError> {
        let requested = Path::new(import);
        if requested.is_absolute() {
            return if requested.is_file() {
                Ok(requested.to_path_buf())
            } else {
                Err(ImportError::NotFound {
                    import: import.to_string(),
                })
            };
        }
        let local = from.parent().map(|dir| dir.join(requested));
        local
            .into_iter()
            .chain(self.import_paths.iter().rev().map(|dir| dir.join(requested)))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| ImportError::NotFound {
                import: import.to_string(),
            })
    }

    /// Evaluate `source` as if it were the content of `path` and return the resulting JSON.
    pub fn evaluate_snippet(
        &self,
        path: impl AsRef<Path>,
        source: &str,
    ) -> Result<String, EvalError> {
        let path = path.as_ref();
        let ast = parse(path, source)?;
        let mut run = Run::new(self);
        run.importing.push(path.to_path_buf());
        let root = run.root_scope();
        let value = run.eval(&ast.root, &root)?;
        value.manifest().map_err(|err| err.or_at(&ast.root.range))
    }

    pub fn evaluate_file(&self, path: impl AsRef<Path>) -> Result<String, EvalError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|err| {
            EvalError::new(
                ImportError::Read {
                    path: path.to_path_buf(),
                    source: err,
                }
                .to_string(),
            )
        })?;
        self.evaluate_snippet(path, &source)
    }
}

/// State of a single evaluation.
pub(crate) struct Run<'e> {
    evaluator: &'e Evaluator,
    depth: usize,
    nesting: usize,
    /// Files currently being imported, outermost first.
    importing: Vec<PathBuf>,
    imports: HashMap<PathBuf, Value>,
    scopes: Vec<Weak<Scope>>,
}

impl Drop for Run<'_> {
    fn drop(&mut self) {
        self.imports.clear();
        for scope in self.scopes.drain(..) {
            if let Some(scope) = scope.upgrade() {
                scope.clear();
            }
        }
    }
}

impl<'e> Run<'e> {
    fn new(evaluator: &'e Evaluator) -> Self {
        Self {
            evaluator,
            depth: 0,
            nesting: 0,
            importing: Vec::new(),
            imports: HashMap::new(),
            scopes: Vec::new(),
        }
    }

    pub fn ext_var(&self, name: &str) -> Option<String> {
        self.evaluator.ext_var(name).map(str::to_string)
    }

    fn register(&mut self, scope: Scope) -> Rc<Scope> {
        let scope = Rc::new(scope);
        self.scopes.push(Rc::downgrade(&scope));
        scope
    }

    /// A fresh top level scope holding only `std`. Every file gets its own.
    fn root_scope(&mut self) -> Rc<Scope> {
        let std: BTreeMap<String, Value> = STDLIB
            .iter()
            .map(|func| (func.name.to_string(), Value::Builtin(func)))
            .collect();
        let scope = Scope::default();
        scope.define("std", Value::Object(Rc::new(std)));
        self.register(scope)
    }

    pub fn eval(&mut self, expr: &Expr, scope: &Rc<Scope>) -> Result<Value, EvalError> {
        if self.nesting >= MAX_NESTING {
            return Err(EvalError::at("max stack frames exceeded", &expr.range));
        }
        self.nesting += 1;
        let value = self.eval_expr(expr, scope);
        self.nesting -= 1;
        value
    }

    fn eval_expr(&mut self, expr: &Expr, scope: &Rc<Scope>) -> Result<Value, EvalError> {
        match &expr.kind {
            ExprKind::Null => Ok(Value::Null),
            ExprKind::Bool(value) => Ok(Value::Bool(*value)),
            ExprKind::Number(value) => Ok(Value::Number(*value)),
            ExprKind::Str(value) => Ok(Value::str(value.as_str())),
            ExprKind::Var(name) => scope
                .lookup(name)
                .ok_or_else(|| EvalError::at(format!("unknown variable: {name}"), &expr.range)),
            ExprKind::Array(items) => {
                let items = items
                    .iter()
                    .map(|item| self.eval(item, scope))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Array(Rc::new(items)))
            }
            ExprKind::Object(fields) => self.eval_object(fields, scope),
            ExprKind::Local { binds, body } => {
                let inner = self.bind_locals(binds, scope)?;
                self.eval(body, &inner)
            }
            ExprKind::Function { params, body } => Ok(Value::Function(Rc::new(Closure {
                params: params.iter().map(|param| param.name.clone()).collect(),
                body: body.clone(),
                env: Rc::clone(scope),
            }))),
            ExprKind::Apply { target, args } => {
                let func = self.eval(target, scope)?;
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg, scope))
                    .collect::<Result<Vec<_>, _>>()?;
                self.call_value(&func, args)
                    .map_err(|err| err.or_at(&expr.range))
            }
            ExprKind::Index { target, index } => {
                let target = self.eval(target, scope)?;
                let index = self.eval(index, scope)?;
                index_value(&target, &index).map_err(|err| err.or_at(&expr.range))
            }
            ExprKind::Member { target, field } => {
                let target = self.eval(target, scope)?;
                index_value(&target, &Value::str(field.name.as_str()))
                    .map_err(|err| err.or_at(&field.range))
            }
            ExprKind::Binary { op, lhs, rhs } => self.eval_binary(*op, lhs, rhs, scope),
            ExprKind::Unary { op, operand } => {
                let value = self.eval(operand, scope)?;
                match (op, value) {
                    (UnaryOp::Neg, Value::Number(n)) => Ok(Value::Number(-n)),
                    (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                    (op, value) => Err(EvalError::at(
                        format!(
                            "unary operator {} does not operate on type {}",
                            if *op == UnaryOp::Neg { "-" } else { "!" },
                            value.type_name()
                        ),
                        &expr.range,
                    )),
                }
            }
            ExprKind::If {
                cond,
                then,
                otherwise,
            } => match self.eval(cond, scope)? {
                Value::Bool(true) => self.eval(then, scope),
                Value::Bool(false) => match otherwise {
                    Some(otherwise) => self.eval(otherwise, scope),
                    None => Ok(Value::Null),
                },
                other => Err(EvalError::at(
                    format!("condition must be boolean, got {}", other.type_name()),
                    &cond.range,
                )),
            },
            ExprKind::Import(import) => self.import(import, &expr.range),
            ExprKind::ImportStr(import) => {
                let path = self.resolve(import, &expr.range)?;
                std::fs::read_to_string(&path)
                    .map(Value::str)
                    .map_err(|err| import_read_error(path, err, &expr.range))
            }
            ExprKind::Error(inner) => {
                let message = self.eval(inner, scope)?.to_display_string()?;
                Err(EvalError::at(message, &expr.range))
            }
        }
    }

    fn eval_object(&mut self, fields: &[Field], scope: &Rc<Scope>) -> Result<Value, EvalError> {
        let mut out = BTreeMap::new();
        for field in fields {
            if out.contains_key(&field.name.name) {
                return Err(EvalError::at(
                    format!("duplicate field name: {:?}", field.name.name),
                    &field.name.range,
                ));
            }
            let value = self.eval(&field.value, scope)?;
            out.insert(field.name.name.clone(), value);
        }
        Ok(Value::Object(Rc::new(out)))
    }

    /// Functions are bound first so every bind of the group can call them, including
    /// themselves; the other binds are evaluated in order.
    fn bind_locals(&mut self, binds: &[Bind], parent: &Rc<Scope>) -> Result<Rc<Scope>, EvalError> {
        let scope = self.register(Scope::child(parent));
        let (functions, values): (Vec<&Bind>, Vec<&Bind>) = binds
            .iter()
            .partition(|bind| matches!(bind.value.kind, ExprKind::Function { .. }));
        for bind in functions.into_iter().chain(values) {
            let value = self.eval(&bind.value, &scope)?;
            scope.define(bind.name.name.clone(), value);
        }
        Ok(scope)
    }

    fn eval_binary(
        &mut self,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
        scope: &Rc<Scope>,
    ) -> Result<Value, EvalError> {
        let range = lhs.range.to(&rhs.range);
        let left = self.eval(lhs, scope)?;
        if matches!(op, BinaryOp::And | BinaryOp::Or) {
            let Value::Bool(left) = left else {
                return Err(EvalError::at(
                    format!("operator {} expects booleans, got {}", op.symbol(), left.type_name()),
                    &lhs.range,
                ));
            };
            if left == (op == BinaryOp::Or) {
                return Ok(Value::Bool(left));
            }
            return match self.eval(rhs, scope)? {
                Value::Bool(right) => Ok(Value::Bool(right)),
                other => Err(EvalError::at(
                    format!("operator {} expects booleans, got {}", op.symbol(), other.type_name()),
                    &rhs.range,
                )),
            };
        }
        let right = self.eval(rhs, scope)?;
        binary(op, &left, &right).map_err(|err| err.or_at(&range))
    }

    /// Apply a function value to evaluated arguments.
    pub fn call_value(&mut self, func: &Value, args: Vec<Value>) -> Result<Value, EvalError> {
        match func {
            Value::Function(closure) => {
                if closure.params.len() != args.len() {
                    return Err(EvalError::new(format!(
                        "function expects {} argument(s), got {}",
                        closure.params.len(),
                        args.len()
                    )));
                }
                let scope = self.register(Scope::child(&closure.env));
                for (param, arg) in closure.params.iter().zip(args) {
                    scope.define(param.clone(), arg);
                }
                self.enter()?;
                let result = self.eval(&closure.body, &scope);
                self.depth -= 1;
                result
            }
            Value::Builtin(builtin) => self.call_builtin(builtin, args),
            other => Err(EvalError::new(format!(
                "only functions can be called, got {}",
                other.type_name()
            ))),
        }
    }

    fn call_builtin(
        &mut self,
        builtin: &'static StdFunction,
        args: Vec<Value>,
    ) -> Result<Value, EvalError> {
        if builtin.params.len() != args.len() {
            return Err(EvalError::new(format!(
                "std.{} expects {} argument(s), got {}",
                builtin.name,
                builtin.params.len(),
                args.len()
            )));
        }
        self.enter()?;
        let result = stdlib::call(self, builtin, args);
        self.depth -= 1;
        result
    }

    fn enter(&mut self) -> Result<(), EvalError> {
        if self.depth >= self.evaluator.max_stack {
            return Err(EvalError::new("max stack frames exceeded"));
        }
        self.depth += 1;
        Ok(())
    }

    fn resolve(&self, import: &str, range: &LocationRange) -> Result<PathBuf, EvalError> {
        let from = range
            .file
            .clone()
            .or_else(|| self.importing.last().cloned())
            .unwrap_or_default();
        self.evaluator
            .resolve_import(&from, import)
            .map_err(|err| EvalError::at(err.to_string(), range))
    }

    fn import(&mut self, import: &str, range: &LocationRange) -> Result<Value, EvalError> {
        let path = self.resolve(import, range)?;
        if let Some(value) = self.imports.get(&path) {
            return Ok(value.clone());
        }
        if self.importing.contains(&path) {
            return Err(EvalError::at(
                format!("import cycle detected: {}", path.display()),
                range,
            ));
        }
        let source = std::fs::read_to_string(&path)
            .map_err(|err| import_read_error(path.clone(), err, range))?;
        let ast = parse(&path, &source)?;

        self.enter().map_err(|err| err.or_at(range))?;
        self.importing.push(path.clone());
        let root = self.root_scope();
        let result = self.eval(&ast.root, &root);
        self.importing.pop();
        self.depth -= 1;

        let value = result?;
        self.imports.insert(path, value.clone());
        Ok(value)
    }
}

fn import_read_error(path: PathBuf, source: std::io::Error, range: &LocationRange) -> EvalError {
    EvalError::at(ImportError::Read { path, source }.to_string(), range)
}

fn index_value(target: &Value, index: &Value) -> Result<Value, EvalError> {
    match (target, index) {
        (Value::Object(fields), Value::Str(name)) => fields
            .get(&**name)
            .cloned()
            .ok_or_else(|| EvalError::new(format!("field does not exist: {name}"))),
        (Value::Array(items), Value::Number(n)) => position(*n, items.len())
            .map(|i| items[i].clone())
            .ok_or_else(|| {
                EvalError::new(format!(
                    "index {n} out of bounds, array has {} element(s)",
                    items.len()
                ))
            }),
        (Value::Str(s), Value::Number(n)) => position(*n, s.chars().count())
            .and_then(|i| s.chars().nth(i))
            .map(|ch| Value::str(ch.to_string()))
            .ok_or_else(|| EvalError::new(format!("index {n} out of bounds"))),
        (target, index) => Err(EvalError::new(format!(
            "cannot index {} with {}",
            target.type_name(),
            index.type_name()
        ))),
    }
}

fn position(n: f64, len: usize) -> Option<usize> {
    (n.fract() == 0.0 && n >= 0.0 && (n as usize) < len).then_some(n as usize)
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
    use Value::{Array, Number, Object, Str};
    let value = match (op, left, right) {
        (BinaryOp::Eq, a, b) => Value::Bool(a.equals(b)?),
        (BinaryOp::NotEq, a, b) => Value::Bool(!a.equals(b)?),
        (BinaryOp::Add, Number(a), Number(b)) => Number(a + b),
        (BinaryOp::Add, Str(a), b) => Value::str(format!("{a}{}", b.to_display_string()?)),
        (BinaryOp::Add, a, Str(b)) => Value::str(format!("{}{b}", a.to_display_string()?)),
        (BinaryOp::Add, Array(a), Array(b)) => {
            Array(std::rc::Rc::new(a.iter().chain(b.iter()).cloned().collect()))
        }
        (BinaryOp::Add, Object(a), Object(b)) => {
            let mut merged = (**a).clone();
            merged.extend(b.iter().map(|(k, v)| (k.clone(), v.clone())));
            Object(std::rc::Rc::new(merged))
        }
        (BinaryOp::Sub, Number(a), Number(b)) => Number(a - b),
        (BinaryOp::Mul, Number(a), Number(b)) => Number(a * b),
        (BinaryOp::Div | BinaryOp::Mod, Number(_), Number(b)) if *b == 0.0 => {
            return Err(EvalError::new("division by zero"));
        }
        (BinaryOp::Div, Number(a), Number(b)) => Number(a / b),
        (BinaryOp::Mod, Number(a), Number(b)) => Number(a % b),
        (BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq, a, b) => {
            let ordering = match (a, b) {
                (Number(a), Number(b)) => a.partial_cmp(b),
                (Str(a), Str(b)) => Some(a.cmp(b)),
                _ => None,
            };
            let Some(ordering) = ordering else {
                return Err(mismatch(op, left, right));
            };
            Value::Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::LtEq => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            })
        }
        _ => return Err(mismatch(op, left, right)),
    };
    Ok(value)
}

fn mismatch(op: BinaryOp, left: &Value, right: &Value) -> EvalError {
    EvalError::new(format!(
        "binary operator {} does not operate on {} and {}",
        op.symbol(),
        left.type_name(),
        right.type_name()
    ))
}
