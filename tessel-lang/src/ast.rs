//! Abstract syntax tree
//!
//! Every node carries the [`LocationRange`] it was parsed from. Function bodies are shared
//! (`Arc`) so closures created during evaluation can hold on to them cheaply and so a parsed
//! [`Ast`] can be cached and read from several threads.

use std::path::PathBuf;
use std::sync::Arc;

use crate::location::{Location, LocationRange};

/// A parsed file.
#[derive(Debug, Clone, PartialEq)]
pub struct Ast {
    pub file: PathBuf,
    pub root: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub range: LocationRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// A name together with the range of the name itself.
#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub range: LocationRange,
}

/// `name = value` inside a `local`. `local f(x) = body` is stored with a function value.
#[derive(Debug, Clone, PartialEq)]
pub struct Bind {
    pub name: Ident,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: Ident,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Var(String),
    Array(Vec<Expr>),
    Object(Vec<Field>),
    Local {
        binds: Vec<Bind>,
        body: Box<Expr>,
    },
    Function {
        params: Vec<Ident>,
        body: Arc<Expr>,
    },
    Apply {
        target: Box<Expr>,
        args: Vec<Expr>,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Member {
        target: Box<Expr>,
        field: Ident,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    If {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Option<Box<Expr>>,
    },
    Import(String),
    ImportStr(String),
    Error(Box<Expr>),
}

impl Expr {
    pub fn new(kind: ExprKind, range: LocationRange) -> Self {
        Self { kind, range }
    }

    /// Direct children in source order.
    pub fn children(&self) -> Vec<&Expr> {
        match &self.kind {
            ExprKind::Null
            | ExprKind::Bool(_)
            | ExprKind::Number(_)
            | ExprKind::Str(_)
            | ExprKind::Var(_)
            | ExprKind::Import(_)
            | ExprKind::ImportStr(_) => Vec::new(),
            ExprKind::Array(items) => items.iter().collect(),
            ExprKind::Object(fields) => fields.iter().map(|field| &field.value).collect(),
            ExprKind::Local { binds, body } => binds
                .iter()
                .map(|bind| &bind.value)
                .chain(std::iter::once(body.as_ref()))
                .collect(),
            ExprKind::Function { body, .. } => vec![body.as_ref()],
            ExprKind::Apply { target, args } => std::iter::once(target.as_ref())
                .chain(args.iter())
                .collect(),
            ExprKind::Index { target, index } => vec![target.as_ref(), index.as_ref()],
            ExprKind::Member { target, .. } => vec![target.as_ref()],
            ExprKind::Binary { lhs, rhs, .. } => vec![lhs.as_ref(), rhs.as_ref()],
            ExprKind::Unary { operand, .. } => vec![operand.as_ref()],
            ExprKind::If {
                cond,
                then,
                otherwise,
            } => {
                let mut out = vec![cond.as_ref(), then.as_ref()];
                if let Some(otherwise) = otherwise {
                    out.push(otherwise.as_ref());
                }
                out
            }
            ExprKind::Error(inner) => vec![inner.as_ref()],
        }
    }
}

/// What a name refers to at some point of the tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding<'a> {
    Local(&'a Bind),
    Param(&'a Ident),
}

impl<'a> Binding<'a> {
    pub fn name(&self) -> &'a Ident {
        match self {
            Binding::Local(bind) => &bind.name,
            Binding::Param(param) => param,
        }
    }
}

impl Ast {
    /// The innermost expression whose range contains `location`.
    pub fn node_at(&self, location: Location) -> Option<&Expr> {
        let mut current = &self.root;
        if !current.range.contains(location) {
            return None;
        }
        'descend: loop {
            for child in current.children() {
                if child.range.contains(location) {
                    current = child;
                    continue 'descend;
                }
            }
            return Some(current);
        }
    }

    /// Bindings visible at `location`, innermost first.
    pub fn scope_at(&self, location: Location) -> Vec<Binding<'_>> {
        let mut scope = Vec::new();
        collect_scope(&self.root, location, &mut scope);
        scope.reverse();
        scope
    }

    /// Resolve the variable named `name` as seen from `location`.
    pub fn resolve(&self, name: &str, location: Location) -> Option<Binding<'_>> {
        self.scope_at(location)
            .into_iter()
            .find(|binding| binding.name().name == name)
    }
}

fn collect_scope<'a>(expr: &'a Expr, location: Location, scope: &mut Vec<Binding<'a>>) {
    if !expr.range.contains(location) {
        return;
    }
    match &expr.kind {
        ExprKind::Local { binds, body } => {
            // every bind of a group sees every other bind of that group
            scope.extend(binds.iter().map(Binding::Local));
            for bind in binds {
                collect_scope(&bind.value, location, scope);
            }
            collect_scope(body, location, scope);
        }
        ExprKind::Function { params, body } => {
            scope.extend(params.iter().map(Binding::Param));
            collect_scope(body, location, scope);
        }
        _ => {
            for child in expr.children() {
                collect_scope(child, location, scope);
            }
        }
    }
}
