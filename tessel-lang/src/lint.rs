//! Static checks that do not need evaluation

use crate::ast::{Ast, Expr, ExprKind};
use crate::location::LocationRange;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LintWarning {
    pub code: &'static str,
    pub message: String,
    pub range: LocationRange,
}

/// Run every check over a parsed file.
pub fn lint(ast: &Ast) -> Vec<LintWarning> {
    let mut warnings = Vec::new();
    unused_locals(&ast.root, &mut warnings);
    warnings
}

/// `local` bindings that nothing refers to. Names starting with `_` are exempt.
fn unused_locals(expr: &Expr, warnings: &mut Vec<LintWarning>) {
    if let ExprKind::Local { binds, body } = &expr.kind {
        for bind in binds {
            let name = bind.name.name.as_str();
            if name.starts_with('_') {
                continue;
            }
            let used = refers_to(body, name)
                || binds
                    .iter()
                    .filter(|other| other.name.name != name)
                    .any(|other| refers_to(&other.value, name));
            if !used {
                warnings.push(LintWarning {
                    code: "unused-local",
                    message: format!("unused local `{name}`"),
                    range: bind.name.range.clone(),
                });
            }
        }
    }
    for child in expr.children() {
        unused_locals(child, warnings);
    }
}

/// Whether `expr` mentions the variable `name` without it being shadowed first.
fn refers_to(expr: &Expr, name: &str) -> bool {
    match &expr.kind {
        ExprKind::Var(var) => var == name,
        ExprKind::Local { binds, .. } if binds.iter().any(|b| b.name.name == name) => false,
        ExprKind::Function { params, .. } if params.iter().any(|p| p.name == name) => false,
        _ => expr.children().into_iter().any(|child| refers_to(child, name)),
    }
}
