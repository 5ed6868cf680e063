use tessel_lang::ast::{Expr, ExprKind};
use tessel_lang::stdlib;
use tessel_lang::{Ast, Binding, LineIndex, Location, LocationRange};

use crate::cache::Document;

#[derive(Debug, Clone, PartialEq)]
pub struct HoverResult {
    pub range: LocationRange,
    /// Markdown.
    pub contents: String,
}

/// Bound source text is shown up to its first line break and at most this many characters.
const MAX_PREVIEW: usize = 120;

pub fn hover(document: &Document, location: Location) -> Option<HoverResult> {
    let ast = document.ast()?;
    let node = ast.node_at(location)?;
    match &node.kind {
        ExprKind::Member { target, field } if is_std(ast, target) => {
            let func = stdlib::lookup(&field.name)?;
            Some(HoverResult {
                range: node.range.clone(),
                contents: format!("{}\n\n{}", code_block(&func.signature()), func.doc),
            })
        }
        ExprKind::Var(name) => match ast.resolve(name, location) {
            Some(binding) => Some(HoverResult {
                range: node.range.clone(),
                contents: code_block(&describe(&binding, &document.text)),
            }),
            None if name == "std" => Some(HoverResult {
                range: node.range.clone(),
                contents: format!("{}\n\nThe standard library.", code_block("std")),
            }),
            None => None,
        },
        _ => None,
    }
}

/// `std` that is not shadowed by a local binding.
fn is_std(ast: &Ast, target: &Expr) -> bool {
    matches!(&target.kind, ExprKind::Var(name) if name == "std")
        && ast.resolve("std", target.range.begin).is_none()
}

fn describe(binding: &Binding<'_>, text: &str) -> String {
    match binding {
        Binding::Param(param) => format!("(parameter) {}", param.name),
        Binding::Local(bind) => match &bind.value.kind {
            ExprKind::Function { params, .. } => {
                let params: Vec<&str> = params.iter().map(|p| p.name.as_str()).collect();
                format!("local {}({})", bind.name.name, params.join(", "))
            }
            _ => format!(
                "local {} = {}",
                bind.name.name,
                preview(source_text(text, &bind.value.range))
            ),
        },
    }
}

fn source_text<'a>(text: &'a str, range: &LocationRange) -> &'a str {
    let index = LineIndex::new(text);
    let start = index.offset(range.begin).min(text.len());
    let end = index.offset(range.end).clamp(start, text.len());
    text.get(start..end).unwrap_or("")
}

fn preview(text: &str) -> String {
    let first = text.lines().next().unwrap_or("");
    if first.len() == text.len() && first.chars().count() <= MAX_PREVIEW {
        return text.to_string();
    }
    let cut: String = first.chars().take(MAX_PREVIEW).collect();
    format!("{} ...", cut.trim_end())
}

fn code_block(code: &str) -> String {
    format!("```tessel\n{code}\n```")
}
