//! Completion
//!
//! After `std.` the stdlib catalog is offered. Anywhere else the names in scope at the cursor
//! are offered together with the keywords and `std` itself. Scope information needs a parsed
//! document; while the text does not parse only keywords and `std` are available.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use tessel_lang::ast::ExprKind;
use tessel_lang::{utf16_offset, Binding, StdFunction, STDLIB};
use tower_lsp::lsp_types::{
    CompletionItem, CompletionItemKind, Documentation, MarkupContent, MarkupKind, Position,
};

use crate::cache::Document;
use crate::position::to_source_location;

static STD_MEMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bstd\.([A-Za-z_][A-Za-z0-9_]*)?$").unwrap());

pub const KEYWORDS: &[&str] = &[
    "local",
    "function",
    "if",
    "then",
    "else",
    "import",
    "importstr",
    "error",
    "true",
    "false",
    "null",
];

pub fn completions(document: &Document, position: Position) -> Vec<CompletionItem> {
    let prefix = line_prefix(&document.text, position);
    if let Some(captures) = STD_MEMBER.captures(prefix) {
        let partial = captures.get(1).map_or("", |m| m.as_str());
        return STDLIB
            .iter()
            .filter(|func| func.name.starts_with(partial))
            .map(std_item)
            .collect();
    }

    let mut items = Vec::new();
    if let Some(ast) = document.ast() {
        let mut seen = HashSet::new();
        for binding in ast.scope_at(to_source_location(position)) {
            let name = &binding.name().name;
            if seen.insert(name.clone()) {
                items.push(binding_item(&binding));
            }
        }
    }
    items.push(CompletionItem {
        label: "std".to_string(),
        kind: Some(CompletionItemKind::MODULE),
        detail: Some("standard library".to_string()),
        ..CompletionItem::default()
    });
    items.extend(KEYWORDS.iter().map(|keyword| CompletionItem {
        label: keyword.to_string(),
        kind: Some(CompletionItemKind::KEYWORD),
        ..CompletionItem::default()
    }));
    items
}

/// Text of the cursor's line up to the cursor.
fn line_prefix(text: &str, position: Position) -> &str {
    let Some(line) = text.split('\n').nth(position.line as usize) else {
        return "";
    };
    &line[..utf16_offset(line, position.character as usize)]
}

fn std_item(func: &StdFunction) -> CompletionItem {
    CompletionItem {
        label: func.name.to_string(),
        kind: Some(CompletionItemKind::FUNCTION),
        detail: Some(func.signature()),
        documentation: Some(Documentation::MarkupContent(MarkupContent {
            kind: MarkupKind::Markdown,
            value: func.doc.to_string(),
        })),
        ..CompletionItem::default()
    }
}

fn binding_item(binding: &Binding<'_>) -> CompletionItem {
    let (kind, detail) = match binding {
        Binding::Local(bind) => match &bind.value.kind {
            ExprKind::Function { params, .. } => {
                let params: Vec<&str> = params.iter().map(|p| p.name.as_str()).collect();
                (
                    CompletionItemKind::FUNCTION,
                    format!("local {}({})", bind.name.name, params.join(", ")),
                )
            }
            _ => (CompletionItemKind::VARIABLE, "local".to_string()),
        },
        Binding::Param(_) => (CompletionItemKind::VARIABLE, "parameter".to_string()),
    };
    CompletionItem {
        label: binding.name().name.clone(),
        kind: Some(kind),
        detail: Some(detail),
        ..CompletionItem::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::test_support::{sample_document, sample_uri};

    fn labels(items: &[CompletionItem]) -> Vec<&str> {
        items.iter().map(|item| item.label.as_str()).collect()
    }

    #[test]
    fn std_member_offers_the_catalog() {
        let document = sample_document();
        // line 7: `  replicas: std.max(replicas, 1),`, cursor right after the dot
        let items = completions(&document, Position::new(6, 16));
        assert_eq!(items.len(), STDLIB.len());
        let max = items.iter().find(|item| item.label == "max").unwrap();
        assert_eq!(max.detail.as_deref(), Some("std.max(a, b)"));
        assert_eq!(max.kind, Some(CompletionItemKind::FUNCTION));
    }

    #[test]
    fn partial_std_member_filters_by_prefix() {
        let document = sample_document();
        let items = completions(&document, Position::new(6, 18));
        assert_eq!(labels(&items), vec!["manifestJson", "map", "max"]);
    }

    #[test]
    fn names_in_scope_come_first() {
        let document = sample_document();
        let items = completions(&document, Position::new(7, 8));
        let labels = labels(&items);
        assert_eq!(&labels[..3], &["name", "port", "replicas"]);
        assert!(labels.contains(&"std"));
        assert!(labels.contains(&"local"));
        let port = &items[1];
        assert_eq!(port.detail.as_deref(), Some("local port(base)"));
    }

    #[test]
    fn parameters_are_in_scope_inside_the_function() {
        let document = sample_document();
        let items = completions(&document, Position::new(2, 20));
        assert_eq!(labels(&items)[0], "base");
        assert_eq!(items[0].detail.as_deref(), Some("parameter"));
    }

    #[test]
    fn unparsable_documents_still_offer_keywords() {
        let document = Document::parse(sample_uri(), "{ a: ".to_string(), 1);
        let items = completions(&document, Position::new(0, 5));
        assert_eq!(items.len(), KEYWORDS.len() + 1);
    }

    #[test]
    fn cursor_past_the_end_of_a_line_is_clamped() {
        assert_eq!(line_prefix("ab\ncd", Position::new(1, 10)), "cd");
        assert_eq!(line_prefix("ab", Position::new(4, 0)), "");
        assert_eq!(line_prefix("héllo", Position::new(0, 2)), "hé");
    }

    #[test]
    fn cursor_columns_are_utf16_units() {
        let text = "{ e: '😀', f: std.ma";
        assert_eq!(line_prefix(text, Position::new(0, 9)), "{ e: '😀'");
        let document = Document::parse(sample_uri(), format!("{text}x }}"), 1);
        let items = completions(&document, Position::new(0, 20));
        assert_eq!(labels(&items), vec!["manifestJson", "map", "max"]);
    }
}
