use tessel_lang::ast::ExprKind;
use tessel_lang::{Ast, Location, LocationRange};

/// Where the symbol under the cursor is defined.
#[derive(Debug, Clone, PartialEq)]
pub enum DefinitionTarget {
    /// The name of a `local` or parameter in the same document.
    Binding(LocationRange),
    /// The path written in an `import` or `importstr`, still unresolved.
    Import(String),
}

pub fn definition(ast: &Ast, location: Location) -> Option<DefinitionTarget> {
    let node = ast.node_at(location)?;
    match &node.kind {
        ExprKind::Var(name) => ast
            .resolve(name, location)
            .map(|binding| DefinitionTarget::Binding(binding.name().range.clone())),
        ExprKind::Import(path) | ExprKind::ImportStr(path) => {
            Some(DefinitionTarget::Import(path.clone()))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::test_support::sample_document;
    use tessel_lang::parse;

    #[test]
    fn variables_jump_to_their_binding() {
        let document = sample_document();
        let ast = document.ast().unwrap();
        let Some(DefinitionTarget::Binding(range)) = definition(ast, Location::new(6, 13)) else {
            panic!("expected a binding");
        };
        assert_eq!(range.begin, Location::new(4, 7));
        assert_eq!(range.end, Location::new(4, 11));
    }

    #[test]
    fn parameters_jump_to_the_parameter_list() {
        let document = sample_document();
        let ast = document.ast().unwrap();
        let Some(DefinitionTarget::Binding(range)) = definition(ast, Location::new(3, 21)) else {
            panic!("expected a binding");
        };
        assert_eq!(range.begin, Location::new(3, 12));
    }

    #[test]
    fn imports_report_the_written_path() {
        let ast = parse("main.tsl", "local lib = import \"lib/util.tsl\";\nlib").unwrap();
        assert_eq!(
            definition(&ast, Location::new(1, 22)),
            Some(DefinitionTarget::Import("lib/util.tsl".into()))
        );
        let ast = parse("main.tsl", "importstr 'motd.txt'").unwrap();
        assert_eq!(
            definition(&ast, Location::new(1, 13)),
            Some(DefinitionTarget::Import("motd.txt".into()))
        );
    }

    #[test]
    fn builtins_and_literals_have_no_definition() {
        let document = sample_document();
        let ast = document.ast().unwrap();
        // `std` in `std.max`
        assert_eq!(definition(ast, Location::new(7, 14)), None);
        // the number 8000
        assert_eq!(definition(ast, Location::new(8, 15)), None);
    }
}
