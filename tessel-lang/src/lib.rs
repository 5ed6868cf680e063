//! # tessel-lang
//!
//! Lexer, parser, evaluator, formatter and linter for the Tessel configuration language.
//!
//! Tessel is a small superset of JSON: locals, functions, conditionals, `import`/`importstr`,
//! `error`, a `std` library and external variables. Programs evaluate to JSON.
//!
//! All locations handed out by this crate are 1-indexed, see [`location`].
//!
//! ```text
//! local greet(name) = "hello " + name;
//! { message: greet(std.extVar("user")) }
//! ```

pub mod ast;
pub mod error;
pub mod evaluator;
pub mod formatter;
pub mod lexer;
pub mod lint;
pub mod location;
pub mod parser;
pub mod stdlib;
mod value;

pub use ast::{Ast, Binding};
pub use error::{EvalError, FormatError, ImportError, ParseError};
pub use evaluator::Evaluator;
pub use formatter::{format, FormatOptions, StringStyle};
pub use lint::{lint, LintWarning};
pub use location::{utf16_offset, LineIndex, Location, LocationRange};
pub use parser::parse;
pub use stdlib::{StdFunction, STDLIB};
