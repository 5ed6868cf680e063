//! Language Server Protocol (LSP) implementation for Tessel
//!
//!     This crate provides editor support for the Tessel configuration language in any
//!     LSP-compatible editor. Parsing, evaluation, formatting and the `std` catalog come from
//!     `tessel-lang`; this crate keeps track of open documents and re-expresses results in
//!     protocol coordinates.
//!
//! Feature Set
//!
//!     1. Diagnostics (textDocument/publishDiagnostics):
//!         - Syntax errors, reported as soon as a document is opened or changed
//!         - Evaluation errors, including failing imports and `error` expressions
//!         - Optional lint warnings (unused locals)
//!
//!     2. Completion (textDocument/completion):
//!         - `std.` members from the stdlib catalog
//!         - Locals and parameters in scope, keywords
//!
//!     3. Hover (textDocument/hover):
//!         - Signature and documentation of `std` functions
//!         - What a local or parameter is bound to
//!
//!     4. Go to Definition (textDocument/definition):
//!         - Variables jump to their binding
//!         - `import` / `importstr` paths open the imported file
//!
//!     5. Document Formatting (textDocument/formatting):
//!         - Whole-document formatting, sent as line-based edits
//!
//! Architecture
//!
//!     Server Layer ([`server`]):
//!         - Implements the tower-lsp `LanguageServer` trait
//!         - Very thin: stores documents, schedules diagnostics, calls the feature layer
//!
//!     State ([`cache`], [`settings`]):
//!         - The document cache holds the latest accepted version of every open document
//!         - Settings are seeded from `tessel-config` and updated by the editor
//!
//!     Diagnostics ([`diagnostics`], [`backend`]):
//!         - One background task, fed by a debounced queue
//!         - Evaluators are built by the backend chosen at startup (static or project-aware
//!           import paths)
//!
//!     Feature Layer ([`features`]):
//!         - Stateless functions over a cached document
//!         - All logic and dense unit tests
//!
//! Usage
//!
//!     Library:
//!         ```rust
//!         use tessel_lsp::TesselLanguageServer;
//!         use tower_lsp::{LspService, Server};
//!
//!         #[tokio::main]
//!         async fn main() {
//!             let config = tessel_config::load_defaults().unwrap();
//!             let (service, socket) =
//!                 LspService::new(|client| TesselLanguageServer::new(client, &config));
//!             Server::new(tokio::io::stdin(), tokio::io::stdout(), socket)
//!                 .serve(service)
//!                 .await;
//!         }
//!         ```
//!
//!     Binary:
//!         $ tessel-lsp --jpath vendor --ext-var env=dev
//!         Starts the language server on stdin/stdout for editor integration.

pub mod backend;
pub mod cache;
pub mod diagnostics;
pub mod features;
pub mod position;
pub mod server;
pub mod settings;

pub use backend::{EvaluationBackend, ProjectBackend, StaticBackend};
pub use cache::{CacheError, Document, DocumentCache, ParseOutcome};
pub use diagnostics::{DiagnosticsScheduler, SchedulerStatus};
pub use server::{LspClient, TesselLanguageServer};
pub use settings::Settings;
