//! Main language server implementation
//!
//! Handlers stay thin: notifications parse the new text, store it in the [`DocumentCache`] and
//! hand the URI to the [`DiagnosticsScheduler`]; requests re-fetch the document and call into
//! the feature layer.

use std::sync::Arc;

use tessel_config::TesselConfig;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tower_lsp::async_trait;
use tower_lsp::jsonrpc::{Error, Result};
use tower_lsp::lsp_types::{
    CompletionOptions, CompletionParams, CompletionResponse, Diagnostic,
    DidChangeConfigurationParams, DidChangeTextDocumentParams, DidCloseTextDocumentParams,
    DidOpenTextDocumentParams, DidSaveTextDocumentParams, DocumentFormattingParams,
    GotoDefinitionParams, GotoDefinitionResponse, Hover, HoverContents, HoverParams,
    HoverProviderCapability, InitializeParams, InitializeResult, InitializedParams, Location,
    MarkupContent, MarkupKind, OneOf, SaveOptions, ServerCapabilities, ServerInfo, TextDocumentItem,
    TextDocumentSyncCapability, TextDocumentSyncKind, TextDocumentSyncOptions,
    TextDocumentSyncSaveOptions, TextEdit, Url,
};
use tower_lsp::Client;
use tracing::{debug, info, warn};

use crate::backend::{self, EvaluationBackend};
use crate::cache::{CacheError, Document, DocumentCache};
use crate::diagnostics::DiagnosticsScheduler;
use crate::features::completion::completions;
use crate::features::definition::{definition, DefinitionTarget};
use crate::features::formatting::{format_document, to_text_edits};
use crate::features::hover::hover as compute_hover;
use crate::position::{document_start, from_source_range, to_source_location};
use crate::settings::Settings;

/// The parts of the client the server talks back to.
#[async_trait]
pub trait LspClient: Send + Sync + Clone + 'static {
    async fn publish_diagnostics(
        &self,
        uri: Url,
        diagnostics: Vec<Diagnostic>,
        version: Option<i32>,
    );
}

#[async_trait]
impl LspClient for Client {
    async fn publish_diagnostics(
        &self,
        uri: Url,
        diagnostics: Vec<Diagnostic>,
        version: Option<i32>,
    ) {
        Client::publish_diagnostics(self, uri, diagnostics, version).await;
    }
}

pub struct TesselLanguageServer<C = Client> {
    cache: Arc<DocumentCache>,
    backend: Arc<dyn EvaluationBackend>,
    settings: Arc<RwLock<Settings>>,
    scheduler: Arc<DiagnosticsScheduler<C>>,
    scheduler_task: Mutex<Option<JoinHandle<()>>>,
}

impl TesselLanguageServer<Client> {
    pub fn new(client: Client, config: &TesselConfig) -> Self {
        Self::with_backend(
            client,
            backend::from_config(&config.server),
            Settings::from(config),
        )
    }
}

impl<C: LspClient> TesselLanguageServer<C> {
    pub fn with_backend(
        client: C,
        backend: Arc<dyn EvaluationBackend>,
        settings: Settings,
    ) -> Self {
        let cache = Arc::new(DocumentCache::new());
        let settings = Arc::new(RwLock::new(settings));
        let scheduler = Arc::new(DiagnosticsScheduler::new(
            client,
            Arc::clone(&cache),
            Arc::clone(&backend),
            Arc::clone(&settings),
        ));
        Self {
            cache,
            backend,
            settings,
            scheduler,
            scheduler_task: Mutex::new(None),
        }
    }

    pub fn cache(&self) -> &Arc<DocumentCache> {
        &self.cache
    }

    pub fn scheduler(&self) -> &Arc<DiagnosticsScheduler<C>> {
        &self.scheduler
    }

    pub async fn settings(&self) -> Settings {
        self.settings.read().await.clone()
    }


    async fn document(&self, uri: &Url) -> Result<Arc<Document>> {
        self.cache.get(uri).await.map_err(|err| {
            warn!("{err}");
            Error::invalid_params(err.to_string())
        })
    }

    async fn apply_settings(&self, value: &serde_json::Value) -> bool {
        match self.settings.write().await.apply_json(value) {
            Ok(()) => true,
            Err(err) => {
                warn!("ignoring settings: {err}");
                false
            }
        }
    }
}

#[async_trait]
impl<C: LspClient> tower_lsp::LanguageServer for TesselLanguageServer<C> {
    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        if let Some(options) = &params.initialization_options {
            self.apply_settings(options).await;
        }
        {
            let mut task = self.scheduler_task.lock().await;
            if task.is_none() {
                *task = Some(self.scheduler.start());
            }
        }
        let trigger_characters = self.settings.read().await.trigger_characters.clone();

        let capabilities = ServerCapabilities {
            text_document_sync: Some(TextDocumentSyncCapability::Options(
                TextDocumentSyncOptions {
                    open_close: Some(true),
                    change: Some(TextDocumentSyncKind::FULL),
                    save: Some(TextDocumentSyncSaveOptions::SaveOptions(SaveOptions {
                        include_text: Some(false),
                    })),
                    ..TextDocumentSyncOptions::default()
                },
            )),
            completion_provider: Some(CompletionOptions {
                trigger_characters: Some(trigger_characters),
                ..CompletionOptions::default()
            }),
            hover_provider: Some(HoverProviderCapability::Simple(true)),
            definition_provider: Some(OneOf::Left(true)),
            document_formatting_provider: Some(OneOf::Left(true)),
            ..ServerCapabilities::default()
        };

        Ok(InitializeResult {
            capabilities,
            server_info: Some(ServerInfo {
                name: "tessel-lsp".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        info!("tessel-lsp initialized");
    }

    async fn shutdown(&self) -> Result<()> {
        if let Some(task) = self.scheduler_task.lock().await.take() {
            task.abort();
        }
        info!("tessel-lsp shutting down");
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let TextDocumentItem {
            uri, text, version, ..
        } = params.text_document;
        let document = Document::parse(uri.clone(), text, version);
        match self.cache.put(document).await {
            Ok(()) => self.scheduler.enqueue(uri).await,
            Err(err) => debug!("ignoring open: {err}"),
        }
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = params.text_document.uri;
        let Some(change) = params.content_changes.into_iter().last() else {
            return;
        };
        let document = Document::parse(uri.clone(), change.text, params.text_document.version);
        match self.cache.update(document).await {
            Ok(()) => self.scheduler.enqueue(uri).await,
            Err(err @ CacheError::NotFound(_)) => warn!("ignoring change: {err}"),
            Err(err) => debug!("ignoring change: {err}"),
        }
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;
        if !self.scheduler.close(&uri).await {
            warn!(%uri, "close for a document that is not open");
        }
    }

    async fn did_save(&self, _: DidSaveTextDocumentParams) {
        // other open documents may import the saved file
        let uris = self.cache.keys().await;
        self.scheduler.enqueue_all(uris).await;
    }

    async fn did_change_configuration(&self, params: DidChangeConfigurationParams) {
        if self.apply_settings(&params.settings).await {
            let uris = self.cache.keys().await;
            self.scheduler.enqueue_all(uris).await;
        }
    }

    async fn completion(&self, params: CompletionParams) -> Result<Option<CompletionResponse>> {
        let position = params.text_document_position;
        let document = self.document(&position.text_document.uri).await?;
        Ok(Some(CompletionResponse::Array(completions(
            &document,
            position.position,
        ))))
    }

    async fn hover(&self, params: HoverParams) -> Result<Option<Hover>> {
        let position = params.text_document_position_params;
        let document = self.document(&position.text_document.uri).await?;
        let location = to_source_location(position.position);
        Ok(compute_hover(&document, location).map(|result| Hover {
            contents: HoverContents::Markup(MarkupContent {
                kind: MarkupKind::Markdown,
                value: result.contents,
            }),
            range: Some(from_source_range(&result.range)),
        }))
    }

    async fn goto_definition(
        &self,
        params: GotoDefinitionParams,
    ) -> Result<Option<GotoDefinitionResponse>> {
        let position = params.text_document_position_params;
        let uri = position.text_document.uri;
        let document = self.document(&uri).await?;
        let Some(ast) = document.ast() else {
            return Ok(None);
        };
        let target = match definition(ast, to_source_location(position.position)) {
            Some(DefinitionTarget::Binding(range)) => Location {
                uri,
                range: from_source_range(&range),
            },
            Some(DefinitionTarget::Import(import)) => {
                let Some(path) = self.backend.resolve_import(&document.path(), &import) else {
                    debug!(%uri, %import, "import does not resolve");
                    return Ok(None);
                };
                let Ok(target) = Url::from_file_path(&path) else {
                    return Ok(None);
                };
                Location {
                    uri: target,
                    range: document_start(),
                }
            }
            None => return Ok(None),
        };
        Ok(Some(GotoDefinitionResponse::Scalar(target)))
    }

    async fn formatting(&self, params: DocumentFormattingParams) -> Result<Option<Vec<TextEdit>>> {
        let uri = params.text_document.uri;
        let document = self.document(&uri).await?;
        let options = self.settings.read().await.formatting.clone();
        match format_document(&document.text, &options) {
            Ok(spans) => Ok(Some(to_text_edits(&document.text, &spans))),
            Err(err) => {
                warn!(%uri, "{err}");
                Ok(None)
            }
        }
    }
}
