//! Diagnostics pipeline, from notifications to published diagnostics

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tessel_lang::Evaluator;
use tessel_lsp::backend::{BackendError, EvaluationBackend, ExtVars, ProjectBackend, StaticBackend};
use tessel_lsp::{LspClient, SchedulerStatus, Settings, TesselLanguageServer};
use tower_lsp::async_trait;
use tower_lsp::lsp_types::{
    Diagnostic, DiagnosticSeverity, DidChangeConfigurationParams, DidChangeTextDocumentParams,
    DidCloseTextDocumentParams, DidOpenTextDocumentParams, InitializeParams, NumberOrString,
    Position, TextDocumentContentChangeEvent, TextDocumentIdentifier, TextDocumentItem, Url,
    VersionedTextDocumentIdentifier,
};
use tower_lsp::LanguageServer;

#[derive(Debug, Clone, PartialEq)]
struct Published {
    uri: Url,
    diagnostics: Vec<Diagnostic>,
    version: Option<i32>,
}

impl Published {
    fn messages(&self) -> Vec<&str> {
        self.diagnostics.iter().map(|d| d.message.as_str()).collect()
    }
}

#[derive(Clone, Default)]
struct RecordingClient {
    published: Arc<Mutex<Vec<Published>>>,
    /// Delay before recording a non-empty set.
    slow_errors: Option<Duration>,
    delivering: Arc<AtomicBool>,
}

impl RecordingClient {
    fn slow_errors(delay: Duration) -> Self {
        Self {
            slow_errors: Some(delay),
            ..Self::default()
        }
    }

    fn published(&self) -> Vec<Published> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl LspClient for RecordingClient {
    async fn publish_diagnostics(
        &self,
        uri: Url,
        diagnostics: Vec<Diagnostic>,
        version: Option<i32>,
    ) {
        if let (Some(delay), false) = (self.slow_errors, diagnostics.is_empty()) {
            self.delivering.store(true, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
        }
        self.published.lock().unwrap().push(Published {
            uri,
            diagnostics,
            version,
        });
    }
}

/// Counts evaluations and can hold the first one back for a while.
struct CountingBackend {
    inner: StaticBackend,
    evaluations: AtomicUsize,
    first_delay: Option<Duration>,
    started: AtomicBool,
}

impl CountingBackend {
    fn new() -> Self {
        Self {
            inner: StaticBackend::new(Vec::new()),
            evaluations: AtomicUsize::new(0),
            first_delay: None,
            started: AtomicBool::new(false),
        }
    }

    fn slow_first(delay: Duration) -> Self {
        Self {
            first_delay: Some(delay),
            ..Self::new()
        }
    }

    fn evaluations(&self) -> usize {
        self.evaluations.load(Ordering::SeqCst)
    }
}

impl EvaluationBackend for CountingBackend {
    fn import_paths(&self, path: &Path) -> Vec<PathBuf> {
        self.inner.import_paths(path)
    }

    fn evaluator(&self, path: &Path, ext_vars: &ExtVars) -> Result<Evaluator, BackendError> {
        let previous = self.evaluations.fetch_add(1, Ordering::SeqCst);
        self.started.store(true, Ordering::SeqCst);
        if let (0, Some(delay)) = (previous, self.first_delay) {
            std::thread::sleep(delay);
        }
        self.inner.evaluator(path, ext_vars)
    }
}

struct Harness {
    server: TesselLanguageServer<RecordingClient>,
    client: RecordingClient,
}

impl Harness {
    async fn start(backend: Arc<dyn EvaluationBackend>, settings: Settings) -> Self {
        Self::with_client(RecordingClient::default(), backend, settings).await
    }

    async fn with_client(
        client: RecordingClient,
        backend: Arc<dyn EvaluationBackend>,
        settings: Settings,
    ) -> Self {
        let server = TesselLanguageServer::with_backend(client.clone(), backend, settings);
        server.initialize(InitializeParams::default()).await.unwrap();
        Self { server, client }
    }

    async fn open(&self, uri: &Url, version: i32, text: &str) {
        self.server
            .did_open(DidOpenTextDocumentParams {
                text_document: TextDocumentItem {
                    uri: uri.clone(),
                    language_id: "tessel".into(),
                    version,
                    text: text.into(),
                },
            })
            .await;
    }

    async fn change(&self, uri: &Url, version: i32, text: &str) {
        self.server
            .did_change(DidChangeTextDocumentParams {
                text_document: VersionedTextDocumentIdentifier {
                    uri: uri.clone(),
                    version,
                },
                content_changes: vec![TextDocumentContentChangeEvent {
                    range: None,
                    range_length: None,
                    text: text.into(),
                }],
            })
            .await;
    }

    async fn close(&self, uri: &Url) {
        self.server
            .did_close(DidCloseTextDocumentParams {
                text_document: TextDocumentIdentifier { uri: uri.clone() },
            })
            .await;
    }

    async fn settle(&self) {
        tokio::time::timeout(Duration::from_secs(10), self.server.scheduler().wait_idle())
            .await
            .expect("diagnostics did not settle");
    }

    async fn finish(self) -> Vec<Published> {
        self.server.shutdown().await.unwrap();
        self.client.published()
    }
}

fn settings(debounce_ms: u64) -> Settings {
    Settings {
        debounce: Duration::from_millis(debounce_ms),
        ..Settings::default()
    }
}

fn doc_uri() -> Url {
    Url::parse("file:///workspace/main.tsl").unwrap()
}

async fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(120), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

#[tokio::test]
async fn burst_of_changes_is_evaluated_once_with_the_latest_text() {
    let backend = Arc::new(CountingBackend::new());
    let harness = Harness::start(backend.clone(), settings(200)).await;
    let uri = doc_uri();

    harness.open(&uri, 1, "error 'first'").await;
    harness.change(&uri, 2, "error 'second'").await;
    assert_eq!(harness.server.scheduler().status(), SchedulerStatus::Scheduled);
    harness.settle().await;

    assert_eq!(backend.evaluations(), 1);
    let published = harness.finish().await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].version, Some(2));
    assert_eq!(published[0].messages(), vec!["second"]);
}

#[tokio::test]
async fn fixing_a_document_publishes_an_empty_set() {
    let harness = Harness::start(Arc::new(StaticBackend::new(Vec::new())), settings(10)).await;
    let uri = doc_uri();

    harness.open(&uri, 1, "{ a: }").await;
    harness.settle().await;
    harness.change(&uri, 2, "{ a: 1 }").await;
    harness.settle().await;

    let published = harness.finish().await;
    assert_eq!(published.len(), 2);
    assert_eq!(published[0].diagnostics.len(), 1);
    assert_eq!(published[1].uri, uri);
    assert_eq!(published[1].version, Some(2));
    assert!(published[1].diagnostics.is_empty());
}

#[tokio::test]
async fn syntax_error_is_reported_zero_indexed_then_cleared() {
    let harness = Harness::start(Arc::new(StaticBackend::new(Vec::new())), settings(10)).await;
    let uri = doc_uri();

    harness.open(&uri, 1, "{\n  a: 1,\n    ]\n}").await;
    harness.settle().await;
    harness.change(&uri, 2, "{\n  a: 1,\n}").await;
    harness.settle().await;

    let published = harness.finish().await;
    assert_eq!(published.len(), 2);
    let first = &published[0];
    assert_eq!(first.version, Some(1));
    assert_eq!(first.diagnostics.len(), 1);
    let diagnostic = &first.diagnostics[0];
    assert_eq!(diagnostic.range.start, Position::new(2, 4));
    assert_eq!(diagnostic.severity, Some(DiagnosticSeverity::ERROR));
    assert_eq!(diagnostic.source.as_deref(), Some("tessel"));
    assert_eq!(published[1].version, Some(2));
    assert!(published[1].diagnostics.is_empty());
}

#[tokio::test]
async fn late_older_version_is_ignored() {
    let harness = Harness::start(Arc::new(StaticBackend::new(Vec::new())), settings(10)).await;
    let uri = doc_uri();

    harness.open(&uri, 2, "{ v: 2 }").await;
    harness.change(&uri, 5, "{ v: 5 }").await;
    harness.change(&uri, 3, "{ v: 3 }").await;
    harness.settle().await;

    let stored = harness.server.cache().get(&uri).await.unwrap();
    assert_eq!((stored.version, stored.text.as_str()), (5, "{ v: 5 }"));
    let published = harness.finish().await;
    assert!(published.iter().all(|p| p.version == Some(5)));
    assert!(!published.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn change_during_evaluation_drops_the_stale_result() {
    let backend = Arc::new(CountingBackend::slow_first(Duration::from_millis(300)));
    let harness = Harness::start(backend.clone(), settings(10)).await;
    let uri = doc_uri();

    harness.open(&uri, 1, "error 'stale'").await;
    wait_until("evaluation to start", || backend.started.load(Ordering::SeqCst)).await;
    harness.change(&uri, 2, "error 'fresh'").await;
    harness.settle().await;

    assert_eq!(backend.evaluations(), 2);
    let published = harness.finish().await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].version, Some(2));
    assert_eq!(published[0].messages(), vec!["fresh"]);
}

#[tokio::test]
async fn closing_before_evaluation_only_clears() {
    let backend = Arc::new(CountingBackend::new());
    let harness = Harness::start(backend.clone(), settings(100)).await;
    let uri = doc_uri();

    harness.open(&uri, 1, "error 'never reported'").await;
    harness.close(&uri).await;
    harness.settle().await;

    assert_eq!(backend.evaluations(), 0);
    let published = harness.finish().await;
    assert_eq!(
        published,
        vec![Published {
            uri,
            diagnostics: Vec::new(),
            version: None
        }]
    );
}

#[tokio::test]
async fn external_variables_reach_both_backends() {
    let dir = tempfile::TempDir::new().unwrap();
    let uri = Url::from_file_path(dir.path().join("main.tsl")).unwrap();
    let backends: Vec<Arc<dyn EvaluationBackend>> = vec![
        Arc::new(StaticBackend::new(Vec::new())),
        Arc::new(ProjectBackend::new(Vec::new())),
    ];
    for backend in backends {
        let mut settings = settings(10);
        settings.ext_vars.insert("env".into(), "prod".into());
        let harness = Harness::start(backend, settings).await;
        harness
            .open(
                &uri,
                1,
                "if std.extVar('env') == 'prod' then {} else error 'wrong env'",
            )
            .await;
        harness.settle().await;
        let published = harness.finish().await;
        assert_eq!(published.len(), 1);
        assert!(published[0].diagnostics.is_empty(), "{:?}", published[0]);
    }
}

#[tokio::test]
async fn errors_in_imported_files_are_pinned_to_the_document_start() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(dir.path().join("lib.tsl"), "{\n  a: error 'broken',\n}\n").unwrap();
    let uri = Url::from_file_path(dir.path().join("main.tsl")).unwrap();
    let harness = Harness::start(Arc::new(StaticBackend::new(Vec::new())), settings(10)).await;

    harness.open(&uri, 1, "local lib = import 'lib.tsl';\nlib.a").await;
    harness.settle().await;

    let published = harness.finish().await;
    let diagnostic = &published[0].diagnostics[0];
    assert_eq!(diagnostic.range.start, Position::new(0, 0));
    assert_eq!(diagnostic.range.end, Position::new(0, 0));
    assert!(diagnostic.message.contains("lib.tsl:2:"), "{}", diagnostic.message);
    assert!(diagnostic.message.ends_with("broken"));
}

#[tokio::test]
async fn lint_warnings_follow_the_setting() {
    let mut settings = settings(10);
    settings.enable_lint_diagnostics = true;
    settings.enable_eval_diagnostics = false;
    let harness = Harness::start(Arc::new(StaticBackend::new(Vec::new())), settings).await;
    let uri = doc_uri();

    harness.open(&uri, 1, "local unused = 1;\nerror 'not evaluated'").await;
    harness.settle().await;

    let published = harness.finish().await;
    assert_eq!(published[0].diagnostics.len(), 1);
    let warning = &published[0].diagnostics[0];
    assert_eq!(warning.severity, Some(DiagnosticSeverity::WARNING));
    assert_eq!(
        warning.code,
        Some(NumberOrString::String("unused-local".into()))
    );
    assert_eq!(warning.range.start, Position::new(0, 6));
}

#[tokio::test]
async fn configuration_changes_rediagnose_open_documents() {
    let harness = Harness::start(Arc::new(StaticBackend::new(Vec::new())), settings(10)).await;
    let uri = doc_uri();

    harness.open(&uri, 1, "{ env: std.extVar('env') }").await;
    harness.settle().await;
    harness
        .server
        .did_change_configuration(DidChangeConfigurationParams {
            settings: json!({ "tessel": { "ext_vars": { "env": "dev" } } }),
        })
        .await;
    harness.settle().await;

    let published = harness.finish().await;
    assert_eq!(published.len(), 2);
    assert_eq!(
        published[0].messages(),
        vec!["undefined external variable: env"]
    );
    assert!(published[1].diagnostics.is_empty());
    assert_eq!(published[1].version, Some(1));
}

#[tokio::test]
async fn changes_after_close_are_not_diagnosed() {
    let backend = Arc::new(CountingBackend::new());
    let harness = Harness::start(backend.clone(), settings(10)).await;
    let uri = doc_uri();

    harness.open(&uri, 1, "{}").await;
    harness.settle().await;
    harness.close(&uri).await;
    harness.change(&uri, 2, "error 'ghost'").await;
    harness.settle().await;

    assert!(harness.server.cache().get(&uri).await.is_err());
    assert_eq!(backend.evaluations(), 1);
    let published = harness.finish().await;
    assert_eq!(published.len(), 2);
    assert_eq!(published[0].version, Some(1));
    assert_eq!(
        published[1],
        Published {
            uri,
            diagnostics: Vec::new(),
            version: None
        }
    );
}

#[tokio::test]
async fn closing_while_delivering_leaves_the_document_clear() {
    let client = RecordingClient::slow_errors(Duration::from_millis(200));
    let delivering = Arc::clone(&client.delivering);
    let harness = Harness::with_client(
        client,
        Arc::new(StaticBackend::new(Vec::new())),
        settings(10),
    )
    .await;
    let uri = doc_uri();

    harness.open(&uri, 1, "error 'ghost'").await;
    wait_until("delivery to start", || delivering.load(Ordering::SeqCst)).await;
    harness.close(&uri).await;
    harness.settle().await;

    let published = harness.finish().await;
    assert_eq!(published.len(), 2);
    assert_eq!(published[0].messages(), vec!["ghost"]);
    assert_eq!(
        published[1],
        Published {
            uri,
            diagnostics: Vec::new(),
            version: None
        }
    );
}

#[tokio::test]
async fn timed_out_evaluation_is_not_restarted_while_running() {
    let backend = Arc::new(CountingBackend::new());
    let mut settings = settings(0);
    settings.eval_timeout = Some(Duration::from_millis(10));
    let harness = Harness::start(backend.clone(), settings).await;
    let uri = doc_uri();

    harness
        .open(
            &uri,
            1,
            "std.foldl(function(acc, x) acc + x, std.range(1, 2000000), 0)",
        )
        .await;
    harness.settle().await;
    harness.change(&uri, 2, "{ a: 1 }").await;
    harness.settle().await;

    let published = harness.client.published();
    assert_eq!(published.len(), 2);
    assert_eq!(published[0].messages(), vec!["evaluation timed out after 10ms"]);
    assert_eq!(published[1].version, Some(2));
    assert_eq!(
        published[1].messages(),
        vec!["evaluation of an earlier version is still running"]
    );
    assert_eq!(backend.evaluations(), 1);

    let client = harness.client.clone();
    wait_until("the skipped version to be evaluated", || {
        client.published().len() == 3
    })
    .await;
    harness.settle().await;
    assert_eq!(backend.evaluations(), 2);
    let published = harness.finish().await;
    assert_eq!(published.len(), 3);
    assert_eq!(published[2].version, Some(2));
    assert!(published[2].diagnostics.is_empty());
}
