//! Background diagnostics
//!
//! Notifications never evaluate anything themselves: they store the new text in the
//! [`DocumentCache`] and [`enqueue`](DiagnosticsScheduler::enqueue) the URI. A single task owned
//! by the scheduler drains the queue.
//!
//! Queue discipline:
//!
//! - pending work is a map from URI to the instant it becomes due, so a burst of edits to one
//!   document collapses into a single run of the latest text (latest wins)
//! - a URI enqueued while it is being processed is simply pending again and runs once more after
//!   the current run, against whatever the cache holds by then (rerun if superseded)
//! - results computed for a document that changed or closed in the meantime are dropped; the
//!   newer run publishes instead
//! - an evaluation that timed out keeps its blocking thread until it returns; until then the
//!   document is not evaluated again, and one run follows once it is done if any was skipped
//!
//! Every run publishes the complete set of diagnostics for the document, an empty set included,
//! so the editor never keeps entries from a previous run.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tessel_lang::{lint, EvalError, LintWarning, ParseError};
use tokio::sync::{watch, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tower_lsp::lsp_types::{Diagnostic, DiagnosticSeverity, NumberOrString, Range, Url};
use tracing::{debug, error, warn};

use crate::backend::EvaluationBackend;
use crate::cache::{Document, DocumentCache, ParseOutcome};
use crate::position::{document_start, from_source_range};
use crate::server::LspClient;
use crate::settings::Settings;

/// Value of [`Diagnostic::source`] for everything this server reports.
pub const DIAGNOSTIC_SOURCE: &str = "tessel";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerStatus {
    /// Nothing pending, nothing running.
    Idle,
    /// Work is pending but waiting for its debounce interval.
    Scheduled,
    Running,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: HashMap<Url, Instant>,
    running: Option<Url>,
}

impl QueueState {
    fn status(&self) -> SchedulerStatus {
        if self.running.is_some() {
            SchedulerStatus::Running
        } else if self.pending.is_empty() {
            SchedulerStatus::Idle
        } else {
            SchedulerStatus::Scheduled
        }
    }

    /// The pending URI that is due first.
    fn next(&self) -> Option<(Url, Instant)> {
        self.pending
            .iter()
            .min_by_key(|(_, ready_at)| **ready_at)
            .map(|(uri, ready_at)| (uri.clone(), *ready_at))
    }

    /// Move the first URI that is due at `now` from pending to running.
    fn take_due(&mut self, now: Instant) -> Next {
        match self.next() {
            Some((uri, ready_at)) if ready_at <= now => {
                self.pending.remove(&uri);
                self.running = Some(uri.clone());
                Next::Due(uri)
            }
            Some((_, ready_at)) => Next::At(ready_at),
            None => Next::Empty,
        }
    }
}

#[derive(Debug, PartialEq)]
enum Next {
    Due(Url),
    At(Instant),
    Empty,
}

pub struct DiagnosticsScheduler<C> {
    client: C,
    cache: Arc<DocumentCache>,
    backend: Arc<dyn EvaluationBackend>,
    settings: Arc<RwLock<Settings>>,
    queue: Mutex<QueueState>,
    wake: Notify,
    status: watch::Sender<SchedulerStatus>,
    /// Held while delivering, so a close cannot interleave with a publish.
    publish: Mutex<()>,
    /// Timed out evaluations still running, with whether a run was skipped meanwhile.
    stalled: Mutex<HashMap<Url, bool>>,
}

impl<C: LspClient> DiagnosticsScheduler<C> {
    pub fn new(
        client: C,
        cache: Arc<DocumentCache>,
        backend: Arc<dyn EvaluationBackend>,
        settings: Arc<RwLock<Settings>>,
    ) -> Self {
        let (status, _) = watch::channel(SchedulerStatus::Idle);
        Self {
            client,
            cache,
            backend,
            settings,
            queue: Mutex::new(QueueState::default()),
            wake: Notify::new(),
            status,
            publish: Mutex::new(()),
            stalled: Mutex::new(HashMap::new()),
        }
    }

    /// Schedule diagnostics for `uri` once the debounce interval has passed without another
    /// request for it.
    pub async fn enqueue(&self, uri: Url) {
        let debounce = self.settings.read().await.debounce;
        let mut queue = self.queue.lock().await;
        queue.pending.insert(uri, Instant::now() + debounce);
        self.update_status(&queue);
        drop(queue);
        self.wake.notify_one();
    }

    pub async fn enqueue_all(&self, uris: impl IntoIterator<Item = Url>) {
        for uri in uris {
            self.enqueue(uri).await;
        }
    }

    /// Forget `uri` and clear its diagnostics; returns whether it was open. No run delivers
    /// for `uri` after the clearing push.
    pub async fn close(&self, uri: &Url) -> bool {
        let _publish = self.publish.lock().await;
        let existed = self.cache.delete(uri).await;
        {
            let mut queue = self.queue.lock().await;
            queue.pending.remove(uri);
            self.update_status(&queue);
        }
        self.client
            .publish_diagnostics(uri.clone(), Vec::new(), None)
            .await;
        existed
    }

    pub fn status(&self) -> SchedulerStatus {
        *self.status.borrow()
    }

    /// Resolve once nothing is pending or running.
    pub async fn wait_idle(&self) {
        let mut status = self.status.subscribe();
        // the sender lives as long as `self`, so the channel cannot close while we wait
        let _ = status
            .wait_for(|status| *status == SchedulerStatus::Idle)
            .await;
    }

    /// Spawn the processing loop. The returned handle is aborted on shutdown.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run())
    }

    fn update_status(&self, queue: &QueueState) {
        let next = queue.status();
        self.status.send_if_modified(|current| {
            let changed = *current != next;
            *current = next;
            changed
        });
    }

    async fn run(self: Arc<Self>) {
        loop {
            let next = {
                let mut queue = self.queue.lock().await;
                let next = queue.take_due(Instant::now());
                self.update_status(&queue);
                next
            };
            match next {
                Next::Due(uri) => {
                    self.process(uri).await;
                    let mut queue = self.queue.lock().await;
                    queue.running = None;
                    self.update_status(&queue);
                }
                Next::At(ready_at) => {
                    tokio::select! {
                        _ = sleep_until(ready_at) => {}
                        _ = self.wake.notified() => {}
                    }
                }
                Next::Empty => self.wake.notified().await,
            }
        }
    }

    async fn process(self: &Arc<Self>, uri: Url) {
        let document = match self.cache.get(&uri).await {
            Ok(document) => document,
            Err(err) => {
                debug!(%uri, "skipping diagnostics: {err}");
                return;
            }
        };
        let settings = self.settings.read().await.clone();
        let diagnostics = self.diagnose(&document, &settings).await;

        let _publish = self.publish.lock().await;
        match self.cache.get(&uri).await {
            Ok(current) if Arc::ptr_eq(&current, &document) => {}
            _ => {
                debug!(
                    %uri,
                    version = document.version,
                    "dropping diagnostics for a superseded version"
                );
                return;
            }
        }
        debug!(
            %uri,
            version = document.version,
            count = diagnostics.len(),
            "publishing diagnostics"
        );
        self.client
            .publish_diagnostics(uri, diagnostics, Some(document.version))
            .await;
    }

    async fn diagnose(
        self: &Arc<Self>,
        document: &Document,
        settings: &Settings,
    ) -> Vec<Diagnostic> {
        let ast = match &document.outcome {
            ParseOutcome::Failed(err) => return vec![parse_diagnostic(err)],
            ParseOutcome::Parsed(ast) => Arc::clone(ast),
        };
        let mut diagnostics = Vec::new();
        if settings.enable_eval_diagnostics {
            diagnostics.extend(self.evaluate(document, settings).await);
        }
        if settings.enable_lint_diagnostics {
            diagnostics.extend(lint(&ast).iter().map(lint_diagnostic));
        }
        diagnostics
    }

    /// Evaluate on the blocking pool; `None` when the document evaluates cleanly.
    async fn evaluate(
        self: &Arc<Self>,
        document: &Document,
        settings: &Settings,
    ) -> Option<Diagnostic> {
        if let Some(skipped) = self.stalled.lock().await.get_mut(&document.uri) {
            *skipped = true;
            debug!(uri = %document.uri, "previous evaluation still running");
            return Some(error_diagnostic(
                document_start(),
                "evaluation of an earlier version is still running".to_string(),
            ));
        }
        let path = document.path();
        let evaluator = match self.backend.evaluator(&path, &settings.ext_vars) {
            Ok(evaluator) => evaluator,
            Err(err) => {
                warn!(uri = %document.uri, "cannot build evaluator: {err}");
                return Some(error_diagnostic(document_start(), err.to_string()));
            }
        };

        let text = document.text.clone();
        let file = path.clone();
        let mut task =
            tokio::task::spawn_blocking(move || evaluator.evaluate_snippet(&file, &text));
        let joined = match settings.eval_timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut task).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!(uri = %document.uri, ?limit, "evaluation timed out");
                    self.watch_stalled(document.uri.clone(), task).await;
                    return Some(error_diagnostic(
                        document_start(),
                        format!("evaluation timed out after {}ms", limit.as_millis()),
                    ));
                }
            },
            None => task.await,
        };

        match joined {
            Ok(Ok(_)) => None,
            Ok(Err(err)) => {
                debug!(uri = %document.uri, "evaluation failed: {err}");
                Some(eval_diagnostic(&err, &path))
            }
            Err(err) => {
                error!(uri = %document.uri, "evaluation task failed: {err}");
                Some(error_diagnostic(
                    document_start(),
                    format!("evaluation aborted: {err}"),
                ))
            }
        }
    }

    /// Track a timed out evaluation until its thread returns.
    async fn watch_stalled(
        self: &Arc<Self>,
        uri: Url,
        task: JoinHandle<Result<String, EvalError>>,
    ) {
        self.stalled.lock().await.insert(uri.clone(), false);
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let _ = task.await;
            let skipped = scheduler.stalled.lock().await.remove(&uri);
            debug!(%uri, "timed out evaluation returned");
            if skipped == Some(true) {
                scheduler.enqueue(uri).await;
            }
        });
    }
}

fn error_diagnostic(range: Range, message: String) -> Diagnostic {
    Diagnostic {
        range,
        severity: Some(DiagnosticSeverity::ERROR),
        source: Some(DIAGNOSTIC_SOURCE.to_string()),
        message,
        ..Diagnostic::default()
    }
}

pub fn parse_diagnostic(err: &ParseError) -> Diagnostic {
    let range = err
        .range
        .as_ref()
        .map(from_source_range)
        .unwrap_or_else(document_start);
    error_diagnostic(range, err.message.clone())
}

/// Errors located in the document point at the offending range. Errors raised in other files
/// (imports) have no place in this document, so they sit at its start with the full location
/// in the message.
pub fn eval_diagnostic(err: &EvalError, path: &Path) -> Diagnostic {
    match &err.range {
        Some(range) if range.is_in(path) => {
            error_diagnostic(from_source_range(range), err.message.clone())
        }
        _ => error_diagnostic(document_start(), err.to_string()),
    }
}

pub fn lint_diagnostic(warning: &LintWarning) -> Diagnostic {
    Diagnostic {
        range: from_source_range(&warning.range),
        severity: Some(DiagnosticSeverity::WARNING),
        code: Some(NumberOrString::String(warning.code.to_string())),
        source: Some(DIAGNOSTIC_SOURCE.to_string()),
        message: warning.message.clone(),
        ..Diagnostic::default()
    }
}
