//! Document cache
//!
//! The single source of truth for what the server believes about every open document. Records
//! are immutable snapshots behind an `Arc`; an update replaces the whole record under the write
//! lock, so readers see either the old text with the old parse outcome or the new text with the
//! new one, never a mix.
//!
//! Writes carry the editor's version number. A write whose version is not newer than the stored
//! one is rejected, which keeps the cache at the latest version even when notifications are
//! handled out of order.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use lsp_types::Url;
use tessel_lang::{parse, Ast, ParseError};
use thiserror::Error;
use tokio::sync::RwLock;

/// Result of parsing a document's text.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Parsed(Arc<Ast>),
    Failed(ParseError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub uri: Url,
    pub text: String,
    pub version: i32,
    pub outcome: ParseOutcome,
}

impl Document {
    /// Parse `text` and bundle it with its identity.
    pub fn parse(uri: Url, text: String, version: i32) -> Self {
        let outcome = match parse(document_path(&uri), &text) {
            Ok(ast) => ParseOutcome::Parsed(Arc::new(ast)),
            Err(err) => ParseOutcome::Failed(err),
        };
        Self {
            uri,
            text,
            version,
            outcome,
        }
    }

    pub fn ast(&self) -> Option<&Ast> {
        match &self.outcome {
            ParseOutcome::Parsed(ast) => Some(ast),
            ParseOutcome::Failed(_) => None,
        }
    }

    /// File system path used for evaluation and for tagging source ranges.
    pub fn path(&self) -> PathBuf {
        document_path(&self.uri)
    }
}

/// `file:` URIs map to their path; anything else (e.g. `untitled:`) keeps the URI path.
pub fn document_path(uri: &Url) -> PathBuf {
    uri.to_file_path()
        .unwrap_or_else(|_| PathBuf::from(uri.path()))
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("document not found: {0}")]
    NotFound(Url),
    #[error("stale write for {uri}: stored version {stored}, incoming version {incoming}")]
    StaleWrite { uri: Url, stored: i32, incoming: i32 },
}

/// Concurrency-safe map from URI to the latest accepted [`Document`].
#[derive(Debug, Default)]
pub struct DocumentCache {
    entries: RwLock<HashMap<Url, Arc<Document>>>,
}

impl DocumentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the record for `doc.uri`, unless the stored version is the same or newer.
    pub async fn put(&self, doc: Document) -> Result<(), CacheError> {
        let mut entries = self.entries.write().await;
        if let Some(stored) = entries.get(&doc.uri) {
            check_newer(stored, &doc)?;
        }
        entries.insert(doc.uri.clone(), Arc::new(doc));
        Ok(())
    }

    /// Like [`put`](Self::put), but only for a document that is already stored: a missing
    /// record is `NotFound` and nothing is written.
    pub async fn update(&self, doc: Document) -> Result<(), CacheError> {
        let mut entries = self.entries.write().await;
        let Some(stored) = entries.get(&doc.uri) else {
            return Err(CacheError::NotFound(doc.uri));
        };
        check_newer(stored, &doc)?;
        entries.insert(doc.uri.clone(), Arc::new(doc));
        Ok(())
    }

    pub async fn get(&self, uri: &Url) -> Result<Arc<Document>, CacheError> {
        self.entries
            .read()
            .await
            .get(uri)
            .cloned()
            .ok_or_else(|| CacheError::NotFound(uri.clone()))
    }

    /// Remove the record; returns whether one existed.
    pub async fn delete(&self, uri: &Url) -> bool {
        self.entries.write().await.remove(uri).is_some()
    }

    pub async fn keys(&self) -> Vec<Url> {
        self.entries.read().await.keys().cloned().collect()
    }
}

fn check_newer(stored: &Document, incoming: &Document) -> Result<(), CacheError> {
    if stored.version >= incoming.version {
        return Err(CacheError::StaleWrite {
            uri: incoming.uri.clone(),
            stored: stored.version,
            incoming: incoming.version,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn uri(name: &str) -> Url {
        Url::parse(&format!("file:///workspace/{name}")).unwrap()
    }

    fn doc(name: &str, text: &str, version: i32) -> Document {
        Document::parse(uri(name), text.to_string(), version)
    }

    #[tokio::test]
    async fn put_then_get_returns_latest_record() {
        let cache = DocumentCache::new();
        cache.put(doc("a.tsl", "{ a: 1 }", 1)).await.unwrap();
        let stored = cache.get(&uri("a.tsl")).await.unwrap();
        assert_eq!(stored.version, 1);
        assert!(stored.ast().is_some());
        assert_eq!(stored.path(), PathBuf::from("/workspace/a.tsl"));
    }

    #[tokio::test]
    async fn parse_failures_are_stored_with_their_location() {
        let cache = DocumentCache::new();
        cache.put(doc("a.tsl", "{\n  a: 1,\n    ]\n}", 1)).await.unwrap();
        let stored = cache.get(&uri("a.tsl")).await.unwrap();
        let ParseOutcome::Failed(err) = &stored.outcome else {
            panic!("expected a parse failure");
        };
        let range = err.range.as_ref().unwrap();
        assert_eq!((range.begin.line, range.begin.column), (3, 5));
    }

    #[tokio::test]
    async fn stale_versions_are_rejected() {
        let cache = DocumentCache::new();
        cache.put(doc("a.tsl", "2", 2)).await.unwrap();
        cache.put(doc("a.tsl", "5", 5)).await.unwrap();

        let err = cache.put(doc("a.tsl", "3", 3)).await.unwrap_err();
        assert_eq!(
            err,
            CacheError::StaleWrite {
                uri: uri("a.tsl"),
                stored: 5,
                incoming: 3
            }
        );
        assert!(cache.put(doc("a.tsl", "again", 5)).await.is_err());

        let stored = cache.get(&uri("a.tsl")).await.unwrap();
        assert_eq!((stored.version, stored.text.as_str()), (5, "5"));
    }

    #[tokio::test]
    async fn missing_documents_are_reported_without_side_effects() {
        let cache = DocumentCache::new();
        let missing = uri("never.tsl");
        assert_eq!(
            cache.get(&missing).await.unwrap_err(),
            CacheError::NotFound(missing.clone())
        );
        assert_eq!(
            cache.get(&missing).await.unwrap_err(),
            CacheError::NotFound(missing.clone())
        );
        assert!(cache.keys().await.is_empty());

        cache.put(doc("a.tsl", "1", 1)).await.unwrap();
        assert!(cache.delete(&uri("a.tsl")).await);
        assert!(!cache.delete(&uri("a.tsl")).await);
        assert!(matches!(
            cache.get(&uri("a.tsl")).await,
            Err(CacheError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn updates_require_an_open_document() {
        let cache = DocumentCache::new();
        assert_eq!(
            cache.update(doc("a.tsl", "1", 1)).await.unwrap_err(),
            CacheError::NotFound(uri("a.tsl"))
        );
        assert!(cache.keys().await.is_empty());

        cache.put(doc("a.tsl", "1", 1)).await.unwrap();
        cache.update(doc("a.tsl", "2", 2)).await.unwrap();
        assert!(matches!(
            cache.update(doc("a.tsl", "0", 0)).await,
            Err(CacheError::StaleWrite { stored: 2, .. })
        ));

        cache.delete(&uri("a.tsl")).await;
        assert!(cache.update(doc("a.tsl", "3", 3)).await.is_err());
        assert!(cache.get(&uri("a.tsl")).await.is_err());
    }

    #[tokio::test]
    async fn reopened_document_starts_a_new_version_history() {
        let cache = DocumentCache::new();
        cache.put(doc("a.tsl", "old", 7)).await.unwrap();
        cache.delete(&uri("a.tsl")).await;
        cache.put(doc("a.tsl", "new", 1)).await.unwrap();
        assert_eq!(cache.get(&uri("a.tsl")).await.unwrap().text, "new");
    }

    #[tokio::test]
    async fn concurrent_writers_settle_on_highest_version() {
        let cache = Arc::new(DocumentCache::new());
        let mut tasks = Vec::new();
        for version in (1..=32).rev() {
            let cache = Arc::clone(&cache);
            tasks.push(tokio::spawn(async move {
                let _ = cache.put(doc("a.tsl", &version.to_string(), version)).await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        let stored = cache.get(&uri("a.tsl")).await.unwrap();
        assert_eq!(stored.version, 32);
        assert_eq!(stored.text, "32");
    }

    proptest! {
        #[test]
        fn stored_version_is_the_maximum_accepted(versions in prop::collection::vec(0i32..50, 1..20)) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            runtime.block_on(async {
                let cache = DocumentCache::new();
                let mut expected: Option<i32> = None;
                for version in &versions {
                    let accepted = cache.put(doc("p.tsl", &format!("v{version}"), *version)).await.is_ok();
                    prop_assert_eq!(accepted, expected.map_or(true, |max| *version > max));
                    if accepted {
                        expected = Some(*version);
                    }
                }
                let stored = cache.get(&uri("p.tsl")).await.unwrap();
                let max = versions.iter().copied().max().unwrap();
                prop_assert_eq!(stored.version, max);
                prop_assert_eq!(&stored.text, &format!("v{max}"));
                Ok::<_, TestCaseError>(())
            })?;
        }
    }
}
