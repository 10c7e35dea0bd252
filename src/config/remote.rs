//! Remote configuration sources.
//!
//! The local-file source is what's actually wired up today; `RemoteConfig`
//! exists so a push-based config manager can be dropped in without touching
//! the sinker's reload logic.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration};
use tracing::{error, warn};

use super::{Document, Error};

/// Source of configuration document updates.
#[async_trait]
pub trait RemoteConfig: Send + Sync {
    /// One-time setup (connect, authenticate, register watchers).
    async fn init(&mut self) -> Result<(), Error>;

    /// Fetch the current document.
    async fn get_config(&self) -> Result<Document, Error>;

    /// Start watching for changes, pushing new documents onto `tx` as they arrive.
    /// Runs until cancelled; the caller owns the receiving end.
    async fn watch(&self, tx: mpsc::Sender<Document>) -> Result<(), Error>;
}

/// Polls a local TOML file on a fixed interval. The default in absence of
/// an actual remote config manager.
pub struct LocalFile {
    path: PathBuf,
    poll_interval: Duration,
}

impl LocalFile {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            poll_interval: Duration::from_secs(5),
        }
    }
}

#[async_trait]
impl RemoteConfig for LocalFile {
    async fn init(&mut self) -> Result<(), Error> {
        Ok(())
    }

    async fn get_config(&self) -> Result<Document, Error> {
        Document::load(&self.path)
    }

    async fn watch(&self, tx: mpsc::Sender<Document>) -> Result<(), Error> {
        let mut ticker = interval(self.poll_interval);
        let mut last: Option<Document> = None;

        loop {
            ticker.tick().await;

            let document = match Document::load(&self.path) {
                Ok(document) => document,
                Err(err) => {
                    warn!("failed to reload \"{}\": {}", self.path.display(), err);
                    continue;
                }
            };

            let changed = match &last {
                Some(prev) => !documents_equal(prev, &document),
                None => false,
            };

            if changed {
                if tx.send(document.clone()).await.is_err() {
                    error!("config watch channel closed, stopping watcher");
                    return Ok(());
                }
            }

            last = Some(document);
        }
    }
}

/// Cheap structural comparison good enough to detect a meaningful reload.
fn documents_equal(a: &Document, b: &Document) -> bool {
    serde_json::to_string(a).ok() == serde_json::to_string(b).ok()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::{Clickhouse, Document};

    #[tokio::test]
    async fn test_local_file_get_config_falls_back_to_defaults() {
        let source = LocalFile::new(PathBuf::from("/nonexistent/path/shoalsink.toml"));
        let document = source.get_config().await.unwrap();
        assert!(document.clickhouse.hosts.is_empty());
    }

    #[test]
    fn test_documents_equal_detects_change() {
        let a = Document::default();
        let mut b = Document::default();
        assert!(documents_equal(&a, &b));

        b.clickhouse = Clickhouse {
            hosts: vec![vec!["ch1:9000".into()]],
            ..Clickhouse::default()
        };
        assert!(!documents_equal(&a, &b));
        let _ = &a;
    }
}
