//! Cache of rendered documentation pages.
//!
//! Pages are keyed by their canonical `solargraph:` URI. The first `provide`
//! for a page returns a placeholder and starts a fetch; when the fetch lands
//! the content is stored and subscribers are told the page changed so they
//! can ask again. Cached content is served as-is until `invalidate` or
//! `invalidate_all` refreshes it. A failed fetch leaves whatever was there.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use log::{debug, warn};
use tokio::sync::broadcast;

use super::in_progress_set::InProgressSet;
use super::virtual_uri::VirtualDocumentUri;
use crate::error::BridgeResult;

/// Content shown while a page is being fetched.
pub const PLACEHOLDER: &str = "Loading...";

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Where page content comes from.
pub trait PageSource: Send + Sync + 'static {
    fn fetch_page(
        &self,
        uri: &VirtualDocumentUri,
    ) -> impl Future<Output = BridgeResult<String>> + Send;
}

#[derive(Debug, Clone)]
struct Entry {
    uri: VirtualDocumentUri,
    content: String,
}

/// Serve-stale-while-revalidate cache of documentation pages.
pub struct ContentCache<S> {
    source: Arc<S>,
    entries: Arc<DashMap<String, Entry>>,
    in_flight: Arc<InProgressSet<String>>,
    changes: broadcast::Sender<String>,
}

impl<S> Clone for ContentCache<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            entries: Arc::clone(&self.entries),
            in_flight: Arc::clone(&self.in_flight),
            changes: self.changes.clone(),
        }
    }
}

impl<S: PageSource> ContentCache<S> {
    pub fn new(source: Arc<S>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            source,
            entries: Arc::new(DashMap::new()),
            in_flight: Arc::new(InProgressSet::new()),
            changes,
        }
    }

    /// Current content for `uri`, or the placeholder for a page not yet
    /// fetched. Only an unseen page triggers a fetch.
    pub fn provide(&self, uri: &str) -> BridgeResult<String> {
        let parsed = VirtualDocumentUri::parse(uri)?;
        let key = parsed.canonical().to_string();

        if let Some(entry) = self.entries.get(&key) {
            return Ok(entry.content.clone());
        }

        self.entries.insert(
            key.clone(),
            Entry {
                uri: parsed.clone(),
                content: PLACEHOLDER.to_string(),
            },
        );
        self.schedule_fetch(key, parsed);
        Ok(PLACEHOLDER.to_string())
    }

    /// Re-fetch a known page. Returns `false` for pages never provided.
    pub fn invalidate(&self, uri: &str) -> bool {
        let Ok(parsed) = VirtualDocumentUri::parse(uri) else {
            return false;
        };
        let key = parsed.canonical().to_string();
        let Some(known) = self.entries.get(&key).map(|entry| entry.uri.clone()) else {
            return false;
        };
        self.schedule_fetch(key, known);
        true
    }

    /// Re-fetch every known page.
    pub fn invalidate_all(&self) {
        let known: Vec<(String, VirtualDocumentUri)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.uri.clone()))
            .collect();
        for (key, uri) in known {
            self.schedule_fetch(key, uri);
        }
    }

    /// Forget a page whose view was closed.
    pub fn remove(&self, uri: &str) {
        if let Ok(parsed) = VirtualDocumentUri::parse(uri) {
            self.entries.remove(parsed.canonical());
        }
    }

    /// Canonical URIs of pages whose content changed.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.changes.subscribe()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Start a fetch for `key` unless one is already running.
    fn schedule_fetch(&self, key: String, uri: VirtualDocumentUri) {
        if !self.in_flight.try_start(&key) {
            debug!(
                target: "solargraph_bridge::cache",
                "Fetch for {} already in flight",
                key
            );
            return;
        }

        let source = Arc::clone(&self.source);
        let entries = Arc::clone(&self.entries);
        let in_flight = Arc::clone(&self.in_flight);
        let changes = self.changes.clone();

        tokio::spawn(async move {
            let result = source.fetch_page(&uri).await;
            in_flight.finish(&key);

            match result {
                Ok(content) => {
                    let stored = match entries.get_mut(&key) {
                        Some(mut entry) => {
                            entry.content = content;
                            true
                        }
                        None => false,
                    };
                    if stored {
                        let _ = changes.send(key);
                    } else {
                        debug!(
                            target: "solargraph_bridge::cache",
                            "Dropping content for closed page {}",
                            key
                        );
                    }
                }
                Err(e) => {
                    warn!(
                        target: "solargraph_bridge::cache",
                        "Failed to fetch {}: {}",
                        key,
                        e
                    );
                }
            }
        });
    }
}
