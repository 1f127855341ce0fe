//! In-memory change source.
//!
//! `MemoryCollection` is a thread-safe JSON document collection that can
//! serve live queries. Every mutation re-evaluates each open query's window
//! and pushes `Removed`, `Changed` and `Added` notifications, in that order,
//! for the difference. It is intended for embedded usage, tests, and as a
//! reference implementation of the `ChangeSource` contract.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use serde_json::Value;

use crate::document::{DocumentId, RawDocument};
use crate::error::{ExecutionError, FeedError, FeedResult, ValidationError};
use crate::query::QueryOptions;
use crate::selector::Selector;

use super::{ChangeNotification, ChangeSource, LiveQuery, NotificationSender};

type Window = Vec<(DocumentId, Value)>;

fn lock_err(context: &'static str) -> FeedError {
    FeedError::source(format!("poisoned lock: {context}"))
}

#[derive(Debug)]
struct LiveEntry {
    selector: Selector,
    options: QueryOptions,
    window: Window,
    tx: NotificationSender,
}

#[derive(Debug, Default)]
struct CollectionState {
    docs: BTreeMap<DocumentId, Value>,
    queries: HashMap<u64, LiveEntry>,
    next_query_id: u64,
}

fn compute_window(
    docs: &BTreeMap<DocumentId, Value>,
    selector: &Selector,
    options: &QueryOptions,
) -> FeedResult<Window> {
    let mut matched = Vec::new();
    for (id, doc) in docs {
        if selector.matches(doc)? {
            matched.push((id, doc));
        }
    }

    let window = options.apply_window(matched, |entry| entry.1);
    Ok(window
        .into_iter()
        .map(|(id, doc)| {
            let projected = match &options.fields {
                Some(fields) => fields.apply(doc),
                None => doc.clone(),
            };
            (id.clone(), projected)
        })
        .collect())
}

fn diff_windows(old: &Window, new: &Window) -> Vec<ChangeNotification> {
    let old_map: HashMap<&DocumentId, &Value> = old.iter().map(|(id, v)| (id, v)).collect();
    let new_map: HashMap<&DocumentId, &Value> = new.iter().map(|(id, v)| (id, v)).collect();

    let mut out = Vec::new();
    for (id, _) in old {
        if !new_map.contains_key(id) {
            out.push(ChangeNotification::Removed(id.clone()));
        }
    }
    for (id, value) in new {
        if let Some(previous) = old_map.get(id) {
            if *previous != value {
                out.push(ChangeNotification::Changed(id.clone()));
            }
        }
    }
    for (id, _) in new {
        if !old_map.contains_key(id) {
            out.push(ChangeNotification::Added(id.clone()));
        }
    }
    out
}

fn refresh_live_queries(collection: &str, state: &mut CollectionState) {
    let CollectionState { docs, queries, .. } = state;
    for (query_id, entry) in queries.iter_mut() {
        match compute_window(docs, &entry.selector, &entry.options) {
            Ok(window) => {
                for notification in diff_windows(&entry.window, &window) {
                    entry.tx.notify(notification);
                }
                entry.window = window;
            }
            Err(e) => {
                tracing::warn!(
                    collection,
                    query_id,
                    error = %e,
                    "live query evaluation failed; window left unchanged"
                );
            }
        }
    }
}

fn document_id(doc: &Value) -> FeedResult<DocumentId> {
    RawDocument::new(doc.clone()).id().map_err(|e| {
        ValidationError::InvalidDocument {
            reason: e.to_string(),
        }
        .into()
    })
}

/// Thread-safe in-memory document collection with live queries.
///
/// Clones share the same underlying collection.
#[derive(Debug, Clone)]
pub struct MemoryCollection {
    name: Arc<str>,
    state: Arc<RwLock<CollectionState>>,
}

impl MemoryCollection {
    /// Create an empty collection.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Arc::from(name.into()),
            state: Arc::new(RwLock::new(CollectionState::default())),
        }
    }

    fn mutate<T>(
        &self,
        context: &'static str,
        f: impl FnOnce(&mut BTreeMap<DocumentId, Value>) -> FeedResult<T>,
    ) -> FeedResult<T> {
        let mut guard = self.state.write().map_err(|_| lock_err(context))?;
        let out = f(&mut guard.docs)?;
        refresh_live_queries(&self.name, &mut guard);
        Ok(out)
    }

    /// Insert a new document. Fails if its `_id` already exists.
    pub fn insert(&self, doc: Value) -> FeedResult<DocumentId> {
        let id = document_id(&doc)?;
        self.mutate("collection.insert", |docs| {
            if docs.contains_key(&id) {
                return Err(ExecutionError::DuplicateDocument { id: id.clone() }.into());
            }
            docs.insert(id.clone(), doc);
            Ok(id)
        })
    }

    /// Replace an existing document. Fails if its `_id` is unknown.
    pub fn update(&self, doc: Value) -> FeedResult<()> {
        let id = document_id(&doc)?;
        self.mutate("collection.update", |docs| {
            let Some(slot) = docs.get_mut(&id) else {
                return Err(ExecutionError::DocumentNotFound { id }.into());
            };
            *slot = doc;
            Ok(())
        })
    }

    /// Insert or replace a document.
    pub fn upsert(&self, doc: Value) -> FeedResult<DocumentId> {
        let id = document_id(&doc)?;
        self.mutate("collection.upsert", |docs| {
            docs.insert(id.clone(), doc);
            Ok(id)
        })
    }

    /// Delete a document, returning it.
    pub fn remove(&self, id: &DocumentId) -> FeedResult<Value> {
        self.mutate("collection.remove", |docs| {
            docs.remove(id)
                .ok_or_else(|| ExecutionError::DocumentNotFound { id: id.clone() }.into())
        })
    }

    /// Fetch one document by id.
    pub fn get(&self, id: &DocumentId) -> FeedResult<Option<Value>> {
        let guard = self.state.read().map_err(|_| lock_err("collection.get"))?;
        Ok(guard.docs.get(id).cloned())
    }

    /// Number of stored documents.
    pub fn len(&self) -> FeedResult<usize> {
        let guard = self.state.read().map_err(|_| lock_err("collection.len"))?;
        Ok(guard.docs.len())
    }

    /// True when the collection holds no documents.
    pub fn is_empty(&self) -> FeedResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Number of live queries currently open against this collection.
    pub fn live_query_count(&self) -> FeedResult<usize> {
        let guard = self.state.read().map_err(|_| lock_err("collection.live_queries"))?;
        Ok(guard.queries.len())
    }
}

impl ChangeSource for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(
        &self,
        selector: &Selector,
        options: &QueryOptions,
        notifications: NotificationSender,
    ) -> FeedResult<Box<dyn LiveQuery>> {
        options.validate()?;

        let mut guard = self.state.write().map_err(|_| lock_err("collection.open"))?;
        let window = compute_window(&guard.docs, selector, options)?;

        for (id, _) in &window {
            notifications.notify(ChangeNotification::Added(id.clone()));
        }

        let query_id = guard.next_query_id;
        guard.next_query_id += 1;
        guard.queries.insert(
            query_id,
            LiveEntry {
                selector: selector.clone(),
                options: options.clone(),
                window,
                tx: notifications,
            },
        );

        Ok(Box::new(MemoryLiveQuery {
            query_id,
            state: Arc::clone(&self.state),
            stopped: false,
        }))
    }
}

/// Live query handle returned by `MemoryCollection::open`.
#[derive(Debug)]
struct MemoryLiveQuery {
    query_id: u64,
    state: Arc<RwLock<CollectionState>>,
    stopped: bool,
}

impl MemoryLiveQuery {
    fn with_window<T>(&self, f: impl FnOnce(&Window) -> T) -> FeedResult<T> {
        let guard = self.state.read().map_err(|_| lock_err("live_query.read"))?;
        let entry = guard
            .queries
            .get(&self.query_id)
            .ok_or_else(|| FeedError::source(format!("live query {} is closed", self.query_id)))?;
        Ok(f(&entry.window))
    }
}

impl LiveQuery for MemoryLiveQuery {
    fn count(&self) -> FeedResult<usize> {
        self.with_window(Vec::len)
    }

    fn fetch_all(&self) -> FeedResult<Vec<RawDocument>> {
        self.with_window(|window| {
            window
                .iter()
                .map(|(_, doc)| RawDocument::new(doc.clone()))
                .collect()
        })
    }

    fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        if let Ok(mut guard) = self.state.write() {
            guard.queries.remove(&self.query_id);
        }
    }
}

impl Drop for MemoryLiveQuery {
    fn drop(&mut self) {
        self.stop();
    }
}
