use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use async_std::channel::{self, Receiver, Sender};
use async_std::stream::Stream;
use async_std::task;
use async_trait::async_trait;
use log::{debug, info};
use serde_json::Value;
use thiserror::Error;

use crate::database::{
    ChangeEvent, Document, DocumentStore, Filter, FindOptions, OperationType, ReadingsProjection,
    Session, StoreError,
};
use crate::schema::{self, Collection};

type ChangeSender = Sender<Result<ChangeEvent, StoreError>>;

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("could not read seed file: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not parse seed file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    UnknownCollection(String),
}

struct Delay {
    collection: Collection,
    filter: Filter,
    delay: Duration,
}

struct Watcher {
    id: u64,
    collection: Collection,
    filter: Filter,
    sender: ChangeSender,
}

#[derive(Default)]
struct Inner {
    collections: RwLock<HashMap<Collection, Vec<Document>>>,
    watchers: Mutex<Vec<Watcher>>,
    faulty: RwLock<HashSet<Collection>>,
    delays: Mutex<Vec<Delay>>,
    unavailable: AtomicBool,
    open_sessions: AtomicUsize,
    next_watcher_id: AtomicU64,
    next_document_id: AtomicU64,
    cluster_time: AtomicU64,
}

/// In-process document store. Clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads `{ "<collection>": [documents] }` from a JSON file.
    pub fn from_seed_file<P: AsRef<Path>>(path: P) -> Result<Self, SeedError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let seed: HashMap<String, Vec<Document>> = serde_json::from_str(&content)?;

        let store = Self::new();
        for (name, documents) in seed {
            let collection = name
                .parse::<Collection>()
                .map_err(SeedError::UnknownCollection)?;
            let count = documents.len();
            for document in documents {
                store.insert(collection, document);
            }
            info!("Seeded {} with {} documents", collection, count);
        }
        Ok(store)
    }

    /// Adds a document, assigning `_id` if absent, and notifies watchers.
    pub fn insert(&self, collection: Collection, mut document: Document) {
        if !document.contains_key(schema::STORE_ID) {
            let id = self.inner.next_document_id.fetch_add(1, Ordering::SeqCst) + 1;
            document.insert(schema::STORE_ID.to_string(), Value::from(id));
        }
        self.write(collection, |documents| documents.push(document.clone()));
        self.notify(collection, OperationType::Insert, document);
    }

    /// Replaces the first document matching `filter`, keeping its `_id`.
    pub fn replace(&self, collection: Collection, filter: &Filter, document: Document) -> bool {
        self.modify(collection, filter, OperationType::Replace, |existing| {
            let id = existing.get(schema::STORE_ID).cloned();
            *existing = document;
            if let Some(id) = id {
                existing.insert(schema::STORE_ID.to_string(), id);
            }
        })
    }

    /// Sets `fields` on the first document matching `filter`.
    pub fn update(&self, collection: Collection, filter: &Filter, fields: Document) -> bool {
        self.modify(collection, filter, OperationType::Update, |existing| {
            existing.extend(fields);
        })
    }

    /// Makes every subsequent session acquisition fail.
    pub fn set_available(&self, available: bool) {
        self.inner.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Makes queries against `collection` fail until cleared.
    pub fn set_faulty(&self, collection: Collection, faulty: bool) {
        let mut set = self.inner.faulty.write().unwrap_or_else(|e| e.into_inner());
        if faulty {
            set.insert(collection);
        } else {
            set.remove(&collection);
        }
    }

    /// Holds back finds on `collection` that return a document matching
    /// `filter` by `delay`.
    pub fn delay_matching(&self, collection: Collection, filter: Filter, delay: Duration) {
        self.inner
            .delays
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Delay {
                collection,
                filter,
                delay,
            });
    }

    /// Pushes an error into every open change stream.
    pub fn interrupt_watchers(&self, reason: &str) {
        let watchers = self.inner.watchers.lock().unwrap_or_else(|e| e.into_inner());
        for watcher in watchers.iter() {
            let _ = watcher
                .sender
                .try_send(Err(StoreError::Query(reason.to_string())));
        }
    }

    pub fn open_sessions(&self) -> usize {
        self.inner.open_sessions.load(Ordering::SeqCst)
    }

    pub fn open_watchers(&self) -> usize {
        self.inner
            .watchers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    fn write<R>(&self, collection: Collection, f: impl FnOnce(&mut Vec<Document>) -> R) -> R {
        let mut collections = self
            .inner
            .collections
            .write()
            .unwrap_or_else(|e| e.into_inner());
        f(collections.entry(collection).or_default())
    }

    fn modify(
        &self,
        collection: Collection,
        filter: &Filter,
        operation: OperationType,
        f: impl FnOnce(&mut Document),
    ) -> bool {
        let changed = self.write(collection, |documents| {
            documents
                .iter_mut()
                .find(|document| filter.matches(document))
                .map(|document| {
                    f(document);
                    document.clone()
                })
        });

        match changed {
            Some(document) => {
                self.notify(collection, operation, document);
                true
            }
            None => false,
        }
    }

    fn notify(&self, collection: Collection, operation_type: OperationType, document: Document) {
        let cluster_time = self.inner.cluster_time.fetch_add(1, Ordering::SeqCst) + 1;
        let watchers = self.inner.watchers.lock().unwrap_or_else(|e| e.into_inner());
        for watcher in watchers
            .iter()
            .filter(|watcher| watcher.collection == collection && watcher.filter.matches(&document))
        {
            let event = ChangeEvent {
                operation_type,
                document_key: document.get(schema::STORE_ID).cloned().unwrap_or(Value::Null),
                full_document: document.clone(),
                cluster_time,
            };
            let _ = watcher.sender.try_send(Ok(event));
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    type Session = MemorySession;

    async fn session(&self) -> Result<Self::Session, StoreError> {
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        self.inner.open_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(MemorySession {
            inner: self.inner.clone(),
        })
    }
}

/// A checked-out session; returned to the store on drop.
pub struct MemorySession {
    inner: Arc<Inner>,
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.inner.open_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemorySession {
    fn ensure_healthy(&self, collection: Collection) -> Result<(), StoreError> {
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection lost".to_string()));
        }
        let faulty = self.inner.faulty.read().unwrap_or_else(|e| e.into_inner());
        if faulty.contains(&collection) {
            return Err(StoreError::Query(format!("{} query failed", collection)));
        }
        Ok(())
    }

    fn delay_for(&self, collection: Collection, documents: &[Document]) -> Duration {
        let delays = self.inner.delays.lock().unwrap_or_else(|e| e.into_inner());
        delays
            .iter()
            .filter(|delay| delay.collection == collection)
            .filter(|delay| documents.iter().any(|document| delay.filter.matches(document)))
            .map(|delay| delay.delay)
            .max()
            .unwrap_or_default()
    }

    fn project(document: &Document, options: &FindOptions) -> Document {
        let mut projected = document.clone();
        if options.exclude_id {
            projected.remove(schema::STORE_ID);
        }
        if let Some(projection) = options.readings {
            if let Some(Value::Array(readings)) = projected.get_mut(schema::READINGS) {
                project_readings(readings, projection);
            }
        }
        projected
    }
}

fn reading_timestamp(reading: &Value) -> Option<i64> {
    reading.get("timestamp").and_then(Value::as_i64)
}

fn project_readings(readings: &mut Vec<Value>, projection: ReadingsProjection) {
    match projection {
        ReadingsProjection::Since(bound) => {
            readings.retain(|reading| reading_timestamp(reading).map_or(false, |ts| ts >= bound))
        }
        ReadingsProjection::After(bound) => {
            readings.retain(|reading| reading_timestamp(reading).map_or(false, |ts| ts > bound))
        }
        ReadingsProjection::Last => {
            let keep_from = readings.len().saturating_sub(1);
            readings.drain(..keep_from);
        }
    }
}

#[async_trait]
impl Session for MemorySession {
    type ChangeStream = MemoryChangeStream;

    async fn find(
        &self,
        collection: Collection,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<Document>, StoreError> {
        self.ensure_healthy(collection)?;

        let before = Instant::now();
        let matched: Vec<Document> = {
            let collections = self
                .inner
                .collections
                .read()
                .unwrap_or_else(|e| e.into_inner());
            collections
                .get(&collection)
                .map(|documents| {
                    documents
                        .iter()
                        .filter(|document| filter.matches(document))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };

        let delay = self.delay_for(collection, &matched);
        if !delay.is_zero() {
            task::sleep(delay).await;
        }

        let result: Vec<Document> = matched
            .iter()
            .map(|document| Self::project(document, options))
            .collect();

        debug!(
            "find on {} returned {} documents in {}us",
            collection,
            result.len(),
            before.elapsed().as_micros()
        );
        Ok(result)
    }

    async fn watch(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> Result<Self::ChangeStream, StoreError> {
        self.ensure_healthy(collection)?;

        let (sender, receiver) = channel::unbounded();
        let id = self.inner.next_watcher_id.fetch_add(1, Ordering::SeqCst);
        self.inner
            .watchers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Watcher {
                id,
                collection,
                filter: filter.clone(),
                sender,
            });
        debug!("watch #{} opened on {}", id, collection);

        Ok(MemoryChangeStream {
            id,
            inner: self.inner.clone(),
            receiver: Box::pin(receiver),
        })
    }
}

/// Change subscription; deregistered on drop.
pub struct MemoryChangeStream {
    id: u64,
    inner: Arc<Inner>,
    receiver: Pin<Box<Receiver<Result<ChangeEvent, StoreError>>>>,
}

impl Stream for MemoryChangeStream {
    type Item = Result<ChangeEvent, StoreError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.as_mut().poll_next(cx)
    }
}

impl Drop for MemoryChangeStream {
    fn drop(&mut self) {
        let mut watchers = self.inner.watchers.lock().unwrap_or_else(|e| e.into_inner());
        watchers.retain(|watcher| watcher.id != self.id);
        debug!("watch #{} closed", self.id);
    }
}
