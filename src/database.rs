use async_std::stream::Stream;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::schema::Collection;

pub type Document = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("query failed: {0}")]
    Query(String),
    #[error("change stream closed")]
    Closed,
}

/// Top-level field predicates evaluated by the store.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All,
    Eq(String, Value),
    In(String, Vec<Value>),
    Gt(String, i64),
    Exists(String),
    Not(Box<Filter>),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq<V: Into<Value>>(field: &str, value: V) -> Self {
        Filter::Eq(field.to_string(), value.into())
    }

    pub fn any_of<V: Into<Value>, I: IntoIterator<Item = V>>(field: &str, values: I) -> Self {
        Filter::In(field.to_string(), values.into_iter().map(Into::into).collect())
    }

    pub fn gt(field: &str, bound: i64) -> Self {
        Filter::Gt(field.to_string(), bound)
    }

    pub fn exists(field: &str) -> Self {
        Filter::Exists(field.to_string())
    }

    pub fn matches(&self, document: &Document) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(field, value) => document.get(field).map_or(false, |v| same_value(v, value)),
            Filter::In(field, values) => document
                .get(field)
                .map_or(false, |v| values.iter().any(|candidate| same_value(v, candidate))),
            Filter::Gt(field, bound) => document
                .get(field)
                .and_then(Value::as_i64)
                .map_or(false, |v| v > *bound),
            Filter::Exists(field) => document.contains_key(field),
            Filter::Not(filter) => !filter.matches(document),
            Filter::And(filters) => filters.iter().all(|filter| filter.matches(document)),
            Filter::Or(filters) => filters.iter().any(|filter| filter.matches(document)),
        }
    }
}

// Numbers compare by value so that `7` and `7.0` identify the same sensor.
fn same_value(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

/// Store-side trimming of a document's `readings` sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadingsProjection {
    /// Readings with `timestamp >= bound`.
    Since(i64),
    /// Readings with `timestamp > bound`.
    After(i64),
    /// Only the final reading.
    Last,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub readings: Option<ReadingsProjection>,
    pub exclude_id: bool,
}

impl FindOptions {
    pub fn readings(projection: ReadingsProjection) -> Self {
        FindOptions {
            readings: Some(projection),
            exclude_id: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Insert,
    Update,
    Replace,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub operation_type: OperationType,
    pub document_key: Value,
    pub full_document: Document,
    /// Store-assigned sequence number of the change.
    pub cluster_time: u64,
}

/// A document store reachable through scoped sessions.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    type Session: Session;

    /// Acquires a session. Dropping the session releases it.
    async fn session(&self) -> Result<Self::Session, StoreError>;
}

#[async_trait]
pub trait Session: Send + Sync {
    type ChangeStream: Stream<Item = Result<ChangeEvent, StoreError>> + Send + Unpin;

    async fn find(
        &self,
        collection: Collection,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<Document>, StoreError>;

    /// Opens a subscription to changes of documents matching `filter`.
    /// Dropping the stream closes the subscription.
    async fn watch(&self, collection: Collection, filter: &Filter)
        -> Result<Self::ChangeStream, StoreError>;
}
