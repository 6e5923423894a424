//! Document-store interface consumed by the scheduler core.
//!
//! The production database is an external collaborator; the core only relies
//! on the contract below: point reads, filtered collection queries, and
//! optimistic transactions with reads-before-writes semantics. `MemoryStore`
//! is the in-process implementation used by tests and local wiring.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub mod memory;

pub use memory::MemoryStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("transaction contention on {0}")]
    Conflict(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// A staged field write. Sentinels are resolved by the store at commit time.
#[derive(Debug, Clone)]
pub enum FieldValue {
    Value(Value),
    ServerTimestamp,
    Increment(i64),
    ArrayUnion(Vec<Value>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    In(String, Vec<Value>),
    Gte(String, Value),
    Lte(String, Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order_by: Option<(String, SortDirection)>,
}

impl Query {
    pub fn collection(collection: &str) -> Self {
        Self {
            collection: collection.to_string(),
            filters: Vec::new(),
            order_by: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order(mut self, field: &str, direction: SortDirection) -> Self {
        self.order_by = Some((field.to_string(), direction));
        self
    }
}

#[derive(Debug, Clone)]
pub struct Document {
    pub path: String,
    pub data: Value,
}

impl Document {
    /// Document id, i.e. the path segment after the collection.
    pub fn id(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// Collection name of a `collection/id` document path.
pub fn collection_of(path: &str) -> &str {
    path.split('/').next().unwrap_or(path)
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, path: &str) -> Result<Option<Document>, StoreError>;

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError>;

    /// Open a transaction. Reads performed through it join the read set;
    /// commit fails with `StoreError::Conflict` when any read document (or
    /// queried collection) was modified by another committed transaction.
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;
}

#[async_trait]
pub trait StoreTransaction: Send {
    async fn get(&mut self, path: &str) -> Result<Option<Document>, StoreError>;

    async fn query(&mut self, query: &Query) -> Result<Vec<Document>, StoreError>;

    fn set(&mut self, path: &str, data: Value);

    fn update(&mut self, path: &str, fields: Vec<(String, FieldValue)>);

    fn delete(&mut self, path: &str);

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
