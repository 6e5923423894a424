use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{
    collection_of, Document, DocumentStore, FieldValue, Filter, Query, SortDirection, StoreError,
    StoreTransaction,
};

#[derive(Debug, Clone)]
struct Versioned {
    data: Value,
    version: u64,
}

#[derive(Debug, Default)]
struct Inner {
    docs: BTreeMap<String, Versioned>,
    collection_versions: HashMap<String, u64>,
    next_version: u64,
}

impl Inner {
    fn bump(&mut self) -> u64 {
        self.next_version += 1;
        self.next_version
    }

    fn matches(data: &Value, filters: &[Filter]) -> bool {
        filters.iter().all(|filter| match filter {
            Filter::Eq(field, expected) => data.get(field) == Some(expected),
            Filter::In(field, expected) => data
                .get(field)
                .map(|v| expected.contains(v))
                .unwrap_or(false),
            Filter::Gte(field, bound) => data
                .get(field)
                .map(|v| compare_values(v, bound) >= std::cmp::Ordering::Equal)
                .unwrap_or(false),
            Filter::Lte(field, bound) => data
                .get(field)
                .map(|v| compare_values(v, bound) <= std::cmp::Ordering::Equal)
                .unwrap_or(false),
        })
    }

    fn run_query(&self, query: &Query) -> Vec<Document> {
        let prefix = format!("{}/", query.collection);
        let mut docs: Vec<Document> = self
            .docs
            .range(prefix.clone()..)
            .take_while(|(path, _)| path.starts_with(&prefix))
            .filter(|(_, versioned)| Self::matches(&versioned.data, &query.filters))
            .map(|(path, versioned)| Document {
                path: path.clone(),
                data: versioned.data.clone(),
            })
            .collect();

        if let Some((field, direction)) = &query.order_by {
            docs.sort_by(|a, b| {
                let left = a.data.get(field).unwrap_or(&Value::Null);
                let right = b.data.get(field).unwrap_or(&Value::Null);
                let ordering = compare_values(left, right);
                match direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                }
            });
        }

        docs
    }

    fn apply_set(&mut self, path: &str, data: Value) {
        let version = self.bump();
        self.docs.insert(path.to_string(), Versioned { data, version });
        self.collection_versions
            .insert(collection_of(path).to_string(), version);
    }

    fn apply_update(&mut self, path: &str, fields: Vec<(String, FieldValue)>) {
        let mut data = self
            .docs
            .get(path)
            .map(|v| v.data.clone())
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()));

        if !data.is_object() {
            data = Value::Object(serde_json::Map::new());
        }
        let object = data.as_object_mut().unwrap();

        for (field, value) in fields {
            match value {
                FieldValue::Value(v) => {
                    object.insert(field, v);
                }
                FieldValue::ServerTimestamp => {
                    object.insert(field, Value::String(chrono::Utc::now().to_rfc3339()));
                }
                FieldValue::Increment(delta) => {
                    let current = object.get(&field).and_then(Value::as_i64).unwrap_or(0);
                    object.insert(field, Value::from(current + delta));
                }
                FieldValue::ArrayUnion(values) => {
                    let entry = object
                        .entry(field)
                        .or_insert_with(|| Value::Array(Vec::new()));
                    if !entry.is_array() {
                        *entry = Value::Array(Vec::new());
                    }
                    let array = entry.as_array_mut().unwrap();
                    for value in values {
                        if !array.contains(&value) {
                            array.push(value);
                        }
                    }
                }
            }
        }

        self.apply_set(path, data);
    }

    fn apply_delete(&mut self, path: &str) {
        if self.docs.remove(path).is_some() {
            let version = self.bump();
            self.collection_versions
                .insert(collection_of(path).to_string(), version);
        }
    }
}

/// In-process document store with per-document version counters and
/// optimistic transactions. Conflicts surface as `StoreError::Conflict`
/// exactly where a backing database with snapshot transactions would abort.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test/setup helper: write a document outside any transaction.
    pub async fn seed(&self, path: &str, data: Value) {
        let mut inner = self.inner.write().await;
        inner.apply_set(path, data);
    }

    pub async fn remove(&self, path: &str) {
        let mut inner = self.inner.write().await;
        inner.apply_delete(path);
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &str) -> Result<Option<Document>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.docs.get(path).map(|versioned| Document {
            path: path.to_string(),
            data: versioned.data.clone(),
        }))
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.run_query(query))
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        Ok(Box::new(MemoryTransaction {
            store: Arc::clone(&self.inner),
            doc_reads: HashMap::new(),
            collection_reads: HashMap::new(),
            writes: Vec::new(),
        }))
    }
}

enum WriteOp {
    Set { path: String, data: Value },
    Update { path: String, fields: Vec<(String, FieldValue)> },
    Delete { path: String },
}

pub struct MemoryTransaction {
    store: Arc<RwLock<Inner>>,
    doc_reads: HashMap<String, u64>,
    collection_reads: HashMap<String, u64>,
    writes: Vec<WriteOp>,
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn get(&mut self, path: &str) -> Result<Option<Document>, StoreError> {
        let inner = self.store.read().await;
        let versioned = inner.docs.get(path);
        self.doc_reads.insert(
            path.to_string(),
            versioned.map(|v| v.version).unwrap_or(0),
        );
        Ok(versioned.map(|v| Document {
            path: path.to_string(),
            data: v.data.clone(),
        }))
    }

    async fn query(&mut self, query: &Query) -> Result<Vec<Document>, StoreError> {
        let inner = self.store.read().await;
        let version = inner
            .collection_versions
            .get(&query.collection)
            .copied()
            .unwrap_or(0);
        self.collection_reads.insert(query.collection.clone(), version);
        Ok(inner.run_query(query))
    }

    fn set(&mut self, path: &str, data: Value) {
        self.writes.push(WriteOp::Set {
            path: path.to_string(),
            data,
        });
    }

    fn update(&mut self, path: &str, fields: Vec<(String, FieldValue)>) {
        self.writes.push(WriteOp::Update {
            path: path.to_string(),
            fields,
        });
    }

    fn delete(&mut self, path: &str) {
        self.writes.push(WriteOp::Delete {
            path: path.to_string(),
        });
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTransaction {
            store,
            doc_reads,
            collection_reads,
            writes,
        } = *self;
        let mut inner = store.write().await;

        for (path, read_version) in &doc_reads {
            let current = inner.docs.get(path).map(|v| v.version).unwrap_or(0);
            if current != *read_version {
                debug!(path = %path, "transaction aborted: document changed since read");
                return Err(StoreError::Conflict(path.clone()));
            }
        }
        for (collection, read_version) in &collection_reads {
            let current = inner
                .collection_versions
                .get(collection)
                .copied()
                .unwrap_or(0);
            if current != *read_version {
                debug!(collection = %collection, "transaction aborted: collection changed since read");
                return Err(StoreError::Conflict(collection.clone()));
            }
        }

        for write in writes {
            match write {
                WriteOp::Set { path, data } => inner.apply_set(&path, data),
                WriteOp::Update { path, fields } => inner.apply_update(&path, fields),
                WriteOp::Delete { path } => inner.apply_delete(&path),
            }
        }

        Ok(())
    }
}

fn compare_values(left: &Value, right: &Value) -> std::cmp::Ordering {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .unwrap_or(f64::NAN)
            .partial_cmp(&b.as_f64().unwrap_or(f64::NAN))
            .unwrap_or(std::cmp::Ordering::Equal),
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        _ => std::cmp::Ordering::Equal,
    }
}
