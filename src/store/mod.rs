//! Document Store Abstraction
//!
//! The engines never talk to a database directly. Everything they persist goes
//! through [`DocumentStore`], a small collection/document interface modelled on
//! a managed document database:
//!
//! ```text
//! ┌──────────────────┐    read_versioned    ┌────────────────┐
//! │ run_transaction  │─────────────────────►│ DocumentStore  │
//! │ (retry loop)     │◄─────────────────────│  memory / pg   │
//! └──────────────────┘  commit(preconds)    └────────────────┘
//! ```
//!
//! Subcollections are plain collection paths such as `users/u1/trustHistory`.

mod memory;
mod postgres;
mod transaction;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use transaction::{RetryPolicy, TxnReads, TxnWrites, run_transaction};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

use crate::error::StoreError;

/// Field map of a single document.
pub type Document = serde_json::Map<String, Value>;

/// Address of a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocKey {
    pub collection: String,
    pub id: String,
}

impl DocKey {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for DocKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// A document returned by a query, with its id.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub data: Document,
}

/// Snapshot of a document read inside a transaction.
///
/// `version` is 0 when the document does not exist.
#[derive(Debug, Clone)]
pub struct Versioned {
    pub key: DocKey,
    pub data: Option<Document>,
    pub version: u64,
}

/// A buffered mutation applied by [`DocumentStore::commit`].
#[derive(Debug, Clone)]
pub enum Write {
    /// Replace the whole document, creating it if needed.
    Set { key: DocKey, data: Document },
    /// Merge top-level fields into an existing document.
    Update { key: DocKey, fields: Document },
    Delete { key: DocKey },
}

impl Write {
    pub fn key(&self) -> &DocKey {
        match self {
            Write::Set { key, .. } | Write::Update { key, .. } | Write::Delete { key } => key,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl FilterOp {
    pub fn sql(&self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Ne => "<>",
            FilterOp::Lt => "<",
            FilterOp::Le => "<=",
            FilterOp::Gt => ">",
            FilterOp::Ge => ">=",
        }
    }
}

/// Top-level field filter. Documents missing the field never match.
#[derive(Debug, Clone)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn new(field: &str, op: FilterOp, value: impl Into<Value>) -> Self {
        Self {
            field: field.to_string(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOp::Eq, value)
    }

    pub fn matches(&self, doc: &Document) -> bool {
        let Some(actual) = doc.get(&self.field) else {
            return false;
        };
        let ord = compare_values(actual, &self.value);
        match self.op {
            FilterOp::Eq => actual == &self.value,
            FilterOp::Ne => actual != &self.value,
            FilterOp::Lt => ord == Ordering::Less,
            FilterOp::Le => ord != Ordering::Greater,
            FilterOp::Gt => ord == Ordering::Greater,
            FilterOp::Ge => ord != Ordering::Less,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// Collection query: filters are ANDed, orderings applied left to right.
#[derive(Debug, Clone)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl Query {
    pub fn collection(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: 0,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by.push(OrderBy {
            field: field.to_string(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.filters.iter().all(|f| f.matches(doc))
    }

    /// Ordering between two documents under this query's `order_by` clauses.
    pub fn compare(&self, a: &Document, b: &Document) -> Ordering {
        for clause in &self.order_by {
            let left = a.get(&clause.field).unwrap_or(&Value::Null);
            let right = b.get(&clause.field).unwrap_or(&Value::Null);
            let ord = match clause.direction {
                Direction::Asc => compare_values(left, right),
                Direction::Desc => compare_values(right, left),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

/// Total order over JSON values: null < bool < number < string < array < object.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Serialize a record into a document. The value must be a JSON object.
pub fn to_document<T: Serialize>(value: &T) -> Result<Document, StoreError> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        _ => Err(StoreError::Serialization(
            <serde_json::Error as serde::ser::Error>::custom(
                "document must serialize to a JSON object",
            ),
        )),
    }
}

pub fn from_document<T: DeserializeOwned>(doc: Document) -> Result<T, StoreError> {
    Ok(serde_json::from_value(Value::Object(doc))?)
}

/// Generic document database used by every service in this crate.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read a document together with its current version.
    async fn read_versioned(&self, key: &DocKey) -> Result<Versioned, StoreError>;

    /// Apply `writes` atomically if every `(key, version)` precondition still
    /// holds. A stale precondition fails with [`StoreError::Conflict`] and
    /// applies nothing.
    async fn commit(
        &self,
        preconditions: &[(DocKey, u64)],
        writes: &[Write],
    ) -> Result<(), StoreError>;

    async fn query(&self, query: &Query) -> Result<Vec<StoredDocument>, StoreError>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        Ok(self.read_versioned(&DocKey::new(collection, id)).await?.data)
    }

    async fn set(&self, collection: &str, id: &str, data: Document) -> Result<(), StoreError> {
        let write = Write::Set {
            key: DocKey::new(collection, id),
            data,
        };
        self.commit(&[], &[write]).await
    }

    /// Merge `fields` into an existing document; [`StoreError::NotFound`] if absent.
    async fn update(&self, collection: &str, id: &str, fields: Document) -> Result<(), StoreError> {
        let write = Write::Update {
            key: DocKey::new(collection, id),
            fields,
        };
        self.commit(&[], &[write]).await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let write = Write::Delete {
            key: DocKey::new(collection, id),
        };
        self.commit(&[], &[write]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_filter_missing_field_never_matches() {
        let d = doc(json!({"status": "pending"}));
        assert!(Filter::eq("status", "pending").matches(&d));
        assert!(!Filter::new("priority", FilterOp::Ne, 3).matches(&d));
    }

    #[test]
    fn test_numeric_range_filters() {
        let d = doc(json!({"priority": 4}));
        assert!(Filter::new("priority", FilterOp::Ge, 4).matches(&d));
        assert!(Filter::new("priority", FilterOp::Gt, 3).matches(&d));
        assert!(!Filter::new("priority", FilterOp::Lt, 4).matches(&d));
    }

    #[test]
    fn test_query_compare_multi_key() {
        let q = Query::collection("reports")
            .order_by("priority", Direction::Desc)
            .order_by("createdAt", Direction::Asc);
        let a = doc(json!({"priority": 5, "createdAt": 20}));
        let b = doc(json!({"priority": 5, "createdAt": 10}));
        let c = doc(json!({"priority": 1, "createdAt": 1}));
        assert_eq!(q.compare(&b, &a), Ordering::Less);
        assert_eq!(q.compare(&a, &c), Ordering::Less);
    }

    #[test]
    fn test_to_document_rejects_scalars() {
        assert!(to_document(&5).is_err());
        assert!(to_document(&json!({"a": 1})).is_ok());
    }
}
