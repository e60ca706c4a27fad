//! In-memory document store
//!
//! Used by tests and when PostgreSQL is disabled. Reads take a shared lock;
//! a commit validates and applies under one short exclusive section.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{DocKey, Document, DocumentStore, Query, StoredDocument, Versioned, Write};
use crate::error::StoreError;

#[derive(Debug, Clone)]
struct Entry {
    data: Document,
    version: u64,
}

#[derive(Debug, Default)]
struct Inner {
    docs: HashMap<DocKey, Entry>,
    /// Store-wide version counter; versions are never reused
    next_version: u64,
}

impl Inner {
    fn version_of(&self, key: &DocKey) -> u64 {
        self.docs.get(key).map(|e| e.version).unwrap_or(0)
    }

    fn bump(&mut self) -> u64 {
        self.next_version += 1;
        self.next_version
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents currently held in `collection`.
    pub async fn count(&self, collection: &str) -> usize {
        let inner = self.inner.read().await;
        inner
            .docs
            .keys()
            .filter(|k| k.collection == collection)
            .count()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn read_versioned(&self, key: &DocKey) -> Result<Versioned, StoreError> {
        let inner = self.inner.read().await;
        let entry = inner.docs.get(key);
        Ok(Versioned {
            key: key.clone(),
            data: entry.map(|e| e.data.clone()),
            version: entry.map(|e| e.version).unwrap_or(0),
        })
    }

    async fn commit(
        &self,
        preconditions: &[(DocKey, u64)],
        writes: &[Write],
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;

        for (key, expected) in preconditions {
            if inner.version_of(key) != *expected {
                return Err(StoreError::conflict(&key.collection, &key.id));
            }
        }

        // Validate updates before applying anything so a failed commit is a no-op.
        let mut pending: HashMap<&DocKey, bool> = HashMap::new();
        for write in writes {
            let key = write.key();
            let exists = pending
                .get(key)
                .copied()
                .unwrap_or_else(|| inner.docs.contains_key(key));
            match write {
                Write::Update { .. } if !exists => {
                    return Err(StoreError::not_found(&key.collection, &key.id));
                }
                Write::Delete { .. } => {
                    pending.insert(key, false);
                }
                _ => {
                    pending.insert(key, true);
                }
            }
        }

        for write in writes {
            let version = inner.bump();
            match write {
                Write::Set { key, data } => {
                    inner.docs.insert(
                        key.clone(),
                        Entry {
                            data: data.clone(),
                            version,
                        },
                    );
                }
                Write::Update { key, fields } => {
                    if let Some(entry) = inner.docs.get_mut(key) {
                        for (field, value) in fields {
                            entry.data.insert(field.clone(), value.clone());
                        }
                        entry.version = version;
                    }
                }
                Write::Delete { key } => {
                    inner.docs.remove(key);
                }
            }
        }

        Ok(())
    }

    async fn query(&self, query: &Query) -> Result<Vec<StoredDocument>, StoreError> {
        let inner = self.inner.read().await;

        let mut matched: Vec<StoredDocument> = inner
            .docs
            .iter()
            .filter(|(key, entry)| key.collection == query.collection && query.matches(&entry.data))
            .map(|(key, entry)| StoredDocument {
                id: key.id.clone(),
                data: entry.data.clone(),
            })
            .collect();

        // Ties fall back to id so results are deterministic.
        matched.sort_by(|a, b| query.compare(&a.data, &b.data).then_with(|| a.id.cmp(&b.id)));

        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(matched.into_iter().skip(query.offset).take(limit).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Direction, Filter};
    use serde_json::{Value, json};

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_set_get_update_delete() {
        let store = MemoryStore::new();
        store
            .set("users", "u1", doc(json!({"name": "a", "isAdmin": false})))
            .await
            .unwrap();
        store
            .update("users", "u1", doc(json!({"isAdmin": true})))
            .await
            .unwrap();

        let user = store.get("users", "u1").await.unwrap().unwrap();
        assert_eq!(user["name"], json!("a"));
        assert_eq!(user["isAdmin"], json!(true));

        store.delete("users", "u1").await.unwrap();
        assert!(store.get("users", "u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .update("users", "ghost", doc(json!({"a": 1})))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_stale_precondition_conflicts() {
        let store = MemoryStore::new();
        let key = DocKey::new("moderation", "p1");
        let before = store.read_versioned(&key).await.unwrap();
        assert_eq!(before.version, 0);

        store.set("moderation", "p1", doc(json!({"reportCount": 1}))).await.unwrap();

        let write = Write::Set {
            key: key.clone(),
            data: doc(json!({"reportCount": 1})),
        };
        let err = store
            .commit(&[(key.clone(), before.version)], &[write])
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_versions_not_reused_after_delete() {
        let store = MemoryStore::new();
        let key = DocKey::new("c", "x");
        store.set("c", "x", doc(json!({"v": 1}))).await.unwrap();
        let first = store.read_versioned(&key).await.unwrap().version;
        store.delete("c", "x").await.unwrap();
        store.set("c", "x", doc(json!({"v": 2}))).await.unwrap();
        let second = store.read_versioned(&key).await.unwrap().version;
        assert!(second > first);
    }

    #[tokio::test]
    async fn test_query_filter_order_limit_offset() {
        let store = MemoryStore::new();
        for (id, priority, created) in [("r1", 1, 10), ("r2", 5, 30), ("r3", 5, 20), ("r4", 3, 5)] {
            store
                .set(
                    "reports",
                    id,
                    doc(json!({"status": "pending", "priority": priority, "createdAt": created})),
                )
                .await
                .unwrap();
        }
        store
            .set("reports", "r5", doc(json!({"status": "resolved", "priority": 5, "createdAt": 1})))
            .await
            .unwrap();

        let query = Query::collection("reports")
            .filter(Filter::eq("status", "pending"))
            .order_by("priority", Direction::Desc)
            .order_by("createdAt", Direction::Asc);

        let all = store.query(&query).await.unwrap();
        let ids: Vec<_> = all.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["r3", "r2", "r4", "r1"]);

        let page = store.query(&query.clone().offset(1).limit(2)).await.unwrap();
        let ids: Vec<_> = page.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["r2", "r4"]);
    }
}
