//! Optimistic read-compute-write transactions over a [`DocumentStore`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

use super::{DocKey, Document, DocumentStore, Versioned, Write, from_document, to_document};
use crate::error::{AppError, AppResult};

/// Bounded retry for conflicting commits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Linear backoff step between attempts
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_ms: 10,
        }
    }
}

/// Documents read at the start of one transaction attempt.
#[derive(Debug)]
pub struct TxnReads {
    snapshots: Vec<Versioned>,
}

impl TxnReads {
    pub fn get(&self, key: &DocKey) -> Option<&Document> {
        self.snapshots
            .iter()
            .find(|s| &s.key == key)
            .and_then(|s| s.data.as_ref())
    }

    pub fn exists(&self, key: &DocKey) -> bool {
        self.get(key).is_some()
    }

    /// Decode a snapshot into a typed record.
    pub fn get_as<T: DeserializeOwned>(&self, key: &DocKey) -> AppResult<Option<T>> {
        match self.get(key) {
            Some(doc) => Ok(Some(from_document(doc.clone())?)),
            None => Ok(None),
        }
    }

    fn preconditions(&self) -> Vec<(DocKey, u64)> {
        self.snapshots
            .iter()
            .map(|s| (s.key.clone(), s.version))
            .collect()
    }
}

/// Writes buffered by a transaction body.
#[derive(Debug, Default)]
pub struct TxnWrites {
    writes: Vec<Write>,
}

impl TxnWrites {
    pub fn set(&mut self, key: DocKey, data: Document) {
        self.writes.push(Write::Set { key, data });
    }

    pub fn set_record<T: Serialize>(&mut self, key: DocKey, record: &T) -> AppResult<()> {
        let data = to_document(record)?;
        self.set(key, data);
        Ok(())
    }

    pub fn update(&mut self, key: DocKey, fields: Document) {
        self.writes.push(Write::Update { key, fields });
    }

    pub fn delete(&mut self, key: DocKey) {
        self.writes.push(Write::Delete { key });
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// Run `body` against fresh snapshots of `keys` and commit its writes.
///
/// Every key read is a commit precondition, so a concurrent writer on any of
/// them forces the whole cycle to run again. A body that buffers no writes
/// returns without committing. Conflicts past `max_attempts` surface as
/// [`AppError::Internal`].
pub async fn run_transaction<T, F>(
    store: &dyn DocumentStore,
    retry: &RetryPolicy,
    keys: &[DocKey],
    mut body: F,
) -> AppResult<T>
where
    T: Send,
    F: FnMut(&TxnReads, &mut TxnWrites) -> AppResult<T> + Send,
{
    let attempts = retry.max_attempts.max(1);

    for attempt in 1..=attempts {
        let mut snapshots = Vec::with_capacity(keys.len());
        for key in keys {
            snapshots.push(store.read_versioned(key).await?);
        }
        let reads = TxnReads { snapshots };

        let mut writes = TxnWrites::default();
        let value = body(&reads, &mut writes)?;
        if writes.is_empty() {
            return Ok(value);
        }

        match store.commit(&reads.preconditions(), &writes.writes).await {
            Ok(()) => return Ok(value),
            Err(e) if e.is_conflict() => {
                debug!(attempt = attempt, error = %e, "Transaction conflict, retrying");
                if attempt < attempts {
                    let wait = retry.backoff_ms.saturating_mul(attempt as u64);
                    tokio::time::sleep(Duration::from_millis(wait)).await;
                }
            }
            Err(e) => return Err(e.into()),
        }
    }

    let scope = keys
        .iter()
        .map(|k| k.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    error!(keys = %scope, attempts = attempts, "Transaction aborted after repeated conflicts");
    Err(AppError::Internal(format!(
        "transaction on [{}] aborted after {} attempts",
        scope, attempts
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::{MemoryStore, Query, StoredDocument};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Store whose commits always conflict.
    struct AlwaysConflicting {
        commits: AtomicU32,
    }

    #[async_trait]
    impl DocumentStore for AlwaysConflicting {
        async fn read_versioned(&self, key: &DocKey) -> Result<Versioned, StoreError> {
            Ok(Versioned {
                key: key.clone(),
                data: None,
                version: 0,
            })
        }

        async fn commit(
            &self,
            _preconditions: &[(DocKey, u64)],
            writes: &[Write],
        ) -> Result<(), StoreError> {
            self.commits.fetch_add(1, Ordering::SeqCst);
            let key = writes[0].key();
            Err(StoreError::conflict(&key.collection, &key.id))
        }

        async fn query(&self, _query: &Query) -> Result<Vec<StoredDocument>, StoreError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_internal() {
        let store = AlwaysConflicting {
            commits: AtomicU32::new(0),
        };
        let retry = RetryPolicy {
            max_attempts: 3,
            backoff_ms: 0,
        };
        let key = DocKey::new("counters", "c1");

        let result = run_transaction(&store, &retry, &[key.clone()], |_reads, writes| {
            writes.set(key.clone(), json!({"n": 1}).as_object().cloned().unwrap());
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(AppError::Internal(_))));
        assert_eq!(store.commits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_read_only_body_skips_commit() {
        let store = MemoryStore::new();
        let key = DocKey::new("users", "missing");
        let found = run_transaction(&store, &RetryPolicy::default(), &[key.clone()], |reads, _| {
            Ok(reads.exists(&key))
        })
        .await
        .unwrap();
        assert!(!found);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_serialize() {
        let store = Arc::new(MemoryStore::new());
        let retry = RetryPolicy {
            max_attempts: 50,
            backoff_ms: 1,
        };

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            let retry = retry.clone();
            handles.push(tokio::spawn(async move {
                let key = DocKey::new("counters", "shared");
                run_transaction(store.as_ref(), &retry, &[key.clone()], |reads, writes| {
                    let n = reads
                        .get(&key)
                        .and_then(|d| d.get("n"))
                        .and_then(|v| v.as_u64())
                        .unwrap_or(0);
                    writes.set(key.clone(), json!({"n": n + 1}).as_object().cloned().unwrap());
                    Ok(())
                })
                .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let doc = store.get("counters", "shared").await.unwrap().unwrap();
        assert_eq!(doc["n"], json!(16));
    }
}
