//! PostgreSQL document store
//!
//! Documents live in a single JSONB table keyed by `(collection, id)`. Every
//! write stamps the row with a value from the `document_versions` sequence;
//! transactional writes carry the version they read as a guard, so a stale
//! commit updates zero rows and is reported as a conflict.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder, Row};
use std::collections::HashSet;
use tracing::{debug, info};

use super::{DocKey, Document, DocumentStore, Direction, Query, StoredDocument, Versioned, Write};
use crate::error::StoreError;

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(connection_string: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(connection_string)
            .await?;

        info!("Connected to PostgreSQL document store");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<(), StoreError> {
        info!("Initializing document store schema...");

        sqlx::query("CREATE SEQUENCE IF NOT EXISTS document_versions")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                data JSONB NOT NULL,
                version BIGINT NOT NULL,
                updated_at TIMESTAMP WITH TIME ZONE DEFAULT NOW(),
                PRIMARY KEY (collection, id)
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_data ON documents USING GIN (data)")
            .execute(&self.pool)
            .await?;

        info!("Document store schema initialized");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn into_document(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        _ => Document::new(),
    }
}

#[async_trait]
impl DocumentStore for PostgresStore {
    async fn read_versioned(&self, key: &DocKey) -> Result<Versioned, StoreError> {
        let row = sqlx::query("SELECT data, version FROM documents WHERE collection = $1 AND id = $2")
            .bind(&key.collection)
            .bind(&key.id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let data: Value = row.try_get("data")?;
                let version: i64 = row.try_get("version")?;
                Ok(Versioned {
                    key: key.clone(),
                    data: Some(into_document(data)),
                    version: version as u64,
                })
            }
            None => Ok(Versioned {
                key: key.clone(),
                data: None,
                version: 0,
            }),
        }
    }

    async fn commit(
        &self,
        preconditions: &[(DocKey, u64)],
        writes: &[Write],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let written: HashSet<&DocKey> = writes.iter().map(|w| w.key()).collect();

        // Keys that were read but not written still have to be unchanged.
        for (key, expected) in preconditions {
            if written.contains(key) {
                continue;
            }
            let current: Option<i64> = sqlx::query_scalar(
                "SELECT version FROM documents WHERE collection = $1 AND id = $2 FOR SHARE",
            )
            .bind(&key.collection)
            .bind(&key.id)
            .fetch_optional(&mut *tx)
            .await?;

            if current.unwrap_or(0) as u64 != *expected {
                return Err(StoreError::conflict(&key.collection, &key.id));
            }
        }

        let expected_for = |key: &DocKey| {
            preconditions
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| *v)
        };

        // Only the first write to a key carries its guard; later writes in the
        // same commit see the row this transaction already stamped.
        let mut guarded: HashSet<&DocKey> = HashSet::new();

        for write in writes {
            let key = write.key();
            let guard = if guarded.insert(key) { expected_for(key) } else { None };

            match write {
                Write::Set { data, .. } => {
                    let data = Value::Object(data.clone());
                    let affected = match guard {
                        Some(0) => sqlx::query(
                            r#"
                            INSERT INTO documents (collection, id, data, version)
                            VALUES ($1, $2, $3, nextval('document_versions'))
                            ON CONFLICT (collection, id) DO NOTHING
                        "#,
                        )
                        .bind(&key.collection)
                        .bind(&key.id)
                        .bind(data)
                        .execute(&mut *tx)
                        .await?
                        .rows_affected(),
                        Some(version) => sqlx::query(
                            r#"
                            UPDATE documents
                            SET data = $3, version = nextval('document_versions'), updated_at = NOW()
                            WHERE collection = $1 AND id = $2 AND version = $4
                        "#,
                        )
                        .bind(&key.collection)
                        .bind(&key.id)
                        .bind(data)
                        .bind(version as i64)
                        .execute(&mut *tx)
                        .await?
                        .rows_affected(),
                        None => sqlx::query(
                            r#"
                            INSERT INTO documents (collection, id, data, version)
                            VALUES ($1, $2, $3, nextval('document_versions'))
                            ON CONFLICT (collection, id) DO UPDATE SET
                                data = EXCLUDED.data,
                                version = EXCLUDED.version,
                                updated_at = NOW()
                        "#,
                        )
                        .bind(&key.collection)
                        .bind(&key.id)
                        .bind(data)
                        .execute(&mut *tx)
                        .await?
                        .rows_affected(),
                    };

                    if affected == 0 {
                        return Err(StoreError::conflict(&key.collection, &key.id));
                    }
                }
                Write::Update { fields, .. } => {
                    let fields = Value::Object(fields.clone());
                    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                        "UPDATE documents SET data = data || ",
                    );
                    qb.push_bind(fields)
                        .push(", version = nextval('document_versions'), updated_at = NOW() WHERE collection = ")
                        .push_bind(key.collection.clone())
                        .push(" AND id = ")
                        .push_bind(key.id.clone());
                    if let Some(version) = guard {
                        qb.push(" AND version = ").push_bind(version as i64);
                    }

                    let affected = qb.build().execute(&mut *tx).await?.rows_affected();
                    if affected == 0 {
                        return Err(match guard {
                            Some(version) if version > 0 => {
                                StoreError::conflict(&key.collection, &key.id)
                            }
                            _ => StoreError::not_found(&key.collection, &key.id),
                        });
                    }
                }
                Write::Delete { .. } => {
                    let mut qb: QueryBuilder<Postgres> =
                        QueryBuilder::new("DELETE FROM documents WHERE collection = ");
                    qb.push_bind(key.collection.clone())
                        .push(" AND id = ")
                        .push_bind(key.id.clone());
                    if let Some(version) = guard {
                        qb.push(" AND version = ").push_bind(version as i64);
                    }

                    let affected = qb.build().execute(&mut *tx).await?.rows_affected();
                    if affected == 0 && matches!(guard, Some(version) if version > 0) {
                        return Err(StoreError::conflict(&key.collection, &key.id));
                    }
                }
            }
        }

        tx.commit().await?;
        debug!(writes = writes.len(), "Committed document writes");
        Ok(())
    }

    async fn query(&self, query: &Query) -> Result<Vec<StoredDocument>, StoreError> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT id, data FROM documents WHERE collection = ");
        qb.push_bind(query.collection.clone());

        for filter in &query.filters {
            qb.push(" AND data -> ")
                .push_bind(filter.field.clone())
                .push(format!(" {} ", filter.op.sql()))
                .push_bind(filter.value.clone());
        }

        qb.push(" ORDER BY ");
        for clause in &query.order_by {
            qb.push("data -> ").push_bind(clause.field.clone());
            qb.push(match clause.direction {
                Direction::Asc => " ASC, ",
                Direction::Desc => " DESC, ",
            });
        }
        qb.push("id ASC");

        if let Some(limit) = query.limit {
            qb.push(" LIMIT ").push_bind(limit as i64);
        }
        if query.offset > 0 {
            qb.push(" OFFSET ").push_bind(query.offset as i64);
        }

        let rows = qb.build().fetch_all(&self.pool).await?;

        let mut docs = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id")?;
            let data: Value = row.try_get("data")?;
            docs.push(StoredDocument {
                id,
                data: into_document(data),
            });
        }
        Ok(docs)
    }
}
