//! Aggregate storage boundary: id -> full nested plan document.
//!
//! The store is unconditional; optimistic concurrency is layered
//! entirely in [`crate::service::PlanService`] using fingerprints
//! computed from the retrieved value.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;

use crate::{metrics, Result};

#[async_trait]
pub trait AggregateStore: Send + Sync {
    async fn exists(&self, id: &str) -> Result<bool>;
    async fn get(&self, id: &str) -> Result<Option<Value>>;
    async fn put(&self, id: &str, doc: &Value) -> Result<()>;
    /// Returns whether a document was present.
    async fn delete(&self, id: &str) -> Result<bool>;
    async fn list_all(&self) -> Result<HashMap<String, Value>>;
}

/// Postgres-backed aggregate store over the `plans` table.
#[derive(Clone)]
pub struct PgAggregates {
    pub(crate) pool: PgPool,
}

impl PgAggregates {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AggregateStore for PgAggregates {
    async fn exists(&self, id: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("select exists (select 1 from plans where id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn get(&self, id: &str) -> Result<Option<Value>> {
        let row: Option<(Value,)> = sqlx::query_as("select doc from plans where id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        if row.is_some() {
            metrics::record_plan_read();
        }
        Ok(row.map(|(doc,)| doc))
    }

    async fn put(&self, id: &str, doc: &Value) -> Result<()> {
        sqlx::query(
            r#"
            insert into plans (id, doc)
            values ($1, $2)
            on conflict (id) do update
              set doc = excluded.doc,
                  updated_at = now()
            "#,
        )
        .bind(id)
        .bind(doc)
        .execute(&self.pool)
        .await?;
        metrics::record_plan_write();
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("delete from plans where id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_all(&self) -> Result<HashMap<String, Value>> {
        let rows: Vec<(String, Value)> = sqlx::query_as("select id, doc from plans")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().collect())
    }
}
