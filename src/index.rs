//! Parent-child indexed document store boundary.
//!
//! A document's indexed identity is `(objectId, parent)`; roots carry
//! no parent. `routing` holds the ancestor id used for shard
//! colocation: direct children of a plan route by the plan id,
//! grandchildren by their linked plan service id.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;

use crate::{metrics, model::DocKind, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexedDocument {
    pub kind: DocKind,
    pub id: String,
    pub parent_id: Option<String>,
    pub routing: Option<String>,
    pub body: Value,
}

impl IndexedDocument {
    pub fn root(kind: DocKind, id: impl Into<String>, body: Value) -> Self {
        Self {
            kind,
            id: id.into(),
            parent_id: None,
            routing: None,
            body,
        }
    }

    pub fn child(
        kind: DocKind,
        id: impl Into<String>,
        parent_id: impl Into<String>,
        routing: impl Into<String>,
        body: Value,
    ) -> Self {
        Self {
            kind,
            id: id.into(),
            parent_id: Some(parent_id.into()),
            routing: Some(routing.into()),
            body,
        }
    }
}

#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Idempotent full-document replace on `(id, parent)`.
    async fn upsert(&self, doc: &IndexedDocument) -> Result<()>;
    /// Remove a document by id under any parent. Absent ids are a no-op.
    async fn delete(&self, id: &str) -> Result<()>;
    /// Remove every document of a kind under one parent.
    async fn delete_by_parent(&self, kind: DocKind, parent_id: &str) -> Result<()>;
    async fn ids_by_parent(&self, kind: DocKind, parent_id: &str) -> Result<Vec<String>>;
}

/// Postgres-backed index over the `search_docs` table.
///
/// The parent key is stored as an empty string for roots so the
/// `(id, parent)` identity stays enforceable by a primary key.
#[derive(Clone)]
pub struct PgSearchIndex {
    pool: PgPool,
}

impl PgSearchIndex {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Total indexed documents; test and diagnostics helper.
    pub async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("select count(*) from search_docs")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl SearchIndex for PgSearchIndex {
    async fn upsert(&self, doc: &IndexedDocument) -> Result<()> {
        sqlx::query(
            r#"
            insert into search_docs (id, parent, kind, routing, doc)
            values ($1, coalesce($2, ''), $3, $4, $5)
            on conflict (id, parent) do update
              set kind = excluded.kind,
                  routing = excluded.routing,
                  doc = excluded.doc,
                  updated_at = now()
            "#,
        )
        .bind(&doc.id)
        .bind(doc.parent_id.as_deref())
        .bind(doc.kind.as_str())
        .bind(doc.routing.as_deref())
        .bind(&doc.body)
        .execute(&self.pool)
        .await?;
        metrics::record_index_upsert();
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("delete from search_docs where id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        metrics::record_index_delete();
        Ok(())
    }

    async fn delete_by_parent(&self, kind: DocKind, parent_id: &str) -> Result<()> {
        sqlx::query("delete from search_docs where kind = $1 and parent = $2")
            .bind(kind.as_str())
            .bind(parent_id)
            .execute(&self.pool)
            .await?;
        metrics::record_index_delete();
        Ok(())
    }

    async fn ids_by_parent(&self, kind: DocKind, parent_id: &str) -> Result<Vec<String>> {
        let ids: Vec<String> =
            sqlx::query_scalar("select id from search_docs where kind = $1 and parent = $2")
                .bind(kind.as_str())
                .bind(parent_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(ids)
    }
}
