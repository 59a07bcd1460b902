//! Durable FIFO change feed between the aggregate store and the indexer.
//!
//! Delivery is at-least-once: a consumer sees an event again if it
//! crashes between `next` and `commit`. Events for one channel are
//! consumed strictly in publish order, one at a time.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use std::time::Duration;
use tokio::time::sleep;

use crate::{metrics, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

/// Envelope published for every accepted mutation. Carries the full
/// aggregate (last-known on delete), never a diff.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub operation: Operation,
    pub document: Value,
}

impl ChangeEvent {
    pub fn new(operation: Operation, document: Value) -> Self {
        Self {
            operation,
            document,
        }
    }

    pub fn object_id(&self) -> Option<&str> {
        self.document.get("objectId").and_then(Value::as_str)
    }
}

#[async_trait]
pub trait EventChannel: Send + Sync {
    async fn publish(&self, event: &ChangeEvent) -> Result<()>;
    /// Unconsumed backlog, exposed as an operational signal.
    async fn depth(&self, consumer: &str) -> Result<i64>;
}

/// Single-consumer cursor over a channel.
///
/// `next` redelivers the same event until `commit` advances the
/// checkpoint past it.
#[async_trait]
pub trait EventConsumer: Send {
    /// Next undelivered event, or `None` when the feed is currently empty.
    async fn next(&mut self) -> Result<Option<ChangeEvent>>;
    /// Acknowledge the last event returned by `next`.
    async fn commit(&mut self) -> Result<()>;
}

/// Postgres-backed channel over the `change_feed` table (bigserial
/// sequence = FIFO order) with per-consumer checkpoints in
/// `change_feed_offsets`.
#[derive(Clone)]
pub struct PgChannel {
    pool: PgPool,
}

impl PgChannel {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a named consumer, resuming from its persisted checkpoint.
    pub async fn consumer(&self, name: impl Into<String>) -> Result<PgConsumer> {
        let name = name.into();
        let cursor: Option<i64> =
            sqlx::query_scalar("select last_seq from change_feed_offsets where consumer = $1")
                .bind(&name)
                .fetch_optional(&self.pool)
                .await?;
        Ok(PgConsumer {
            pool: self.pool.clone(),
            name,
            cursor: cursor.unwrap_or(0),
            delivered: None,
        })
    }
}

#[async_trait]
impl EventChannel for PgChannel {
    async fn publish(&self, event: &ChangeEvent) -> Result<()> {
        sqlx::query("insert into change_feed (operation, document) values ($1, $2)")
            .bind(event.operation.as_str())
            .bind(&event.document)
            .execute(&self.pool)
            .await?;
        metrics::record_event_published();
        Ok(())
    }

    async fn depth(&self, consumer: &str) -> Result<i64> {
        let depth: i64 = sqlx::query_scalar(
            r#"
            select count(*) from change_feed
             where seq > coalesce(
                 (select last_seq from change_feed_offsets where consumer = $1), 0)
            "#,
        )
        .bind(consumer)
        .fetch_one(&self.pool)
        .await?;
        metrics::record_channel_depth(depth.max(0) as u64);
        Ok(depth)
    }
}

pub struct PgConsumer {
    pool: PgPool,
    name: String,
    cursor: i64,
    delivered: Option<i64>,
}

impl PgConsumer {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Block until an event arrives, polling at the given interval.
    pub async fn next_blocking(&mut self, poll_interval: Duration) -> Result<ChangeEvent> {
        loop {
            if let Some(event) = self.next().await? {
                return Ok(event);
            }
            sleep(poll_interval).await;
        }
    }
}

#[async_trait]
impl EventConsumer for PgConsumer {
    async fn next(&mut self) -> Result<Option<ChangeEvent>> {
        let row: Option<(i64, String, Value)> = sqlx::query_as(
            "select seq, operation, document from change_feed where seq > $1 order by seq asc limit 1",
        )
        .bind(self.cursor)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((seq, operation, document)) => {
                let operation = match operation.as_str() {
                    "create" => Operation::Create,
                    "delete" => Operation::Delete,
                    _ => Operation::Update,
                };
                self.delivered = Some(seq);
                Ok(Some(ChangeEvent::new(operation, document)))
            }
            None => Ok(None),
        }
    }

    async fn commit(&mut self) -> Result<()> {
        let Some(seq) = self.delivered.take() else {
            return Ok(());
        };
        sqlx::query(
            r#"
            insert into change_feed_offsets (consumer, last_seq)
            values ($1, $2)
            on conflict (consumer) do update
              set last_seq = excluded.last_seq,
                  updated_at = now()
            "#,
        )
        .bind(&self.name)
        .bind(seq)
        .execute(&self.pool)
        .await?;
        self.cursor = seq;
        Ok(())
    }
}
