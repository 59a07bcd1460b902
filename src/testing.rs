//! Test doubles for the three external boundaries, plus a raw-SQL
//! migration helper for integration tests against a live Postgres.
//!
//! The in-memory implementations honor the same contracts as the
//! Postgres ones: unconditional aggregate puts, FIFO at-least-once
//! change delivery (`next` redelivers until `commit`), and
//! `(id, parent)` identity in the index.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{Pool, Postgres};

use crate::{
    aggregates::AggregateStore,
    channel::{ChangeEvent, EventChannel, EventConsumer},
    index::{IndexedDocument, SearchIndex},
    model::DocKind,
    Result,
};

pub async fn migrate_core_schema(pool: &Pool<Postgres>) -> Result<()> {
    let ddl = std::fs::read_to_string("sql/0001_init.sql")?;
    for stmt in split_statements(&ddl) {
        sqlx::query(&stmt).execute(pool).await?;
    }
    Ok(())
}

/// Split a DDL script on statement-terminating semicolons, leaving
/// semicolons inside `$$ ... $$` bodies alone.
fn split_statements(ddl: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut buf = String::new();
    let mut in_dollar = false;
    let mut chars = ddl.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '$' if chars.peek() == Some(&'$') => {
                in_dollar = !in_dollar;
                buf.push_str("$$");
                chars.next();
            }
            ';' if !in_dollar => {
                let stmt = buf.trim();
                if !stmt.is_empty() {
                    statements.push(stmt.to_string());
                }
                buf.clear();
            }
            _ => buf.push(ch),
        }
    }
    let tail = buf.trim();
    if !tail.is_empty() {
        statements.push(tail.to_string());
    }
    statements
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<HashMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synchronous peek at a stored document, for assertions.
    pub fn snapshot(&self, id: &str) -> Option<Value> {
        self.inner.read().expect("store poisoned").get(id).cloned()
    }
}

#[async_trait]
impl AggregateStore for MemoryStore {
    async fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.inner.read().expect("store poisoned").contains_key(id))
    }

    async fn get(&self, id: &str) -> Result<Option<Value>> {
        Ok(self.inner.read().expect("store poisoned").get(id).cloned())
    }

    async fn put(&self, id: &str, doc: &Value) -> Result<()> {
        self.inner
            .write()
            .expect("store poisoned")
            .insert(id.to_string(), doc.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self
            .inner
            .write()
            .expect("store poisoned")
            .remove(id)
            .is_some())
    }

    async fn list_all(&self) -> Result<HashMap<String, Value>> {
        Ok(self.inner.read().expect("store poisoned").clone())
    }
}

#[derive(Clone, Default)]
pub struct MemoryChannel {
    queue: Arc<Mutex<VecDeque<ChangeEvent>>>,
    fail_publish: Arc<Mutex<bool>>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn consumer(&self) -> MemoryConsumer {
        MemoryConsumer {
            queue: Arc::clone(&self.queue),
            delivered: false,
        }
    }

    /// Make subsequent publishes fail, for publisher-retry tests.
    pub fn set_fail_publish(&self, fail: bool) {
        *self.fail_publish.lock().expect("channel poisoned") = fail;
    }

    pub fn len(&self) -> usize {
        self.queue.lock().expect("channel poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventChannel for MemoryChannel {
    async fn publish(&self, event: &ChangeEvent) -> Result<()> {
        if *self.fail_publish.lock().expect("channel poisoned") {
            return Err(crate::Error::ChannelClosed);
        }
        self.queue
            .lock()
            .expect("channel poisoned")
            .push_back(event.clone());
        Ok(())
    }

    async fn depth(&self, _consumer: &str) -> Result<i64> {
        Ok(self.len() as i64)
    }
}

pub struct MemoryConsumer {
    queue: Arc<Mutex<VecDeque<ChangeEvent>>>,
    delivered: bool,
}

#[async_trait]
impl EventConsumer for MemoryConsumer {
    async fn next(&mut self) -> Result<Option<ChangeEvent>> {
        let queue = self.queue.lock().expect("channel poisoned");
        let event = queue.front().cloned();
        self.delivered = event.is_some();
        Ok(event)
    }

    async fn commit(&mut self) -> Result<()> {
        if self.delivered {
            self.queue.lock().expect("channel poisoned").pop_front();
            self.delivered = false;
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct MemoryIndex {
    inner: Arc<Mutex<HashMap<(String, String), IndexedDocument>>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.inner.lock().expect("index poisoned").len()
    }

    pub fn get(&self, id: &str, parent: Option<&str>) -> Option<IndexedDocument> {
        let key = (id.to_string(), parent.unwrap_or("").to_string());
        self.inner.lock().expect("index poisoned").get(&key).cloned()
    }

    pub fn all(&self) -> Vec<IndexedDocument> {
        self.inner
            .lock()
            .expect("index poisoned")
            .values()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl SearchIndex for MemoryIndex {
    async fn upsert(&self, doc: &IndexedDocument) -> Result<()> {
        let key = (
            doc.id.clone(),
            doc.parent_id.clone().unwrap_or_default(),
        );
        self.inner
            .lock()
            .expect("index poisoned")
            .insert(key, doc.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.inner
            .lock()
            .expect("index poisoned")
            .retain(|(doc_id, _), _| doc_id != id);
        Ok(())
    }

    async fn delete_by_parent(&self, kind: DocKind, parent_id: &str) -> Result<()> {
        self.inner
            .lock()
            .expect("index poisoned")
            .retain(|_, doc| !(doc.kind == kind && doc.parent_id.as_deref() == Some(parent_id)));
        Ok(())
    }

    async fn ids_by_parent(&self, kind: DocKind, parent_id: &str) -> Result<Vec<String>> {
        Ok(self
            .inner
            .lock()
            .expect("index poisoned")
            .values()
            .filter(|doc| doc.kind == kind && doc.parent_id.as_deref() == Some(parent_id))
            .map(|doc| doc.id.clone())
            .collect())
    }
}
