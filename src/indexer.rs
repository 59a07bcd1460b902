//! Change-feed consumer that keeps the parent-child index eventually
//! consistent with the aggregate store.
//!
//! One consumer, one event at a time, in publish order. Every step is
//! written to tolerate at-least-once redelivery: upserts replace by
//! `(id, parent)` and deleting an absent document is a no-op.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::sleep;

use crate::{
    channel::{ChangeEvent, EventConsumer, Operation},
    error::{Error, ValidationErrors},
    index::{IndexedDocument, SearchIndex},
    metrics,
    model::DocKind,
    Result,
};

#[derive(Clone, Debug)]
pub struct IndexerOptions {
    pub poll_interval: Duration,
}

impl Default for IndexerOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
        }
    }
}

pub struct DocumentIndexer {
    index: Arc<dyn SearchIndex>,
}

impl DocumentIndexer {
    pub fn new(index: Arc<dyn SearchIndex>) -> Self {
        Self { index }
    }

    /// Apply one change event to the index.
    pub async fn apply(&self, event: &ChangeEvent) -> Result<()> {
        let object_id = event.object_id().ok_or_else(|| {
            Error::Validation(ValidationErrors::single(
                "objectId",
                "change event document has no objectId",
            ))
        })?;

        match event.operation {
            Operation::Delete => self.remove_plan(object_id).await,
            Operation::Create | Operation::Update => {
                self.index_plan(object_id, &event.document).await
            }
        }
    }

    /// Decompose the aggregate depth-first and upsert each constituent
    /// as an independently addressable document. Direct children route
    /// by the plan id, grandchildren by their linked plan service id.
    async fn index_plan(&self, plan_id: &str, document: &Value) -> Result<()> {
        let services: Vec<&Value> = document
            .get("linkedPlanServices")
            .and_then(Value::as_array)
            .map(|items| items.iter().collect())
            .unwrap_or_default();
        // Resolve every service id up front; a malformed sub-document
        // fails the event before any index mutation.
        let mut service_ids = Vec::with_capacity(services.len());
        for service in &services {
            service_ids.push(child_id(service, "linkedPlanServices.objectId")?);
        }

        self.index
            .upsert(&IndexedDocument::root(
                DocKind::Plan,
                plan_id,
                tagged(document, DocKind::Plan, None),
            ))
            .await?;

        // Clear previously indexed direct cost shares first so a
        // changed child objectId cannot strand an orphan.
        self.index
            .delete_by_parent(DocKind::PlanCostShares, plan_id)
            .await?;
        if let Some(cost_shares) = document.get("planCostShares") {
            let id = child_id(cost_shares, "planCostShares")?;
            self.index
                .upsert(&IndexedDocument::child(
                    DocKind::PlanCostShares,
                    id,
                    plan_id,
                    plan_id,
                    tagged(cost_shares, DocKind::PlanCostShares, Some(plan_id)),
                ))
                .await?;
        }

        // Services dropped or renamed since the last pass take their
        // subtrees with them.
        let previous = self
            .index
            .ids_by_parent(DocKind::LinkedPlanServices, plan_id)
            .await?;
        for stale in previous.iter().filter(|id| !service_ids.contains(*id)) {
            for child in DocKind::LinkedPlanServices.children() {
                self.index.delete_by_parent(*child, stale).await?;
            }
        }
        self.index
            .delete_by_parent(DocKind::LinkedPlanServices, plan_id)
            .await?;

        for (service, service_id) in services.iter().copied().zip(service_ids.iter()) {
            for child in DocKind::LinkedPlanServices.children() {
                self.index.delete_by_parent(*child, service_id).await?;
            }

            self.index
                .upsert(&IndexedDocument::child(
                    DocKind::LinkedPlanServices,
                    service_id,
                    plan_id,
                    plan_id,
                    tagged(service, DocKind::LinkedPlanServices, Some(plan_id)),
                ))
                .await?;

            if let Some(linked) = service.get("linkedService") {
                let id = child_id(linked, "linkedService")?;
                self.index
                    .upsert(&IndexedDocument::child(
                        DocKind::LinkedService,
                        id,
                        service_id,
                        service_id,
                        tagged(linked, DocKind::LinkedService, Some(service_id.as_str())),
                    ))
                    .await?;
            }

            if let Some(cost_shares) = service.get("planserviceCostShares") {
                let id = child_id(cost_shares, "planserviceCostShares")?;
                self.index
                    .upsert(&IndexedDocument::child(
                        DocKind::PlanserviceCostShares,
                        id,
                        service_id,
                        service_id,
                        tagged(
                            cost_shares,
                            DocKind::PlanserviceCostShares,
                            Some(service_id.as_str()),
                        ),
                    ))
                    .await?;
            }
        }

        Ok(())
    }

    /// Cascading removal. Children go before the root so a crash
    /// mid-cascade leaves the root as the visible marker of an
    /// incomplete deletion rather than orphaning children.
    async fn remove_plan(&self, plan_id: &str) -> Result<()> {
        self.index
            .delete_by_parent(DocKind::PlanCostShares, plan_id)
            .await?;

        let service_ids = self
            .index
            .ids_by_parent(DocKind::LinkedPlanServices, plan_id)
            .await?;
        self.index
            .delete_by_parent(DocKind::LinkedPlanServices, plan_id)
            .await?;

        for service_id in &service_ids {
            for child in DocKind::LinkedPlanServices.children() {
                self.index.delete_by_parent(*child, service_id).await?;
            }
        }

        self.index.delete(plan_id).await
    }

    /// Consume the feed until it is empty; returns the number of events
    /// processed. Used for catch-up runs and deterministic tests.
    pub async fn drain<C: EventConsumer>(&self, consumer: &mut C) -> Result<u64> {
        let mut processed = 0u64;
        while let Some(event) = consumer.next().await? {
            self.process(&event).await;
            consumer.commit().await?;
            processed += 1;
        }
        Ok(processed)
    }

    /// Long-running single-consumer loop. Feed errors are logged and
    /// retried after the poll interval; a malformed event is skipped
    /// rather than blocking the queue.
    pub async fn run<C: EventConsumer>(&self, mut consumer: C, options: IndexerOptions) {
        loop {
            match consumer.next().await {
                Ok(Some(event)) => {
                    self.process(&event).await;
                    if let Err(err) = consumer.commit().await {
                        tracing::warn!(
                            target: "planflow::indexer",
                            error = %err,
                            "checkpoint commit failed; event may be redelivered"
                        );
                        sleep(options.poll_interval).await;
                    }
                }
                Ok(None) => sleep(options.poll_interval).await,
                Err(err) => {
                    tracing::warn!(
                        target: "planflow::indexer",
                        error = %err,
                        "change feed read failed"
                    );
                    sleep(options.poll_interval).await;
                }
            }
        }
    }

    async fn process(&self, event: &ChangeEvent) {
        match self.apply(event).await {
            Ok(()) => {
                metrics::record_indexer_event();
                tracing::info!(
                    target: "planflow::indexer",
                    operation = event.operation.as_str(),
                    object_id = event.object_id().unwrap_or(""),
                    "processed change event"
                );
            }
            Err(err) => {
                metrics::record_indexer_skip();
                tracing::warn!(
                    target: "planflow::indexer",
                    operation = event.operation.as_str(),
                    error = %err,
                    "skipping malformed change event"
                );
            }
        }
    }
}

fn child_id(value: &Value, path: &str) -> Result<String> {
    value
        .get("objectId")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            Error::Validation(ValidationErrors::single(path, "sub-document has no objectId"))
        })
}

/// Clone a sub-document with the polymorphic join relation attached,
/// mirroring how the indexed store links parents and children.
fn tagged(body: &Value, kind: DocKind, parent: Option<&str>) -> Value {
    let mut out = body.clone();
    if let Some(map) = out.as_object_mut() {
        let join = match parent {
            Some(parent) => serde_json::json!({"name": kind.as_str(), "parent": parent}),
            None => serde_json::json!({"name": kind.as_str()}),
        };
        map.insert("join_field".to_string(), join);
    }
    out
}
