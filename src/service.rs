//! Plan aggregate orchestration: the only surface callers interact
//! with. Layers credential checks, validation, fingerprint
//! preconditions, and change publication over the unconditional
//! aggregate store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::time::sleep;

use crate::{
    aggregates::AggregateStore,
    channel::{ChangeEvent, EventChannel, Operation},
    error::{Error, ValidationErrors},
    fingerprint::{fingerprint, structurally_equal},
    metrics,
    model::Plan,
    validate::{validate_plan, validate_plan_partial},
    Result,
};

/// Conditional-request tokens supplied by the caller.
#[derive(Clone, Debug, Default)]
pub struct Preconditions {
    pub if_match: Option<String>,
    pub if_none_match: Option<String>,
}

impl Preconditions {
    pub fn if_match(etag: impl Into<String>) -> Self {
        Self {
            if_match: Some(etag.into()),
            ..Self::default()
        }
    }

    pub fn if_none_match(etag: impl Into<String>) -> Self {
        Self {
            if_none_match: Some(etag.into()),
            ..Self::default()
        }
    }
}

/// Outcome of a conditional read.
#[derive(Clone, Debug)]
pub enum Retrieval {
    Document { document: Value, etag: String },
    NotModified,
}

/// Outcome of a successful create/update/patch.
#[derive(Clone, Debug)]
pub struct Mutated {
    pub id: String,
    pub etag: String,
}

pub struct PlanService {
    store: Arc<dyn AggregateStore>,
    channel: Arc<dyn EventChannel>,
    publish_retries: u32,
    publish_backoff: Duration,
}

impl PlanService {
    pub fn new(store: Arc<dyn AggregateStore>, channel: Arc<dyn EventChannel>) -> Self {
        Self {
            store,
            channel,
            publish_retries: 3,
            publish_backoff: Duration::from_millis(50),
        }
    }

    /// Override the background publisher's retry budget and base backoff.
    pub fn with_publish_policy(mut self, retries: u32, base_backoff: Duration) -> Self {
        self.publish_retries = retries;
        self.publish_backoff = base_backoff;
        self
    }

    /// Bearer-credential check. Runs first in every operation, before
    /// any validation or lookup.
    fn authorize(&self, bearer: Option<&str>) -> Result<()> {
        match bearer {
            Some(header) if header.starts_with("Bearer ") => Ok(()),
            _ => Err(Error::Unauthenticated),
        }
    }

    /// Every stored aggregate keyed by id. Unconditioned.
    pub async fn list(&self, bearer: Option<&str>) -> Result<HashMap<String, Value>> {
        self.authorize(bearer)?;
        self.store.list_all().await
    }

    pub async fn retrieve(
        &self,
        bearer: Option<&str>,
        id: &str,
        preconditions: &Preconditions,
    ) -> Result<Retrieval> {
        self.authorize(bearer)?;
        let document = self.store.get(id).await?.ok_or(Error::NotFound)?;
        let etag = fingerprint(&document);

        if preconditions.if_none_match.as_deref() == Some(etag.as_str()) {
            return Ok(Retrieval::NotModified);
        }
        if let Some(expected) = preconditions.if_match.as_deref() {
            if expected != etag {
                metrics::record_precondition_failure();
                return Err(Error::PreconditionFailed);
            }
        }
        Ok(Retrieval::Document { document, etag })
    }

    pub async fn create(&self, bearer: Option<&str>, body: &Value) -> Result<Mutated> {
        self.authorize(bearer)?;
        let document = Value::Object(validate_plan(body)?);
        // Validation guarantees the full aggregate shape, so stored
        // documents always deserialize into the typed model.
        let plan: Plan = serde_json::from_value(document.clone())?;

        if self.store.exists(&plan.object_id).await? {
            return Err(Error::Conflict { id: plan.object_id });
        }

        let etag = fingerprint(&document);
        self.store.put(&plan.object_id, &document).await?;
        self.publish_background(Operation::Create, document);
        Ok(Mutated {
            id: plan.object_id,
            etag,
        })
    }

    /// Full replace. Requires a complete payload; the stored value is
    /// discarded, so the immutable-objectId check does not apply here
    /// (only `patch` enforces it).
    pub async fn update(
        &self,
        bearer: Option<&str>,
        id: &str,
        body: &Value,
        preconditions: &Preconditions,
    ) -> Result<Mutated> {
        self.authorize(bearer)?;
        let current = self.store.get(id).await?.ok_or(Error::NotFound)?;
        self.check_if_match(&current, preconditions)?;

        let document = Value::Object(validate_plan(body)?);
        let etag = fingerprint(&document);
        self.store.put(id, &document).await?;
        self.publish_background(Operation::Update, document);
        Ok(Mutated {
            id: id.to_string(),
            etag,
        })
    }

    /// Merge a partial payload into the stored aggregate and apply the
    /// result as a single atomic put.
    pub async fn patch(
        &self,
        bearer: Option<&str>,
        id: &str,
        body: &Value,
        preconditions: &Preconditions,
    ) -> Result<Mutated> {
        self.authorize(bearer)?;
        let current = self.store.get(id).await?.ok_or(Error::NotFound)?;
        self.check_if_match(&current, preconditions)?;

        let mut partial = validate_plan_partial(body)?;

        if let Some(incoming) = partial.get("planCostShares") {
            let incoming_id = incoming.get("objectId").and_then(Value::as_str);
            let stored_id = current
                .get("planCostShares")
                .and_then(|cs| cs.get("objectId"))
                .and_then(Value::as_str);
            if incoming_id.is_some() && incoming_id != stored_id {
                return Err(Error::Validation(ValidationErrors::single(
                    "planCostShares.objectId",
                    "updating objectId is not allowed",
                )));
            }
        }

        let mut merged = match current {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        // Append-only merge: existing entries are never altered or
        // dropped; an incoming entry is appended only when no entry so
        // far is structurally identical to it.
        if let Some(Value::Array(incoming)) = partial.remove("linkedPlanServices") {
            let mut services = match merged.get("linkedPlanServices") {
                Some(Value::Array(existing)) => existing.clone(),
                _ => Vec::new(),
            };
            for entry in incoming {
                if !services.iter().any(|known| structurally_equal(known, &entry)) {
                    services.push(entry);
                }
            }
            merged.insert("linkedPlanServices".to_string(), Value::Array(services));
        }

        // Remaining fields shallow-merge, incoming overwrites stored.
        for (key, value) in partial {
            merged.insert(key, value);
        }

        let document = Value::Object(merged);
        let etag = fingerprint(&document);
        self.store.put(id, &document).await?;
        self.publish_background(Operation::Update, document);
        Ok(Mutated {
            id: id.to_string(),
            etag,
        })
    }

    pub async fn delete(
        &self,
        bearer: Option<&str>,
        id: &str,
        preconditions: &Preconditions,
    ) -> Result<()> {
        self.authorize(bearer)?;
        let document = self.store.get(id).await?.ok_or(Error::NotFound)?;
        let etag = fingerprint(&document);

        if let Some(expected) = preconditions.if_match.as_deref() {
            if expected != etag {
                metrics::record_precondition_failure();
                return Err(Error::PreconditionFailed);
            }
        }
        // Delete is refused when the caller explicitly expects the
        // resource to already be stale.
        if preconditions.if_none_match.as_deref() == Some(etag.as_str()) {
            metrics::record_precondition_failure();
            return Err(Error::PreconditionFailed);
        }

        self.store.delete(id).await?;
        // Full last-known document, so the indexer can locate all
        // descendants during the cascade.
        self.publish_background(Operation::Delete, document);
        Ok(())
    }

    fn check_if_match(&self, current: &Value, preconditions: &Preconditions) -> Result<()> {
        if let Some(expected) = preconditions.if_match.as_deref() {
            if expected != fingerprint(current) {
                metrics::record_precondition_failure();
                return Err(Error::PreconditionFailed);
            }
        }
        Ok(())
    }

    /// Fire-and-forget publication: the store is authoritative and the
    /// index is a derived view, so a publish failure never rolls back
    /// the mutation. It is retried with backoff off the request path,
    /// then logged and counted.
    fn publish_background(&self, operation: Operation, document: Value) {
        let channel = Arc::clone(&self.channel);
        let retries = self.publish_retries;
        let base_backoff = self.publish_backoff;
        tokio::spawn(async move {
            let event = ChangeEvent::new(operation, document);
            let mut backoff = base_backoff;
            for attempt in 0..=retries {
                match channel.publish(&event).await {
                    Ok(()) => return,
                    Err(err) if attempt == retries => {
                        metrics::record_publish_failure();
                        tracing::warn!(
                            target: "planflow::publish",
                            operation = event.operation.as_str(),
                            object_id = event.object_id().unwrap_or(""),
                            error = %err,
                            "change event publish failed; index will lag until replay"
                        );
                        return;
                    }
                    Err(_) => {
                        sleep(backoff).await;
                        backoff = (backoff * 2).min(Duration::from_secs(2));
                    }
                }
            }
        });
    }
}
