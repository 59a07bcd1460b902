use std::sync::Arc;

use anyhow::Result;
use planflow::{
    channel::{ChangeEvent, Operation},
    index::SearchIndex,
    indexer::DocumentIndexer,
    model::DocKind,
    testing::{MemoryChannel, MemoryIndex},
    Error,
};
use serde_json::{json, Value};

fn sample_plan(id: &str) -> Value {
    json!({
        "planCostShares": {
            "deductible": 2000,
            "_org": "example.com",
            "copay": 23,
            "objectId": format!("{id}-cost"),
            "objectType": "membercostshare"
        },
        "linkedPlanServices": [
            {
                "linkedService": {
                    "_org": "example.com",
                    "objectId": "svc1",
                    "objectType": "service",
                    "name": "Yearly physical"
                },
                "planserviceCostShares": {
                    "deductible": 10,
                    "_org": "example.com",
                    "copay": 0,
                    "objectId": "psc1",
                    "objectType": "membercostshare"
                },
                "_org": "example.com",
                "objectId": "lps1",
                "objectType": "planservice"
            },
            {
                "linkedService": {
                    "_org": "example.com",
                    "objectId": "svc2",
                    "objectType": "service",
                    "name": "Well baby"
                },
                "planserviceCostShares": {
                    "deductible": 10,
                    "_org": "example.com",
                    "copay": 175,
                    "objectId": "psc2",
                    "objectType": "membercostshare"
                },
                "_org": "example.com",
                "objectId": "lps2",
                "objectType": "planservice"
            }
        ],
        "_org": "example.com",
        "objectId": id,
        "objectType": "plan",
        "planType": "inNetwork",
        "creationDate": "2023-12-12"
    })
}

fn indexer_over(index: &MemoryIndex) -> DocumentIndexer {
    DocumentIndexer::new(Arc::new(index.clone()))
}

#[tokio::test]
async fn create_decomposes_the_aggregate_into_the_graph() -> Result<()> {
    let index = MemoryIndex::new();
    let indexer = indexer_over(&index);

    let event = ChangeEvent::new(Operation::Create, sample_plan("p1"));
    indexer.apply(&event).await?;

    // Root + cost shares + 2 services, each with 2 grandchildren.
    assert_eq!(index.count(), 8);

    let root = index.get("p1", None).unwrap();
    assert_eq!(root.kind, DocKind::Plan);
    assert_eq!(root.parent_id, None);
    assert_eq!(root.routing, None);
    assert_eq!(root.body["join_field"], json!({"name": "plan"}));

    // Direct children route by the plan id.
    let cost = index.get("p1-cost", Some("p1")).unwrap();
    assert_eq!(cost.kind, DocKind::PlanCostShares);
    assert_eq!(cost.routing.as_deref(), Some("p1"));
    assert_eq!(
        cost.body["join_field"],
        json!({"name": "planCostShares", "parent": "p1"})
    );

    let lps = index.get("lps1", Some("p1")).unwrap();
    assert_eq!(lps.kind, DocKind::LinkedPlanServices);
    assert_eq!(lps.routing.as_deref(), Some("p1"));

    // Grandchildren route by their linked plan service id.
    let svc = index.get("svc2", Some("lps2")).unwrap();
    assert_eq!(svc.kind, DocKind::LinkedService);
    assert_eq!(svc.routing.as_deref(), Some("lps2"));
    assert_eq!(
        svc.body["join_field"],
        json!({"name": "linkedService", "parent": "lps2"})
    );

    let psc = index.get("psc1", Some("lps1")).unwrap();
    assert_eq!(psc.kind, DocKind::PlanserviceCostShares);
    assert_eq!(psc.routing.as_deref(), Some("lps1"));
    Ok(())
}

#[tokio::test]
async fn reprocessing_the_same_event_changes_nothing() -> Result<()> {
    let index = MemoryIndex::new();
    let indexer = indexer_over(&index);

    let event = ChangeEvent::new(Operation::Create, sample_plan("p1"));
    indexer.apply(&event).await?;
    indexer.apply(&event).await?;
    indexer.apply(&event).await?;

    assert_eq!(index.count(), 8);
    Ok(())
}

#[tokio::test]
async fn update_clears_stale_children_before_reindexing() -> Result<()> {
    let index = MemoryIndex::new();
    let indexer = indexer_over(&index);

    indexer
        .apply(&ChangeEvent::new(Operation::Create, sample_plan("p1")))
        .await?;
    assert!(index.get("svc1", Some("lps1")).is_some());

    // The updated aggregate renames lps1's linked service.
    let mut updated = sample_plan("p1");
    updated["linkedPlanServices"][0]["linkedService"]["objectId"] = json!("svc1-renamed");
    indexer
        .apply(&ChangeEvent::new(Operation::Update, updated))
        .await?;

    assert!(index.get("svc1", Some("lps1")).is_none());
    assert!(index.get("svc1-renamed", Some("lps1")).is_some());
    assert_eq!(index.count(), 8);
    Ok(())
}

#[tokio::test]
async fn update_purges_services_dropped_from_the_aggregate() -> Result<()> {
    let index = MemoryIndex::new();
    let indexer = indexer_over(&index);

    indexer
        .apply(&ChangeEvent::new(Operation::Create, sample_plan("p1")))
        .await?;
    assert_eq!(index.count(), 8);

    // The replacement aggregate keeps only the first service.
    let mut updated = sample_plan("p1");
    updated["linkedPlanServices"]
        .as_array_mut()
        .unwrap()
        .truncate(1);
    indexer
        .apply(&ChangeEvent::new(Operation::Update, updated))
        .await?;

    assert_eq!(index.count(), 5);
    assert!(index.get("lps2", Some("p1")).is_none());
    assert!(index.get("svc2", Some("lps2")).is_none());
    assert!(index.get("psc2", Some("lps2")).is_none());
    assert!(index.get("lps1", Some("p1")).is_some());
    assert!(index.get("svc1", Some("lps1")).is_some());
    Ok(())
}

#[tokio::test]
async fn update_moves_a_renamed_service_subtree() -> Result<()> {
    let index = MemoryIndex::new();
    let indexer = indexer_over(&index);

    indexer
        .apply(&ChangeEvent::new(Operation::Create, sample_plan("p1")))
        .await?;

    let mut updated = sample_plan("p1");
    updated["linkedPlanServices"][0]["objectId"] = json!("lps9");
    indexer
        .apply(&ChangeEvent::new(Operation::Update, updated))
        .await?;

    // Nothing survives under the old service id.
    assert!(index.get("lps1", Some("p1")).is_none());
    assert!(index.get("svc1", Some("lps1")).is_none());
    assert!(index.get("psc1", Some("lps1")).is_none());
    assert!(index.get("lps9", Some("p1")).is_some());
    assert!(index.get("svc1", Some("lps9")).is_some());
    assert!(index.get("psc1", Some("lps9")).is_some());
    assert_eq!(index.count(), 8);
    Ok(())
}

#[tokio::test]
async fn delete_cascades_through_every_level() -> Result<()> {
    let index = MemoryIndex::new();
    let indexer = indexer_over(&index);

    let document = sample_plan("p1");
    indexer
        .apply(&ChangeEvent::new(Operation::Create, document.clone()))
        .await?;
    assert_eq!(index.count(), 8);

    indexer
        .apply(&ChangeEvent::new(Operation::Delete, document))
        .await?;

    assert_eq!(index.count(), 0);
    assert!(index
        .ids_by_parent(DocKind::PlanCostShares, "p1")
        .await?
        .is_empty());
    assert!(index
        .ids_by_parent(DocKind::LinkedPlanServices, "p1")
        .await?
        .is_empty());
    for lps in ["lps1", "lps2"] {
        assert!(index.ids_by_parent(DocKind::LinkedService, lps).await?.is_empty());
        assert!(index
            .ids_by_parent(DocKind::PlanserviceCostShares, lps)
            .await?
            .is_empty());
    }
    Ok(())
}

#[tokio::test]
async fn redelivered_delete_is_a_noop() -> Result<()> {
    let index = MemoryIndex::new();
    let indexer = indexer_over(&index);

    let document = sample_plan("p1");
    indexer
        .apply(&ChangeEvent::new(Operation::Create, document.clone()))
        .await?;
    let delete = ChangeEvent::new(Operation::Delete, document);
    indexer.apply(&delete).await?;
    indexer.apply(&delete).await?;

    assert_eq!(index.count(), 0);
    Ok(())
}

#[tokio::test]
async fn an_event_without_object_id_is_rejected() {
    let index = MemoryIndex::new();
    let indexer = indexer_over(&index);

    let event = ChangeEvent::new(Operation::Create, json!({"planType": "inNetwork"}));
    let err = indexer.apply(&event).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(index.count(), 0);
}

#[tokio::test]
async fn drain_skips_malformed_events_and_keeps_going() -> Result<()> {
    let index = MemoryIndex::new();
    let indexer = indexer_over(&index);
    let channel = MemoryChannel::new();

    use planflow::channel::EventChannel;
    channel
        .publish(&ChangeEvent::new(
            Operation::Create,
            json!({"planType": "broken"}),
        ))
        .await?;
    channel
        .publish(&ChangeEvent::new(Operation::Create, sample_plan("p1")))
        .await?;

    let mut consumer = channel.consumer();
    let processed = indexer.drain(&mut consumer).await?;

    // Both events are consumed; only the well-formed one lands.
    assert_eq!(processed, 2);
    assert!(channel.is_empty());
    assert_eq!(index.count(), 8);
    Ok(())
}
