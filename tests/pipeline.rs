//! Full path through the system on the in-memory boundaries: service
//! mutations feed the channel, the indexer folds the feed into the
//! parent-child view.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use planflow::{
    channel::{ChangeEvent, EventChannel, EventConsumer, Operation},
    index::SearchIndex,
    indexer::DocumentIndexer,
    model::DocKind,
    testing::{MemoryChannel, MemoryIndex, MemoryStore},
    PlanService, Preconditions,
};
use serde_json::{json, Value};

const TOKEN: Option<&str> = Some("Bearer test-token");

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
                    "objectId": format!("{id}-svc"),
                    "objectType": "service",
                    "name": "Yearly physical"
                },
                "planserviceCostShares": {
                    "deductible": 10,
                    "_org": "example.com",
                    "copay": 0,
                    "objectId": format!("{id}-psc"),
                    "objectType": "membercostshare"
                },
                "_org": "example.com",
                "objectId": format!("{id}-lps"),
                "objectType": "planservice"
            }
        ],
        "_org": "example.com",
        "objectId": id,
        "objectType": "plan",
        "planType": "inNetwork",
        "creationDate": "12-12-2023"
    })
}

async fn wait_for_events(channel: &MemoryChannel, count: usize) {
    for _ in 0..200 {
        if channel.len() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("expected {count} change events, saw {}", channel.len());
}

#[tokio::test]
async fn mutations_become_visible_in_the_index_after_a_drain() -> Result<()> {
    let store = MemoryStore::new();
    let channel = MemoryChannel::new();
    let index = MemoryIndex::new();
    let service = PlanService::new(Arc::new(store.clone()), Arc::new(channel.clone()));
    let indexer = DocumentIndexer::new(Arc::new(index.clone()));

    service.create(TOKEN, &sample_plan("p1")).await?;
    wait_for_events(&channel, 1).await;

    let mut consumer = channel.consumer();
    assert_eq!(indexer.drain(&mut consumer).await?, 1);
    assert_eq!(index.count(), 5);
    assert!(index.get("p1", None).is_some());
    assert!(index.get("p1-svc", Some("p1-lps")).is_some());

    service.delete(TOKEN, "p1", &Preconditions::default()).await?;
    wait_for_events(&channel, 1).await;

    assert_eq!(indexer.drain(&mut consumer).await?, 1);
    assert_eq!(index.count(), 0);
    Ok(())
}

#[tokio::test]
async fn events_arrive_in_publish_order() -> Result<()> {
    let store = MemoryStore::new();
    let channel = MemoryChannel::new();
    let service = PlanService::new(Arc::new(store.clone()), Arc::new(channel.clone()));

    service.create(TOKEN, &sample_plan("p1")).await?;
    wait_for_events(&channel, 1).await;
    service
        .patch(
            TOKEN,
            "p1",
            &json!({"planType": "outOfNetwork"}),
            &Preconditions::default(),
        )
        .await?;
    wait_for_events(&channel, 2).await;
    service.delete(TOKEN, "p1", &Preconditions::default()).await?;
    wait_for_events(&channel, 3).await;

    let mut consumer = channel.consumer();
    let mut seen = Vec::new();
    while let Some(event) = consumer.next().await? {
        seen.push(event.operation);
        consumer.commit().await?;
    }
    assert_eq!(
        seen,
        vec![Operation::Create, Operation::Update, Operation::Delete]
    );
    Ok(())
}

#[tokio::test]
async fn uncommitted_events_are_redelivered() -> Result<()> {
    let channel = MemoryChannel::new();
    channel
        .publish(&ChangeEvent::new(Operation::Create, sample_plan("p1")))
        .await?;

    let mut consumer = channel.consumer();
    let first = consumer.next().await?.unwrap();
    // No commit: a fresh poll sees the same event.
    let again = consumer.next().await?.unwrap();
    assert_eq!(first.object_id(), again.object_id());

    consumer.commit().await?;
    assert!(consumer.next().await?.is_none());
    Ok(())
}

#[tokio::test]
async fn depth_reports_the_unconsumed_backlog() -> Result<()> {
    let channel = MemoryChannel::new();
    assert_eq!(channel.depth("indexer").await?, 0);

    channel
        .publish(&ChangeEvent::new(Operation::Create, sample_plan("p1")))
        .await?;
    channel
        .publish(&ChangeEvent::new(Operation::Delete, sample_plan("p1")))
        .await?;
    assert_eq!(channel.depth("indexer").await?, 2);

    let index = MemoryIndex::new();
    let indexer = DocumentIndexer::new(Arc::new(index.clone()));
    let mut consumer = channel.consumer();
    indexer.drain(&mut consumer).await?;
    assert_eq!(channel.depth("indexer").await?, 0);
    Ok(())
}

#[tokio::test]
async fn publish_retries_until_the_channel_recovers() -> Result<()> {
    let store = MemoryStore::new();
    let channel = MemoryChannel::new();
    let service = PlanService::new(Arc::new(store.clone()), Arc::new(channel.clone()))
        .with_publish_policy(10, Duration::from_millis(5));

    channel.set_fail_publish(true);
    service.create(TOKEN, &sample_plan("p1")).await?;

    // Let a couple of attempts fail, then heal the channel.
    tokio::time::sleep(Duration::from_millis(12)).await;
    channel.set_fail_publish(false);
    wait_for_events(&channel, 1).await;

    let mut consumer = channel.consumer();
    let event = consumer.next().await?.unwrap();
    assert!(matches!(event.operation, Operation::Create));
    assert_eq!(event.object_id(), Some("p1"));
    Ok(())
}

#[tokio::test]
async fn the_index_follows_a_full_document_lifecycle() -> Result<()> {
    let store = MemoryStore::new();
    let channel = MemoryChannel::new();
    let index = MemoryIndex::new();
    let service = PlanService::new(Arc::new(store.clone()), Arc::new(channel.clone()));
    let indexer = DocumentIndexer::new(Arc::new(index.clone()));
    let mut consumer = channel.consumer();

    // Create, then grow the aggregate through a patch.
    service.create(TOKEN, &sample_plan("p1")).await?;
    wait_for_events(&channel, 1).await;
    indexer.drain(&mut consumer).await?;
    assert_eq!(index.count(), 5);

    let extra = json!({
        "linkedPlanServices": [
            {
                "linkedService": {
                    "_org": "example.com",
                    "objectId": "extra-svc",
                    "objectType": "service",
                    "name": "Well baby"
                },
                "planserviceCostShares": {
                    "deductible": 10,
                    "_org": "example.com",
                    "copay": 175,
                    "objectId": "extra-psc",
                    "objectType": "membercostshare"
                },
                "_org": "example.com",
                "objectId": "extra-lps",
                "objectType": "planservice"
            }
        ]
    });
    service
        .patch(TOKEN, "p1", &extra, &Preconditions::default())
        .await?;
    wait_for_events(&channel, 1).await;
    indexer.drain(&mut consumer).await?;

    assert_eq!(index.count(), 8);
    assert!(index.get("extra-svc", Some("extra-lps")).is_some());
    assert_eq!(
        index
            .ids_by_parent(DocKind::LinkedPlanServices, "p1")
            .await
            .map(|ids| ids.len())?,
        2
    );
    Ok(())
}
