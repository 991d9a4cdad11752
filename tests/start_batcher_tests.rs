//! Flow start fan-out: batch partitioning, routing, empty audiences and
//! enqueue failures

mod common;

use std::collections::BTreeSet;

use common::*;
use mailroom::messaging::TaskPriority;
use mailroom::models::{FlowStartBatch, FlowType, NewFlowStart};
use mailroom::orchestration::BatchingOutcome;
use mailroom::state_machine::StartStatus;

fn seeded_store(count: i64) -> MemoryStore {
    let store = MemoryStore::new();
    for id in 1..=count {
        store.add_contact(id, &format!("Contact {id}"));
    }
    store
}

fn queued_batches(queue: &MockQueue) -> Vec<FlowStartBatch> {
    queue
        .pushed()
        .into_iter()
        .map(|(_, task)| serde_json::from_value(task.payload).unwrap())
        .collect()
}

#[tokio::test]
async fn test_audience_is_split_into_ordered_batches() {
    let store = seeded_store(250);
    let p = Pipeline::new(store.clone(), MockSearchIndex::default(), MockQueue::default());
    let start = store.insert_start(new_start(&ids(1..=250)), FlowType::Messaging);

    let outcome = p.batcher.create_flow_batches(&assets(), &start).await.unwrap();

    let BatchingOutcome::Queued {
        contact_count,
        batch_count,
        failed_batches,
        route,
        status,
        ..
    } = outcome
    else {
        panic!("expected batches to be queued, got {outcome:?}");
    };
    assert_eq!(contact_count, 250);
    assert_eq!(batch_count, 3);
    assert_eq!(failed_batches, 0);
    assert_eq!(route.queue, "mailroom_batch");
    assert_eq!(route.task_type, "start_flow_batch");
    assert_eq!(route.priority, TaskPriority::Default);
    assert_eq!(status, StartStatus::Starting);

    let batches = queued_batches(&p.queue);
    let sizes: Vec<usize> = batches.iter().map(|b| b.contact_ids.len()).collect();
    assert_eq!(sizes, vec![100, 100, 50]);
    let indexes: Vec<i32> = batches.iter().map(|b| b.batch_index).collect();
    assert_eq!(indexes, vec![0, 1, 2]);
    assert_eq!(batches.iter().filter(|b| b.is_last).count(), 1);
    assert!(batches[2].is_last);
    assert!(batches.iter().all(|b| b.total_contacts == 250));

    let all: BTreeSet<_> = batches.iter().flat_map(|b| b.contact_ids.clone()).collect();
    assert_eq!(all.len(), 250);

    let stored = store.start(start.id);
    assert_eq!(stored.status, StartStatus::Starting);
    assert_eq!(stored.contact_count, Some(250));
}

#[tokio::test]
async fn test_small_starts_go_to_the_handler_queue() {
    let store = seeded_store(2);
    let p = Pipeline::new(store.clone(), MockSearchIndex::default(), MockQueue::default());
    let start = store.insert_start(new_start(&ids([1, 2])), FlowType::Messaging);

    p.batcher.create_flow_batches(&assets(), &start).await.unwrap();

    let pushed = p.queue.pushed();
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0].0, "mailroom_handler");
    assert_eq!(pushed[0].1.priority, TaskPriority::High);
}

#[tokio::test]
async fn test_voice_flows_use_ivr_batches() {
    let store = seeded_store(5);
    let p = Pipeline::new(store.clone(), MockSearchIndex::default(), MockQueue::default());
    let start = store.insert_start(
        NewFlowStart {
            flow_id: IVR_FLOW,
            ..new_start(&ids(1..=5))
        },
        FlowType::Voice,
    );

    p.batcher.create_flow_batches(&assets(), &start).await.unwrap();

    let pushed = p.queue.pushed();
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0].1.task_type, "start_ivr_flow_batch");
    assert_eq!(queued_batches(&p.queue)[0].flow_type, FlowType::Voice);
}

#[tokio::test]
async fn test_empty_audience_completes_the_start() {
    let store = MemoryStore::new();
    let p = Pipeline::new(store.clone(), MockSearchIndex::default(), MockQueue::default());
    let start = store.insert_start(new_start(&ids([404])), FlowType::Messaging);

    let outcome = p.batcher.create_flow_batches(&assets(), &start).await.unwrap();

    assert_eq!(outcome, BatchingOutcome::Empty);
    assert!(p.queue.pushed().is_empty());
    let stored = store.start(start.id);
    assert_eq!(stored.status, StartStatus::Complete);
    assert_eq!(stored.contact_count, Some(0));
}

#[tokio::test]
async fn test_create_contact_adds_a_new_contact() {
    let store = MemoryStore::new();
    let p = Pipeline::new(store.clone(), MockSearchIndex::default(), MockQueue::default());
    let start = store.insert_start(
        NewFlowStart {
            create_contact: true,
            ..new_start(&[])
        },
        FlowType::Messaging,
    );

    p.batcher.create_flow_batches(&assets(), &start).await.unwrap();

    let created = store.state.lock().unwrap().created_for_start[&start.id].clone();
    assert_eq!(created.len(), 1);
    assert_eq!(queued_batches(&p.queue)[0].contact_ids, created);
}

#[tokio::test]
async fn test_failed_enqueue_drops_that_batch_only() {
    let store = seeded_store(250);
    let p = Pipeline::new(
        store.clone(),
        MockSearchIndex::default(),
        MockQueue::failing_pushes(&[1]),
    );
    let start = store.insert_start(new_start(&ids(1..=250)), FlowType::Messaging);

    let outcome = p.batcher.create_flow_batches(&assets(), &start).await.unwrap();

    let BatchingOutcome::Queued {
        failed_batches,
        dropped_contacts,
        status,
        ..
    } = outcome
    else {
        panic!("expected batches to be queued, got {outcome:?}");
    };
    assert_eq!(failed_batches, 1);
    assert_eq!(dropped_contacts, 100);
    assert_eq!(status, StartStatus::Starting);
    assert_eq!(p.queue.pushed().len(), 2);
    assert_eq!(store.start(start.id).dropped_count, 100);
}

#[tokio::test]
async fn test_start_fails_when_no_batch_is_queued() {
    let store = seeded_store(2);
    let p = Pipeline::new(
        store.clone(),
        MockSearchIndex::default(),
        MockQueue::failing_pushes(&[0]),
    );
    let start = store.insert_start(new_start(&ids([1, 2])), FlowType::Messaging);

    let outcome = p.batcher.create_flow_batches(&assets(), &start).await.unwrap();

    assert!(matches!(
        outcome,
        BatchingOutcome::Queued {
            status: StartStatus::Failed,
            ..
        }
    ));
    let stored = store.start(start.id);
    assert_eq!(stored.status, StartStatus::Failed);
    assert_eq!(stored.dropped_count, 2);
}

#[tokio::test]
async fn test_starts_are_batched_once() {
    let store = seeded_store(3);
    let p = Pipeline::new(store.clone(), MockSearchIndex::default(), MockQueue::default());
    let start = store.insert_start(new_start(&ids([1, 2, 3])), FlowType::Messaging);

    p.batcher.create_flow_batches(&assets(), &start).await.unwrap();

    // a stale copy still says pending, the store knows better
    let again = p.batcher.create_flow_batches(&assets(), &start).await.unwrap();
    assert_eq!(again, BatchingOutcome::NotPending(StartStatus::Starting));

    let current = store.start(start.id);
    let again = p.batcher.create_flow_batches(&assets(), &current).await.unwrap();
    assert_eq!(again, BatchingOutcome::NotPending(StartStatus::Starting));

    assert_eq!(p.queue.pushed().len(), 1);
}

#[tokio::test]
async fn test_invalid_query_fails_the_start() {
    let store = MemoryStore::new();
    let p = Pipeline::new(store.clone(), MockSearchIndex::default(), MockQueue::default());
    let start = store.insert_start(
        NewFlowStart {
            query: "xyz = 1".to_string(),
            ..new_start(&[])
        },
        FlowType::Messaging,
    );

    let err = p.batcher.create_flow_batches(&assets(), &start).await.unwrap_err();

    assert!(err.is_query_error());
    assert_eq!(store.start(start.id).status, StartStatus::Failed);
    assert!(p.queue.pushed().is_empty());
}

#[tokio::test]
async fn test_index_outage_leaves_the_start_pending() {
    let store = MemoryStore::new();
    let index = MockSearchIndex::default();
    index.state.lock().unwrap().fail_with_status = Some(503);
    let p = Pipeline::new(store.clone(), index, MockQueue::default());
    let start = store.insert_start(
        NewFlowStart {
            query: "age > 18".to_string(),
            ..new_start(&[])
        },
        FlowType::Messaging,
    );

    let err = p.batcher.create_flow_batches(&assets(), &start).await.unwrap_err();

    assert!(!err.is_query_error());
    assert_eq!(store.start(start.id).status, StartStatus::Pending);
}

#[tokio::test]
async fn test_query_starts_resolve_through_the_index() {
    let store = seeded_store(4);
    let index = MockSearchIndex::returning(&ids([3, 4]));
    let p = Pipeline::new(store.clone(), index, MockQueue::default());
    let start = store.insert_start(
        NewFlowStart {
            query: "age > 18".to_string(),
            restart_participants: false,
            ..new_start(&[])
        },
        FlowType::Messaging,
    );

    p.batcher.create_flow_batches(&assets(), &start).await.unwrap();

    assert_eq!(queued_batches(&p.queue)[0].contact_ids, ids([3, 4]));
    let query = p.index.bodies()[0]["query"].to_string();
    // previous participants of the flow are excluded in the index query
    assert!(query.contains(r#"{"flow_history_ids":10}"#), "{query}");
}
