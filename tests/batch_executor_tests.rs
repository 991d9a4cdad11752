//! Batch execution through a recording flow engine

mod common;

use common::*;
use mailroom::models::{BatchCompletion, FlowStartBatch, FlowType, NewFlowStart, StartType, UserId};
use mailroom::orchestration::{ContactOutcome, FlowTrigger};
use mailroom::state_machine::StartStatus;

async fn batched(p: &Pipeline, new_start: NewFlowStart) -> Vec<FlowStartBatch> {
    let start = p.store.insert_start(new_start, FlowType::Messaging);
    p.batcher.create_flow_batches(&assets(), &start).await.unwrap();
    p.queue
        .pushed()
        .into_iter()
        .map(|(_, task)| serde_json::from_value(task.payload).unwrap())
        .collect()
}

fn pipeline(contacts: i64) -> Pipeline {
    let store = MemoryStore::new();
    for id in 1..=contacts {
        store.add_contact(id, &format!("Contact {id}"));
    }
    Pipeline::new(store, MockSearchIndex::default(), MockQueue::default())
}

#[tokio::test]
async fn test_every_contact_gets_a_session() {
    let p = pipeline(3);
    let batches = batched(&p, new_start(&ids([1, 2, 3]))).await;

    let result = p.executor.start_flow_batch(&batches[0]).await.unwrap();

    assert_eq!(result.started_count(), 3);
    assert_eq!(p.engine.started(), ids([1, 2, 3]));
    let sessions = p.store.state.lock().unwrap().sessions.clone();
    assert_eq!(sessions.len(), 3);
    assert!(sessions.iter().all(|s| s.start_id == Some(batches[0].start_id)));
}

#[tokio::test]
async fn test_last_completed_batch_completes_the_start() {
    let p = pipeline(250);
    let batches = batched(&p, new_start(&ids(1..=250))).await;
    let start_id = batches[0].start_id;

    // completion order doesn't have to follow batch order
    for batch in batches.iter().rev() {
        assert_eq!(p.store.start(start_id).status, StartStatus::Starting);
        p.executor.start_flow_batch(batch).await.unwrap();
    }

    let start = p.store.start(start_id);
    assert_eq!(start.status, StartStatus::Complete);
    assert_eq!(start.processed_count, 250);
}

#[tokio::test]
async fn test_redelivered_batch_is_counted_once() {
    let p = pipeline(150);
    let batches = batched(&p, new_start(&ids(1..=150))).await;

    let first = p.executor.start_flow_batch(&batches[0]).await.unwrap();
    let again = p.executor.start_flow_batch(&batches[0]).await.unwrap();

    assert!(matches!(first.completion, BatchCompletion::Recorded { processed_count: 100, .. }));
    assert_eq!(again.completion, BatchCompletion::Duplicate);
    assert!(again.results.is_empty());
    assert_eq!(p.engine.started().len(), 100);
    assert_eq!(p.store.state.lock().unwrap().sessions.len(), 100);
    let start = p.store.start(batches[0].start_id);
    assert_eq!(start.processed_count, 100);
    assert_eq!(start.status, StartStatus::Starting);
}

#[tokio::test]
async fn test_engine_failures_are_per_contact() {
    let p = pipeline(3);
    p.engine.state.lock().unwrap().failing.insert(ids([2])[0]);
    let batches = batched(&p, new_start(&ids([1, 2, 3]))).await;

    let result = p.executor.start_flow_batch(&batches[0]).await.unwrap();

    assert_eq!(result.started_count(), 2);
    assert!(matches!(result.results[1].outcome, ContactOutcome::Failed(_)));
    assert_eq!(p.store.start(batches[0].start_id).status, StartStatus::Complete);
}

#[tokio::test]
async fn test_contacts_deleted_since_batching_are_skipped() {
    let p = pipeline(3);
    let batches = batched(&p, new_start(&ids([1, 2, 3]))).await;
    p.store.state.lock().unwrap().contacts.remove(&ids([3])[0]);

    let result = p.executor.start_flow_batch(&batches[0]).await.unwrap();

    assert_eq!(result.results[2].outcome, ContactOutcome::Missing);
    assert_eq!(p.engine.started(), ids([1, 2]));
}

#[tokio::test]
async fn test_session_storage_failure_aborts_the_batch() {
    let p = pipeline(2);
    let batches = batched(&p, new_start(&ids([1, 2]))).await;
    p.store.state.lock().unwrap().fail_sessions = true;

    let result = p.executor.start_flow_batch(&batches[0]).await;

    assert!(result.is_err());
    assert!(p.store.state.lock().unwrap().completions.is_empty());
}

#[tokio::test]
async fn test_trigger_carries_start_params() {
    let p = pipeline(1);
    let params = serde_json::json!({"order_id": 42});
    let batches = batched(
        &p,
        NewFlowStart {
            start_type: Some(StartType::Manual),
            created_by: Some(UserId(7)),
            extra: Some(params.clone()),
            ..new_start(&ids([1]))
        },
    )
    .await;

    p.executor.start_flow_batch(&batches[0]).await.unwrap();

    let runs = &p.engine.state.lock().unwrap().runs;
    assert_eq!(
        runs[0].2,
        FlowTrigger::Manual {
            user: Some(UserId(7)),
            params: Some(params),
        }
    );
    assert!(runs[0].1.include_active);
}
