// End-to-end transport workflows against a real SQLite store

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{mumbai, seeded_file_store, seeded_store, ReceiptlessStore, StaticGeocoder};
use securerails::location::{AddressResolver, Coordinates};
use securerails::transport::{
    CheckpointCommand, CheckpointOrder, CheckpointSlot, DeliverCommand, DispatchCommand, LinkCommand,
    LocationInput, TransportStatus, WorkflowEngine, WorkflowError,
};
use securerails::TransportStore;

fn dispatch_cmd(batch: &str, transporter: &str) -> DispatchCommand {
    DispatchCommand {
        batch_id: batch.to_string(),
        transporter_id: transporter.to_string(),
        location: LocationInput::at(mumbai()),
        verified_by_qr: true,
    }
}

fn checkpoint_cmd(batch: &str, transporter: &str, number: u8) -> CheckpointCommand {
    CheckpointCommand {
        batch_id: batch.to_string(),
        transporter_id: transporter.to_string(),
        checkpoint_number: number,
        location: LocationInput::at(Coordinates::new(19.2 + f64::from(number) / 10.0, 73.0)),
        verified_by_qr: false,
        scanned_payload: None,
    }
}

fn deliver_cmd(batch: &str, transporter: &str) -> DeliverCommand {
    DeliverCommand {
        batch_id: batch.to_string(),
        transporter_id: transporter.to_string(),
        location: LocationInput {
            address: Some("Pune Goods Yard".to_string()),
            ..LocationInput::at(Coordinates::new(18.52, 73.85))
        },
    }
}

#[tokio::test]
async fn test_full_journey_from_dispatch_to_delivery() {
    let store = seeded_store().await;
    let engine = WorkflowEngine::new(store.clone(), CheckpointOrder::Lenient);

    let dispatched = engine.dispatch(dispatch_cmd("B1", "T1")).await.unwrap();
    assert_eq!(dispatched.log.status, TransportStatus::Dispatched);
    assert_eq!(dispatched.log.destination, "Nashik");
    assert!(dispatched.log.dispatch.as_ref().unwrap().verified_by_qr);

    for number in 1..=3 {
        let outcome = engine.record_checkpoint(checkpoint_cmd("B1", "T1", number)).await.unwrap();
        assert_eq!(outcome.log.status, TransportStatus::InTransit);
        assert_eq!(outcome.log.checkpoints_completed(), number as usize);
    }

    let delivered = engine.deliver(deliver_cmd("B1", "T1")).await.unwrap();
    assert_eq!(delivered.log.status, TransportStatus::Delivered);
    assert_eq!(delivered.location, "Pune Goods Yard");
    let receiver = delivered.receiver.expect("receipt written");
    assert_eq!(receiver.receiver_name, "Delivered by T1");
    assert_eq!(receiver.location, "Pune Goods Yard");

    // Dispatch and checkpoint evidence survive delivery untouched
    assert_eq!(delivered.log.dispatch, dispatched.log.dispatch);
    assert_eq!(delivered.log.checkpoints_completed(), 3);

    let transporter = store.find_transporter("T1").await.unwrap().unwrap();
    assert_eq!(transporter.assigned_batch, None);

    let report = engine.batch_report("B1").await.unwrap();
    assert_eq!(report.logs.len(), 1);
    assert_eq!(report.receivers.len(), 1);
}

#[tokio::test]
async fn test_delivered_log_rejects_every_further_write() {
    let store = seeded_store().await;
    let engine = WorkflowEngine::new(store, CheckpointOrder::Lenient);

    engine.dispatch(dispatch_cmd("B1", "T1")).await.unwrap();
    engine.deliver(deliver_cmd("B1", "T1")).await.unwrap();

    let err = engine.deliver(deliver_cmd("B1", "T1")).await.unwrap_err();
    assert!(matches!(err, WorkflowError::Conflict(ref m) if m == "Batch has already been delivered"));

    let err = engine.record_checkpoint(checkpoint_cmd("B1", "T1", 2)).await.unwrap_err();
    assert!(matches!(err, WorkflowError::Conflict(_)));

    let err = engine.dispatch(dispatch_cmd("B1", "T1")).await.unwrap_err();
    assert!(matches!(err, WorkflowError::Conflict(_)));

    let report = engine.batch_report("B1").await.unwrap();
    assert_eq!(report.logs[0].status, TransportStatus::Delivered);
    assert_eq!(report.receivers.len(), 1, "second delivery must not add a receipt");
}

#[tokio::test]
async fn test_checkpoint_without_dispatch_points_caller_to_dispatch() {
    let engine = WorkflowEngine::new(seeded_store().await, CheckpointOrder::Lenient);

    let err = engine.record_checkpoint(checkpoint_cmd("B1", "T1", 1)).await.unwrap_err();
    assert_eq!(err.to_string(), "Transport log not found. Please dispatch first.");

    let err = engine.deliver(deliver_cmd("B1", "T1")).await.unwrap_err();
    assert!(matches!(err, WorkflowError::NotFound(_)));
}

#[tokio::test]
async fn test_unknown_batch_is_rejected_before_any_write() {
    let store = seeded_store().await;
    let engine = WorkflowEngine::new(store.clone(), CheckpointOrder::Lenient);

    let err = engine.dispatch(dispatch_cmd("B404", "T1")).await.unwrap_err();
    assert_eq!(err.to_string(), "Batch not found in vendor records");
    assert!(store.logs_for_batch("B404").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_redispatch_updates_the_same_log() {
    let store = seeded_store().await;
    let engine = WorkflowEngine::new(store.clone(), CheckpointOrder::Lenient);

    let first = engine.dispatch(dispatch_cmd("B1", "T1")).await.unwrap();
    engine.record_checkpoint(checkpoint_cmd("B1", "T1", 1)).await.unwrap();

    let mut again = dispatch_cmd("B1", "T1");
    again.location = LocationInput::at(Coordinates::new(19.1, 72.9));
    let second = engine.dispatch(again).await.unwrap();

    assert_eq!(first.log.id, second.log.id);
    assert_eq!(second.log.status, TransportStatus::Dispatched);
    assert_eq!(
        second.log.dispatch.as_ref().unwrap().coordinates,
        Some(Coordinates::new(19.1, 72.9))
    );
    assert_eq!(store.logs_for_batch("B1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_checkpoints_may_arrive_out_of_order_by_default() {
    let engine = WorkflowEngine::new(seeded_store().await, CheckpointOrder::Lenient);
    engine.dispatch(dispatch_cmd("B1", "T1")).await.unwrap();

    let outcome = engine.record_checkpoint(checkpoint_cmd("B1", "T1", 3)).await.unwrap();
    assert!(outcome.log.checkpoint(CheckpointSlot::Three).is_some());
    assert!(outcome.log.checkpoint(CheckpointSlot::One).is_none());
    assert_eq!(outcome.log.checkpoints_completed(), 1);
}

#[tokio::test]
async fn test_sequential_ordering_requires_previous_checkpoint() {
    let engine = WorkflowEngine::new(seeded_store().await, CheckpointOrder::Sequential);
    engine.dispatch(dispatch_cmd("B1", "T1")).await.unwrap();

    let err = engine.record_checkpoint(checkpoint_cmd("B1", "T1", 2)).await.unwrap_err();
    assert!(matches!(err, WorkflowError::Validation(_)));

    engine.record_checkpoint(checkpoint_cmd("B1", "T1", 1)).await.unwrap();
    engine.record_checkpoint(checkpoint_cmd("B1", "T1", 2)).await.unwrap();
}

#[tokio::test]
async fn test_rewriting_a_checkpoint_replaces_its_evidence() {
    let engine = WorkflowEngine::new(seeded_store().await, CheckpointOrder::Lenient);
    engine.dispatch(dispatch_cmd("B1", "T1")).await.unwrap();

    engine.record_checkpoint(checkpoint_cmd("B1", "T1", 2)).await.unwrap();
    let mut rewrite = checkpoint_cmd("B1", "T1", 2);
    rewrite.location.address = Some("Lonavala".to_string());
    let outcome = engine.record_checkpoint(rewrite).await.unwrap();

    assert_eq!(outcome.log.checkpoint(CheckpointSlot::Two).unwrap().address, "Lonavala");
    assert_eq!(outcome.log.checkpoints_completed(), 1);
}

#[tokio::test]
async fn test_mismatched_qr_payload_writes_nothing() {
    let engine = WorkflowEngine::new(seeded_store().await, CheckpointOrder::Lenient);
    engine.dispatch(dispatch_cmd("B1", "T1")).await.unwrap();

    let mut cmd = checkpoint_cmd("B1", "T1", 1);
    cmd.scanned_payload = Some("B2".to_string());
    let err = engine.record_checkpoint(cmd).await.unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::Verification { ref scanned, ref expected } if scanned == "B2" && expected == "B1"
    ));

    let report = engine.batch_report("B1").await.unwrap();
    assert_eq!(report.logs[0].checkpoints_completed(), 0);
}

#[tokio::test]
async fn test_matching_qr_payload_marks_checkpoint_verified() {
    let engine = WorkflowEngine::new(seeded_store().await, CheckpointOrder::Lenient);
    engine.dispatch(dispatch_cmd("B1", "T1")).await.unwrap();

    let mut cmd = checkpoint_cmd("B1", "T1", 1);
    cmd.scanned_payload = Some(" B1 ".to_string());
    let outcome = engine.record_checkpoint(cmd).await.unwrap();
    assert!(outcome.log.checkpoint(CheckpointSlot::One).unwrap().verified_by_qr);
}

#[tokio::test]
async fn test_failed_receipt_does_not_fail_delivery() {
    let inner = seeded_store().await;
    let store = Arc::new(ReceiptlessStore(inner.clone()));
    let engine = WorkflowEngine::new(store, CheckpointOrder::Lenient);

    engine.dispatch(dispatch_cmd("B1", "T1")).await.unwrap();
    let delivered = engine.deliver(deliver_cmd("B1", "T1")).await.unwrap();

    assert_eq!(delivered.log.status, TransportStatus::Delivered);
    assert!(delivered.receiver.is_none());
    assert!(inner.receivers_for_batch("B1").await.unwrap().is_empty());
    assert_eq!(
        inner.find_log("B1", "T1").await.unwrap().unwrap().status,
        TransportStatus::Delivered
    );
}

#[tokio::test]
async fn test_link_retargets_existing_log_to_new_transporter() {
    let store = seeded_store().await;
    let engine = WorkflowEngine::new(store.clone(), CheckpointOrder::Lenient);

    let first = engine
        .link(LinkCommand {
            batch_id: "B1".to_string(),
            transporter_id: "T1".to_string(),
            location: None,
        })
        .await
        .unwrap();
    assert!(first.created);

    let handover = engine
        .link(LinkCommand {
            batch_id: "B1".to_string(),
            transporter_id: "T2".to_string(),
            location: Some(LocationInput::at(mumbai())),
        })
        .await
        .unwrap();
    assert!(!handover.created);
    assert_eq!(handover.log.id, first.log.id);
    assert_eq!(handover.log.transporter_id, "T2");

    assert_eq!(
        store.find_transporter("T2").await.unwrap().unwrap().assigned_batch.as_deref(),
        Some("B1")
    );
    assert!(store.find_log("B1", "T1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_batch_without_factory_gets_placeholder_destination() {
    let engine = WorkflowEngine::new(seeded_store().await, CheckpointOrder::Lenient);

    let linked = engine
        .link(LinkCommand {
            batch_id: "B2".to_string(),
            transporter_id: "T1".to_string(),
            location: None,
        })
        .await
        .unwrap();
    assert_eq!(linked.log.destination, "TBD");

    let summaries = engine.batches_for_transporter("T1").await.unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].vendor_name, "Deccan Fabrics");
    assert_eq!(summaries[0].factory_name, "Unknown Factory");
    assert_eq!(summaries[0].factory_location, "Unknown Location");
}

#[tokio::test]
async fn test_resolver_fills_in_missing_addresses() {
    let resolver = AddressResolver::new(Arc::new(StaticGeocoder("Dadar, Mumbai")), Duration::from_secs(1));
    let engine = WorkflowEngine::new(seeded_store().await, CheckpointOrder::Lenient).with_resolver(resolver);

    let dispatched = engine.dispatch(dispatch_cmd("B1", "T1")).await.unwrap();
    assert_eq!(dispatched.log.dispatch.unwrap().address, "Dadar, Mumbai");
}

#[tokio::test]
async fn test_without_resolver_address_falls_back_to_coordinates() {
    let engine = WorkflowEngine::new(seeded_store().await, CheckpointOrder::Lenient);

    let dispatched = engine.dispatch(dispatch_cmd("B1", "T1")).await.unwrap();
    assert_eq!(dispatched.log.dispatch.unwrap().address, "19.076000, 72.877700");
}

#[tokio::test]
async fn test_transporters_only_see_their_own_batches() {
    let engine = WorkflowEngine::new(seeded_store().await, CheckpointOrder::Lenient);

    engine.dispatch(dispatch_cmd("B1", "T1")).await.unwrap();
    engine.dispatch(dispatch_cmd("B2", "T2")).await.unwrap();
    engine.record_checkpoint(checkpoint_cmd("B2", "T2", 1)).await.unwrap();

    let mine = engine.batches_for_transporter("T2").await.unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].log.batch_id, "B2");
    assert_eq!(mine[0].checkpoints_completed, 1);
}

#[tokio::test]
async fn test_link_after_delivery_does_not_move_the_log() {
    let store = seeded_store().await;
    let engine = WorkflowEngine::new(store.clone(), CheckpointOrder::Lenient);

    engine.dispatch(dispatch_cmd("B1", "T1")).await.unwrap();
    engine.deliver(deliver_cmd("B1", "T1")).await.unwrap();

    let err = engine
        .link(LinkCommand {
            batch_id: "B1".to_string(),
            transporter_id: "T2".to_string(),
            location: Some(LocationInput::at(mumbai())),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Conflict(_)));
    assert_eq!(err.to_string(), "Batch has already been delivered");

    let log = store.find_log("B1", "T1").await.unwrap().expect("log stays with the deliverer");
    assert_eq!(log.status, TransportStatus::Delivered);
    assert!(store.find_log("B1", "T2").await.unwrap().is_none());
    assert_eq!(store.find_transporter("T2").await.unwrap().unwrap().assigned_batch, None);

    let receivers = store.receivers_for_batch("B1").await.unwrap();
    assert_eq!(receivers.len(), 1);
    assert_eq!(receivers[0].receiver_name, "Delivered by T1");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_deliveries_write_one_receipt() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_file_store(dir.path()).await;
    let engine = Arc::new(WorkflowEngine::new(store.clone(), CheckpointOrder::Lenient));
    engine.dispatch(dispatch_cmd("B1", "T1")).await.unwrap();

    let attempts: Vec<_> = (0..8)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.deliver(deliver_cmd("B1", "T1")).await })
        })
        .collect();

    let mut delivered = 0;
    let mut refused = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(_) => delivered += 1,
            Err(WorkflowError::Conflict(_)) => refused += 1,
            Err(other) => panic!("unexpected delivery error: {other}"),
        }
    }
    assert_eq!(delivered, 1);
    assert_eq!(refused, 7);

    let receivers = store.receivers_for_batch("B1").await.unwrap();
    assert_eq!(receivers.len(), 1);
    let log = store.find_log("B1", "T1").await.unwrap().unwrap();
    assert_eq!(log.status, TransportStatus::Delivered);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_checkpoint_racing_delivery_never_reopens_log() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_file_store(dir.path()).await;
    let engine = Arc::new(WorkflowEngine::new(store.clone(), CheckpointOrder::Lenient));
    engine.dispatch(dispatch_cmd("B1", "T1")).await.unwrap();

    let checkpoints: Vec<_> = (1..=3)
        .map(|number| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.record_checkpoint(checkpoint_cmd("B1", "T1", number)).await })
        })
        .collect();
    let delivery = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.deliver(deliver_cmd("B1", "T1")).await })
    };

    delivery.await.unwrap().expect("delivery wins or precedes every checkpoint");
    for checkpoint in checkpoints {
        match checkpoint.await.unwrap() {
            Ok(outcome) => assert_eq!(outcome.log.status, TransportStatus::InTransit),
            Err(WorkflowError::Conflict(_)) => {}
            Err(other) => panic!("unexpected checkpoint error: {other}"),
        }
    }

    let log = store.find_log("B1", "T1").await.unwrap().unwrap();
    assert_eq!(log.status, TransportStatus::Delivered);
    assert!(log.delivery.is_some());
    assert_eq!(store.receivers_for_batch("B1").await.unwrap().len(), 1);
}
