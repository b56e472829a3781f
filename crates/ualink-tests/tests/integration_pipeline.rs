// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Pipeline Integration Tests
//!
//! Integration tests for the telemetry pipeline:
//!
//! - Record queue admission under pressure
//! - Batching by send interval and by frame size
//! - Oversized records and event frames
//! - Store-and-forward spill and replay
//! - Notifications flowing from a simulated server to the broker
//!
//! ## Test Categories
//!
//! - `test_queue_*`: Record queue tests
//! - `test_batching_*`: Batching engine tests (paused clock)
//! - `test_store_forward_*`: Spill and replay tests
//! - `test_pipeline_*`: End-to-end tests through the harness

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use ualink_broker::MemoryBrokerClient;
use ualink_buffer::{
    BatchingConfig, BatchingEngine, PipelineMetrics, Publisher, SpillStore, StoreForwardPublisher,
};
use ualink_core::{
    record_queue, BrokerClient, DiagnosticCounters, PointSpec, RecordSender, SourceEndpoint,
    Variant,
};

use ualink_tests::common::{
    assertions::{assert_eventually, frame_display_names, frame_value},
    fixtures::{RecordFixtures, ServerFixtures, PLANT_URL},
    harness::{GatewayHarness, HarnessConfig},
    mocks::{FakeEncoder, RecordingPublisher},
    temp_test_dir,
};

// =============================================================================
// Helper Functions
// =============================================================================

struct EngineUnderTest {
    sender: RecordSender,
    publisher: Arc<RecordingPublisher>,
    diagnostics: Arc<DiagnosticCounters>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    started: Instant,
}

impl EngineUnderTest {
    async fn stop(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

fn batching(send_interval: Duration, message_size: usize) -> BatchingConfig {
    BatchingConfig {
        send_interval,
        message_size,
        frame_budget: message_size.saturating_sub(512),
        send_metadata: false,
        metadata_interval: Duration::from_secs(3600),
    }
}

/// Spawns an engine with the fake encoder and a recording publisher.
async fn spawn_engine(config: BatchingConfig, capacity: usize) -> EngineUnderTest {
    let diagnostics = Arc::new(DiagnosticCounters::new());
    let (sender, receiver) = record_queue(capacity, diagnostics.clone());
    let publisher = Arc::new(RecordingPublisher::new());
    let cancel = CancellationToken::new();
    let started = Instant::now();

    let task = BatchingEngine::with_config(
        config,
        diagnostics.clone(),
        cancel.clone(),
        receiver,
        Arc::new(FakeEncoder::new()),
        publisher.clone(),
        PipelineMetrics::disabled(),
    )
    .start();
    tokio::task::yield_now().await;

    EngineUnderTest {
        sender,
        publisher,
        diagnostics,
        cancel,
        task,
        started,
    }
}

// =============================================================================
// Queue Tests
// =============================================================================

#[tokio::test]
async fn test_queue_full_rejects_without_blocking() {
    let diagnostics = Arc::new(DiagnosticCounters::new());
    let (sender, mut receiver) = record_queue(2, diagnostics.clone());

    assert!(sender.try_enqueue(RecordFixtures::value("A", Variant::Int32(1))));
    assert!(sender.try_enqueue(RecordFixtures::value("B", Variant::Int32(2))));
    assert!(!sender.try_enqueue(RecordFixtures::value("C", Variant::Int32(3))));

    assert_eq!(diagnostics.enqueue_count(), 2);
    assert_eq!(diagnostics.enqueue_failure_count(), 1);

    // Order is preserved and the rejected record is gone.
    assert_eq!(receiver.try_recv().map(|r| r.display_name), Some("A".to_string()));
    assert_eq!(receiver.try_recv().map(|r| r.display_name), Some("B".to_string()));
    assert!(receiver.try_recv().is_none());
}

#[tokio::test]
async fn test_queue_accepts_again_after_drain() {
    let diagnostics = Arc::new(DiagnosticCounters::new());
    let (sender, mut receiver) = record_queue(1, diagnostics.clone());

    assert!(sender.try_enqueue(RecordFixtures::value("A", Variant::Int32(1))));
    assert!(!sender.try_enqueue(RecordFixtures::value("B", Variant::Int32(2))));
    assert!(receiver.try_recv().is_some());
    assert!(sender.try_enqueue(RecordFixtures::value("C", Variant::Int32(3))));

    assert_eq!(diagnostics.enqueue_failure_count(), 1);
}

// =============================================================================
// Batching Engine Tests
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_batching_interval_collects_records_into_one_frame() {
    let engine = spawn_engine(batching(Duration::from_secs(2), 1024 * 1024), 64).await;

    assert!(engine.sender.try_enqueue(RecordFixtures::sized("First", 100)));
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(engine.sender.try_enqueue(RecordFixtures::sized("Second", 100)));
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(engine.sender.try_enqueue(RecordFixtures::sized("Third", 100)));

    tokio::time::sleep_until(engine.started + Duration::from_millis(1900)).await;
    assert_eq!(engine.publisher.frame_count(), 0, "Frame sent before the interval");

    tokio::time::sleep_until(engine.started + Duration::from_millis(2100)).await;
    let frames = engine.publisher.frames();
    assert_eq!(frames.len(), 1);

    let sent_after = frames[0].at - engine.started;
    assert!(sent_after >= Duration::from_secs(2), "sent after {:?}", sent_after);

    let names: Vec<String> = FakeEncoder::decode(&frames[0].bytes)
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert_eq!(names, vec!["First", "Second", "Third"]);
    assert_eq!(engine.diagnostics.average_notifications_per_frame(), 3.0);

    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_batching_recovers_values() {
    let engine = spawn_engine(batching(Duration::from_millis(200), 64 * 1024), 64).await;

    engine.sender.try_enqueue(RecordFixtures::value("Speed", Variant::Int32(1200)));
    engine.sender.try_enqueue(RecordFixtures::value("Running", Variant::Boolean(true)));
    engine.sender.try_enqueue(RecordFixtures::value("Label", Variant::String("line-1".into())));
    tokio::time::sleep(Duration::from_millis(300)).await;

    let frames = engine.publisher.frames();
    assert_eq!(frames.len(), 1);
    let decoded = FakeEncoder::decode(&frames[0].bytes);
    assert_eq!(
        decoded,
        vec![
            ("Speed".to_string(), serde_json::json!(1200)),
            ("Running".to_string(), serde_json::json!(true)),
            ("Label".to_string(), serde_json::json!("line-1")),
        ]
    );

    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_batching_empty_interval_sends_nothing() {
    let engine = spawn_engine(batching(Duration::from_millis(100), 64 * 1024), 64).await;

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(engine.publisher.attempts(), 0);

    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_batching_size_limit_closes_frames_early() {
    let budget_config = BatchingConfig {
        frame_budget: 120,
        ..batching(Duration::from_secs(3600), 1024 * 1024)
    };
    let engine = spawn_engine(budget_config, 64).await;

    for record in RecordFixtures::batch(20) {
        assert!(engine.sender.try_enqueue(record));
    }
    tokio::time::sleep(Duration::from_millis(10)).await;

    let frames = engine.publisher.frames();
    assert!(frames.len() >= 2, "expected size-driven flushes, got {}", frames.len());
    for frame in &frames {
        assert!(frame.bytes.len() <= 120, "frame of {} bytes", frame.bytes.len());
    }

    // The remainder stays open until the engine stops; nothing is duplicated.
    let sent: usize = frames.iter().map(|f| FakeEncoder::decode(&f.bytes).len()).sum();
    assert!(sent < 20);
    let names: Vec<String> = frames
        .iter()
        .flat_map(|f| FakeEncoder::decode(&f.bytes))
        .map(|(name, _)| name)
        .collect();
    let expected: Vec<String> = (0..sent).map(|i| format!("Point{:03}", i)).collect();
    assert_eq!(names, expected);

    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_batching_drops_record_larger_than_budget() {
    let engine = spawn_engine(batching(Duration::from_millis(100), 2048), 64).await;

    assert!(engine.sender.try_enqueue(RecordFixtures::sized("Huge", 4000)));
    assert!(engine.sender.try_enqueue(RecordFixtures::value("Small", Variant::Int32(7))));
    tokio::time::sleep(Duration::from_millis(250)).await;

    assert_eq!(engine.diagnostics.too_large_count(), 1);
    let names: Vec<String> = engine
        .publisher
        .frames()
        .iter()
        .flat_map(|f| FakeEncoder::decode(&f.bytes))
        .map(|(name, _)| name)
        .collect();
    assert_eq!(names, vec!["Small"]);

    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_batching_event_flushes_immediately() {
    let engine = spawn_engine(batching(Duration::from_secs(3600), 64 * 1024), 64).await;

    engine.sender.try_enqueue(RecordFixtures::value("Speed", Variant::Int32(1)));
    engine.sender.try_enqueue(RecordFixtures::event("Overheat"));
    tokio::time::sleep(Duration::from_millis(10)).await;

    let frames = engine.publisher.frames();
    assert_eq!(frames.len(), 1);
    let decoded = FakeEncoder::decode(&frames[0].bytes);
    assert_eq!(decoded.len(), 2);
    assert_eq!(decoded[1].0, "Server");
    assert_eq!(decoded[1].1["Message"], "Overheat");

    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_batching_immediate_mode_one_record_per_frame() {
    let immediate = BatchingConfig {
        frame_budget: 64 * 1024,
        ..batching(Duration::ZERO, 0)
    };
    let engine = spawn_engine(immediate, 64).await;

    for record in RecordFixtures::batch(3) {
        engine.sender.try_enqueue(record);
    }
    tokio::time::sleep(Duration::from_millis(10)).await;

    let frames = engine.publisher.frames();
    assert_eq!(frames.len(), 3);
    for frame in &frames {
        assert_eq!(FakeEncoder::decode(&frame.bytes).len(), 1);
    }

    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_batching_stop_discards_open_frame() {
    let engine = spawn_engine(batching(Duration::from_secs(3600), 64 * 1024), 64).await;

    engine.sender.try_enqueue(RecordFixtures::value("Pending", Variant::Int32(1)));
    tokio::time::sleep(Duration::from_millis(10)).await;
    let publisher = engine.publisher.clone();
    engine.stop().await;

    assert_eq!(publisher.attempts(), 0);
}

// =============================================================================
// Store-and-Forward Tests
// =============================================================================

#[tokio::test]
async fn test_store_forward_spills_then_replays() {
    let dir = temp_test_dir("ualink_spill_");
    let diagnostics = Arc::new(DiagnosticCounters::new());
    let broker = Arc::new(MemoryBrokerClient::new());
    broker.connect().await.unwrap();

    let spill = SpillStore::open(dir.path().join("spill")).await.unwrap();
    let publisher = StoreForwardPublisher::new(
        broker.clone(),
        spill,
        1,
        diagnostics.clone(),
        PipelineMetrics::disabled(),
    );

    broker.set_available(false);
    assert!(!publisher.send(b"frame-1").await);
    assert_eq!(publisher.spill().pending().await.unwrap(), 1);
    assert_eq!(diagnostics.failed_messages(), 1);
    assert!(broker.messages().is_empty());

    broker.set_available(true);
    assert!(publisher.send(b"frame-2").await);

    assert_eq!(publisher.spill().pending().await.unwrap(), 0);
    assert_eq!(diagnostics.failed_messages(), 0);
    assert_eq!(diagnostics.sent_messages(), 2);
    assert_eq!(broker.messages(), vec![b"frame-2".to_vec(), b"frame-1".to_vec()]);
}

#[tokio::test]
async fn test_store_forward_replays_oldest_first() {
    let dir = temp_test_dir("ualink_spill_");
    let diagnostics = Arc::new(DiagnosticCounters::new());
    let broker = Arc::new(MemoryBrokerClient::new());
    broker.connect().await.unwrap();

    let spill = SpillStore::open(dir.path()).await.unwrap();
    let publisher = StoreForwardPublisher::new(
        broker.clone(),
        spill,
        10,
        diagnostics.clone(),
        PipelineMetrics::disabled(),
    );

    broker.set_available(false);
    for i in 0..3 {
        assert!(!publisher.send(format!("lost-{}", i).as_bytes()).await);
    }
    broker.set_available(true);
    assert!(publisher.send(b"live").await);

    let published: Vec<String> = broker
        .messages()
        .iter()
        .map(|m| String::from_utf8_lossy(m).into_owned())
        .collect();
    assert_eq!(published, vec!["live", "lost-0", "lost-1", "lost-2"]);
    assert_eq!(diagnostics.failed_messages(), 0);
}

#[tokio::test]
async fn test_store_forward_drain_batch_limits_replay() {
    let dir = temp_test_dir("ualink_spill_");
    let diagnostics = Arc::new(DiagnosticCounters::new());
    let broker = Arc::new(MemoryBrokerClient::new());
    broker.connect().await.unwrap();

    let spill = SpillStore::open(dir.path()).await.unwrap();
    let publisher = StoreForwardPublisher::new(
        broker.clone(),
        spill,
        1,
        diagnostics.clone(),
        PipelineMetrics::disabled(),
    );

    broker.set_available(false);
    publisher.send(b"a").await;
    publisher.send(b"b").await;
    broker.set_available(true);

    publisher.send(b"c").await;
    assert_eq!(publisher.spill().pending().await.unwrap(), 1);
    assert_eq!(diagnostics.failed_messages(), 1);

    publisher.send(b"d").await;
    assert_eq!(publisher.spill().pending().await.unwrap(), 0);
    assert_eq!(diagnostics.failed_messages(), 0);
}

// =============================================================================
// End-to-End Tests
// =============================================================================

#[tokio::test]
async fn test_pipeline_value_change_reaches_broker() {
    let harness = GatewayHarness::start().await;

    let endpoint = SourceEndpoint::new(PLANT_URL);
    harness
        .manager
        .publish_point(&endpoint, &PointSpec::variable(ServerFixtures::node_id("Speed")))
        .await
        .expect("publish Speed");

    // Initial value first, then the change.
    let frames = harness.wait_for_frames(1, Duration::from_secs(5)).await;
    assert_eq!(frame_value(&frames[0], "Speed"), Some(serde_json::json!(1200)));

    harness.plant.set_value(&ServerFixtures::node("Speed"), Variant::Int32(1300));
    assert_eventually("changed value published", Duration::from_secs(5), || async {
        harness
            .frames()
            .iter()
            .any(|f| frame_value(f, "Speed") == Some(serde_json::json!(1300)))
    })
    .await;

    harness.stop().await;
}

#[tokio::test]
async fn test_pipeline_heartbeat_republishes_unchanged_value() {
    let harness = GatewayHarness::start().await;

    let spec = PointSpec::variable(ServerFixtures::node_id("Running")).with_heartbeat(200);
    harness
        .manager
        .publish_point(&SourceEndpoint::new(PLANT_URL), &spec)
        .await
        .expect("publish Running");

    assert_eventually("heartbeat repeats the value", Duration::from_secs(6), || async {
        harness
            .frames()
            .iter()
            .flat_map(|f| frame_display_names(f))
            .filter(|name| name == "Running")
            .count()
            >= 2
    })
    .await;

    harness.stop().await;
}

#[tokio::test]
async fn test_pipeline_spills_while_broker_down() {
    let harness = GatewayHarness::start_with(HarnessConfig::default().store_forward()).await;
    harness.broker.set_available(false);

    harness
        .manager
        .publish_point(
            &SourceEndpoint::new(PLANT_URL),
            &PointSpec::variable(ServerFixtures::node_id("Speed")),
        )
        .await
        .expect("publish Speed");

    let spill = SpillStore::open(harness.spill_dir.clone()).await.unwrap();
    assert_eventually("initial value spilled", Duration::from_secs(5), || async {
        spill.pending().await.unwrap_or(0) >= 1
    })
    .await;
    assert!(harness.frames().is_empty());

    harness.broker.set_available(true);
    harness.plant.set_value(&ServerFixtures::node("Speed"), Variant::Int32(1300));

    let frames = harness.wait_for_frames(2, Duration::from_secs(5)).await;
    let values: Vec<_> = frames.iter().filter_map(|f| frame_value(f, "Speed")).collect();
    assert!(values.contains(&serde_json::json!(1200)), "replayed value missing: {:?}", values);
    assert!(values.contains(&serde_json::json!(1300)), "live value missing: {:?}", values);
    assert_eventually("spill drained", Duration::from_secs(5), || async {
        spill.pending().await.unwrap_or(1) == 0
    })
    .await;

    harness.stop().await;
}
