// Integration tests for the durable queue strategy: batch splitting, FIFO
// by row id, crash recovery via the reclaim pass, the retry bound, drain
// on stop and the synchronous send-now path.

#[path = "../helpers/mod.rs"]
mod helpers;

use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use aicostmanager::modules::delivery::repositories::QueueRepository;
use aicostmanager::modules::delivery::QueueStatus;
use aicostmanager::{
    Delivery, DeliveryType, IniStore, LimitDecodePolicy, PersistentDelivery, TrackOptions,
    Tracker, TrackerConfig, TriggeredLimitsCache, UsageRecord,
};
use helpers::{ok_track_response, test_config, wait_for};

fn persistent_config(server: &MockServer, dir: &TempDir) -> TrackerConfig {
    let mut config = test_config(&server.uri(), dir.path());
    config.delivery_type = Some(DeliveryType::PersistentQueue);
    config
}

fn cache_for(config: &TrackerConfig) -> TriggeredLimitsCache {
    TriggeredLimitsCache::new(IniStore::new(&config.ini_path), LimitDecodePolicy::FailOpen)
}

async fn mount_ok(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/v1/track"))
        .respond_with(ResponseTemplate::new(201).set_body_json(ok_track_response()))
        .mount(server)
        .await;
}

fn record(i: usize) -> UsageRecord {
    UsageRecord::build(
        "openai_chat",
        Some("openai::gpt-5-mini"),
        json!({"input_tokens": i}),
        TrackOptions::default().response_id(format!("r{i:03}")),
    )
    .unwrap()
}

#[tokio::test]
async fn large_backlog_ships_in_full_batches_in_order() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_ok(&server).await;

    let mut config = persistent_config(&server, &dir);
    config.max_batch_size = 100;
    config.batch_interval = Duration::from_secs(2);
    config.poll_interval = Duration::from_millis(50);
    let tracker = Tracker::new(config).await.unwrap();

    for i in 0..120 {
        tracker
            .track(
                "openai_chat",
                Some("openai::gpt-5-mini"),
                json!({"input_tokens": i}),
                TrackOptions::default().response_id(format!("r{i:03}")),
            )
            .await
            .unwrap();
    }

    let drained = wait_for(Duration::from_secs(5), || async {
        tracker.stats().await.unwrap().queued == 0
    })
    .await;
    assert!(drained, "queue did not drain within 5s");

    let requests = server.received_requests().await.unwrap();
    let batches: Vec<Vec<String>> = requests
        .iter()
        .map(|request| {
            let body: serde_json::Value = request.body_json().unwrap();
            body["tracked"]
                .as_array()
                .unwrap()
                .iter()
                .map(|r| r["response_id"].as_str().unwrap().to_owned())
                .collect()
        })
        .collect();
    assert_eq!(batches.len(), 2, "expected exactly two batches");
    assert_eq!(batches[0].len(), 100);
    assert_eq!(batches[1].len(), 20);

    // FIFO by row id across both batches.
    let flattened: Vec<&String> = batches.iter().flatten().collect();
    let expected: Vec<String> = (0..120).map(|i| format!("r{i:03}")).collect();
    assert_eq!(flattened, expected.iter().collect::<Vec<_>>());

    tracker.stop().await.unwrap();
}

#[tokio::test]
async fn delivered_rows_are_deleted() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_ok(&server).await;

    let config = persistent_config(&server, &dir);
    let cache = cache_for(&config);
    let delivery = PersistentDelivery::new(&config, cache).await.unwrap();

    let outcome = delivery.enqueue(record(1)).await.unwrap();
    assert!(outcome.row_id.is_some());

    let drained = wait_for(Duration::from_secs(5), || async {
        delivery.stats().await.unwrap().queued == 0
    })
    .await;
    assert!(drained);

    let counts = delivery.status_counts().await.unwrap();
    assert!(counts.is_empty(), "row should be deleted after delivery: {counts:?}");

    let health = delivery.health().await.unwrap();
    assert!(health.worker_alive);
    assert!(health.counts.is_empty());
    delivery.stop().await.unwrap();
}

#[tokio::test]
async fn orphaned_processing_rows_are_reclaimed_and_redelivered() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_ok(&server).await;

    let config = persistent_config(&server, &dir);
    let db_path = dir.path().join("delivery_queue.db");

    // Simulate a crash between pickup-commit and acknowledgement: rows are
    // left in `processing` with no worker attached.
    {
        let repo = QueueRepository::connect(&db_path).await.unwrap();
        for i in 0..5 {
            let payload = serde_json::to_string(&record(i)).unwrap();
            repo.enqueue(&payload).await.unwrap();
        }
        let picked = repo.fetch_batch(5).await.unwrap();
        assert_eq!(picked.len(), 5);
        repo.close().await;
    }

    let mut config = config;
    config.reclaim_threshold = Duration::ZERO;
    let tracker = Tracker::new(config).await.unwrap();

    let redelivered = wait_for(Duration::from_secs(5), || async {
        tracker.stats().await.unwrap().total_sent == 5
    })
    .await;
    assert!(redelivered, "reclaimed rows were not redelivered");

    let requests = server.received_requests().await.unwrap();
    let shipped: usize = requests
        .iter()
        .map(|request| {
            let body: serde_json::Value = request.body_json().unwrap();
            body["tracked"].as_array().unwrap().len()
        })
        .sum();
    assert_eq!(shipped, 5);
    tracker.stop().await.unwrap();
}

#[tokio::test]
async fn rows_exhausting_retries_go_terminal() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    Mock::given(method("POST"))
        .and(path("/api/v1/track"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let mut config = persistent_config(&server, &dir);
    config.max_attempts = 1;
    config.max_retries = 2;
    config.poll_interval = Duration::from_millis(50);
    config.batch_interval = Duration::from_millis(50);
    let cache = cache_for(&config);
    let delivery = PersistentDelivery::new(&config, cache).await.unwrap();

    delivery.enqueue(record(0)).await.unwrap();

    // Attempt 1 fails immediately, the retry is rescheduled with backoff,
    // attempt 2 fails again and retry_count reaches max_retries.
    let terminal = wait_for(Duration::from_secs(10), || async {
        delivery
            .status_counts()
            .await
            .unwrap()
            .get("failed")
            .copied()
            .unwrap_or(0)
            == 1
    })
    .await;
    assert!(terminal, "row never went terminal");

    let stats = delivery.stats().await.unwrap();
    assert_eq!(stats.queued, 0);
    assert!(stats.last_error.is_some());

    let failed = delivery.list_messages(QueueStatus::Failed, 10).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].retry_count, 2);
    assert_eq!(failed[0].record["response_id"], "r000");

    delivery.stop().await.unwrap();
}

#[tokio::test]
async fn stop_flushes_pending_rows() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_ok(&server).await;

    let mut config = persistent_config(&server, &dir);
    // Interval long enough that nothing flushes until shutdown.
    config.batch_interval = Duration::from_secs(30);
    let cache = cache_for(&config);
    let delivery = PersistentDelivery::new(&config, cache).await.unwrap();

    for i in 0..10 {
        delivery.enqueue(record(i)).await.unwrap();
    }
    delivery.stop().await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let shipped: usize = requests
        .iter()
        .map(|request| {
            let body: serde_json::Value = request.body_json().unwrap();
            body["tracked"].as_array().unwrap().len()
        })
        .sum();
    assert_eq!(shipped, 10);

    // Idempotent stop.
    delivery.stop().await.unwrap();
}

#[tokio::test]
async fn deliver_now_bypasses_the_queue() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    Mock::given(method("POST"))
        .and(path("/api/v1/track"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "results": [{"response_id": "r007", "cost_events": [{"cost": "0.002"}]}]
        })))
        .mount(&server)
        .await;

    let config = persistent_config(&server, &dir);
    let cache = cache_for(&config);
    let delivery = PersistentDelivery::new(&config, cache).await.unwrap();

    let response = delivery.deliver_now(&record(7)).await.unwrap();
    assert_eq!(response.results[0].response_id.as_deref(), Some("r007"));

    let counts = delivery.status_counts().await.unwrap();
    assert!(counts.is_empty(), "deliver_now must not touch the queue");
    delivery.stop().await.unwrap();
}

#[tokio::test]
async fn unwritable_db_path_surfaces_io_error() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    // A regular file where a directory is needed.
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"not a directory").unwrap();

    let mut config = persistent_config(&server, &dir);
    config.db_path = Some(blocker.join("queue.db"));
    let cache = cache_for(&config);
    let result = PersistentDelivery::new(&config, cache).await;
    assert!(result.is_err(), "expected an I/O error for unwritable path");
}
