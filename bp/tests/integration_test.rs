//! Integration tests for batchpipe
//!
//! These tests drive the full pipeline against a mock ingestion endpoint.

use std::time::Duration;

use mockito::Matcher;
use serde_json::json;

use batchpipe::batch::{BatchError, Delivery};
use batchpipe::config::Config;
use batchpipe::domain::{Priority, Record};
use batchpipe::gateway::IngestError;
use batchpipe::pipeline::Pipeline;
use batchpipe::scheduler::{PriorityScheduler, SchedulerConfig};

fn config_for(server: &mockito::ServerGuard) -> Config {
    let mut config = Config::default();
    config.gateway.base_url = server.url();
    config.gateway.api_key_env = "BATCHPIPE_INTEGRATION_KEY_NEVER_SET".to_string();
    config.retry.base_delay_ms = 1;
    config.retry.max_delay_ms = 5;
    config.retry.jitter = false;
    config.batching.first_hit_delay_ms = 20;
    config.batching.coalescing_delay_ms = 5;
    config
}

fn pipeline_for(config: &Config) -> (Pipeline, PriorityScheduler) {
    let scheduler = PriorityScheduler::new(config.scheduler.clone());
    let pipeline = Pipeline::from_config(config, scheduler.clone()).expect("Failed to build pipeline");
    (pipeline, scheduler)
}

// =============================================================================
// Batch endpoint
// =============================================================================

#[tokio::test]
async fn test_merged_batch_sent_to_batch_endpoint() {
    let mut server = mockito::Server::new_async().await;
    let info = server
        .mock("GET", "/info")
        .with_status(200)
        .with_body(r#"{"batch_ingest_config":{"size_limit_bytes":1048576}}"#)
        .expect(1)
        .create_async()
        .await;
    let batch = server
        .mock("POST", "/runs/batch")
        .match_body(Matcher::Json(json!({
            "post": [
                {"id": "a", "name": "first", "status": "done"},
                {"id": "b", "name": "second"}
            ],
            "patch": []
        })))
        .with_status(202)
        .expect(1)
        .create_async()
        .await;

    let (pipeline, _scheduler) = pipeline_for(&config_for(&server));
    let handles = vec![
        pipeline.append(Record::create("a", json!({"name": "first"}))).await,
        pipeline.append(Record::create("b", json!({"name": "second"}))).await,
        pipeline.append(Record::update("a", json!({"status": "done"}))).await,
    ];

    for handle in handles {
        assert_eq!(handle.await.unwrap(), Delivery::Sent);
    }
    pipeline.shutdown().await.unwrap();

    info.assert_async().await;
    batch.assert_async().await;
}

#[tokio::test]
async fn test_timer_flush_without_explicit_flush() {
    let mut server = mockito::Server::new_async().await;
    server.mock("GET", "/info").with_status(200).with_body("{}").create_async().await;
    let batch = server
        .mock("POST", "/runs/batch")
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let (pipeline, _scheduler) = pipeline_for(&config_for(&server));
    let handle = pipeline.append(Record::create("a", json!({}))).await;

    let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("debounce timer should flush");
    assert_eq!(outcome.unwrap(), Delivery::Sent);
    batch.assert_async().await;
}

// =============================================================================
// Fallback to per-record endpoints
// =============================================================================

#[tokio::test]
async fn test_fallback_when_batch_unsupported() {
    let mut server = mockito::Server::new_async().await;
    server.mock("GET", "/info").with_status(404).create_async().await;
    let post = server
        .mock("POST", "/runs")
        .match_body(Matcher::PartialJson(json!({"id": "a"})))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;
    let patch = server
        .mock("PATCH", "/runs/b")
        .match_body(Matcher::PartialJson(json!({"id": "b", "status": "done"})))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;
    let batch = server.mock("POST", "/runs/batch").expect(0).create_async().await;

    let mut config = config_for(&server);
    // Let the update for "b" through without a create
    config.sampling.rate = None;
    let (pipeline, _scheduler) = pipeline_for(&config);

    let create = pipeline.append(Record::create("a", json!({"name": "x"}))).await;
    let update = pipeline.append(Record::update("b", json!({"status": "done"}))).await;
    pipeline.flush().await.unwrap();

    assert_eq!(create.await.unwrap(), Delivery::Sent);
    assert_eq!(update.await.unwrap(), Delivery::Sent);
    post.assert_async().await;
    patch.assert_async().await;
    batch.assert_async().await;
}

// =============================================================================
// Retry classification
// =============================================================================

#[tokio::test]
async fn test_permanent_server_error_uses_all_attempts() {
    let mut server = mockito::Server::new_async().await;
    server.mock("GET", "/info").with_status(200).with_body("{}").create_async().await;
    let batch = server
        .mock("POST", "/runs/batch")
        .with_status(503)
        .with_body("unavailable")
        .expect(4)
        .create_async()
        .await;

    let mut config = config_for(&server);
    config.retry.max_attempts = 4;
    let (pipeline, _scheduler) = pipeline_for(&config);

    let handle = pipeline.append(Record::create("a", json!({}))).await;
    pipeline.flush().await.unwrap();

    match handle.await {
        Err(BatchError::Delivery(error)) => match &*error {
            IngestError::Exhausted { attempts, message, .. } => {
                assert_eq!(*attempts, 4);
                assert!(message.contains("503"));
            }
            other => panic!("expected exhaustion, got {other:?}"),
        },
        other => panic!("expected delivery failure, got {other:?}"),
    }
    batch.assert_async().await;
}

#[tokio::test]
async fn test_client_error_sent_once() {
    let mut server = mockito::Server::new_async().await;
    server.mock("GET", "/info").with_status(200).with_body("{}").create_async().await;
    let batch = server
        .mock("POST", "/runs/batch")
        .with_status(400)
        .with_body("bad request")
        .expect(1)
        .create_async()
        .await;

    let (pipeline, _scheduler) = pipeline_for(&config_for(&server));
    let handle = pipeline.append(Record::create("a", json!({}))).await;
    pipeline.flush().await.unwrap();

    match handle.await {
        Err(BatchError::Delivery(error)) => assert_eq!(error.status(), Some(400)),
        other => panic!("expected client error, got {other:?}"),
    }
    batch.assert_async().await;
}

#[tokio::test]
async fn test_conflict_treated_as_delivered() {
    let mut server = mockito::Server::new_async().await;
    server.mock("GET", "/info").with_status(200).with_body("{}").create_async().await;
    let batch = server
        .mock("POST", "/runs/batch")
        .with_status(409)
        .expect(1)
        .create_async()
        .await;

    let (pipeline, _scheduler) = pipeline_for(&config_for(&server));
    let handle = pipeline.append(Record::create("a", json!({}))).await;
    pipeline.flush().await.unwrap();

    assert_eq!(handle.await.unwrap(), Delivery::Sent);
    batch.assert_async().await;
}

// =============================================================================
// Sampling
// =============================================================================

#[tokio::test]
async fn test_rate_zero_transmits_nothing() {
    let mut server = mockito::Server::new_async().await;
    let info = server.mock("GET", "/info").expect(0).create_async().await;
    let batch = server.mock("POST", "/runs/batch").expect(0).create_async().await;

    let mut config = config_for(&server);
    config.sampling.rate = Some(0.0);
    let (pipeline, _scheduler) = pipeline_for(&config);

    let create = pipeline.append(Record::create("a", json!({}))).await;
    let update = pipeline.append(Record::update("a", json!({}))).await;
    pipeline.shutdown().await.unwrap();

    assert_eq!(create.await.unwrap(), Delivery::SampledOut);
    assert_eq!(update.await.unwrap(), Delivery::SampledOut);
    info.assert_async().await;
    batch.assert_async().await;
}

#[tokio::test]
async fn test_rate_one_transmits_everything() {
    let mut server = mockito::Server::new_async().await;
    server.mock("GET", "/info").with_status(200).with_body("{}").create_async().await;
    let batch = server
        .mock("POST", "/runs/batch")
        .match_body(Matcher::Json(json!({
            "post": [{"id": "a", "n": 1, "done": true}, {"id": "b", "n": 2}],
            "patch": []
        })))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let mut config = config_for(&server);
    config.sampling.rate = Some(1.0);
    let (pipeline, _scheduler) = pipeline_for(&config);

    let handles = vec![
        pipeline.append(Record::create("a", json!({"n": 1}))).await,
        pipeline.append(Record::create("b", json!({"n": 2}))).await,
        pipeline.append(Record::update("a", json!({"done": true}))).await,
    ];
    pipeline.flush().await.unwrap();

    for handle in handles {
        assert_eq!(handle.await.unwrap(), Delivery::Sent);
    }
    batch.assert_async().await;
}

// =============================================================================
// Scheduler and auth
// =============================================================================

#[tokio::test]
async fn test_attempts_routed_through_scheduler() {
    let mut server = mockito::Server::new_async().await;
    server.mock("GET", "/info").with_status(404).create_async().await;
    server
        .mock("POST", "/runs")
        .with_status(200)
        .expect(5)
        .create_async()
        .await;

    let mut config = config_for(&server);
    config.scheduler = SchedulerConfig::with_concurrency(2);
    config.scheduler.default_priority = Priority::HIGH;
    let (pipeline, scheduler) = pipeline_for(&config);

    let mut handles = Vec::new();
    for i in 0..5 {
        handles.push(pipeline.append(Record::create(format!("r{i}"), json!({}))).await);
    }
    pipeline.flush().await.unwrap();
    for handle in handles {
        assert_eq!(handle.await.unwrap(), Delivery::Sent);
    }

    scheduler.wait_until_idle().await;
    let stats = scheduler.stats().await;
    assert_eq!(stats.total_completed, 5);
    assert!(stats.peak_concurrent <= 2);
}

#[tokio::test]
async fn test_api_key_sent_when_configured() {
    // SAFETY: the variable name is unique to this test
    unsafe { std::env::set_var("BATCHPIPE_INTEGRATION_KEY_SET", "integration-secret") };
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/info")
        .match_header("x-api-key", "integration-secret")
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;
    let batch = server
        .mock("POST", "/runs/batch")
        .match_header("x-api-key", "integration-secret")
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let mut config = config_for(&server);
    config.gateway.api_key_env = "BATCHPIPE_INTEGRATION_KEY_SET".to_string();
    let (pipeline, _scheduler) = pipeline_for(&config);

    let handle = pipeline.append(Record::create("a", json!({}))).await;
    pipeline.flush().await.unwrap();
    assert_eq!(handle.await.unwrap(), Delivery::Sent);
    batch.assert_async().await;
}
