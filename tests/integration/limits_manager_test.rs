// Integration tests for limit enforcement end to end: the pre-check gate
// across delivery strategies, cache refresh from the limits endpoint, and
// the usage-limit management client.

#[path = "../helpers/mod.rs"]
mod helpers;

use rust_decimal_macros::dec;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use aicostmanager::{
    AicmError, CostManagerClient, DeliveryType, IniStore, LimitDecodePolicy, LimitsManager,
    Period, ThresholdType, TrackOptions, Tracker, TriggeredLimitsCache, UsageLimitIn,
};
use helpers::{limit_event, ok_track_response, test_config, EnvelopeSigner};

#[tokio::test]
async fn matching_limit_blocks_track_and_skips_enqueue() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    Mock::given(method("POST"))
        .and(path("/api/v1/track"))
        .respond_with(ResponseTemplate::new(201).set_body_json(ok_track_response()))
        .expect(0)
        .mount(&server)
        .await;

    let mut config = test_config(&server.uri(), dir.path());
    config.delivery_type = Some(DeliveryType::Immediate);
    let tracker = Tracker::new(config).await.unwrap();

    let signer = EnvelopeSigner::generate();
    let envelope = signer.envelope(&[limit_event("test-key", "openai::gpt-5-mini")]);
    tracker.limits_cache().write(&envelope).unwrap();

    let result = tracker
        .track(
            "openai_responses",
            Some("openai::gpt-5-mini"),
            json!({"input_tokens": 4, "output_tokens": 2}),
            TrackOptions::default(),
        )
        .await;
    match result {
        Err(AicmError::UsageLimitExceeded(matches)) => {
            assert_eq!(matches.len(), 1);
            assert_eq!(matches[0].threshold_type, ThresholdType::Limit);
            assert_eq!(matches[0].api_key_id.as_deref(), Some("test-key"));
        }
        other => panic!("expected UsageLimitExceeded, got {other:?}"),
    }

    // No request reached the server.
    assert!(server.received_requests().await.unwrap().is_empty());
    tracker.stop().await.unwrap();
}

#[tokio::test]
async fn queue_strategies_block_before_buffering() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    Mock::given(method("POST"))
        .and(path("/api/v1/track"))
        .respond_with(ResponseTemplate::new(201).set_body_json(ok_track_response()))
        .mount(&server)
        .await;

    let mut config = test_config(&server.uri(), dir.path());
    config.delivery_type = Some(DeliveryType::PersistentQueue);
    let tracker = Tracker::new(config).await.unwrap();

    let signer = EnvelopeSigner::generate();
    let envelope = signer.envelope(&[limit_event("test-key", "openai::gpt-5-mini")]);
    tracker.limits_cache().write(&envelope).unwrap();

    let before = tracker.stats().await.unwrap().queued;
    let result = tracker
        .track(
            "openai_responses",
            Some("openai::gpt-5-mini"),
            json!({"input_tokens": 4}),
            TrackOptions::default(),
        )
        .await;
    assert!(matches!(result, Err(AicmError::UsageLimitExceeded(_))));
    assert_eq!(tracker.stats().await.unwrap().queued, before);

    // A different customer-unscoped service still passes.
    tracker
        .track(
            "anthropic",
            Some("anthropic::claude-sonnet"),
            json!({"output_tokens": 1}),
            TrackOptions::default(),
        )
        .await
        .unwrap();
    tracker.stop().await.unwrap();
}

#[tokio::test]
async fn customer_scoped_limit_only_blocks_that_customer() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    Mock::given(method("POST"))
        .and(path("/api/v1/track"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "results": [{"response_id": "x", "cost_events": [{"cost": "0.01"}]}]
        })))
        .mount(&server)
        .await;

    let mut config = test_config(&server.uri(), dir.path());
    config.delivery_type = Some(DeliveryType::Immediate);
    let tracker = Tracker::new(config).await.unwrap();

    let signer = EnvelopeSigner::generate();
    let mut event = limit_event("test-key", "openai::gpt-5-mini");
    event["client_customer_key"] = json!("cust-limit");
    tracker
        .limits_cache()
        .write(&signer.envelope(&[event]))
        .unwrap();

    let blocked = tracker
        .track(
            "openai_responses",
            Some("openai::gpt-5-mini"),
            json!({"input_tokens": 1}),
            TrackOptions::default().client_customer_key("cust-limit"),
        )
        .await;
    assert!(matches!(blocked, Err(AicmError::UsageLimitExceeded(_))));

    tracker
        .track(
            "openai_responses",
            Some("openai::gpt-5-mini"),
            json!({"input_tokens": 1}),
            TrackOptions::default().client_customer_key("cust-other"),
        )
        .await
        .unwrap();
    tracker.stop().await.unwrap();
}

#[tokio::test]
async fn refresh_lifts_a_cleared_limit() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let signer = EnvelopeSigner::generate();

    Mock::given(method("POST"))
        .and(path("/api/v1/track"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "results": [{"response_id": "x", "cost_events": [{"cost": "0.01"}]}]
        })))
        .expect(1)
        .mount(&server)
        .await;
    // The server now reports no active violations, wrapped in the optional
    // outer key.
    Mock::given(method("GET"))
        .and(path("/api/v1/triggered-limits"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "triggered_limits": signer.envelope(&[])
        })))
        .mount(&server)
        .await;

    let mut config = test_config(&server.uri(), dir.path());
    config.delivery_type = Some(DeliveryType::Immediate);
    let tracker = Tracker::new(config.clone()).await.unwrap();

    tracker
        .limits_cache()
        .write(&signer.envelope(&[limit_event("test-key", "openai::gpt-5-mini")]))
        .unwrap();
    let blocked = tracker
        .track(
            "openai_responses",
            Some("openai::gpt-5-mini"),
            json!({"input_tokens": 1}),
            TrackOptions::default(),
        )
        .await;
    assert!(matches!(blocked, Err(AicmError::UsageLimitExceeded(_))));

    let client = CostManagerClient::new(&config).unwrap();
    let cache = TriggeredLimitsCache::new(IniStore::new(&config.ini_path), config.limit_policy);
    let manager = LimitsManager::new(client, cache);
    manager.refresh().await.unwrap();

    // Same call now goes through, with one POST observed.
    tracker
        .track(
            "openai_responses",
            Some("openai::gpt-5-mini"),
            json!({"input_tokens": 1}),
            TrackOptions::default(),
        )
        .await
        .unwrap();
    tracker.stop().await.unwrap();
}

#[tokio::test]
async fn refresh_accepts_bare_envelopes() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let signer = EnvelopeSigner::generate();
    let envelope = signer.envelope(&[limit_event("test-key", "openai::gpt-4")]);

    Mock::given(method("GET"))
        .and(path("/api/v1/triggered-limits"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope.clone()))
        .mount(&server)
        .await;

    let config = test_config(&server.uri(), dir.path());
    let client = CostManagerClient::new(&config).unwrap();
    let cache = TriggeredLimitsCache::new(IniStore::new(&config.ini_path), config.limit_policy);
    let manager = LimitsManager::new(client, cache);
    manager.refresh().await.unwrap();

    assert_eq!(manager.cache().read().unwrap(), Some(envelope));
    let matches = manager
        .check(Some("test-key"), Some("openai::gpt-4"), None)
        .unwrap();
    assert_eq!(matches.len(), 1);
}

#[tokio::test]
async fn fail_closed_policy_blocks_on_undecodable_envelopes() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    Mock::given(method("POST"))
        .and(path("/api/v1/track"))
        .respond_with(ResponseTemplate::new(201).set_body_json(ok_track_response()))
        .expect(0)
        .mount(&server)
        .await;

    let mut config = test_config(&server.uri(), dir.path());
    config.delivery_type = Some(DeliveryType::Immediate);
    config.limit_policy = LimitDecodePolicy::FailClosed;
    let tracker = Tracker::new(config).await.unwrap();

    tracker
        .limits_cache()
        .write(&json!({
            "version": "v1",
            "public_key": "-----BEGIN PUBLIC KEY-----\ngarbage\n-----END PUBLIC KEY-----",
            "encrypted_payload": "not.a.token"
        }))
        .unwrap();

    let result = tracker
        .track(
            "openai_responses",
            Some("openai::gpt-5-mini"),
            json!({"input_tokens": 1}),
            TrackOptions::default(),
        )
        .await;
    assert!(matches!(result, Err(AicmError::LimitVerification(_))));
    tracker.stop().await.unwrap();
}

#[tokio::test]
async fn usage_limit_crud_round_trips() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let created = json!({
        "uuid": "lim-1",
        "threshold_type": "limit",
        "amount": "0.0000001",
        "period": "day",
        "vendor": "openai",
        "service": "gpt-5-mini",
        "active": true
    });
    Mock::given(method("POST"))
        .and(path("/api/v1/usage-limits/"))
        .respond_with(ResponseTemplate::new(201).set_body_json(created.clone()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/usage-limits/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([created])))
        .mount(&server)
        .await;
    let mut raised = created.clone();
    raised["amount"] = json!("0.1");
    Mock::given(method("PUT"))
        .and(path("/api/v1/usage-limits/lim-1/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(raised))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/v1/usage-limits/lim-1/"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let config = test_config(&server.uri(), dir.path());
    let client = CostManagerClient::new(&config).unwrap();

    let mut body = UsageLimitIn::new(ThresholdType::Limit, dec!(0.0000001), Period::Day);
    body.vendor = Some("openai".to_owned());
    body.service = Some("gpt-5-mini".to_owned());

    let limit = client.create_usage_limit(&body).await.unwrap();
    assert_eq!(limit.uuid, "lim-1");
    assert_eq!(limit.amount, dec!(0.0000001));

    let listed = client.list_usage_limits().await.unwrap();
    assert_eq!(listed.len(), 1);

    body.amount = dec!(0.1);
    let updated = client.update_usage_limit("lim-1", &body).await.unwrap();
    assert_eq!(updated.amount, dec!(0.1));

    client.delete_usage_limit("lim-1").await.unwrap();
}

#[tokio::test]
async fn api_errors_carry_parsed_bodies() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    Mock::given(method("GET"))
        .and(path("/api/v1/triggered-limits"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": "forbidden",
            "message": "API key disabled",
            "details": {"key": "test-key"}
        })))
        .mount(&server)
        .await;

    let config = test_config(&server.uri(), dir.path());
    let client = CostManagerClient::new(&config).unwrap();
    match client.get_triggered_limits().await {
        Err(AicmError::ApiRequest {
            status,
            error,
            message,
            details,
        }) => {
            assert_eq!(status, 403);
            assert_eq!(error.as_deref(), Some("forbidden"));
            assert_eq!(message, "API key disabled");
            assert_eq!(details.unwrap()["key"], "test-key");
        }
        other => panic!("expected ApiRequest, got {other:?}"),
    }
}
