// Shared infrastructure for the SDK test suites: a signing authority for
// triggered-limit envelopes, config presets pointing at a mock server, and
// small async polling utilities.
#![allow(dead_code)]

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use openssl::rsa::Rsa;
use serde_json::{json, Value};
use tokio::time::Instant;

use aicostmanager::TrackerConfig;

/// Signs triggered-limit envelopes the way the limits service does: RS256
/// over claims issued by `aicm-api`, with the public key embedded in the
/// envelope.
pub struct EnvelopeSigner {
    private_pem: String,
    public_pem: String,
}

impl EnvelopeSigner {
    pub fn generate() -> Self {
        let rsa = Rsa::generate(2048).expect("rsa keygen");
        let private_pem =
            String::from_utf8(rsa.private_key_to_pem().expect("private pem")).unwrap();
        let public_pem = String::from_utf8(rsa.public_key_to_pem().expect("public pem")).unwrap();
        Self {
            private_pem,
            public_pem,
        }
    }

    pub fn public_pem(&self) -> &str {
        &self.public_pem
    }

    /// Build a signed envelope wrapping the given triggered-limit events.
    pub fn envelope(&self, events: &[Value]) -> Value {
        self.envelope_with_issuer("aicm-api", events)
    }

    /// Build an envelope signed under an arbitrary issuer (for negative
    /// verification tests).
    pub fn envelope_with_issuer(&self, issuer: &str, events: &[Value]) -> Value {
        let claims = json!({
            "iss": issuer,
            "iat": chrono::Utc::now().timestamp(),
            "jti": "tl",
            "version": "v1",
            "key_id": "test",
            "triggered_limits": events,
        });
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some("test".to_owned());
        let token = jsonwebtoken::encode(
            &header,
            &claims,
            &EncodingKey::from_rsa_pem(self.private_pem.as_bytes()).expect("encoding key"),
        )
        .expect("sign envelope");
        json!({
            "version": "v1",
            "key_id": "test",
            "public_key": self.public_pem,
            "encrypted_payload": token,
        })
    }
}

/// A blocking `limit` event scoped to an api key and service.
pub fn limit_event(api_key_id: &str, service_key: &str) -> Value {
    json!({
        "event_id": format!("evt-{service_key}"),
        "limit_id": format!("lmt-{service_key}"),
        "threshold_type": "limit",
        "amount": "0.0000001",
        "period": "day",
        "limit_message": "Usage limit exceeded",
        "service_key": service_key,
        "api_key_id": api_key_id,
        "triggered_at": "2024-12-31T18:00:00Z",
        "expires_at": "2025-01-01T18:00:00Z",
    })
}

/// Opt-in log output for debugging test runs: `RUST_LOG=debug cargo test`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Config preset pointing the SDK at a mock server, with fast worker
/// timings and state isolated under `dir`.
pub fn test_config(server_url: &str, dir: &Path) -> TrackerConfig {
    init_tracing();
    let mut config = TrackerConfig::new("test-key");
    config.api_base = server_url.to_owned();
    config.api_url = "/api/v1".to_owned();
    config.ini_path = dir.join("AICM.INI");
    config.db_path = Some(dir.join("delivery_queue.db"));
    config.batch_interval = Duration::from_millis(100);
    config.poll_interval = Duration::from_millis(100);
    config
}

/// Poll `probe` until it reports true or `timeout` elapses.
pub async fn wait_for<F, Fut>(timeout: Duration, mut probe: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if probe().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}

/// Minimal happy-path `/track` response body.
pub fn ok_track_response() -> Value {
    json!({
        "event_ids": [],
        "results": [{"response_id": "any", "status": "queued"}]
    })
}
