use std::time::Duration;

use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use tracing::{debug, error, info};

use crate::config::USER_AGENT;
use crate::core::error::{AicmError, AicmResult};
use crate::modules::delivery::models::TrackResponse;

/// Lower bound of the retry backoff window.
const RETRY_BASE: Duration = Duration::from_secs(1);
/// Upper bound of the retry backoff window.
const RETRY_CAP: Duration = Duration::from_secs(30);

/// Performs one authenticated POST of a JSON body against the ingestion
/// endpoint, retrying transient failures with exponential backoff and
/// jitter. Network errors, timeouts and 5xx responses are retried up to
/// `max_attempts`; any 4xx and malformed response bodies surface to the
/// caller unchanged.
pub struct HttpDispatcher {
    client: ClientWithMiddleware,
    endpoint: String,
    api_key: String,
    log_bodies: bool,
}

impl HttpDispatcher {
    pub fn new(
        endpoint: String,
        api_key: String,
        timeout: Duration,
        max_attempts: u32,
        log_bodies: bool,
    ) -> AicmResult<Self> {
        let retry_policy = ExponentialBackoff::builder()
            .retry_bounds(RETRY_BASE, RETRY_CAP)
            .build_with_max_retries(max_attempts.saturating_sub(1));
        let base = reqwest::Client::builder().timeout(timeout).build()?;
        let client = ClientBuilder::new(base)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();
        Ok(Self {
            client,
            endpoint,
            api_key,
            log_bodies,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Post `body` and parse the track response. Retries happen inside the
    /// middleware; by the time this returns an error the failure is final.
    pub async fn post(&self, body: &serde_json::Value) -> AicmResult<TrackResponse> {
        let serialized = body.to_string();
        debug!(
            payload_bytes = serialized.len(),
            endpoint = %self.endpoint,
            "sending batch"
        );
        if self.log_bodies {
            debug!(body = %redact(body.clone()), "request body");
        }

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(serialized)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if self.log_bodies {
            match serde_json::from_str::<serde_json::Value>(&text) {
                Ok(json) => debug!(body = %redact(json), "response body"),
                Err(_) => debug!(body = %text, "response body"),
            }
        }

        if !status.is_success() {
            error!(
                status = status.as_u16(),
                endpoint = %self.endpoint,
                "error delivering batch"
            );
            return Err(AicmError::api_request(status.as_u16(), &text));
        }

        info!(status = status.as_u16(), endpoint = %self.endpoint, "batch delivered");
        Ok(serde_json::from_str(&text)?)
    }
}

/// Replace credential-bearing values before a body reaches the logs.
pub fn redact(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.into_iter()
                .map(|(key, value)| {
                    if matches!(
                        key.to_ascii_lowercase().as_str(),
                        "authorization" | "api_key" | "apikey"
                    ) {
                        (key, serde_json::Value::String("<redacted>".to_owned()))
                    } else {
                        (key, redact(value))
                    }
                })
                .collect(),
        ),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(redact).collect())
        }
        other => other,
    }
}
