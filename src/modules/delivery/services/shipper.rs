use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::error;

use crate::core::error::{AicmError, AicmResult};
use crate::modules::delivery::models::{DeliveryStats, TrackResponse};
use crate::modules::delivery::services::dispatcher::HttpDispatcher;
use crate::modules::limits::services::limit_cache::TriggeredLimitsCache;
use crate::modules::tracker::models::UsageRecord;

/// Key wrapping every batch body, fixed by the server contract.
pub const BODY_KEY: &str = "tracked";

/// Shared base for the three delivery strategies, by composition rather
/// than inheritance: the limit pre-check hook, the wire body shape, the
/// `triggered_limits` echo handling and the common counters all live here.
pub struct Shipper {
    dispatcher: HttpDispatcher,
    cache: TriggeredLimitsCache,
    api_key_id: String,
    counters: Arc<Counters>,
}

#[derive(Default)]
struct Counters {
    in_flight: AtomicU64,
    total_sent: AtomicU64,
    total_failed: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl Shipper {
    pub fn new(
        dispatcher: HttpDispatcher,
        cache: TriggeredLimitsCache,
        api_key_id: String,
    ) -> Self {
        Self {
            dispatcher,
            cache,
            api_key_id,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn cache(&self) -> &TriggeredLimitsCache {
        &self.cache
    }

    /// Limit pre-check run on every enqueue path, before any buffering.
    /// Matching `limit` thresholds abort the call; matching `alert`
    /// thresholds are logged by the cache and ignored.
    pub fn precheck(&self, record: &UsageRecord) -> AicmResult<()> {
        let blocking = self.cache.blocking_matches(
            Some(&self.api_key_id),
            record.service_key.as_deref(),
            record.client_customer_key.as_deref(),
        )?;
        if !blocking.is_empty() {
            return Err(AicmError::UsageLimitExceeded(blocking));
        }
        Ok(())
    }

    /// Ship one batch. On success the `triggered_limits` echo (when
    /// present) overwrites the local cache; on failure the batch is
    /// counted failed and the error recorded, leaving requeue decisions to
    /// the caller.
    pub async fn ship(&self, records: Vec<serde_json::Value>) -> AicmResult<TrackResponse> {
        let count = records.len() as u64;
        let body = serde_json::json!({ BODY_KEY: records });

        self.counters.in_flight.fetch_add(count, Ordering::Relaxed);
        let outcome = self.dispatcher.post(&body).await;
        self.counters.in_flight.fetch_sub(count, Ordering::Relaxed);

        match outcome {
            Ok(response) => {
                self.counters.total_sent.fetch_add(count, Ordering::Relaxed);
                if let Some(envelope) = &response.triggered_limits {
                    if let Err(err) = self.cache.write(envelope) {
                        error!(error = %err, "failed to persist triggered limits echo");
                    }
                }
                Ok(response)
            }
            Err(err) => {
                self.counters
                    .total_failed
                    .fetch_add(count, Ordering::Relaxed);
                *self.counters.last_error.lock().unwrap() = Some(err.to_string());
                Err(err)
            }
        }
    }

    /// Count a record dropped without a send attempt (full in-memory queue).
    pub fn record_dropped(&self) {
        self.counters.total_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Assemble the public stats snapshot around the shared counters.
    pub fn stats(&self, queued: u64, worker_alive: bool) -> DeliveryStats {
        DeliveryStats {
            queued,
            in_flight: self.counters.in_flight.load(Ordering::Relaxed),
            total_sent: self.counters.total_sent.load(Ordering::Relaxed),
            total_failed: self.counters.total_failed.load(Ordering::Relaxed),
            last_error: self.counters.last_error.lock().unwrap().clone(),
            worker_alive,
        }
    }
}
