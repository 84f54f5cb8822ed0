use async_trait::async_trait;
use tracing::error;

use crate::config::TrackerConfig;
use crate::core::error::{AicmError, AicmResult};
use crate::modules::delivery::models::DeliveryStats;
use crate::modules::delivery::services::delivery_trait::{Delivery, DeliveryType, EnqueueOutcome};
use crate::modules::delivery::services::dispatcher::HttpDispatcher;
use crate::modules::delivery::services::shipper::Shipper;
use crate::modules::limits::services::limit_cache::TriggeredLimitsCache;
use crate::modules::tracker::models::UsageRecord;

/// Attempts per send on the synchronous path.
const IMMEDIATE_MAX_ATTEMPTS: u32 = 3;

/// Synchronous delivery: every record ships on the caller's task with
/// bounded retries. Back-pressure lands directly on the caller, and server
/// errors propagate instead of being absorbed by a queue.
pub struct ImmediateDelivery {
    shipper: Shipper,
}

impl ImmediateDelivery {
    pub fn new(config: &TrackerConfig, cache: TriggeredLimitsCache) -> AicmResult<Self> {
        let dispatcher = HttpDispatcher::new(
            config.track_endpoint(),
            config.api_key.clone(),
            config.timeout,
            IMMEDIATE_MAX_ATTEMPTS,
            config.log_bodies,
        )?;
        let shipper = Shipper::new(dispatcher, cache, config.effective_api_key_id().to_owned());
        Ok(Self { shipper })
    }
}

#[async_trait]
impl Delivery for ImmediateDelivery {
    fn delivery_type(&self) -> DeliveryType {
        DeliveryType::Immediate
    }

    async fn enqueue(&self, record: UsageRecord) -> AicmResult<EnqueueOutcome> {
        self.shipper.precheck(&record)?;
        let response_id = record.response_id.clone();
        let value = serde_json::to_value(&record)?;
        let response = match self.shipper.ship(vec![value]).await {
            Ok(response) => response,
            Err(err) => {
                error!(error = %err, "immediate delivery failed");
                return Err(err);
            }
        };
        // A 2xx that produced neither cost events, errors, nor an async
        // status means nothing was tracked; surface that distinctly.
        if response.results.first().is_some_and(|r| r.is_empty_success()) {
            return Err(AicmError::NoCostsTracked(response_id));
        }
        Ok(EnqueueOutcome {
            response: Some(response),
            row_id: None,
        })
    }

    async fn stop(&self) -> AicmResult<()> {
        // Nothing to drain; the HTTP client is dropped with the value.
        Ok(())
    }

    async fn stats(&self) -> AicmResult<DeliveryStats> {
        Ok(self.shipper.stats(0, false))
    }
}
