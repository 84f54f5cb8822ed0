use std::sync::Arc;

use futures_util::Stream;
use tracing::info;

use crate::config::TrackerConfig;
use crate::core::error::{AicmError, AicmResult};
use crate::modules::delivery::models::DeliveryStats;
use crate::modules::delivery::services::delivery_trait::{Delivery, DeliveryType, EnqueueOutcome};
use crate::modules::delivery::services::factory::create_delivery;
use crate::modules::limits::services::limit_cache::TriggeredLimitsCache;
use crate::modules::store::IniStore;
use crate::modules::tracker::models::{TrackOptions, UsageRecord};
use crate::modules::tracker::services::stream_tracker;
use crate::modules::tracker::services::usage_extractor::{GenericUsageExtractor, UsageExtractor};

/// One uniform entry point for usage tracking, independent of the
/// configured delivery strategy.
///
/// Safe to share across tasks behind an [`Arc`]; each call performs at most
/// one limits-cache read and one enqueue.
pub struct Tracker {
    config: TrackerConfig,
    cache: TriggeredLimitsCache,
    delivery: Arc<dyn Delivery>,
    extractor: Arc<dyn UsageExtractor>,
}

impl Tracker {
    /// Build a tracker, resolving the delivery strategy from the config or
    /// the INI file and recording the choice back under `[tracker]`.
    pub async fn new(config: TrackerConfig) -> AicmResult<Self> {
        if config.api_key.is_empty() {
            return Err(AicmError::missing_configuration(
                "API key not provided. Set AICM_API_KEY or pass an explicit key",
            ));
        }
        let ini = IniStore::new(&config.ini_path);
        let cache = TriggeredLimitsCache::new(ini.clone(), config.limit_policy);

        let delivery_type = match config.delivery_type {
            Some(delivery_type) => delivery_type,
            None => ini
                .get("tracker", "delivery_manager")?
                .map(|name| name.parse())
                .transpose()?
                .unwrap_or(DeliveryType::Immediate),
        };
        let delivery = create_delivery(delivery_type, &config, cache.clone()).await?;
        ini.set("tracker", "delivery_manager", delivery_type.as_str())?;
        info!(delivery = %delivery_type, "tracker started");

        Ok(Self {
            config,
            cache,
            delivery,
            extractor: Arc::new(GenericUsageExtractor),
        })
    }

    /// Build a tracker from `AICM_*` environment variables and the INI file.
    pub async fn from_env() -> AicmResult<Self> {
        Self::new(TrackerConfig::from_env()?).await
    }

    /// Build a tracker around an existing delivery engine (tests, custom
    /// strategies).
    pub fn with_delivery(config: TrackerConfig, delivery: Arc<dyn Delivery>) -> Self {
        let ini = IniStore::new(&config.ini_path);
        let cache = TriggeredLimitsCache::new(ini, config.limit_policy);
        Self {
            config,
            cache,
            delivery,
            extractor: Arc::new(GenericUsageExtractor),
        }
    }

    /// Swap in a vendor-specific extractor.
    pub fn with_extractor(mut self, extractor: Arc<dyn UsageExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn delivery(&self) -> &Arc<dyn Delivery> {
        &self.delivery
    }

    pub fn limits_cache(&self) -> &TriggeredLimitsCache {
        &self.cache
    }

    pub(crate) fn extractor(&self) -> &Arc<dyn UsageExtractor> {
        &self.extractor
    }

    /// Track one usage payload. Returns the record's `response_id`.
    ///
    /// The enqueue path runs the limit pre-check first: a matching `limit`
    /// threshold raises [`AicmError::UsageLimitExceeded`] and nothing is
    /// queued. In immediate mode server errors and the no-cost-tracked
    /// condition propagate; queue modes only surface pre-check and local
    /// queue errors.
    pub async fn track(
        &self,
        api_id: &str,
        service_key: Option<&str>,
        usage: serde_json::Value,
        opts: TrackOptions,
    ) -> AicmResult<String> {
        let (response_id, _) = self.track_detailed(api_id, service_key, usage, opts).await?;
        Ok(response_id)
    }

    /// Like [`Tracker::track`], additionally returning the enqueue outcome
    /// (the parsed server response in immediate mode).
    pub async fn track_detailed(
        &self,
        api_id: &str,
        service_key: Option<&str>,
        usage: serde_json::Value,
        opts: TrackOptions,
    ) -> AicmResult<(String, EnqueueOutcome)> {
        let record = UsageRecord::build(api_id, service_key, usage, opts)?;
        let response_id = record.response_id.clone();
        let outcome = self.delivery.enqueue(record).await?;
        Ok((response_id, outcome))
    }

    /// Track a vendor-shaped response object: pull `usage` and `model` via
    /// the extractor, derive `service_key = "{vendor}::{model}"`, reuse the
    /// vendor's response id for correlation, then track. Returns the
    /// `response_id` used.
    pub async fn track_llm_usage(
        &self,
        api_id: &str,
        response: &serde_json::Value,
        opts: TrackOptions,
    ) -> AicmResult<String> {
        let extracted = self.extractor.extract(api_id, response).ok_or_else(|| {
            AicmError::InvalidRecord(format!("no usage found in {api_id} response"))
        })?;
        let mut opts = opts;
        if opts.response_id.is_none() {
            opts.response_id = extracted.response_id;
        }
        self.track(api_id, extracted.service_key.as_deref(), extracted.usage, opts)
            .await
    }

    /// Wrap a vendor event stream: events pass through unchanged, and at
    /// most once per stream the observed usage is extracted and enqueued.
    /// Delivery failures inside the stream are logged, never surfaced to
    /// the consumer.
    pub fn track_stream<S>(
        self: Arc<Self>,
        api_id: impl Into<String>,
        stream: S,
        opts: TrackOptions,
    ) -> impl Stream<Item = serde_json::Value> + Send
    where
        S: Stream<Item = serde_json::Value> + Send + 'static,
    {
        stream_tracker::wrap(self, api_id.into(), stream, opts)
    }

    /// Delivery stats snapshot.
    pub async fn stats(&self) -> AicmResult<DeliveryStats> {
        self.delivery.stats().await
    }

    /// Gracefully shut down the delivery engine. Idempotent.
    pub async fn stop(&self) -> AicmResult<()> {
        self.delivery.stop().await
    }
}
