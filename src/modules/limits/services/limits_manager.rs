use tracing::info;

use crate::core::error::AicmResult;
use crate::modules::limits::models::{TriggeredLimit, UsageLimitIn, UsageLimitOut};
use crate::modules::limits::services::api_client::CostManagerClient;
use crate::modules::limits::services::limit_cache::TriggeredLimitsCache;

/// Orchestrates cache refresh and limit lookups.
///
/// The core never schedules refresh; callers invoke it on startup, after a
/// delivery without a `triggered_limits` echo, or on demand.
pub struct LimitsManager {
    client: CostManagerClient,
    cache: TriggeredLimitsCache,
}

impl LimitsManager {
    pub fn new(client: CostManagerClient, cache: TriggeredLimitsCache) -> Self {
        Self { client, cache }
    }

    pub fn cache(&self) -> &TriggeredLimitsCache {
        &self.cache
    }

    /// Fetch the current signed envelope and overwrite the local cache.
    /// The server may wrap the envelope in an outer `triggered_limits` key.
    pub async fn refresh(&self) -> AicmResult<()> {
        let payload = self.client.get_triggered_limits().await?;
        let envelope = match payload {
            serde_json::Value::Object(ref map) if map.contains_key("triggered_limits") => {
                map["triggered_limits"].clone()
            }
            other => other,
        };
        self.cache.write(&envelope)?;
        info!("triggered limits cache refreshed");
        Ok(())
    }

    /// Return the triggered limit events matching the given scope.
    pub fn check(
        &self,
        api_key_id: Option<&str>,
        service_key: Option<&str>,
        customer_key: Option<&str>,
    ) -> AicmResult<Vec<TriggeredLimit>> {
        self.cache.query(api_key_id, service_key, customer_key)
    }

    // Usage limit management pass-throughs.

    pub async fn list_usage_limits(&self) -> AicmResult<Vec<UsageLimitOut>> {
        self.client.list_usage_limits().await
    }

    pub async fn create_usage_limit(&self, data: &UsageLimitIn) -> AicmResult<UsageLimitOut> {
        self.client.create_usage_limit(data).await
    }

    pub async fn get_usage_limit(&self, limit_id: &str) -> AicmResult<UsageLimitOut> {
        self.client.get_usage_limit(limit_id).await
    }

    pub async fn update_usage_limit(
        &self,
        limit_id: &str,
        data: &UsageLimitIn,
    ) -> AicmResult<UsageLimitOut> {
        self.client.update_usage_limit(limit_id, data).await
    }

    pub async fn delete_usage_limit(&self, limit_id: &str) -> AicmResult<()> {
        self.client.delete_usage_limit(limit_id).await
    }
}
