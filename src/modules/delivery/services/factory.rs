use std::sync::Arc;

use crate::config::TrackerConfig;
use crate::core::error::AicmResult;
use crate::modules::delivery::services::delivery_trait::{Delivery, DeliveryType};
use crate::modules::delivery::services::immediate::ImmediateDelivery;
use crate::modules::delivery::services::mem_queue::MemQueueDelivery;
use crate::modules::delivery::services::persistent::PersistentDelivery;
use crate::modules::limits::services::limit_cache::TriggeredLimitsCache;

/// Build a delivery engine for the requested strategy. Queue-based
/// strategies spawn their worker here, so this must run inside a tokio
/// runtime.
pub async fn create_delivery(
    delivery_type: DeliveryType,
    config: &TrackerConfig,
    cache: TriggeredLimitsCache,
) -> AicmResult<Arc<dyn Delivery>> {
    match delivery_type {
        DeliveryType::Immediate => Ok(Arc::new(ImmediateDelivery::new(config, cache)?)),
        DeliveryType::MemQueue => Ok(Arc::new(MemQueueDelivery::new(config, cache)?)),
        DeliveryType::PersistentQueue => {
            Ok(Arc::new(PersistentDelivery::new(config, cache).await?))
        }
    }
}
