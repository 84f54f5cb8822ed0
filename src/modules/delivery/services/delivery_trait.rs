use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core::error::{AicmError, AicmResult};
use crate::modules::delivery::models::{DeliveryStats, TrackResponse};
use crate::modules::tracker::models::UsageRecord;

/// The three delivery strategies, distinguished by durability and
/// back-pressure behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryType {
    Immediate,
    MemQueue,
    PersistentQueue,
}

impl DeliveryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryType::Immediate => "immediate",
            DeliveryType::MemQueue => "mem_queue",
            DeliveryType::PersistentQueue => "persistent_queue",
        }
    }
}

impl fmt::Display for DeliveryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryType {
    type Err = AicmError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "immediate" => Ok(DeliveryType::Immediate),
            "mem_queue" => Ok(DeliveryType::MemQueue),
            "persistent_queue" => Ok(DeliveryType::PersistentQueue),
            other => Err(AicmError::missing_configuration(format!(
                "unsupported delivery type: {other}"
            ))),
        }
    }
}

/// Pre-built request body accepted by [`Delivery::deliver`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackBody {
    pub tracked: Vec<UsageRecord>,
}

/// What an engine did with an enqueued record.
#[derive(Debug, Default)]
pub struct EnqueueOutcome {
    /// Parsed server response; present only for the immediate strategy.
    pub response: Option<TrackResponse>,
    /// Durable row id; present only for the persistent strategy.
    pub row_id: Option<i64>,
}

/// Contract shared by every delivery strategy.
///
/// `enqueue` runs the limit pre-check before buffering and fails with
/// [`AicmError::UsageLimitExceeded`] on a match; no record is queued in that
/// case. `stop` is idempotent and blocks until in-flight work completes or
/// is durably persisted.
#[async_trait]
pub trait Delivery: Send + Sync {
    fn delivery_type(&self) -> DeliveryType;

    /// Hand a record to the engine for shipment.
    async fn enqueue(&self, record: UsageRecord) -> AicmResult<EnqueueOutcome>;

    /// Hand a pre-built batch body to the engine; each record goes through
    /// the `enqueue` path.
    async fn deliver(&self, body: TrackBody) -> AicmResult<()> {
        for record in body.tracked {
            self.enqueue(record).await?;
        }
        Ok(())
    }

    /// Initiate graceful shutdown.
    async fn stop(&self) -> AicmResult<()>;

    /// Observability snapshot.
    async fn stats(&self) -> AicmResult<DeliveryStats>;
}
