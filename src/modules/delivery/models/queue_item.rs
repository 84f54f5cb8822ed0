use serde::{Deserialize, Serialize};
use std::fmt;

/// Row state in the durable queue.
///
/// `queued` rows with `scheduled_at <= now` are eligible for pickup;
/// `processing` rows are claimed by a worker but not yet acknowledged;
/// `failed` is terminal and excluded from pickup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Queued,
    Processing,
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Queued => "queued",
            QueueStatus::Processing => "processing",
            QueueStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A queued record as exposed by the persistent strategy's introspection
/// helpers.
#[derive(Debug, Clone, Serialize)]
pub struct QueueItem {
    pub id: i64,
    pub record: serde_json::Value,
    pub retry_count: i64,
    pub scheduled_at: f64,
}

/// Operational snapshot of the durable queue: per-status row counts plus
/// worker liveness.
#[derive(Debug, Clone, Serialize)]
pub struct QueueHealth {
    pub counts: std::collections::BTreeMap<String, i64>,
    pub worker_alive: bool,
}

/// Observability snapshot shared by every delivery strategy.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeliveryStats {
    pub queued: u64,
    pub in_flight: u64,
    pub total_sent: u64,
    pub total_failed: u64,
    pub last_error: Option<String>,
    pub worker_alive: bool,
}
