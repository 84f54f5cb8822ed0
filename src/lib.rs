//! AICostManager Client SDK
//!
//! Captures per-call usage records for AI vendor APIs and ships them to the
//! AICostManager ingestion endpoint, enforcing server-computed usage limits
//! locally along the way.

pub mod config;
pub mod core;
pub mod modules;

// Re-export commonly used types
pub use config::TrackerConfig;
pub use core::{AicmError, AicmResult, Timestamp};
pub use modules::delivery::{
    create_delivery, Delivery, DeliveryStats, DeliveryType, EnqueueOutcome, EventOutcome,
    ImmediateDelivery, MemQueueDelivery, PersistentDelivery, QueueHealth, TrackBody,
    TrackResponse, TrackResult,
};
pub use modules::limits::{
    CostManagerClient, LimitDecodePolicy, LimitsManager, Period, ThresholdType, TriggeredLimit,
    TriggeredLimitsCache, UsageLimitIn, UsageLimitOut,
};
pub use modules::store::IniStore;
pub use modules::tracker::{TrackOptions, Tracker, UsageExtractor, UsageRecord};
