pub mod models;
pub mod services;

pub use models::{
    Period, ServiceKey, ThresholdType, TriggeredLimit, UsageLimitIn, UsageLimitOut, VendorScope,
};
pub use services::{CostManagerClient, LimitDecodePolicy, LimitsManager, TriggeredLimitsCache};
